//! Document validation: `_id` assignment and unique-constraint enforcement.
//!
//! Grounded on `document_validator.py`'s `DocumentValidator`: every inbound
//! document is stamped with an `_id` if it lacks one, then checked against
//! every unique index declared on its collection. An update is allowed to
//! keep its own value for a uniquely-indexed field (it's still the sole
//! owner), matching the source's `old_doc.get(field) == document[field]`
//! short-circuit.

use crate::error::CoreResult;
use crate::index::UniqueIndex;
use docdb_storage::Layout;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Validates and stamps documents against a collection's unique indexes.
pub struct DocumentValidator {
    layout: Arc<Layout>,
    db: String,
}

impl DocumentValidator {
    /// Builds a validator scoped to one database.
    #[must_use]
    pub fn new(layout: Arc<Layout>, db: impl Into<String>) -> Self {
        Self { layout, db: db.into() }
    }

    /// Ensures `document` carries an `_id`, generating a UUID if absent.
    pub fn ensure_id(&self, document: &mut Value) {
        if let Value::Object(map) = document {
            if !map.contains_key("_id") {
                map.insert("_id".to_string(), Value::String(Uuid::new_v4().to_string()));
            }
        }
    }

    /// Validates `document` against every unique index declared on
    /// `collection`, claiming each indexed value in the same pass (so a
    /// concurrent insert racing on the same value sees it already taken).
    ///
    /// `indexed_fields` is the collection's full unique-enforced field set —
    /// `_id` plus every field `create_index` has declared — so a duplicate
    /// on any one of them fails the whole call. If a later field conflicts,
    /// every field already claimed by this call is released before
    /// returning, leaving no partial claim behind.
    ///
    /// `old_doc` is the document's prior state, required for updates so a
    /// document keeping its own indexed value isn't rejected as a
    /// duplicate of itself.
    pub fn validate(
        &self,
        collection: &str,
        document: &Value,
        indexed_fields: &[String],
        old_doc: Option<&Value>,
    ) -> CoreResult<()> {
        let doc_id = document
            .get("_id")
            .and_then(Value::as_str)
            .expect("ensure_id stamps _id before validate is called");

        let mut claimed: Vec<&String> = Vec::new();
        for field in indexed_fields {
            let Some(value) = document.get(field) else {
                continue;
            };
            if let Some(old) = old_doc {
                if old.get(field) == Some(value) {
                    continue;
                }
            }
            let index = UniqueIndex::new(self.layout.clone(), &self.db, collection, field);
            if let Err(err) = index.check_and_claim(value, doc_id) {
                for done in &claimed {
                    if let Some(v) = document.get(done.as_str()) {
                        let _ = UniqueIndex::new(self.layout.clone(), &self.db, collection, done.as_str()).release(v);
                    }
                }
                return Err(err);
            }
            claimed.push(field);
        }
        Ok(())
    }

    /// Releases every unique index entry `document` held for `collection`,
    /// used on delete.
    pub fn release(&self, collection: &str, document: &Value, indexed_fields: &[String]) -> CoreResult<()> {
        for field in indexed_fields {
            let Some(value) = document.get(field) else {
                continue;
            };
            let index = UniqueIndex::new(self.layout.clone(), &self.db, collection, field);
            index.release(value)?;
        }
        Ok(())
    }

    /// Releases the old value of every indexed field that changed between
    /// `old` and `new`, called after `validate` has claimed the new values
    /// so an update doesn't leave the document's previous value squatting
    /// in the index forever.
    pub fn release_changed(&self, collection: &str, old: &Value, new: &Value, indexed_fields: &[String]) -> CoreResult<()> {
        for field in indexed_fields {
            let old_value = old.get(field);
            if old_value == new.get(field) {
                continue;
            }
            if let Some(value) = old_value {
                UniqueIndex::new(self.layout.clone(), &self.db, collection, field).release(value)?;
            }
        }
        Ok(())
    }
}
