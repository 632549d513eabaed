//! WAL record shape.

use crate::transaction::IsolationLevel;
use crate::types::TransactionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One write-ahead log entry.
///
/// Serialized as a single line of JSON per record (§4.3). `before_state` and
/// `after_state` carry whole-document snapshots rather than field-level
/// diffs, mirroring `log_operation`'s payload shape, so that recovery's undo
/// pass can restore a document by simple substitution rather than patching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Transaction this entry belongs to.
    pub transaction_id: TransactionId,
    /// When the operation was logged.
    pub timestamp: DateTime<Utc>,
    /// Operation name (`"insert"`, `"update"`, `"delete"`, `"commit"`,
    /// `"abort"`, `"create_database"`, `"create_collection"`, ...).
    pub operation: String,
    /// Database the operation applies to.
    pub db_name: String,
    /// Collection the operation applies to, if any.
    pub collection: Option<String>,
    /// Document id the operation applies to, if any.
    pub document_id: Option<String>,
    /// Document contents before the operation, if any (used by undo).
    pub before_state: Option<Value>,
    /// Document contents after the operation, if any (used by redo).
    pub after_state: Option<Value>,
    /// Isolation level the owning transaction was running under.
    pub isolation_level: IsolationLevel,
}

impl WalRecord {
    /// Builds a record stamped with the current time.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transaction_id: TransactionId,
        operation: impl Into<String>,
        db_name: impl Into<String>,
        collection: Option<String>,
        document_id: Option<String>,
        before_state: Option<Value>,
        after_state: Option<Value>,
        isolation_level: IsolationLevel,
    ) -> Self {
        Self {
            transaction_id,
            timestamp: Utc::now(),
            operation: operation.into(),
            db_name: db_name.into(),
            collection,
            document_id,
            before_state,
            after_state,
            isolation_level,
        }
    }

    /// Serializes this record to a single JSON line (no trailing newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses a single JSON line into a record.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn line_roundtrip_preserves_fields() {
        let record = WalRecord::new(
            TransactionId::new(),
            "insert",
            "mydb",
            Some("users".to_string()),
            Some("abc".to_string()),
            None,
            Some(json!({"_id": "abc", "name": "ada"})),
            IsolationLevel::RepeatableRead,
        );
        let line = record.to_line().unwrap();
        assert!(!line.contains('\n'));
        let decoded = WalRecord::from_line(&line).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn commit_record_has_no_document_fields() {
        let record = WalRecord::new(
            TransactionId::new(),
            "commit",
            "mydb",
            None,
            None,
            None,
            None,
            IsolationLevel::Serializable,
        );
        let line = record.to_line().unwrap();
        let decoded = WalRecord::from_line(&line).unwrap();
        assert!(decoded.collection.is_none());
        assert!(decoded.document_id.is_none());
    }
}
