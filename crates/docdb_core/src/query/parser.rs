//! Lenient `db.<collection>.<op>(<params>)` string parser.
//!
//! Grounded on `query_parser.py`'s `parse_raw_query`: a single top-level
//! regex peels off collection name, operation name, and a raw parameter
//! string, which is tolerant-normalized (single quotes, unquoted object
//! keys, trailing commas) into strict JSON before a standard JSON parser
//! takes over. `update`'s two-JSON-object parameter list uses the same
//! non-greedy/greedy split the source uses.

use crate::error::{CoreError, CoreResult};
use crate::query::operation::Operation;
use regex::Regex;
use serde_json::Value;

fn top_level_pattern() -> Regex {
    Regex::new(r"^db\.([A-Za-z0-9_]+)\.([A-Za-z0-9_]+)\((.*)\)$").expect("static pattern")
}

fn update_params_pattern() -> Regex {
    Regex::new(r"^\s*(\{.*?\})\s*,\s*(\{.*\})\s*$").expect("static pattern")
}

/// Normalizes single-quoted strings, unquoted object keys, and trailing
/// commas into strict JSON. Best-effort, matching the tolerance §6
/// describes rather than a full JSON5 grammar.
fn normalize(raw: &str) -> String {
    let single_quoted = Regex::new(r"'([^'\\]*)'").expect("static pattern");
    let unquoted_key = Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).expect("static pattern");
    let trailing_comma = Regex::new(r",\s*([}\]])").expect("static pattern");

    let step1 = single_quoted.replace_all(raw, "\"$1\"");
    let step2 = unquoted_key.replace_all(&step1, "$1\"$2\":");
    trailing_comma.replace_all(&step2, "$1").into_owned()
}

fn parse_json(raw: &str) -> CoreResult<Value> {
    let normalized = normalize(raw.trim());
    serde_json::from_str(&normalized).map_err(|err| CoreError::parse_error(format!("invalid query parameters: {err}")))
}

/// Parses one `db.collection.op(params)` string into a structured
/// [`Operation`].
pub fn parse(query_str: &str) -> CoreResult<Operation> {
    let cleaned = query_str.trim().replace(['\n', '\t'], " ");
    let captures = top_level_pattern()
        .captures(&cleaned)
        .ok_or_else(|| CoreError::parse_error("Invalid query format"))?;

    let collection = captures[1].to_string();
    let op = &captures[2];
    let params_str = captures[3].trim();

    match op {
        "find" => {
            let selector = if params_str.is_empty() || params_str == "{}" {
                Value::Object(Default::default())
            } else {
                parse_json(params_str)?
            };
            Ok(Operation::Find { collection, selector })
        }
        "insert" => {
            let document = parse_json(params_str)?;
            Ok(Operation::Insert { collection, document })
        }
        "insertMany" => {
            let value = parse_json(params_str)?;
            let documents = value
                .as_array()
                .ok_or_else(|| CoreError::parse_error("insertMany expects a JSON array"))?
                .clone();
            Ok(Operation::InsertMany { collection, documents })
        }
        "update" => {
            let captures = update_params_pattern()
                .captures(params_str)
                .ok_or_else(|| CoreError::parse_error("Invalid UPDATE format. Use: update({query}, {update})"))?;
            let query = parse_json(&captures[1])?;
            let update = parse_json(&captures[2])?;
            Ok(Operation::Update { collection, query, update })
        }
        "delete" => {
            let selector = if params_str.is_empty() || params_str == "{}" {
                Value::Object(Default::default())
            } else {
                parse_json(params_str)?
            };
            Ok(Operation::Delete { collection, selector })
        }
        "createCollection" => Ok(Operation::CreateCollection { collection }),
        "createIndex" => {
            let value = parse_json(params_str)?;
            let field = value
                .as_object()
                .and_then(|obj| obj.keys().next())
                .ok_or_else(|| CoreError::parse_error("createIndex expects {field: 1}"))?
                .clone();
            Ok(Operation::CreateIndex { collection, field })
        }
        "dropIndex" => {
            let field = params_str.trim_matches(|c| c == '"' || c == '\'').to_string();
            if field.is_empty() {
                return Err(CoreError::parse_error("dropIndex expects a field name"));
            }
            Ok(Operation::DropIndex { collection, field })
        }
        other => Err(CoreError::parse_error(format!("Unsupported operation '{other}'"))),
    }
}

/// Splits a `;`-separated batch string into trimmed, non-empty statements.
#[must_use]
pub fn split_statements(queries_str: &str) -> Vec<String> {
    queries_str
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_find_with_single_quotes_and_unquoted_keys() {
        let op = parse("db.users.find({name: 'John'})").unwrap();
        assert_eq!(
            op,
            Operation::Find {
                collection: "users".to_string(),
                selector: json!({"name": "John"}),
            }
        );
    }

    #[test]
    fn empty_find_matches_everything() {
        let op = parse("db.users.find({})").unwrap();
        assert_eq!(
            op,
            Operation::Find {
                collection: "users".to_string(),
                selector: json!({}),
            }
        );
    }

    #[test]
    fn parses_insert() {
        let op = parse("db.users.insert({name: 'John', age: 30})").unwrap();
        assert_eq!(
            op,
            Operation::Insert {
                collection: "users".to_string(),
                document: json!({"name": "John", "age": 30}),
            }
        );
    }

    #[test]
    fn parses_insert_many() {
        let op = parse("db.users.insertMany([{name: 'A'}, {name: 'B'},])").unwrap();
        assert_eq!(
            op,
            Operation::InsertMany {
                collection: "users".to_string(),
                documents: vec![json!({"name": "A"}), json!({"name": "B"})],
            }
        );
    }

    #[test]
    fn parses_update() {
        let op = parse("db.users.update({id: 1}, {$set: {age: 31}})").unwrap();
        assert_eq!(
            op,
            Operation::Update {
                collection: "users".to_string(),
                query: json!({"id": 1}),
                update: json!({"$set": {"age": 31}}),
            }
        );
    }

    #[test]
    fn parses_schema_operations() {
        assert_eq!(
            parse("db.users.createCollection()").unwrap(),
            Operation::CreateCollection { collection: "users".to_string() }
        );
        assert_eq!(
            parse("db.users.createIndex({email: 1})").unwrap(),
            Operation::CreateIndex { collection: "users".to_string(), field: "email".to_string() }
        );
        assert_eq!(
            parse("db.users.dropIndex(\"email\")").unwrap(),
            Operation::DropIndex { collection: "users".to_string(), field: "email".to_string() }
        );
    }

    #[test]
    fn malformed_query_is_a_parse_error() {
        assert!(parse("not a query").is_err());
    }

    #[test]
    fn splits_batch_statements() {
        let statements = split_statements("db.c.insert({_id: '1'}); db.c.insert({_id: '2'})");
        assert_eq!(statements.len(), 2);
    }

    fn field_name() -> impl proptest::strategy::Strategy<Value = String> {
        proptest::string::string_regex("[a-zA-Z_][a-zA-Z0-9_]{0,5}").unwrap()
    }

    fn scalar_literal() -> impl proptest::strategy::Strategy<Value = (String, Value)> {
        use proptest::prelude::*;
        prop_oneof![
            "[a-zA-Z0-9 ]{0,10}".prop_map(|s| (format!("'{s}'"), json!(s))),
            (-1000i64..1000).prop_map(|n| (n.to_string(), json!(n))),
        ]
    }

    proptest::proptest! {
        #[test]
        fn normalize_is_idempotent(pairs in proptest::collection::vec((field_name(), scalar_literal()), 0..5)) {
            let body: Vec<String> = pairs.iter().map(|(k, (raw, _))| format!("{k}: {raw}")).collect();
            let raw = format!("{{{}}}", body.join(", "));
            let once = normalize(&raw);
            let twice = normalize(&once);
            proptest::prop_assert_eq!(once, twice);
        }

        #[test]
        fn loose_object_round_trips_through_serde_json(pairs in proptest::collection::vec((field_name(), scalar_literal()), 0..5)) {
            let mut fields: std::collections::HashMap<String, (String, Value)> = std::collections::HashMap::new();
            for (k, v) in pairs {
                fields.insert(k, v);
            }
            let body: Vec<String> = fields.iter().map(|(k, (raw, _))| format!("{k}: {raw}")).collect();
            let raw = format!("{{{}}}", body.join(", "));
            let parsed = parse_json(&raw).unwrap();
            let object = parsed.as_object().unwrap();
            for (k, (_, expected)) in &fields {
                proptest::prop_assert_eq!(object.get(k), Some(expected));
            }
        }
    }
}
