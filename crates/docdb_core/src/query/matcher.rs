//! MongoDB-flavoured selector matching.
//!
//! Ported field-for-field from `queryProcessor.py`'s `match`/
//! `evaluate_condition`: top-level `$and`/`$or`/`$nor`/`$not` are checked in
//! that priority order before falling back to per-field conjunction; a
//! per-field condition that is itself an object is read as an operator map
//! (`$eq`, `$gt`, ...), otherwise it's a direct equality test.
//!
//! The executor's own `find`/`update`/`delete` paths only ever need strict
//! conjunctive equality (see [`matches_equality`]) and don't reach for this
//! module, but it's exposed standalone since the query-string parser accepts
//! the richer operator grammar.

use serde_json::Value;

/// Strict conjunctive equality: every `(k, v)` pair in `selector` must equal
/// the document's value at `k`. An empty selector matches everything.
#[must_use]
pub fn matches_equality(doc: &Value, selector: &Value) -> bool {
    let Some(selector) = selector.as_object() else {
        return true;
    };
    let Some(doc) = doc.as_object() else {
        return false;
    };
    selector.iter().all(|(k, v)| doc.get(k) == Some(v))
}

/// Full operator-aware match, mirroring the source's `match(doc, query)`.
#[must_use]
pub fn matches(doc: &Value, query: &Value) -> bool {
    let Some(query) = query.as_object() else {
        return matches_equality(doc, query);
    };

    if let Some(Value::Array(subqueries)) = query.get("$and") {
        return subqueries.iter().all(|q| matches(doc, q));
    }
    if let Some(Value::Array(subqueries)) = query.get("$or") {
        return subqueries.iter().any(|q| matches(doc, q));
    }
    if let Some(Value::Array(subqueries)) = query.get("$nor") {
        return !subqueries.iter().any(|q| matches(doc, q));
    }
    if let Some(sub) = query.get("$not") {
        return !matches(doc, sub);
    }

    query.iter().all(|(field, condition)| evaluate_condition(doc, field, condition))
}

fn evaluate_condition(doc: &Value, field: &str, condition: &Value) -> bool {
    let value = doc.get(field);

    let Some(ops) = condition.as_object() else {
        return value == Some(condition);
    };

    ops.iter().all(|(op, expected)| evaluate_operator(doc, field, value, op, expected))
}

fn evaluate_operator(doc: &Value, field: &str, value: Option<&Value>, op: &str, expected: &Value) -> bool {
    match op {
        "$eq" => value == Some(expected),
        "$ne" => value != Some(expected),
        "$gt" => value.is_some_and(|v| json_gt(v, expected)),
        "$lt" => value.is_some_and(|v| json_lt(v, expected)),
        "$gte" => value.is_some_and(|v| !json_lt(v, expected)),
        "$lte" => value.is_some_and(|v| !json_gt(v, expected)),
        "$in" => expected.as_array().is_some_and(|items| items.contains(&value.cloned().unwrap_or(Value::Null))),
        "$nin" => !expected.as_array().is_some_and(|items| items.contains(&value.cloned().unwrap_or(Value::Null))),
        "$exists" => {
            let exists = doc.as_object().is_some_and(|o| o.contains_key(field));
            exists == expected.as_bool().unwrap_or(true)
        }
        "$regex" => match (value.and_then(Value::as_str), expected.as_str()) {
            (Some(text), Some(pattern)) => regex::Regex::new(pattern).is_ok_and(|re| re.is_match(text)),
            _ => false,
        },
        "$not" => !evaluate_condition(doc, field, expected),
        "$type" => value.is_some_and(|v| type_name(v) == expected.as_str().unwrap_or("")),
        "$size" => match (value.and_then(Value::as_array), expected.as_u64()) {
            (Some(arr), Some(n)) => arr.len() as u64 == n,
            _ => false,
        },
        "$all" => match (value.and_then(Value::as_array), expected.as_array()) {
            (Some(arr), Some(items)) => items.iter().all(|item| arr.contains(item)),
            _ => false,
        },
        "$elemMatch" => value
            .and_then(Value::as_array)
            .is_some_and(|arr| arr.iter().any(|elem| elem.is_object() && matches(elem, expected))),
        "$mod" => match (value.and_then(Value::as_f64), expected.as_array()) {
            (Some(v), Some(pair)) if pair.len() == 2 => {
                let divisor = pair[0].as_f64().unwrap_or(1.0);
                let remainder = pair[1].as_f64().unwrap_or(0.0);
                divisor != 0.0 && v % divisor == remainder
            }
            _ => false,
        },
        _ => false,
    }
}

fn json_gt(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x > y,
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x > y,
            _ => false,
        },
    }
}

fn json_lt(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x < y,
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x < y,
            _ => false,
        },
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "double",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
