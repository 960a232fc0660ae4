//! Bridges the JSON-shaped rows the index overlay's public API speaks
//! (spec.md section 4.7: "Dynamic typing around `Value` and JSON-shaped rows
//! maps to tagged sum types") to [`tablestore::value::Value`], the typed cell
//! value the wire client and the expression AST both work with.
//!
//! Grounded in `examples/original_source/src/ots_static_index/type_delegates.h`'s
//! `Value` class: `INVALID, INF_MIN, INF_MAX, INTEGER, STRING, BOOLEAN,
//! DOUBLE` — JSON objects and arrays have no counterpart there either, so
//! (per that header's own doc comment on `Insert`) they get stringified
//! rather than rejected.

use tablestore::value::Value;

/// One field of a JSON-shaped row: the key/value pairs `Insert`, `Find`'s
/// result rows and `Update`'s `new_data` all exchange.
pub type JsonRow = serde_json::Map<String, serde_json::Value>;

pub fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(bytes::Bytes::from(s.clone().into_bytes())),
        // objects and arrays have no Value counterpart; stringify them, matching
        // the original SDK's Insert() handling of non-scalar fields.
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            Value::String(bytes::Bytes::from(v.to_string().into_bytes()))
        }
    }
}

pub fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Integer(i) => serde_json::Value::Number((*i).into()),
        Value::String(s) => serde_json::Value::String(String::from_utf8_lossy(s).into_owned()),
        Value::Binary(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Double(d) => serde_json::Number::from_f64(*d).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
        Value::InfMin | Value::InfMax | Value::AutoIncrement | Value::None => serde_json::Value::Null,
    }
}

/// `Concat`'s and error messages' string rendering of a value (spec.md:
/// `Concat(e1, …, en, sep='|')`).
pub fn value_to_concat_string(v: &Value) -> String {
    match v {
        Value::Integer(i) => i.to_string(),
        Value::String(s) => String::from_utf8_lossy(s).into_owned(),
        Value::Binary(b) => String::from_utf8_lossy(b).into_owned(),
        Value::Boolean(b) => b.to_string(),
        Value::Double(d) => d.to_string(),
        Value::InfMin => "-inf".to_string(),
        Value::InfMax => "+inf".to_string(),
        Value::AutoIncrement | Value::None => String::new(),
    }
}
