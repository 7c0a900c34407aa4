//! DynamoDB attribute-value JSON <-> plain JSON items.
//!
//! Table items travel through the crate as plain `serde_json` maps. Only the
//! wire format (DynamoDB requests and change-stream images) uses the typed
//! `{"S": ..}` / `{"N": ..}` encoding.

use serde_json::{Map, Number, Value};

/// A table item with plain JSON attribute values.
pub type Item = Map<String, Value>;

pub fn marshal_item(item: &Item) -> Value {
    Value::Object(
        item.iter()
            .map(|(name, value)| (name.clone(), marshal_value(value)))
            .collect(),
    )
}

pub fn marshal_value(value: &Value) -> Value {
    match value {
        Value::Null => serde_json::json!({ "NULL": true }),
        Value::Bool(flag) => serde_json::json!({ "BOOL": flag }),
        Value::Number(number) => serde_json::json!({ "N": number.to_string() }),
        Value::String(text) => serde_json::json!({ "S": text }),
        Value::Array(values) => {
            serde_json::json!({ "L": values.iter().map(marshal_value).collect::<Vec<_>>() })
        }
        Value::Object(map) => serde_json::json!({ "M": marshal_item(map) }),
    }
}

pub fn unmarshal_item(image: &Value) -> Result<Item, String> {
    let map = image
        .as_object()
        .ok_or_else(|| "attribute map is not an object".to_string())?;
    map.iter()
        .map(|(name, value)| {
            unmarshal_value(value)
                .map(|plain| (name.clone(), plain))
                .map_err(|error| format!("attribute {name}: {error}"))
        })
        .collect()
}

pub fn unmarshal_value(value: &Value) -> Result<Value, String> {
    let typed = value
        .as_object()
        .filter(|map| map.len() == 1)
        .ok_or_else(|| format!("expected a single-key type descriptor, got {value}"))?;

    let (kind, inner) = typed
        .iter()
        .next()
        .ok_or_else(|| "empty type descriptor".to_string())?;

    match kind.as_str() {
        "S" => inner
            .as_str()
            .map(|text| Value::String(text.to_string()))
            .ok_or_else(|| "S value is not a string".to_string()),
        "N" => {
            let raw = inner
                .as_str()
                .ok_or_else(|| "N value is not a string".to_string())?;
            parse_number(raw).map(Value::Number)
        }
        "BOOL" => inner
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| "BOOL value is not a boolean".to_string()),
        "NULL" => Ok(Value::Null),
        "L" => inner
            .as_array()
            .ok_or_else(|| "L value is not an array".to_string())?
            .iter()
            .map(unmarshal_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        "M" => unmarshal_item(inner).map(Value::Object),
        "SS" => inner
            .as_array()
            .cloned()
            .map(Value::Array)
            .ok_or_else(|| "SS value is not an array".to_string()),
        other => Err(format!("unsupported attribute type {other}")),
    }
}

fn parse_number(raw: &str) -> Result<Number, String> {
    if let Ok(integer) = raw.parse::<i64>() {
        return Ok(Number::from(integer));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| format!("invalid number {raw}"))
}

/// Read a string attribute.
pub fn string_attr<'a>(item: &'a Item, name: &str) -> Option<&'a str> {
    item.get(name).and_then(Value::as_str)
}
