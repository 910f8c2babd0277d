//! Attribute-value items.
//!
//! Items are stored (and streamed) as maps of typed attribute values in the
//! DynamoDB JSON shape (`{"S": "text"}`, `{"N": "42"}`, ...). Domain types
//! are converted through `serde_json::Value`, so any `Serialize` /
//! `Deserialize` type can be written as an item and read back.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use mds_core::keys::{ItemKey, PARTITION_KEY_NAME, RANGE_KEY_NAME};

use crate::error::{StateError, StateResult};

/// One stored record: attribute name → value.
pub type Item = BTreeMap<String, AttributeValue>;

/// Typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    S(String),
    /// Numbers travel as decimal strings.
    #[serde(rename = "N")]
    N(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
    #[serde(rename = "M")]
    M(BTreeMap<String, AttributeValue>),
    #[serde(rename = "NULL")]
    Null(bool),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => AttributeValue::Null(true),
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Number(n) => AttributeValue::N(n.to_string()),
            Value::String(s) => AttributeValue::S(s.clone()),
            Value::Array(items) => AttributeValue::L(items.iter().map(Self::from_json).collect()),
            Value::Object(fields) => AttributeValue::M(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON. A number that does not parse is kept as a string so
    /// lenient readers can still decide what to do with it.
    pub fn to_json(&self) -> Value {
        match self {
            AttributeValue::S(s) => Value::String(s.clone()),
            AttributeValue::N(raw) => parse_number(raw).unwrap_or_else(|| Value::String(raw.clone())),
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::L(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            AttributeValue::M(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<_, _>>(),
            ),
            AttributeValue::Null(_) => Value::Null,
        }
    }
}

fn parse_number(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    if let Ok(u) = raw.parse::<u64>() {
        return Some(Value::Number(u.into()));
    }
    raw.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
}

/// Serialize a domain value into an item. The value must serialize to a map.
pub fn to_item<T: Serialize>(value: &T) -> StateResult<Item> {
    match serde_json::to_value(value).map_err(|e| StateError::Serialize(e.to_string()))? {
        Value::Object(fields) => Ok(fields
            .iter()
            .map(|(k, v)| (k.clone(), AttributeValue::from_json(v)))
            .collect()),
        other => Err(StateError::Serialize(format!(
            "expected a map-shaped value, got {other}"
        ))),
    }
}

/// Deserialize a domain value from an item. Unknown attributes are ignored.
pub fn from_item<T: DeserializeOwned>(item: &Item) -> StateResult<T> {
    let fields: Map<String, Value> = item.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
    serde_json::from_value(Value::Object(fields)).map_err(|e| StateError::Deserialize(e.to_string()))
}

/// Stamp the physical key attributes onto an item.
pub fn with_key(mut item: Item, key: &ItemKey) -> Item {
    item.insert(PARTITION_KEY_NAME.to_string(), AttributeValue::S(key.pk.clone()));
    item.insert(RANGE_KEY_NAME.to_string(), AttributeValue::S(key.sk.clone()));
    item
}

/// Key-only item (the `Keys` part of a change record).
pub fn key_item(key: &ItemKey) -> Item {
    with_key(Item::new(), key)
}

/// Read the physical key back from an item's `PK`/`SK` attributes.
pub fn item_key(item: &Item) -> Option<ItemKey> {
    let pk = item.get(PARTITION_KEY_NAME)?.as_str()?;
    let sk = item.get(RANGE_KEY_NAME)?.as_str()?;
    Some(ItemKey {
        pk: pk.to_string(),
        sk: sk.to_string(),
    })
}
