//! # Wire Values
//!
//! ESP sends the same message shapes either as JSON text or as CBOR binary.
//! Both encodings are lowered into `WireValue` so message classification and
//! event parsing only deal with one dynamic representation.

use std::collections::BTreeMap;

use thiserror::Error;

/// Failure to decode a raw WebSocket payload.
#[derive(Debug, Error)]
pub enum WireError {
    /// The payload is not valid JSON.
    #[error("cannot unmarshal JSON message: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is not valid CBOR.
    #[error("cannot unmarshal CBOR message: {0}")]
    Cbor(String),
}

/// A dynamically typed value decoded from JSON or CBOR.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// JSON `null` / CBOR null or undefined.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integer; CBOR integers span the full 64-bit unsigned and signed range.
    Integer(i128),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes (CBOR only).
    Bytes(Vec<u8>),
    /// Ordered sequence.
    Array(Vec<WireValue>),
    /// Map with text keys; entries with non-text keys are dropped.
    Map(BTreeMap<String, WireValue>),
}

impl WireValue {
    /// Looks up a key of a map value.
    pub fn get(&self, key: &str) -> Option<&WireValue> {
        match self {
            WireValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Text content, if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Entries, if this is a map value.
    pub fn as_map(&self) -> Option<&BTreeMap<String, WireValue>> {
        match self {
            WireValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Elements, if this is an array value.
    pub fn as_array(&self) -> Option<&[WireValue]> {
        match self {
            WireValue::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Non-negative integer content.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            WireValue::Integer(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    /// Short name of the value's kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            WireValue::Null => "null",
            WireValue::Bool(_) => "bool",
            WireValue::Integer(_) => "integer",
            WireValue::Float(_) => "float",
            WireValue::Text(_) => "text",
            WireValue::Bytes(_) => "bytes",
            WireValue::Array(_) => "array",
            WireValue::Map(_) => "map",
        }
    }
}

impl From<serde_json::Value> for WireValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => WireValue::Null,
            serde_json::Value::Bool(b) => WireValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    WireValue::Integer(i128::from(i))
                } else if let Some(u) = n.as_u64() {
                    WireValue::Integer(i128::from(u))
                } else {
                    WireValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => WireValue::Text(s),
            serde_json::Value::Array(items) => WireValue::Array(items.into_iter().map(WireValue::from).collect()),
            serde_json::Value::Object(map) => {
                WireValue::Map(map.into_iter().map(|(k, v)| (k, WireValue::from(v))).collect())
            }
        }
    }
}

impl From<ciborium::Value> for WireValue {
    fn from(value: ciborium::Value) -> Self {
        match value {
            ciborium::Value::Integer(i) => WireValue::Integer(i128::from(i)),
            ciborium::Value::Bytes(b) => WireValue::Bytes(b),
            ciborium::Value::Float(f) => WireValue::Float(f),
            ciborium::Value::Text(s) => WireValue::Text(s),
            ciborium::Value::Bool(b) => WireValue::Bool(b),
            ciborium::Value::Null => WireValue::Null,
            ciborium::Value::Tag(_, inner) => WireValue::from(*inner),
            ciborium::Value::Array(items) => WireValue::Array(items.into_iter().map(WireValue::from).collect()),
            ciborium::Value::Map(entries) => WireValue::Map(
                entries
                    .into_iter()
                    .filter_map(|(k, v)| match k {
                        ciborium::Value::Text(key) => Some((key, WireValue::from(v))),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => WireValue::Null,
        }
    }
}

/// Decodes a JSON payload.
pub fn decode_json(data: &[u8]) -> Result<WireValue, WireError> {
    let value: serde_json::Value = serde_json::from_slice(data)?;
    Ok(WireValue::from(value))
}

/// Decodes a CBOR payload. The payload must hold exactly one data item.
pub fn decode_cbor(data: &[u8]) -> Result<WireValue, WireError> {
    let mut reader = data;
    let value: ciborium::Value = ciborium::de::from_reader(&mut reader).map_err(|e| WireError::Cbor(e.to_string()))?;
    if !reader.is_empty() {
        return Err(WireError::Cbor(format!("{} trailing bytes", reader.len())));
    }
    Ok(WireValue::from(value))
}

/// Decodes a binary frame: CBOR when it parses as CBOR, JSON otherwise.
pub fn decode_binary(data: &[u8]) -> Result<WireValue, WireError> {
    match decode_cbor(data) {
        Ok(value) => Ok(value),
        Err(_) => decode_json(data),
    }
}
