//! # Window Events
//!
//! Parsing of a single event entry of an ESP `events` message into a typed
//! `WindowEvent`. CBOR subscriptions deliver typed values; JSON subscriptions
//! deliver every value as a string and wrap blobs in `{"*value": "<base64>"}`.

use std::collections::HashMap;
use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};

use super::messages::SubscriptionFormat;
use super::schema::{is_internal_field_name, SchemaType};
use super::wire::WireValue;
use crate::frames::frame::{FieldValue, OPCODE_FIELD_NAME, TIMESTAMP_FIELD_NAME};

/// Key holding the base64 body of a JSON-encoded blob.
const JSON_BLOB_VALUE_KEY: &str = "*value";

/// One named, typed value of a window event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventField {
    /// Field name.
    pub name: String,
    /// Parsed value.
    pub value: FieldValue,
}

/// A row emitted by an ESP window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEvent {
    /// Event time.
    pub time: DateTime<Utc>,
    /// ESP opcode (`insert`, `update`, `delete`, `upsert`, ...).
    pub opcode: String,
    /// Window fields sorted by name.
    pub fields: Vec<EventField>,
}

impl fmt::Display for WindowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WindowEvent{{time={}, opcode={}, fields={}}}", self.time, self.opcode, self.fields.len())
    }
}

/// Parses an event timestamp given as text or integer microseconds.
pub fn parse_event_time(raw: &WireValue) -> Result<DateTime<Utc>, String> {
    let micros = match raw {
        WireValue::Text(s) => s.trim().parse::<i64>().map_err(|e| e.to_string())?,
        WireValue::Integer(i) => i64::try_from(*i).map_err(|e| e.to_string())?,
        other => return Err(format!("invalid argument type {}", other.kind())),
    };

    DateTime::from_timestamp_micros(micros).ok_or_else(|| format!("timestamp out of range: {}", micros))
}

/// Parses one event entry against the subscription's schema.
pub fn parse_window_event(
    event: &WireValue,
    schema: &HashMap<String, SchemaType>,
    format: SubscriptionFormat,
) -> Result<WindowEvent, String> {
    let raw_time = event.get(TIMESTAMP_FIELD_NAME).unwrap_or(&WireValue::Null);
    let time = parse_event_time(raw_time)
        .map_err(|e| format!("error while parsing window event timestamp ({:?}): {}", raw_time, e))?;

    let opcode = match event.get(OPCODE_FIELD_NAME) {
        Some(WireValue::Text(op)) => op.clone(),
        Some(other) => return Err(format!("unexpected value type {} for event opcode", other.kind())),
        None => return Err("event opcode missing".to_string()),
    };

    let entries = event.as_map().ok_or_else(|| format!("event is a {}, not a map", event.kind()))?;

    // BTreeMap iteration already yields names in sorted order.
    let mut fields = Vec::with_capacity(entries.len());
    for (name, raw) in entries.iter().filter(|(name, _)| !is_internal_field_name(name)) {
        let schema_type = schema
            .get(name)
            .copied()
            .ok_or_else(|| format!("no schema type found for field: {}", name))?;

        let value = match format {
            SubscriptionFormat::Cbor => parse_cbor_value(name, raw, schema_type),
            SubscriptionFormat::Json => parse_json_value(name, raw, schema_type),
        }
        .map_err(|e| format!("error while parsing window event fields: {}", e))?;

        fields.push(EventField {
            name: name.clone(),
            value,
        });
    }

    Ok(WindowEvent { time, opcode, fields })
}

fn type_mismatch(name: &str, raw: &WireValue, schema_type: SchemaType) -> String {
    format!("unexpected value type {} for {} field {}", raw.kind(), schema_type, name)
}

fn micros_to_time(micros: i128) -> Option<FieldValue> {
    let micros = i64::try_from(micros).ok()?;
    DateTime::from_timestamp_micros(micros).map(FieldValue::Time)
}

fn seconds_to_time(seconds: i128) -> Option<FieldValue> {
    let seconds = i64::try_from(seconds).ok()?;
    DateTime::from_timestamp(seconds, 0).map(FieldValue::Time)
}

fn array_element_to_json(value: &WireValue) -> serde_json::Value {
    match value {
        WireValue::Float(f) if f.is_nan() => serde_json::Value::Null,
        WireValue::Float(f) => serde_json::json!(f),
        WireValue::Integer(i) => match i64::try_from(*i) {
            Ok(i) => serde_json::json!(i),
            Err(_) => serde_json::json!(*i as f64),
        },
        WireValue::Text(s) => serde_json::json!(s),
        WireValue::Bool(b) => serde_json::json!(b),
        _ => serde_json::Value::Null,
    }
}

fn parse_cbor_value(name: &str, raw: &WireValue, schema_type: SchemaType) -> Result<FieldValue, String> {
    let value = match (schema_type, raw) {
        (SchemaType::Array, WireValue::Array(items)) => {
            FieldValue::Json(serde_json::Value::Array(items.iter().map(array_element_to_json).collect()))
        }
        (SchemaType::Blob, WireValue::Bytes(bytes)) => FieldValue::String(general_purpose::STANDARD.encode(bytes)),
        (SchemaType::Double, WireValue::Float(f)) => FieldValue::Float(*f),
        (SchemaType::Double, WireValue::Integer(i)) => FieldValue::Float(*i as f64),
        (SchemaType::Int, WireValue::Integer(i)) => {
            FieldValue::Int(i64::try_from(*i).map_err(|_| format!("integer out of range for field {}", name))?)
        }
        (SchemaType::String, WireValue::Text(s)) => FieldValue::String(s.clone()),
        (SchemaType::Timestamp, WireValue::Integer(i)) if *i >= 0 => {
            micros_to_time(*i).ok_or_else(|| format!("timestamp out of range for field {}", name))?
        }
        (SchemaType::Date, WireValue::Integer(i)) if *i >= 0 => {
            seconds_to_time(*i).ok_or_else(|| format!("date out of range for field {}", name))?
        }
        _ => return Err(type_mismatch(name, raw, schema_type)),
    };

    Ok(value)
}

fn parse_json_value(name: &str, raw: &WireValue, schema_type: SchemaType) -> Result<FieldValue, String> {
    let text = match (schema_type, raw) {
        (SchemaType::Blob, WireValue::Map(_)) => raw
            .get(JSON_BLOB_VALUE_KEY)
            .and_then(WireValue::as_str)
            .ok_or_else(|| format!("blob value for field {} is nil", name))?,
        (_, WireValue::Text(s)) => s.as_str(),
        _ => return Err(format!("unexpected value type {} for JSON field {}", raw.kind(), name)),
    };

    let invalid = |kind: &str| format!("cannot convert field value to type {}: {}", kind, text);

    let value = match schema_type {
        SchemaType::Blob | SchemaType::String => FieldValue::String(text.to_string()),
        SchemaType::Double => FieldValue::Float(text.parse::<f64>().map_err(|_| invalid("double"))?),
        SchemaType::Int => FieldValue::Int(text.parse::<i64>().map_err(|_| invalid("int"))?),
        SchemaType::Timestamp => {
            let micros = text.parse::<i64>().map_err(|_| invalid("timestamp"))?;
            micros_to_time(i128::from(micros)).ok_or_else(|| invalid("timestamp"))?
        }
        SchemaType::Date => {
            let seconds = text.parse::<i64>().map_err(|_| invalid("date"))?;
            seconds_to_time(i128::from(seconds)).ok_or_else(|| invalid("date"))?
        }
        SchemaType::Array => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(parsed) => FieldValue::Json(parsed),
            Err(_) => FieldValue::String(text.to_string()),
        },
    };

    Ok(value)
}
