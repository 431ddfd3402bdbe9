//! # Columnar Frames
//!
//! The record batch that flows from the ESP stream to the viewer. A `Frame` is an
//! ordered list of named columns (`Field`s); every column holds one `FieldValue`
//! per row and all columns of a frame share the same row count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the reserved column tagging each row's event kind.
pub const OPCODE_FIELD_NAME: &str = "@opcode";
/// Name of the reserved column carrying server-reported error messages.
pub const ERROR_FIELD_NAME: &str = "@error";
/// Name of the reserved column carrying the event time of a window-event row.
pub const TIMESTAMP_FIELD_NAME: &str = "@timestamp";

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Missing value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer value (ESP `int32`/`int64`).
    Int(i64),
    /// Floating point value (ESP `double`/`money`).
    Float(f64),
    /// Text value (ESP `string`/`rstring`, base64 blobs, opcodes).
    String(String),
    /// Point in time (ESP `stamp`/`date`).
    Time(DateTime<Utc>),
    /// Structured JSON value (ESP arrays).
    Json(serde_json::Value),
}

impl FieldValue {
    /// Returns the text of a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Whether this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Time(value)
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Column name.
    pub name: String,
    /// One value per row.
    pub values: Vec<FieldValue>,
}

impl Field {
    /// Creates a column from a name and its values.
    pub fn new(name: impl Into<String>, values: Vec<FieldValue>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Number of values held by this column.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the column holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Metadata attached to a frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    /// Live channel address (`ds/<uid>/<path>`) the viewer should subscribe to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// # Frame
///
/// A named columnar record batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame name (`response`, `error`, `error-clear`).
    pub name: String,
    /// Ordered columns.
    pub fields: Vec<Field>,
    /// Optional metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<FrameMeta>,
}

impl Frame {
    /// Creates an empty frame.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            meta: None,
        }
    }

    /// Appends a column, builder style.
    pub fn with_field(mut self, name: impl Into<String>, values: Vec<FieldValue>) -> Self {
        self.fields.push(Field::new(name, values));
        self
    }

    /// Attaches metadata, builder style.
    pub fn with_meta(mut self, meta: FrameMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Looks up a column by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Row count of the frame, taken from its first column.
    pub fn row_count(&self) -> usize {
        self.fields.first().map_or(0, Field::len)
    }

    /// Whether every column has the same number of rows.
    pub fn is_rectangular(&self) -> bool {
        let rows = self.row_count();
        self.fields.iter().all(|f| f.len() == rows)
    }

    /// Column names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Whether `other` has exactly the same column names in the same order.
    pub fn same_schema(&self, other: &Frame) -> bool {
        self.fields.len() == other.fields.len() && self.field_names().eq(other.field_names())
    }

    /// Removes the first `count` rows from every column.
    ///
    /// The caller guarantees `count` does not exceed any column's length.
    pub fn drop_leading_rows(&mut self, count: usize) {
        for field in &mut self.fields {
            field.values.drain(..count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_count_and_rectangularity() {
        let frame = Frame::new("response")
            .with_field("a", vec![1i64.into(), 2i64.into()])
            .with_field("b", vec!["x".into(), "y".into()]);
        assert_eq!(frame.row_count(), 2);
        assert!(frame.is_rectangular());

        let ragged = Frame::new("response")
            .with_field("a", vec![1i64.into()])
            .with_field("b", vec![]);
        assert!(!ragged.is_rectangular());
        assert_eq!(Frame::new("empty").row_count(), 0);
    }

    #[test]
    fn drop_leading_rows_is_uniform() {
        let mut frame = Frame::new("response")
            .with_field("a", vec![1i64.into(), 2i64.into(), 3i64.into()])
            .with_field("b", vec!["x".into(), "y".into(), "z".into()]);
        frame.drop_leading_rows(2);
        assert_eq!(frame.field("a").unwrap().values, vec![FieldValue::Int(3)]);
        assert_eq!(frame.field("b").unwrap().values, vec![FieldValue::from("z")]);
    }

    #[test]
    fn schema_comparison_uses_names_in_order() {
        let a = Frame::new("x").with_field("p", vec![]).with_field("q", vec![]);
        let b = Frame::new("y").with_field("p", vec![]).with_field("q", vec![]);
        let c = Frame::new("z").with_field("q", vec![]).with_field("p", vec![]);
        assert!(a.same_schema(&b));
        assert!(!a.same_schema(&c));
    }
}
