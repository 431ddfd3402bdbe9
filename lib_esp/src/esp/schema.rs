//! ESP window schema field types.

use std::fmt;
use std::str::FromStr;

use super::client::EspClientError;

/// Value type of a window field, as announced by a schema message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaType {
    /// `array(dbl)`, `array(i32)`, `array(i64)`
    Array,
    /// `blob`
    Blob,
    /// `double`, `money`
    Double,
    /// `int32`, `int64`
    Int,
    /// `stamp` (microseconds since the epoch)
    Timestamp,
    /// `string`, `rstring`
    String,
    /// `date` (seconds since the epoch)
    Date,
}

impl FromStr for SchemaType {
    type Err = EspClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "array(dbl)" | "array(i32)" | "array(i64)" => Ok(SchemaType::Array),
            "blob" => Ok(SchemaType::Blob),
            "date" => Ok(SchemaType::Date),
            "double" | "money" => Ok(SchemaType::Double),
            "int32" | "int64" => Ok(SchemaType::Int),
            "rstring" | "string" => Ok(SchemaType::String),
            "stamp" => Ok(SchemaType::Timestamp),
            _ => Err(EspClientError::UnknownFieldType(s.to_string())),
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchemaType::Array => "array",
            SchemaType::Blob => "blob",
            SchemaType::Double => "double",
            SchemaType::Int => "int",
            SchemaType::Timestamp => "stamp",
            SchemaType::String => "string",
            SchemaType::Date => "date",
        };
        f.write_str(name)
    }
}

/// Field names starting with `@` are ESP bookkeeping, not window data.
pub fn is_internal_field_name(name: &str) -> bool {
    name.starts_with('@')
}
