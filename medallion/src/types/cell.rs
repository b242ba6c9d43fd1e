use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Date format used when a date cell is cast to text.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Timestamp format used when a timestamp cell is cast to text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A single typed value of a row.
///
/// Variants map the value types found in columnar exports. Decimals keep their exact text in
/// [`Cell::Numeric`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Null,
    Bool(bool),
    String(String),
    I32(i32),
    I64(i64),
    /// Stored as a JSON number, or as `"NaN"`, `"Infinity"` or `"-Infinity"` when not finite.
    F64(#[serde(with = "float_repr")] f64),
    Numeric(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

mod float_repr {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    const NAN: &str = "NaN";
    const INFINITY: &str = "Infinity";
    const NEG_INFINITY: &str = "-Infinity";

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str(NAN)
        } else if value.is_sign_positive() {
            serializer.serialize_str(INFINITY)
        } else {
            serializer.serialize_str(NEG_INFINITY)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(FloatVisitor)
    }

    struct FloatVisitor;

    impl Visitor<'_> for FloatVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number or one of \"NaN\", \"Infinity\", \"-Infinity\"")
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<f64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<f64, E> {
            Ok(value as f64)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<f64, E> {
            Ok(value as f64)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<f64, E> {
            match value {
                NAN => Ok(f64::NAN),
                INFINITY => Ok(f64::INFINITY),
                NEG_INFINITY => Ok(f64::NEG_INFINITY),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }
}

/// Logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Every value seen so far was null.
    Null,
    Bool,
    String,
    I32,
    I64,
    F64,
    Numeric,
    Date,
    Timestamp,
    TimestampTz,
    Bytes,
    Json,
}

impl ColumnType {
    /// Returns `true` for date and timestamp types.
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ColumnType::Date | ColumnType::Timestamp | ColumnType::TimestampTz
        )
    }

    /// Merges two observed types, letting a concrete type win over [`ColumnType::Null`].
    ///
    /// Conflicting concrete types widen integers to `I64` and anything else to `String`.
    pub fn unify(self, other: ColumnType) -> ColumnType {
        match (self, other) {
            (a, b) if a == b => a,
            (ColumnType::Null, b) => b,
            (a, ColumnType::Null) => a,
            (ColumnType::I32, ColumnType::I64) | (ColumnType::I64, ColumnType::I32) => {
                ColumnType::I64
            }
            _ => ColumnType::String,
        }
    }
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Cell::Null => ColumnType::Null,
            Cell::Bool(_) => ColumnType::Bool,
            Cell::String(_) => ColumnType::String,
            Cell::I32(_) => ColumnType::I32,
            Cell::I64(_) => ColumnType::I64,
            Cell::F64(_) => ColumnType::F64,
            Cell::Numeric(_) => ColumnType::Numeric,
            Cell::Date(_) => ColumnType::Date,
            Cell::Timestamp(_) => ColumnType::Timestamp,
            Cell::TimestampTz(_) => ColumnType::TimestampTz,
            Cell::Bytes(_) => ColumnType::Bytes,
            Cell::Json(_) => ColumnType::Json,
        }
    }

    /// Returns the text of a string cell.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Casts the value to text, returning [`None`] for null.
    ///
    /// The rendering is stable across runs: it is the input of the row hash.
    pub fn to_text(&self) -> Option<String> {
        let text = match self {
            Cell::Null => return None,
            Cell::Bool(value) => value.to_string(),
            Cell::String(value) => value.clone(),
            Cell::I32(value) => value.to_string(),
            Cell::I64(value) => value.to_string(),
            Cell::F64(value) => value.to_string(),
            Cell::Numeric(value) => value.clone(),
            Cell::Date(value) => value.format(DATE_FORMAT).to_string(),
            Cell::Timestamp(value) => value.format(TIMESTAMP_FORMAT).to_string(),
            Cell::TimestampTz(value) => value.naive_utc().format(TIMESTAMP_FORMAT).to_string(),
            Cell::Bytes(value) => hex::encode(value),
            Cell::Json(value) => value.to_string(),
        };

        Some(text)
    }

    /// Extracts the calendar date of a date, timestamp or ISO-formatted string cell.
    pub fn to_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(value) => Some(*value),
            Cell::Timestamp(value) => Some(value.date()),
            Cell::TimestampTz(value) => Some(value.date_naive()),
            Cell::String(value) => value
                .get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, DATE_FORMAT).ok()),
            _ => None,
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl From<i32> for Cell {
    fn from(value: i32) -> Self {
        Cell::I32(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::I64(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::F64(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// Converts a JSON scalar from a JSON-lines export.
///
/// Integers become [`Cell::I64`], other numbers [`Cell::F64`], and nested values stay JSON.
impl From<serde_json::Value> for Cell {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Cell::Null,
            serde_json::Value::Bool(value) => Cell::Bool(value),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(value) => Cell::I64(value),
                None => number.as_f64().map(Cell::F64).unwrap_or(Cell::Null),
            },
            serde_json::Value::String(value) => Cell::String(value),
            other => Cell::Json(other),
        }
    }
}
