//! Positional result rows.

use chrono::{DateTime, Utc};

use super::session::{Result, StorageError};

/// A single column value as returned by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Timestamp(DateTime<Utc>),
}

/// Conversion from a column value into a Rust type.
pub trait FromValue: Sized {
    /// Name used in type mismatch errors.
    const EXPECTED: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for String {
    const EXPECTED: &'static str = "text";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for i8 {
    const EXPECTED: &'static str = "tinyint";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::TinyInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for i16 {
    const EXPECTED: &'static str = "smallint";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::SmallInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for i32 {
    const EXPECTED: &'static str = "int";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    const EXPECTED: &'static str = "bigint";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for DateTime<Utc> {
    const EXPECTED: &'static str = "timestamp";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

/// One result row. Column positions are fixed per select statement, see
/// [`super::statement::columns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read column `index` as `T`.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self
            .0
            .get(index)
            .ok_or(StorageError::MissingColumn { index })?;
        T::from_value(value).ok_or(StorageError::ColumnType {
            index,
            expected: T::EXPECTED,
        })
    }
}
