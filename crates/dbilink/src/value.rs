//! SQL value types for backend-agnostic statement binding and row data.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Owned SQL value, used both for parameter bindings and returned cells.
///
/// The set is deliberately narrower than a migration engine's value model:
/// this is a convenience layer, and each backend maps its native types onto
/// these variants on the way out (integers widen to `I64`, floats to `F64`).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Boolean / bit.
    Bool(bool),
    /// Any integer type, widened.
    I64(i64),
    /// Any floating point type, widened.
    F64(f64),
    /// Character data.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// UUID / GUID.
    Uuid(Uuid),
    /// Fixed-precision decimal.
    Decimal(Decimal),
    /// Timestamp without timezone.
    DateTime(NaiveDateTime),
}

impl SqlValue {
    /// True for the NULL variant.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Integer view of the value, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I64(v) => Some(*v),
            SqlValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Text view of the value, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(v) => write!(f, "{}", v),
            SqlValue::I64(v) => write!(f, "{}", v),
            SqlValue::F64(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "{}", v),
            SqlValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            SqlValue::Uuid(v) => write!(f, "{}", v),
            SqlValue::Decimal(v) => write!(f, "{}", v),
            SqlValue::DateTime(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I64(i64::from(v))
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Named parameter bindings for a statement or procedure call.
///
/// Keys are the bare parameter names; statements reference them in colon
/// format (`:name`).
pub type Params = HashMap<String, SqlValue>;

/// Build a [`Params`] map from `name => value` pairs.
///
/// ```
/// use dbilink::params;
///
/// let p = params! { "colour" => "Black", "qty" => 3i64 };
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! params {
    () => { $crate::value::Params::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::value::Params::new();
        $( map.insert($name.to_string(), $crate::value::SqlValue::from($value)); )+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widening_conversions() {
        assert_eq!(SqlValue::from(3i32), SqlValue::I64(3));
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".to_string()));
        assert_eq!(SqlValue::from(Option::<i64>::None), SqlValue::Null);
    }

    #[test]
    fn test_params_macro() {
        let p = params! { "colour" => "Black", "count" => 3i64 };
        assert_eq!(p["colour"], SqlValue::Text("Black".to_string()));
        assert_eq!(p["count"].as_i64(), Some(3));
    }

    #[test]
    fn test_display_null_and_bytes() {
        assert_eq!(SqlValue::Null.to_string(), "NULL");
        assert_eq!(SqlValue::Bytes(vec![0, 1, 2]).to_string(), "<3 bytes>");
    }
}
