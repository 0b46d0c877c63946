//! Column values and result rows

use crate::store::StoreError;
use std::fmt;

/// A single column value
///
/// Ordered and hashable so tuples of values can be collected into sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Text(s) => s.parse().ok(),
            Self::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Int(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// One result row, columns in select order
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
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

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.0.get(idx)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    /// Read a non-null integer column
    pub fn int(&self, idx: usize) -> Result<i64, StoreError> {
        self.get(idx)
            .and_then(Value::as_i64)
            .ok_or_else(|| StoreError::Decode(format!("column {} is not an integer: {:?}", idx, self.get(idx))))
    }

    /// Read an integer column that may be NULL
    pub fn opt_int(&self, idx: usize) -> Result<Option<i64>, StoreError> {
        match self.get(idx) {
            Some(Value::Null) => Ok(None),
            _ => self.int(idx).map(Some),
        }
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Value::from(7i64), Value::Int(7));
        assert_eq!(Value::from("x"), Value::Text("x".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::Text("12".into()).as_i64(), Some(12));
        assert_eq!(Value::Null.to_string(), "NULL");
    }

    #[test]
    fn row_accessors() {
        let row = Row::new(vec![Value::Int(1), Value::Null, Value::Text("a".into())]);
        assert_eq!(row.int(0).unwrap(), 1);
        assert_eq!(row.opt_int(1).unwrap(), None);
        assert!(row.int(2).is_err());
        assert!(row.int(5).is_err());
    }
}
