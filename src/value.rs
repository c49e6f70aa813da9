//! Dynamic value model for container state.
//!
//! Containers hold a flat record of [`Value`]s. Composite variants are
//! `Arc`-backed so snapshots and notification payloads clone cheaply.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::StoreError;

/// An immutable point-in-time copy of a container's state.
pub type Snapshot = Arc<BTreeMap<String, Value>>;

/// A dynamically-typed state value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    Record(Arc<BTreeMap<String, Value>>),
}

impl Value {
    /// Build a record value from key/value entries.
    pub fn record<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect::<BTreeMap<_, _>>();
        Value::Record(Arc::new(map))
    }

    /// Name of this value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Record(map) => Some(map),
            _ => None,
        }
    }

    /// Unwrap a record's entries, rejecting any other kind.
    ///
    /// Container tops and write partials must be records; this is the
    /// single validation point for that rule.
    pub(crate) fn expect_record(self) -> Result<BTreeMap<String, Value>, StoreError> {
        match self {
            Value::Record(map) => Ok(Arc::try_unwrap(map).unwrap_or_else(|arc| (*arc).clone())),
            other => Err(StoreError::ExpectedRecord { kind: other.kind() }),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s.as_str()))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }
}

/// Build a [`Value::Record`] from `key => value` pairs.
///
/// # Example
///
/// ```
/// use eddy::record;
///
/// let state = record! { "count" => 0, "name" => "eddy" };
/// assert_eq!(state.as_record().unwrap().len(), 2);
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::Value::Record(::std::sync::Arc::new(::std::collections::BTreeMap::new()))
    };
    ( $( $key:expr => $val:expr ),+ $(,)? ) => {{
        let mut map = ::std::collections::BTreeMap::new();
        $( map.insert(::std::string::String::from($key), $crate::Value::from($val)); )+
        $crate::Value::Record(::std::sync::Arc::new(map))
    }};
}
