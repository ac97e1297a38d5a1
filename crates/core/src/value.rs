//! Dynamic key values and their declared SQL types
//!
//! Key schemas declare one of four SQL types per key (§3); incoming values
//! are normalized into [`SqlValue`] before identity derivation or SQL
//! binding ever sees them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The SQL type a dataset declares for one key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Integer,
    Real,
    Boolean,
    Text,
}

impl SqlType {
    /// Parse from the catalog's persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INTEGER" => Some(SqlType::Integer),
            "REAL" => Some(SqlType::Real),
            "BOOLEAN" => Some(SqlType::Boolean),
            "TEXT" => Some(SqlType::Text),
            _ => None,
        }
    }

    /// The catalog's persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Text => "TEXT",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized key value, tagged by its declared [`SqlType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Int(i64),
    Real(f64),
    Bool(bool),
    Text(String),
}

impl SqlValue {
    /// The [`SqlType`] this value was normalized against.
    pub fn sql_type(&self) -> SqlType {
        match self {
            SqlValue::Int(_) => SqlType::Integer,
            SqlValue::Real(_) => SqlType::Real,
            SqlValue::Bool(_) => SqlType::Boolean,
            SqlValue::Text(_) => SqlType::Text,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            SqlValue::Real(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::Real(v) => write!(f, "{v}"),
            SqlValue::Bool(v) => write!(f, "{v}"),
            SqlValue::Text(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_type_round_trips_through_its_string_form() {
        for t in [SqlType::Integer, SqlType::Real, SqlType::Boolean, SqlType::Text] {
            assert_eq!(SqlType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn unknown_sql_type_string_parses_to_none() {
        assert_eq!(SqlType::parse("BLOB"), None);
    }

    #[test]
    fn sql_value_reports_its_own_type() {
        assert_eq!(SqlValue::Int(1).sql_type(), SqlType::Integer);
        assert_eq!(SqlValue::Real(1.0).sql_type(), SqlType::Real);
        assert_eq!(SqlValue::Bool(true).sql_type(), SqlType::Boolean);
        assert_eq!(SqlValue::Text("a".into()).sql_type(), SqlType::Text);
    }
}
