//! Core data types shared across the migration pipeline.
//!
//! Oracle folds empty strings and SQL NULL into one absent value while MySQL
//! keeps them distinct, so raw driver bytes are lifted into [`SqlValue`] at
//! the extraction seam and only collapse back to a concrete representation
//! when a statement is built for one side or the other.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Sentinel string the catalog seam substitutes for SQL NULL.
///
/// Catalog rows travel as plain `column -> String` maps; this marker is the
/// only value that cannot appear as real catalog text, which keeps the maps
/// loss-free. Everything above the seam should go through
/// [`SqlValue::from_catalog`] instead of matching the string.
pub const NULL_SENTINEL: &str = "NULLABLE";

/// One row of a catalog query: column name to value, NULL folded to
/// [`NULL_SENTINEL`], empty strings preserved.
pub type CatalogRow = HashMap<String, String>;

/// A single extracted cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// An empty string. Oracle treats this as NULL; the target apply path
    /// preserves that by writing NULL.
    Empty,
    Text(String),
}

impl SqlValue {
    /// Lift a raw driver value. Oracle already reports `''` as NULL, so
    /// `None` maps to [`SqlValue::Null`] and an explicit empty string (seen
    /// on the MySQL side) maps to [`SqlValue::Empty`].
    pub fn from_raw(raw: Option<String>) -> Self {
        match raw {
            None => SqlValue::Null,
            Some(s) if s.is_empty() => SqlValue::Empty,
            Some(s) => SqlValue::Text(s),
        }
    }

    /// Parse a catalog-seam string, reversing the [`NULL_SENTINEL`] fold.
    pub fn from_catalog(s: &str) -> Self {
        if s == NULL_SENTINEL {
            SqlValue::Null
        } else if s.is_empty() {
            SqlValue::Empty
        } else {
            SqlValue::Text(s.to_string())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Convert into a bindable MySQL parameter. `Empty` collapses to NULL,
    /// matching the Oracle semantics of the source data.
    pub fn into_mysql_value(self) -> mysql_async::Value {
        match self {
            SqlValue::Null | SqlValue::Empty => mysql_async::Value::NULL,
            SqlValue::Text(s) => mysql_async::Value::Bytes(s.into_bytes()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null | SqlValue::Empty => write!(f, "NULL"),
            SqlValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Target database flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum DbType {
    /// Stock MySQL
    Mysql,
    /// TiDB (MySQL wire compatible)
    Tidb,
}

impl DbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Mysql => "MYSQL",
            DbType::Tidb => "TIDB",
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run mode of a top-level job; recorded on every error-log row and used by
/// the error gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    Reverse,
    Check,
    Full,
    Incr,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Reverse => "REVERSE",
            RunMode::Check => "CHECK",
            RunMode::Full => "FULL",
            RunMode::Incr => "INCR",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source database label for error-log rows.
pub const DB_TYPE_ORACLE: &str = "ORACLE";

/// One row returned by a LogMiner content query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogminerContent {
    pub scn: u64,
    pub segment_owner: String,
    pub table_name: String,
    pub operation: String,
    pub sql_redo: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_sentinel_round_trip() {
        assert_eq!(SqlValue::from_catalog(NULL_SENTINEL), SqlValue::Null);
        assert_eq!(SqlValue::from_catalog(""), SqlValue::Empty);
        assert_eq!(
            SqlValue::from_catalog("NULL"),
            SqlValue::Text("NULL".to_string())
        );
    }

    #[test]
    fn empty_string_applies_as_null() {
        assert_eq!(
            SqlValue::from_raw(Some(String::new())).into_mysql_value(),
            mysql_async::Value::NULL
        );
        assert_eq!(
            SqlValue::from_raw(None).into_mysql_value(),
            mysql_async::Value::NULL
        );
        assert_eq!(
            SqlValue::from_raw(Some("x".into())).into_mysql_value(),
            mysql_async::Value::Bytes(b"x".to_vec())
        );
    }
}
