//! Column values and rows
//!
//! `SqlValue` is decided once, when a driver row is decoded; everything above
//! the driver works with this closed set of variants.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::clock::Timestamp;
use crate::error::{Error, Result};

/// Column name to value mapping used for WHERE, SET and INSERT values
pub type ColumnValues = BTreeMap<String, SqlValue>;

/// A single column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Variant name, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(v) => serde_json::Value::Bool(*v),
            Self::Integer(v) => serde_json::Value::from(*v),
            Self::Real(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(v) => serde_json::Value::String(v.clone()),
            Self::Bytes(v) => serde_json::Value::from(v.clone()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Timestamp> for SqlValue {
    fn from(v: Timestamp) -> Self {
        Self::Integer(v.as_i64())
    }
}

/// Datetimes are stored as RFC 3339 text with millisecond precision
impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Text(format_datetime(&v))
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime(column: &str, text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Parse(format!("Invalid datetime in column '{}': {}", column, e)))
}

/// A result row: column names and values in select order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    /// Append a column
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) {
        self.columns.push((name.into(), value.into()));
    }

    /// Builder-style `push`
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn require(&self, name: &str) -> Result<&SqlValue> {
        self.get(name)
            .ok_or_else(|| Error::Parse(format!("Missing column '{}'", name)))
    }

    fn mismatch(name: &str, expected: &str, found: &SqlValue) -> Error {
        Error::Parse(format!(
            "Column '{}' expected {}, found {}",
            name,
            expected,
            found.kind()
        ))
    }

    pub fn get_string(&self, name: &str) -> Result<String> {
        self.get_opt_string(name)?
            .ok_or_else(|| Error::Parse(format!("Column '{}' is NULL", name)))
    }

    pub fn get_opt_string(&self, name: &str) -> Result<Option<String>> {
        match self.require(name)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(v) => Ok(Some(v.clone())),
            other => Err(Self::mismatch(name, "text", other)),
        }
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        self.get_opt_i64(name)?
            .ok_or_else(|| Error::Parse(format!("Column '{}' is NULL", name)))
    }

    pub fn get_opt_i64(&self, name: &str) -> Result<Option<i64>> {
        match self.require(name)? {
            SqlValue::Null => Ok(None),
            other => other
                .as_i64()
                .map(Some)
                .ok_or_else(|| Self::mismatch(name, "integer", other)),
        }
    }

    pub fn get_opt_bool(&self, name: &str) -> Result<Option<bool>> {
        match self.require(name)? {
            SqlValue::Null => Ok(None),
            other => other
                .as_bool()
                .map(Some)
                .ok_or_else(|| Self::mismatch(name, "bool", other)),
        }
    }

    pub fn get_datetime(&self, name: &str) -> Result<DateTime<Utc>> {
        parse_datetime(name, &self.get_string(name)?)
    }

    pub fn get_opt_datetime(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        self.get_opt_string(name)?
            .map(|text| parse_datetime(name, &text))
            .transpose()
    }

    /// Parse a JSON text column; NULL yields `None`
    pub fn get_opt_json(&self, name: &str) -> Result<Option<serde_json::Value>> {
        self.get_opt_string(name)?
            .map(|text| serde_json::from_str(&text).map_err(Error::from))
            .transpose()
    }

    /// Snapshot the row as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Row {
        Row::new()
            .with("id", "b-1")
            .with("size_bytes", 42i64)
            .with("checksum", None::<String>)
            .with("restore_tested", 1i64)
            .with("ratio", 0.5)
    }

    #[test]
    fn test_typed_accessors() {
        let row = sample();
        assert_eq!(row.get_string("id").unwrap(), "b-1");
        assert_eq!(row.get_i64("size_bytes").unwrap(), 42);
        assert_eq!(row.get_opt_string("checksum").unwrap(), None);
        assert_eq!(row.get_opt_bool("restore_tested").unwrap(), Some(true));
        assert_eq!(row.len(), 5);
    }

    #[test]
    fn test_accessor_errors() {
        let row = sample();
        assert!(matches!(row.get_i64("missing"), Err(Error::Parse(_))));
        assert!(matches!(row.get_i64("id"), Err(Error::Parse(_))));
        assert!(matches!(row.get_string("checksum"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_column_lookup_ignores_case() {
        let row = Row::new().with("COUNT", 3i64);
        assert_eq!(row.get_i64("count").unwrap(), 3);
    }

    #[test]
    fn test_null_is_distinct_from_empty_text() {
        assert!(SqlValue::from(None::<&str>).is_null());
        assert!(!SqlValue::from("").is_null());
    }

    #[test]
    fn test_datetime_round_trip() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let row = Row::new().with("started_at", dt);
        assert_eq!(row.get("started_at").unwrap().as_str(), Some("2024-05-01T12:30:00.000Z"));
        assert_eq!(row.get_datetime("started_at").unwrap(), dt);
    }

    #[test]
    fn test_to_json_snapshot() {
        let json = sample().to_json();
        assert_eq!(json["id"], "b-1");
        assert_eq!(json["size_bytes"], 42);
        assert!(json["checksum"].is_null());
        assert_eq!(json["ratio"], 0.5);
    }
}
