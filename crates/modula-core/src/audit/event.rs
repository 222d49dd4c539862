//! Change events
//!
//! A [`Change`] is what a command hands to its recorder; the recorder stamps
//! it with a causal timestamp and an id, producing the immutable
//! [`ChangeEvent`].

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::context::AuditContext;
use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::query::{ColumnValues, Row, SqlValue};

/// Table the SQL recorder writes to
pub const CHANGE_EVENTS_TABLE: &str = "change_events";

/// Kind of mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::Parse(format!("Unknown operation '{}'", other))),
        }
    }
}

/// An unstamped mutation description
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub operation: Operation,
    pub table: String,
    pub record_id: String,
    /// Absent for inserts
    pub before: Option<Row>,
    /// Absent for deletes
    pub after: Option<Row>,
    pub audit: AuditContext,
}

impl Change {
    pub fn insert(table: impl Into<String>, record_id: impl Into<String>, after: Row, audit: AuditContext) -> Self {
        Self {
            operation: Operation::Insert,
            table: table.into(),
            record_id: record_id.into(),
            before: None,
            after: Some(after),
            audit,
        }
    }

    pub fn update(
        table: impl Into<String>,
        record_id: impl Into<String>,
        before: Row,
        after: Row,
        audit: AuditContext,
    ) -> Self {
        Self {
            operation: Operation::Update,
            table: table.into(),
            record_id: record_id.into(),
            before: Some(before),
            after: Some(after),
            audit,
        }
    }

    pub fn delete(table: impl Into<String>, record_id: impl Into<String>, before: Row, audit: AuditContext) -> Self {
        Self {
            operation: Operation::Delete,
            table: table.into(),
            record_id: record_id.into(),
            before: Some(before),
            after: None,
            audit,
        }
    }

    /// Stamp the change, producing the event to persist
    pub fn stamp(self, hlc: Timestamp) -> ChangeEvent {
        ChangeEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            hlc,
            wall_time: Utc::now().trunc_subsecs(3),
            operation: self.operation,
            table_name: self.table,
            record_id: self.record_id,
            before: self.before.map(|row| row.to_json()),
            after: self.after.map(|row| row.to_json()),
            audit: self.audit,
        }
    }
}

/// A recorded mutation; never updated once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_id: String,
    pub hlc: Timestamp,
    pub wall_time: DateTime<Utc>,
    pub operation: Operation,
    pub table_name: String,
    pub record_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub audit: AuditContext,
}

impl ChangeEvent {
    /// Column values for the `change_events` table
    pub fn to_values(&self) -> ColumnValues {
        let json = |value: &Option<serde_json::Value>| SqlValue::from(value.as_ref().map(|v| v.to_string()));

        let mut values = ColumnValues::new();
        values.insert("event_id".into(), self.event_id.as_str().into());
        values.insert("hlc_timestamp".into(), self.hlc.into());
        values.insert("wall_timestamp".into(), self.wall_time.into());
        values.insert("node_id".into(), self.audit.node_id.as_str().into());
        values.insert("table_name".into(), self.table_name.as_str().into());
        values.insert("record_id".into(), self.record_id.as_str().into());
        values.insert("operation".into(), self.operation.as_str().into());
        values.insert("user_id".into(), self.audit.user_id.clone().into());
        values.insert("request_id".into(), self.audit.request_id.as_str().into());
        values.insert("ip".into(), self.audit.ip.clone().into());
        values.insert("old_values".into(), json(&self.before));
        values.insert("new_values".into(), json(&self.after));
        values
    }

    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            event_id: row.get_string("event_id")?,
            hlc: Timestamp::from_i64(row.get_i64("hlc_timestamp")?),
            wall_time: row.get_datetime("wall_timestamp")?,
            operation: row.get_string("operation")?.parse()?,
            table_name: row.get_string("table_name")?,
            record_id: row.get_string("record_id")?,
            before: row.get_opt_json("old_values")?,
            after: row.get_opt_json("new_values")?,
            audit: AuditContext {
                user_id: row.get_opt_string("user_id")?,
                node_id: row.get_string("node_id")?,
                request_id: row.get_opt_string("request_id")?.unwrap_or_default(),
                ip: row.get_opt_string("ip")?,
            },
        })
    }
}
