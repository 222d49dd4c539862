//! Read side of the change event table

use super::event::{CHANGE_EVENTS_TABLE, ChangeEvent};
use crate::clock::Timestamp;
use crate::error::Result;
use crate::query::{ColumnValues, CompiledQuery, MAX_LIMIT, SelectParams};
use crate::storage::{Backend, Database};

/// Queries over recorded change events
#[derive(Debug)]
pub struct ChangeEventLog<B: Backend> {
    db: Database<B>,
}

impl<B: Backend> Clone for ChangeEventLog<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone() }
    }
}

impl<B: Backend> ChangeEventLog<B> {
    pub fn new(db: Database<B>) -> Self {
        Self { db }
    }

    /// History of one record, oldest first
    pub async fn for_record(&self, table: &str, record_id: &str) -> Result<Vec<ChangeEvent>> {
        let params = SelectParams::new(CHANGE_EVENTS_TABLE)
            .filter("table_name", table)
            .filter("record_id", record_id)
            .order_by("hlc_timestamp");

        self.db
            .select(&params)
            .await?
            .iter()
            .map(ChangeEvent::from_row)
            .collect()
    }

    /// Events stamped strictly after `hlc`, oldest first
    pub async fn since(&self, hlc: Timestamp, limit: i64) -> Result<Vec<ChangeEvent>> {
        let limit = if limit < 0 { MAX_LIMIT } else { limit.min(MAX_LIMIT) };
        let sql = format!(
            "SELECT * FROM {} WHERE hlc_timestamp > {} ORDER BY hlc_timestamp LIMIT {}",
            CHANGE_EVENTS_TABLE,
            B::DIALECT.placeholder(1),
            limit
        );
        let query = CompiledQuery::raw(CHANGE_EVENTS_TABLE, "SELECT", sql).bind(hlc);

        let mut conn = self.db.acquire().await?;
        B::fetch_all(&mut *conn, &query)
            .await?
            .iter()
            .map(ChangeEvent::from_row)
            .collect()
    }

    /// Number of events, optionally restricted to one table
    pub async fn count(&self, table: Option<&str>) -> Result<i64> {
        let mut filter = ColumnValues::new();
        if let Some(table) = table {
            filter.insert("table_name".into(), table.into());
        }
        self.db.count(CHANGE_EVENTS_TABLE, &filter).await
    }
}
