//! Change event recorders

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use super::event::{CHANGE_EVENTS_TABLE, Change, ChangeEvent};
use crate::clock::HybridClock;
use crate::error::{Error, Result};
use crate::storage::{Backend, Conn, DynamicQuery};

/// Persists one change event per successful mutation.
///
/// `record` runs on the command's open transaction, so the event commits or
/// rolls back together with the mutation it describes.
#[async_trait]
pub trait Recorder<B: Backend>: Send + Sync + fmt::Debug {
    /// Identity of this recorder
    fn name(&self) -> &str;

    /// Stamp and persist `change`
    async fn record(&self, conn: &mut Conn<B>, change: Change) -> Result<ChangeEvent>;
}

/// Writes events to the `change_events` table of the backend
#[derive(Debug, Clone)]
pub struct SqlRecorder<B: Backend> {
    clock: Arc<HybridClock>,
    query: DynamicQuery<B>,
    name: String,
}

impl<B: Backend> SqlRecorder<B> {
    pub fn new(clock: Arc<HybridClock>) -> Self {
        Self {
            clock,
            query: DynamicQuery::new(),
            name: format!("sql:{}", B::NAME),
        }
    }

    pub fn clock(&self) -> &Arc<HybridClock> {
        &self.clock
    }
}

#[async_trait]
impl<B: Backend> Recorder<B> for SqlRecorder<B> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn record(&self, conn: &mut Conn<B>, change: Change) -> Result<ChangeEvent> {
        let event = change.stamp(self.clock.now());
        self.query
            .insert(conn, CHANGE_EVENTS_TABLE, &event.to_values())
            .await?;

        debug!(
            recorder = %self.name,
            table = %event.table_name,
            record_id = %event.record_id,
            op = %event.operation,
            hlc = event.hlc.as_i64(),
            "Recorded change event"
        );
        Ok(event)
    }
}

/// Keeps events in memory; works with every backend
#[derive(Debug)]
pub struct MemoryRecorder {
    clock: Arc<HybridClock>,
    events: Mutex<Vec<ChangeEvent>>,
    fail: AtomicBool,
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::new(Arc::new(HybridClock::new()))
    }
}

impl MemoryRecorder {
    pub fn new(clock: Arc<HybridClock>) -> Self {
        Self {
            clock,
            events: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `record` call fail
    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Events recorded so far
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<B: Backend> Recorder<B> for MemoryRecorder {
    fn name(&self) -> &str {
        "memory"
    }

    async fn record(&self, _conn: &mut Conn<B>, change: Change) -> Result<ChangeEvent> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Other("memory recorder configured to fail".into()));
        }

        let event = change.stamp(self.clock.now());
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditContext;
    use crate::query::Row;
    use crate::storage::{Database, SqliteBackend};

    #[tokio::test]
    async fn test_sql_recorder_writes_inside_transaction() {
        let db = Database::<SqliteBackend>::in_memory().await.unwrap();
        let recorder = SqlRecorder::<SqliteBackend>::new(Arc::new(HybridClock::new()));
        assert_eq!(Recorder::<SqliteBackend>::name(&recorder), "sql:sqlite");

        let mut tx = db.begin().await.unwrap();
        let change = Change::insert("articles", "a1", Row::new().with("id", "a1"), AuditContext::new("n1"));
        recorder.record(&mut *tx, change).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(db.count(CHANGE_EVENTS_TABLE, &Default::default()).await.unwrap(), 0);

        let mut tx = db.begin().await.unwrap();
        let change = Change::insert("articles", "a2", Row::new().with("id", "a2"), AuditContext::new("n1"));
        let event = recorder.record(&mut *tx, change).await.unwrap();
        tx.commit().await.unwrap();

        let rows = db
            .select(&crate::query::SelectParams::new(CHANGE_EVENTS_TABLE))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(ChangeEvent::from_row(&rows[0]).unwrap(), event);
    }

    #[tokio::test]
    async fn test_memory_recorder_failure_switch() {
        let db = Database::<SqliteBackend>::in_memory().await.unwrap();
        let recorder = MemoryRecorder::default();
        let mut conn = db.acquire().await.unwrap();

        let change = Change::delete("t", "1", Row::new(), AuditContext::new("n"));
        Recorder::<SqliteBackend>::record(&recorder, &mut *conn, change.clone())
            .await
            .unwrap();
        assert_eq!(recorder.len(), 1);

        recorder.fail_next(true);
        let result = Recorder::<SqliteBackend>::record(&recorder, &mut *conn, change).await;
        assert!(result.is_err());
        assert_eq!(recorder.len(), 1);
    }

    #[tokio::test]
    async fn test_events_are_strictly_ordered() {
        let recorder = MemoryRecorder::default();
        let db = Database::<SqliteBackend>::in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();

        for i in 0..50 {
            let change = Change::insert("t", i.to_string(), Row::new(), AuditContext::new("n"));
            Recorder::<SqliteBackend>::record(&recorder, &mut *conn, change)
                .await
                .unwrap();
        }

        let events = recorder.events();
        assert!(events.windows(2).all(|pair| pair[0].hlc < pair[1].hlc));
    }
}
