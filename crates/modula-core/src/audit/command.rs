//! Audited create / update / delete
//!
//! A command describes one mutation against one table. The orchestration
//! functions [`create`], [`update`] and [`delete`] own the transaction:
//!
//! 1. begin
//! 2. capture the before-state (update/delete; missing row is `NotFound`)
//! 3. execute the statement
//! 4. record the change event on the same transaction
//! 5. commit
//!
//! Any failure rolls the transaction back, so a mutation is committed
//! exactly when its change event is. Every step is raced against the
//! command's [`ExecContext`].

use async_trait::async_trait;
use serde::Serialize;
use tracing::{Level, debug, info, warn};

use super::context::{AuditContext, ExecContext};
use super::event::{Change, ChangeEvent, Operation};
use super::recorder::Recorder;
use crate::error::{Error, Result};
use crate::query::Row;
use crate::storage::{Backend, Conn, Database, Tx};

/// State common to every audited command
pub trait AuditedCommand<B: Backend>: Send + Sync {
    fn context(&self) -> &ExecContext;
    fn audit(&self) -> &AuditContext;
    fn table(&self) -> &str;
    fn database(&self) -> &Database<B>;
    fn recorder(&self) -> &dyn Recorder<B>;
}

/// Insert of a new row whose id may be generated by the statement
#[async_trait]
pub trait CreateCommand<B: Backend>: AuditedCommand<B> {
    type Params: Serialize + Send + Sync;

    fn params(&self) -> &Self::Params;

    /// Perform the insert and return the persisted row
    async fn execute(&self, conn: &mut Conn<B>) -> Result<Row>;

    /// Primary id of the row `execute` returned
    fn get_id(&self, row: &Row) -> Result<String>;
}

/// Change to an existing row
#[async_trait]
pub trait UpdateCommand<B: Backend>: AuditedCommand<B> {
    type Params: Serialize + Send + Sync;

    fn params(&self) -> &Self::Params;

    fn get_id(&self) -> String;

    /// Current row, or `None` when it does not exist
    async fn get_before(&self, conn: &mut Conn<B>) -> Result<Option<Row>>;

    async fn execute(&self, conn: &mut Conn<B>) -> Result<()>;

    /// Row after `execute`; re-reads through `get_before` by default
    async fn get_after(&self, conn: &mut Conn<B>) -> Result<Option<Row>> {
        self.get_before(conn).await
    }
}

/// Removal of an existing row
#[async_trait]
pub trait DeleteCommand<B: Backend>: AuditedCommand<B> {
    fn get_id(&self) -> String;

    async fn get_before(&self, conn: &mut Conn<B>) -> Result<Option<Row>>;

    async fn execute(&self, conn: &mut Conn<B>) -> Result<()>;
}

/// Result of a committed command together with its change event
#[derive(Debug, Clone, PartialEq)]
pub struct Audited<T> {
    pub value: T,
    pub event: ChangeEvent,
}

/// Run a create command; returns the persisted row
pub async fn create<B, C>(cmd: &C) -> Result<Audited<Row>>
where
    B: Backend,
    C: CreateCommand<B> + ?Sized,
{
    let ctx = cmd.context();
    if tracing::enabled!(Level::DEBUG) {
        let params = serde_json::to_string(cmd.params())?;
        debug!(table = cmd.table(), %params, "Executing create");
    }

    let mut tx = ctx.run(cmd.database().begin()).await?;
    let result = async {
        let row = ctx.run(cmd.execute(&mut *tx)).await?;
        let id = cmd.get_id(&row)?;
        let change = Change::insert(cmd.table(), id, row.clone(), cmd.audit().clone());
        let event = record(cmd, &mut *tx, change).await?;
        Ok::<_, Error>((row, event))
    }
    .await;

    finish(cmd, tx, Operation::Insert, result).await
}

/// Run an update command; returns the row as it reads after the change
pub async fn update<B, C>(cmd: &C) -> Result<Audited<Row>>
where
    B: Backend,
    C: UpdateCommand<B> + ?Sized,
{
    let ctx = cmd.context();
    let id = cmd.get_id();
    if tracing::enabled!(Level::DEBUG) {
        let params = serde_json::to_string(cmd.params())?;
        debug!(table = cmd.table(), record_id = %id, %params, "Executing update");
    }

    let mut tx = ctx.run(cmd.database().begin()).await?;
    let result = async {
        let before = ctx
            .run(cmd.get_before(&mut *tx))
            .await?
            .ok_or_else(|| Error::not_found(cmd.table(), &id))?;
        ctx.run(cmd.execute(&mut *tx)).await?;
        let after = ctx
            .run(cmd.get_after(&mut *tx))
            .await?
            .ok_or_else(|| Error::not_found(cmd.table(), &id))?;

        let change = Change::update(cmd.table(), id.clone(), before, after.clone(), cmd.audit().clone());
        let event = record(cmd, &mut *tx, change).await?;
        Ok::<_, Error>((after, event))
    }
    .await;

    finish(cmd, tx, Operation::Update, result).await
}

/// Run a delete command; returns the row as it read before removal
pub async fn delete<B, C>(cmd: &C) -> Result<Audited<Row>>
where
    B: Backend,
    C: DeleteCommand<B> + ?Sized,
{
    let ctx = cmd.context();
    let id = cmd.get_id();
    debug!(table = cmd.table(), record_id = %id, "Executing delete");

    let mut tx = ctx.run(cmd.database().begin()).await?;
    let result = async {
        let before = ctx
            .run(cmd.get_before(&mut *tx))
            .await?
            .ok_or_else(|| Error::not_found(cmd.table(), &id))?;
        ctx.run(cmd.execute(&mut *tx)).await?;

        let change = Change::delete(cmd.table(), id.clone(), before.clone(), cmd.audit().clone());
        let event = record(cmd, &mut *tx, change).await?;
        Ok::<_, Error>((before, event))
    }
    .await;

    finish(cmd, tx, Operation::Delete, result).await
}

/// Hand a change to the command's recorder. Recorder failures are wrapped so
/// callers can tell them apart from statement failures.
async fn record<B, C>(cmd: &C, conn: &mut Conn<B>, change: Change) -> Result<ChangeEvent>
where
    B: Backend,
    C: AuditedCommand<B> + ?Sized,
{
    let table = change.table.clone();
    let id = change.record_id.clone();
    cmd.context()
        .run(cmd.recorder().record(conn, change))
        .await
        .map_err(|e| match e {
            Error::Cancelled | Error::DeadlineExceeded => e,
            other => Error::RecordFailed {
                table,
                id,
                source: Box::new(other),
            },
        })
}

/// Commit on success, roll back on failure
async fn finish<B, C>(
    cmd: &C,
    tx: Tx<B>,
    op: Operation,
    result: Result<(Row, ChangeEvent)>,
) -> Result<Audited<Row>>
where
    B: Backend,
    C: AuditedCommand<B> + ?Sized,
{
    let (value, event) = match result.and_then(|ok| cmd.context().ensure_active().map(|_| ok)) {
        Ok(ok) => ok,
        Err(e) => {
            rollback::<B>(tx, cmd.table(), op, &e).await;
            return Err(e);
        }
    };

    // Past this point the commit is not interrupted
    tx.commit().await.map_err(Error::database(cmd.table(), "COMMIT"))?;

    info!(
        table = cmd.table(),
        record_id = %event.record_id,
        op = %op,
        hlc = event.hlc.as_i64(),
        recorder = cmd.recorder().name(),
        node_id = %event.audit.node_id,
        "Committed audited change"
    );
    Ok(Audited { value, event })
}

async fn rollback<B: Backend>(tx: Tx<B>, table: &str, op: Operation, cause: &Error) {
    warn!(table, op = %op, error = %cause, code = cause.code(), "Rolling back audited change");
    if let Err(e) = tx.rollback().await {
        warn!(table, error = %e, "Rollback failed");
    }
}
