//! Generic audited commands for entity types
//!
//! An [`Entity`] knows its table, id column and column mapping. The three
//! command types here implement the command contracts once for every
//! backend; the assertions at the bottom of the file make a missing backend
//! a compile error.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::command::{AuditedCommand, CreateCommand, DeleteCommand, UpdateCommand};
use super::context::{AuditContext, ExecContext};
use super::recorder::Recorder;
use crate::error::{Error, Result};
use crate::query::{ColumnValues, Dialect, Row, SelectParams, SqlValue};
use crate::storage::{Backend, Conn, Database};

/// A type persisted as one row of one table
pub trait Entity: Serialize + Send + Sync + Sized + 'static {
    const TABLE: &'static str;
    const ID_COLUMN: &'static str;

    fn id(&self) -> String;

    /// Column values as written for `dialect`
    fn to_values(&self, dialect: Dialect) -> Result<ColumnValues>;

    fn from_row(row: &Row) -> Result<Self>;
}

fn id_filter<E: Entity>(id: &str) -> ColumnValues {
    ColumnValues::from([(E::ID_COLUMN.to_string(), SqlValue::from(id))])
}

async fn fetch<B: Backend, E: Entity>(db: &Database<B>, conn: &mut Conn<B>, id: &str) -> Result<Option<Row>> {
    let params = SelectParams::new(E::TABLE).filter(E::ID_COLUMN, id);
    db.query().select_one(conn, &params).await
}

/// A row that must exist, optionally in one of a few states, when a command
/// writes. Checked on the command's own transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    table: &'static str,
    id_column: &'static str,
    id: String,
    state: Option<(&'static str, Vec<String>)>,
}

impl Precondition {
    pub fn exists<E: Entity>(id: impl Into<String>) -> Self {
        Self {
            table: E::TABLE,
            id_column: E::ID_COLUMN,
            id: id.into(),
            state: None,
        }
    }

    /// Also require `column` to hold one of `allowed`
    pub fn in_state(mut self, column: &'static str, allowed: &[&str]) -> Self {
        self.state = Some((column, allowed.iter().map(|s| s.to_string()).collect()));
        self
    }

    async fn check<B: Backend>(&self, db: &Database<B>, conn: &mut Conn<B>) -> Result<()> {
        let params = SelectParams::new(self.table).filter(self.id_column, self.id.as_str());
        let row = db
            .query()
            .select_one(conn, &params)
            .await?
            .ok_or_else(|| Error::not_found(self.table, &self.id))?;

        if let Some((column, allowed)) = &self.state {
            let current = row.get_opt_string(column)?.unwrap_or_default();
            if !allowed.contains(&current) {
                return Err(Error::InvalidInput(format!(
                    "'{}' record '{}' has {} '{}', expected {}",
                    self.table,
                    self.id,
                    column,
                    current,
                    allowed.join(" or ")
                )));
            }
        }
        Ok(())
    }
}

/// Shared fields of the entity commands
struct Parts<B: Backend> {
    db: Database<B>,
    recorder: Arc<dyn Recorder<B>>,
    ctx: ExecContext,
    audit: AuditContext,
    preconditions: Vec<Precondition>,
}

impl<B: Backend> Parts<B> {
    fn new(db: Database<B>, recorder: Arc<dyn Recorder<B>>, ctx: ExecContext, audit: AuditContext) -> Self {
        Self {
            db,
            recorder,
            ctx,
            audit,
            preconditions: Vec::new(),
        }
    }

    async fn check(&self, conn: &mut Conn<B>) -> Result<()> {
        for precondition in &self.preconditions {
            precondition.check(&self.db, conn).await?;
        }
        Ok(())
    }
}

impl<B: Backend> fmt::Debug for Parts<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parts")
            .field("backend", &B::NAME)
            .field("recorder", &self.recorder.name())
            .field("audit", &self.audit)
            .field("preconditions", &self.preconditions)
            .finish()
    }
}

macro_rules! audited_command {
    ($ty:ident) => {
        impl<B: Backend, E: Entity> AuditedCommand<B> for $ty<B, E> {
            fn context(&self) -> &ExecContext {
                &self.parts.ctx
            }

            fn audit(&self) -> &AuditContext {
                &self.parts.audit
            }

            fn table(&self) -> &str {
                E::TABLE
            }

            fn database(&self) -> &Database<B> {
                &self.parts.db
            }

            fn recorder(&self) -> &dyn Recorder<B> {
                self.parts.recorder.as_ref()
            }
        }
    };
}

/// Insert `entity` and read it back
#[derive(Debug)]
pub struct InsertEntity<B: Backend, E: Entity> {
    parts: Parts<B>,
    entity: E,
}

impl<B: Backend, E: Entity> InsertEntity<B, E> {
    pub fn new(
        db: Database<B>,
        recorder: Arc<dyn Recorder<B>>,
        ctx: ExecContext,
        audit: AuditContext,
        entity: E,
    ) -> Self {
        Self {
            parts: Parts::new(db, recorder, ctx, audit),
            entity,
        }
    }

    /// Fail the insert unless `precondition` holds inside its transaction
    pub fn require(mut self, precondition: Precondition) -> Self {
        self.parts.preconditions.push(precondition);
        self
    }
}

audited_command!(InsertEntity);

#[async_trait]
impl<B: Backend, E: Entity> CreateCommand<B> for InsertEntity<B, E> {
    type Params = E;

    fn params(&self) -> &E {
        &self.entity
    }

    async fn execute(&self, conn: &mut Conn<B>) -> Result<Row> {
        self.parts.check(conn).await?;
        let values = self.entity.to_values(B::DIALECT)?;
        self.parts.db.query().insert(conn, E::TABLE, &values).await?;

        let id = self.entity.id();
        fetch::<B, E>(&self.parts.db, conn, &id)
            .await?
            .ok_or_else(|| Error::not_found(E::TABLE, id))
    }

    fn get_id(&self, row: &Row) -> Result<String> {
        match row.get(E::ID_COLUMN) {
            Some(SqlValue::Text(id)) => Ok(id.clone()),
            Some(SqlValue::Integer(id)) => Ok(id.to_string()),
            _ => Err(Error::Parse(format!(
                "Row from '{}' has no usable '{}'",
                E::TABLE,
                E::ID_COLUMN
            ))),
        }
    }
}

/// Mutation applied to the current entity inside the transaction
pub type Mutation<E> = Box<dyn Fn(E) -> Result<E> + Send + Sync>;

/// Load an entity, apply a mutation and write back the changed columns
pub struct UpdateEntity<B: Backend, E: Entity> {
    parts: Parts<B>,
    id: String,
    mutation: Mutation<E>,
    label: String,
}

impl<B: Backend, E: Entity> fmt::Debug for UpdateEntity<B, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateEntity")
            .field("parts", &self.parts)
            .field("table", &E::TABLE)
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}

impl<B: Backend, E: Entity> UpdateEntity<B, E> {
    pub fn new(
        db: Database<B>,
        recorder: Arc<dyn Recorder<B>>,
        ctx: ExecContext,
        audit: AuditContext,
        id: impl Into<String>,
        mutation: Mutation<E>,
    ) -> Self {
        Self {
            parts: Parts::new(db, recorder, ctx, audit),
            id: id.into(),
            mutation,
            label: String::from("update"),
        }
    }

    /// Name the mutation in logs
    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Fail the update unless `precondition` holds inside its transaction
    pub fn require(mut self, precondition: Precondition) -> Self {
        self.parts.preconditions.push(precondition);
        self
    }
}

audited_command!(UpdateEntity);

#[async_trait]
impl<B: Backend, E: Entity> UpdateCommand<B> for UpdateEntity<B, E> {
    type Params = String;

    fn params(&self) -> &String {
        &self.label
    }

    fn get_id(&self) -> String {
        self.id.clone()
    }

    async fn get_before(&self, conn: &mut Conn<B>) -> Result<Option<Row>> {
        fetch::<B, E>(&self.parts.db, conn, &self.id).await
    }

    async fn execute(&self, conn: &mut Conn<B>) -> Result<()> {
        let row = fetch::<B, E>(&self.parts.db, conn, &self.id)
            .await?
            .ok_or_else(|| Error::not_found(E::TABLE, &self.id))?;
        self.parts.check(conn).await?;
        let current = E::from_row(&row)?;
        let next = (self.mutation)(current)?;
        if next.id() != self.id {
            return Err(Error::InvalidInput(format!(
                "Update of '{}' record '{}' may not change its id",
                E::TABLE,
                self.id
            )));
        }

        let mut set = next.to_values(B::DIALECT)?;
        set.remove(E::ID_COLUMN);
        if set.is_empty() {
            return Ok(());
        }

        // MySQL reports unchanged rows as unaffected, so the count is not
        // checked here; the row's existence was established above.
        self.parts
            .db
            .query()
            .update(conn, E::TABLE, &set, &id_filter::<E>(&self.id))
            .await?;
        Ok(())
    }
}

/// Delete one entity by id
#[derive(Debug)]
pub struct DeleteEntity<B: Backend, E: Entity> {
    parts: Parts<B>,
    id: String,
    _entity: std::marker::PhantomData<fn() -> E>,
}

impl<B: Backend, E: Entity> DeleteEntity<B, E> {
    pub fn new(
        db: Database<B>,
        recorder: Arc<dyn Recorder<B>>,
        ctx: ExecContext,
        audit: AuditContext,
        id: impl Into<String>,
    ) -> Self {
        Self {
            parts: Parts::new(db, recorder, ctx, audit),
            id: id.into(),
            _entity: std::marker::PhantomData,
        }
    }
}

audited_command!(DeleteEntity);

#[async_trait]
impl<B: Backend, E: Entity> DeleteCommand<B> for DeleteEntity<B, E> {
    fn get_id(&self) -> String {
        self.id.clone()
    }

    async fn get_before(&self, conn: &mut Conn<B>) -> Result<Option<Row>> {
        fetch::<B, E>(&self.parts.db, conn, &self.id).await
    }

    async fn execute(&self, conn: &mut Conn<B>) -> Result<()> {
        let affected = self
            .parts
            .db
            .query()
            .delete(conn, E::TABLE, &id_filter::<E>(&self.id))
            .await?;
        if affected == 0 {
            return Err(Error::not_found(E::TABLE, &self.id));
        }
        Ok(())
    }
}

/// Every backend gets all three entity commands
#[allow(dead_code)]
const _: () = {
    use crate::storage::{MySqlBackend, PostgresBackend, SqliteBackend};

    fn create<B: Backend, C: CreateCommand<B>>() {}
    fn update<B: Backend, C: UpdateCommand<B>>() {}
    fn delete<B: Backend, C: DeleteCommand<B>>() {}

    #[derive(Debug, Serialize)]
    struct Sample;

    impl Entity for Sample {
        const TABLE: &'static str = "sample";
        const ID_COLUMN: &'static str = "id";

        fn id(&self) -> String {
            String::new()
        }

        fn to_values(&self, _dialect: Dialect) -> Result<ColumnValues> {
            Ok(ColumnValues::new())
        }

        fn from_row(_row: &Row) -> Result<Self> {
            Ok(Sample)
        }
    }

    fn conforms() {
        create::<SqliteBackend, InsertEntity<SqliteBackend, Sample>>();
        create::<MySqlBackend, InsertEntity<MySqlBackend, Sample>>();
        create::<PostgresBackend, InsertEntity<PostgresBackend, Sample>>();
        update::<SqliteBackend, UpdateEntity<SqliteBackend, Sample>>();
        update::<MySqlBackend, UpdateEntity<MySqlBackend, Sample>>();
        update::<PostgresBackend, UpdateEntity<PostgresBackend, Sample>>();
        delete::<SqliteBackend, DeleteEntity<SqliteBackend, Sample>>();
        delete::<MySqlBackend, DeleteEntity<MySqlBackend, Sample>>();
        delete::<PostgresBackend, DeleteEntity<PostgresBackend, Sample>>();
    }
};
