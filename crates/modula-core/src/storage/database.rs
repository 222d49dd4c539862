//! Database connection management

use anyhow::{Context, anyhow};
use sqlx::Pool;
use sqlx::pool::PoolConnection;

use super::backend::{Backend, Tx};
use super::dynamic::DynamicQuery;
use super::migrations::{self, MigrationStatus};
use super::sqlite::SqliteBackend;
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::query::{ColumnValues, CompiledQuery, Dialect, Row, SelectParams};

/// Connection pool for one backend
#[derive(Debug)]
pub struct Database<B: Backend> {
    pool: Pool<B::Db>,
    config: DatabaseConfig,
    query: DynamicQuery<B>,
}

// The sqlx driver markers are not `Clone`, so a derive would never apply.
impl<B: Backend> Clone for Database<B> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            config: self.config.clone(),
            query: self.query,
        }
    }
}

impl<B: Backend> Database<B> {
    /// Create a new database connection with the given configuration
    pub async fn connect(config: DatabaseConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let driver = config.driver()?;
        if driver.dialect() != B::DIALECT {
            return Err(anyhow!(
                "Database URL targets {} but the {} backend was requested",
                driver.dialect(),
                B::NAME
            ));
        }

        let pool = B::connect(&config).await?;
        tracing::info!(
            backend = B::NAME,
            max_connections = config.max_connections,
            node_id = %config.node_id,
            "Connected to database"
        );

        let db = Self {
            pool,
            config,
            query: DynamicQuery::new(),
        };

        // Run migrations if auto_migrate is enabled
        if db.config.auto_migrate {
            db.migrate().await?;
        }

        Ok(db)
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &Pool<B::Db> {
        &self.pool
    }

    /// Get the database configuration
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        B::DIALECT
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Dynamic table operations for use on a connection or transaction
    pub fn query(&self) -> &DynamicQuery<B> {
        &self.query
    }

    /// Start a transaction
    pub async fn begin(&self) -> Result<Tx<B>> {
        self.pool.begin().await.map_err(Error::database("", "BEGIN"))
    }

    /// Take a connection from the pool
    pub async fn acquire(&self) -> Result<PoolConnection<B::Db>> {
        self.pool.acquire().await.map_err(Error::database("", "ACQUIRE"))
    }

    /// Run database migrations
    pub async fn migrate(&self) -> anyhow::Result<()> {
        let mut conn = self.acquire().await?;
        migrations::run_migrations::<B>(&mut *conn)
            .await
            .context("Failed to run database migrations")
    }

    /// Check migration status
    pub async fn migration_status(&self) -> anyhow::Result<MigrationStatus> {
        let mut conn = self.acquire().await?;
        migrations::migration_status::<B>(&mut *conn)
            .await
            .context("Failed to check migration status")
    }

    /// Check if database is healthy
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let mut conn = self.acquire().await?;
        B::fetch_all(&mut *conn, &CompiledQuery::raw("", "SELECT", "SELECT 1 AS ok"))
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn select(&self, params: &SelectParams) -> Result<Vec<Row>> {
        let mut conn = self.acquire().await?;
        self.query.select(&mut *conn, params).await
    }

    pub async fn select_one(&self, params: &SelectParams) -> Result<Option<Row>> {
        let mut conn = self.acquire().await?;
        self.query.select_one(&mut *conn, params).await
    }

    pub async fn insert(&self, table: &str, values: &ColumnValues) -> Result<u64> {
        let mut conn = self.acquire().await?;
        self.query.insert(&mut *conn, table, values).await
    }

    pub async fn update(&self, table: &str, set: &ColumnValues, filter: &ColumnValues) -> Result<u64> {
        let mut conn = self.acquire().await?;
        self.query.update(&mut *conn, table, set, filter).await
    }

    pub async fn delete(&self, table: &str, filter: &ColumnValues) -> Result<u64> {
        let mut conn = self.acquire().await?;
        self.query.delete(&mut *conn, table, filter).await
    }

    pub async fn count(&self, table: &str, filter: &ColumnValues) -> Result<i64> {
        let mut conn = self.acquire().await?;
        self.query.count(&mut *conn, table, filter).await
    }

    pub async fn exists(&self, table: &str, filter: &ColumnValues) -> Result<bool> {
        let mut conn = self.acquire().await?;
        self.query.exists(&mut *conn, table, filter).await
    }
}

impl Database<SqliteBackend> {
    /// Create an in-memory database (useful for testing)
    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::connect(DatabaseConfig::in_memory()).await
    }
}
