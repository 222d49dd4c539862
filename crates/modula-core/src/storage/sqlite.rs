//! SQLite backend

use anyhow::Context;
use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Row as _, Sqlite, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::backend::{Backend, decode_row};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::query::{CompiledQuery, Dialect, Row, SqlValue};

/// SQLite through sqlx
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteBackend;

#[async_trait]
impl Backend for SqliteBackend {
    type Db = Sqlite;

    const DIALECT: Dialect = Dialect::Sqlite;
    const NAME: &'static str = "sqlite";

    async fn connect(config: &DatabaseConfig) -> anyhow::Result<SqlitePool> {
        let in_memory = config.is_in_memory();

        // Ensure the directory exists
        if !in_memory {
            if let Some(parent) = database_file(&config.url).as_deref().and_then(|p| p.parent()) {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory: {:?}", parent)
                    })?;
                }
            }
        }

        let mut connect_options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("Invalid SQLite URL: {}", config.url))?
            .foreign_keys(true)
            .create_if_missing(true);
        if !in_memory {
            connect_options = connect_options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));
        if in_memory {
            // Each connection owns a private in-memory database; keep the
            // single connection alive for the lifetime of the pool.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        }

        pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("Failed to connect to database: {}", config.url))
    }

    async fn fetch_all(conn: &mut SqliteConnection, query: &CompiledQuery) -> Result<Vec<Row>> {
        let rows = bind_params(query)
            .fetch_all(&mut *conn)
            .await
            .map_err(Error::database(&query.table, query.op))?;

        rows.iter()
            .map(|row| decode_row(row, &query.table, decode_value))
            .collect()
    }

    async fn execute(conn: &mut SqliteConnection, query: &CompiledQuery) -> Result<u64> {
        let result = bind_params(query)
            .execute(&mut *conn)
            .await
            .map_err(Error::database(&query.table, query.op))?;
        Ok(result.rows_affected())
    }
}

/// File path named by a `sqlite:` URL
fn database_file(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let path = rest.split('?').next().unwrap_or_default();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

fn bind_params(query: &CompiledQuery) -> Query<'_, Sqlite, <Sqlite as sqlx::Database>::Arguments<'_>> {
    query
        .params
        .iter()
        .fold(sqlx::query(&query.sql), |q, value| match value {
            SqlValue::Null => q.bind(None::<String>),
            SqlValue::Bool(v) => q.bind(*v),
            SqlValue::Integer(v) => q.bind(*v),
            SqlValue::Real(v) => q.bind(*v),
            SqlValue::Text(v) => q.bind(v.as_str()),
            SqlValue::Bytes(v) => q.bind(v.as_slice()),
        })
}

/// SQLite reports the storage class of each value
fn decode_value(row: &SqliteRow, index: usize, type_name: &str) -> Option<std::result::Result<SqlValue, sqlx::Error>> {
    let value = match type_name {
        "INTEGER" | "INT" | "BIGINT" | "INT8" => row.try_get::<i64, _>(index).map(SqlValue::Integer),
        "BOOLEAN" => row.try_get::<bool, _>(index).map(SqlValue::Bool),
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row.try_get::<f64, _>(index).map(SqlValue::Real),
        "TEXT" | "VARCHAR" | "DATE" | "TIME" | "DATETIME" => {
            row.try_get::<String, _>(index).map(SqlValue::Text)
        }
        "BLOB" => row.try_get::<Vec<u8>, _>(index).map(SqlValue::Bytes),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_file_from_url() {
        assert_eq!(
            database_file("sqlite:/var/lib/modula/cms.db?mode=rwc"),
            Some(PathBuf::from("/var/lib/modula/cms.db"))
        );
        assert_eq!(database_file("sqlite://data.db"), Some(PathBuf::from("data.db")));
        assert_eq!(database_file("postgres://x"), None);
    }

    #[tokio::test]
    async fn test_decodes_every_storage_class() {
        let pool = SqliteBackend::connect(&DatabaseConfig::in_memory())
            .await
            .expect("Failed to connect");
        let mut conn = pool.acquire().await.expect("Failed to acquire");

        let query = CompiledQuery::raw(
            "scratch",
            "SELECT",
            "SELECT 7 AS i, 1.5 AS r, 'txt' AS t, x'0102' AS b, NULL AS n",
        );
        let rows = SqliteBackend::fetch_all(&mut conn, &query).await.unwrap();
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.get("i"), Some(&SqlValue::Integer(7)));
        assert_eq!(row.get("r"), Some(&SqlValue::Real(1.5)));
        assert_eq!(row.get("t"), Some(&SqlValue::Text("txt".into())));
        assert_eq!(row.get("b"), Some(&SqlValue::Bytes(vec![1, 2])));
        assert_eq!(row.get("n"), Some(&SqlValue::Null));
    }

    #[tokio::test]
    async fn test_binds_parameters() {
        let pool = SqliteBackend::connect(&DatabaseConfig::in_memory())
            .await
            .expect("Failed to connect");
        let mut conn = pool.acquire().await.expect("Failed to acquire");

        let query = CompiledQuery::raw("scratch", "SELECT", "SELECT ? AS a, ? AS b, ? AS c")
            .bind(41i64)
            .bind("x")
            .bind(true);
        let rows = SqliteBackend::fetch_all(&mut conn, &query).await.unwrap();
        assert_eq!(rows[0].get_i64("a").unwrap(), 41);
        assert_eq!(rows[0].get_string("b").unwrap(), "x");
        assert_eq!(rows[0].get_opt_bool("c").unwrap(), Some(true));
    }
}
