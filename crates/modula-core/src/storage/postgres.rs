//! PostgreSQL backend

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row as _};
use std::time::Duration;

use super::backend::{Backend, decode_row};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::query::value::format_datetime;
use crate::query::{CompiledQuery, Dialect, Row, SqlValue};

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresBackend;

#[async_trait]
impl Backend for PostgresBackend {
    type Db = Postgres;

    const DIALECT: Dialect = Dialect::Postgres;
    const NAME: &'static str = "postgres";

    async fn connect(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")
    }

    async fn fetch_all(conn: &mut PgConnection, query: &CompiledQuery) -> Result<Vec<Row>> {
        let rows = bind_params(query)
            .fetch_all(&mut *conn)
            .await
            .map_err(Error::database(&query.table, query.op))?;

        rows.iter()
            .map(|row| decode_row(row, &query.table, decode_value))
            .collect()
    }

    async fn execute(conn: &mut PgConnection, query: &CompiledQuery) -> Result<u64> {
        let result = bind_params(query)
            .execute(&mut *conn)
            .await
            .map_err(Error::database(&query.table, query.op))?;
        Ok(result.rows_affected())
    }
}

fn bind_params(query: &CompiledQuery) -> Query<'_, Postgres, <Postgres as sqlx::Database>::Arguments<'_>> {
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

fn decode_value(row: &PgRow, index: usize, type_name: &str) -> Option<std::result::Result<SqlValue, sqlx::Error>> {
    let value = match type_name {
        "INT2" => row.try_get::<i16, _>(index).map(|v| SqlValue::Integer(i64::from(v))),
        "INT4" => row.try_get::<i32, _>(index).map(SqlValue::from),
        "INT8" => row.try_get::<i64, _>(index).map(SqlValue::Integer),
        "BOOL" => row.try_get::<bool, _>(index).map(SqlValue::Bool),
        "FLOAT4" => row
            .try_get::<f32, _>(index)
            .map(|v| SqlValue::Real(f64::from(v))),
        "FLOAT8" => row.try_get::<f64, _>(index).map(SqlValue::Real),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row.try_get::<String, _>(index).map(SqlValue::Text),
        "UUID" => row
            .try_get::<uuid::Uuid, _>(index)
            .map(|v| SqlValue::Text(v.to_string())),
        "JSON" | "JSONB" => row
            .try_get::<serde_json::Value, _>(index)
            .map(|v| SqlValue::Text(v.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(|v| SqlValue::Text(format_datetime(&v))),
        "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(index)
            .map(|v| SqlValue::Text(format_datetime(&v.and_utc()))),
        "DATE" => row
            .try_get::<NaiveDate, _>(index)
            .map(|v| SqlValue::Text(v.to_string())),
        "BYTEA" => row.try_get::<Vec<u8>, _>(index).map(SqlValue::Bytes),
        _ => return None,
    };
    Some(value)
}
