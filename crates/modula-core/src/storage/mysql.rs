//! MySQL / MariaDB backend

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlConnection, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{MySql, MySqlPool, Row as _};
use std::time::Duration;

use super::backend::{Backend, decode_row};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::query::value::format_datetime;
use crate::query::{CompiledQuery, Dialect, Row, SqlValue};

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlBackend;

#[async_trait]
impl Backend for MySqlBackend {
    type Db = MySql;

    const DIALECT: Dialect = Dialect::MySql;
    const NAME: &'static str = "mysql";

    async fn connect(config: &DatabaseConfig) -> anyhow::Result<MySqlPool> {
        MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .context("Failed to connect to MySQL")
    }

    async fn fetch_all(conn: &mut MySqlConnection, query: &CompiledQuery) -> Result<Vec<Row>> {
        let rows = bind_params(query)
            .fetch_all(&mut *conn)
            .await
            .map_err(Error::database(&query.table, query.op))?;

        rows.iter()
            .map(|row| decode_row(row, &query.table, decode_value))
            .collect()
    }

    async fn execute(conn: &mut MySqlConnection, query: &CompiledQuery) -> Result<u64> {
        let result = bind_params(query)
            .execute(&mut *conn)
            .await
            .map_err(Error::database(&query.table, query.op))?;
        Ok(result.rows_affected())
    }
}

fn bind_params(query: &CompiledQuery) -> Query<'_, MySql, <MySql as sqlx::Database>::Arguments<'_>> {
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

fn unsigned(row: &MySqlRow, index: usize) -> std::result::Result<SqlValue, sqlx::Error> {
    let value = row.try_get::<u64, _>(index)?;
    i64::try_from(value)
        .map(SqlValue::Integer)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn decode_value(row: &MySqlRow, index: usize, type_name: &str) -> Option<std::result::Result<SqlValue, sqlx::Error>> {
    let value = match type_name {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(index).map(SqlValue::Integer)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => unsigned(row, index),
        "BOOLEAN" => row.try_get::<bool, _>(index).map(SqlValue::Bool),
        "FLOAT" => row
            .try_get::<f32, _>(index)
            .map(|v| SqlValue::Real(f64::from(v))),
        "DOUBLE" => row.try_get::<f64, _>(index).map(SqlValue::Real),
        "VARCHAR" | "CHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            row.try_get::<String, _>(index).map(SqlValue::Text)
        }
        "JSON" => row
            .try_get::<serde_json::Value, _>(index)
            .map(|v| SqlValue::Text(v.to_string())),
        "DATETIME" => row
            .try_get::<NaiveDateTime, _>(index)
            .map(|v| SqlValue::Text(format_datetime(&v.and_utc()))),
        "TIMESTAMP" => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(|v| SqlValue::Text(format_datetime(&v))),
        "DATE" => row
            .try_get::<NaiveDate, _>(index)
            .map(|v| SqlValue::Text(v.to_string())),
        "TIME" => row
            .try_get::<NaiveTime, _>(index)
            .map(|v| SqlValue::Text(v.to_string())),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
            row.try_get::<Vec<u8>, _>(index).map(SqlValue::Bytes)
        }
        _ => return None,
    };
    Some(value)
}
