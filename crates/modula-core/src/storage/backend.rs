//! Backend seam
//!
//! A `Backend` ties a sqlx driver to its dialect and owns the two places
//! where driver types meet the rest of the crate: binding [`SqlValue`]
//! parameters and decoding driver rows into [`Row`].
//!
//! [`SqlValue`]: crate::query::SqlValue

use async_trait::async_trait;
use sqlx::{Column, Pool, TypeInfo, ValueRef};
use std::fmt;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::query::{CompiledQuery, Dialect, Row, SqlValue};

/// Driver connection type for a backend
pub type Conn<B> = <<B as Backend>::Db as sqlx::Database>::Connection;

/// Transaction type for a backend
pub type Tx<B> = sqlx::Transaction<'static, <B as Backend>::Db>;

/// One SQL backend
#[async_trait]
pub trait Backend: fmt::Debug + Clone + Copy + Default + Send + Sync + 'static {
    type Db: sqlx::Database;

    const DIALECT: Dialect;
    const NAME: &'static str;

    /// Open a connection pool
    async fn connect(config: &DatabaseConfig) -> anyhow::Result<Pool<Self::Db>>;

    /// Run a statement and decode every returned row
    async fn fetch_all(conn: &mut Conn<Self>, query: &CompiledQuery) -> Result<Vec<Row>>;

    /// Run a statement and return the number of affected rows
    async fn execute(conn: &mut Conn<Self>, query: &CompiledQuery) -> Result<u64>;
}

/// Decode a driver row column by column.
///
/// `decode` maps a column's driver type name to a value, returning `None`
/// for types outside the supported set so they surface as errors instead of
/// being dropped.
pub(crate) fn decode_row<R, F>(row: &R, table: &str, decode: F) -> Result<Row>
where
    R: sqlx::Row,
    usize: sqlx::ColumnIndex<R>,
    F: Fn(&R, usize, &str) -> Option<std::result::Result<SqlValue, sqlx::Error>>,
{
    let mut decoded = Row::with_capacity(row.len());
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row
            .try_get_raw(index)
            .map_err(Error::database(table, "decode"))?;

        if raw.is_null() {
            decoded.push(column.name(), SqlValue::Null);
            continue;
        }

        let type_name = raw.type_info().name().to_ascii_uppercase();
        let value = decode(row, index, &type_name)
            .ok_or_else(|| Error::UnsupportedColumnType {
                column: column.name().to_string(),
                type_name: type_name.clone(),
            })?
            .map_err(Error::database(table, "decode"))?;
        decoded.push(column.name(), value);
    }
    Ok(decoded)
}
