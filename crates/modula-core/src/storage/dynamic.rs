//! Runtime-named table access
//!
//! Compiles through [`QueryBuilder`] and runs on any connection of the
//! backend, including an open transaction.

use std::marker::PhantomData;

use super::backend::{Backend, Conn};
use crate::error::Result;
use crate::query::{ColumnValues, QueryBuilder, Row, SelectParams};

/// Dynamic table operations for one backend
#[derive(Debug, Clone, Copy)]
pub struct DynamicQuery<B: Backend> {
    builder: QueryBuilder,
    _backend: PhantomData<B>,
}

impl<B: Backend> Default for DynamicQuery<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> DynamicQuery<B> {
    pub fn new() -> Self {
        Self {
            builder: QueryBuilder::new(B::DIALECT),
            _backend: PhantomData,
        }
    }

    pub fn builder(&self) -> &QueryBuilder {
        &self.builder
    }

    pub async fn select(&self, conn: &mut Conn<B>, params: &SelectParams) -> Result<Vec<Row>> {
        let query = self.builder.select(params)?;
        B::fetch_all(conn, &query).await
    }

    /// First matching row, if any
    pub async fn select_one(&self, conn: &mut Conn<B>, params: &SelectParams) -> Result<Option<Row>> {
        let params = params.clone().limit(1);
        let query = self.builder.select(&params)?;
        Ok(B::fetch_all(conn, &query).await?.into_iter().next())
    }

    /// Insert one row, returning the number of rows written
    pub async fn insert(&self, conn: &mut Conn<B>, table: &str, values: &ColumnValues) -> Result<u64> {
        let query = self.builder.insert(table, values)?;
        B::execute(conn, &query).await
    }

    /// Update matching rows, returning the number the driver reports as
    /// affected
    pub async fn update(
        &self,
        conn: &mut Conn<B>,
        table: &str,
        set: &ColumnValues,
        filter: &ColumnValues,
    ) -> Result<u64> {
        let query = self.builder.update(table, set, filter)?;
        B::execute(conn, &query).await
    }

    pub async fn delete(&self, conn: &mut Conn<B>, table: &str, filter: &ColumnValues) -> Result<u64> {
        let query = self.builder.delete(table, filter)?;
        B::execute(conn, &query).await
    }

    pub async fn count(&self, conn: &mut Conn<B>, table: &str, filter: &ColumnValues) -> Result<i64> {
        let query = self.builder.count(table, filter)?;
        let rows = B::fetch_all(conn, &query).await?;
        match rows.first() {
            Some(row) => row.get_i64("row_count"),
            None => Ok(0),
        }
    }

    pub async fn exists(&self, conn: &mut Conn<B>, table: &str, filter: &ColumnValues) -> Result<bool> {
        let query = self.builder.exists(table, filter)?;
        Ok(!B::fetch_all(conn, &query).await?.is_empty())
    }
}
