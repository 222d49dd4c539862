//! Dialect-aware statement builder
//!
//! Compiles structured parameters into parameterized SQL. Identifiers are
//! validated before any text is assembled; values are always bound.

use tracing::debug;

use super::dialect::Dialect;
use super::identifier::validate_identifier;
use super::value::{ColumnValues, SqlValue};
use crate::error::{Error, Result};

/// Upper bound applied to every SELECT limit
pub const MAX_LIMIT: i64 = 10_000;

/// A statement ready for execution
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
    /// Target table, carried for error context
    pub table: String,
    /// Statement kind, carried for error context
    pub op: &'static str,
}

impl CompiledQuery {
    /// Wrap fixed statement text. Nothing in `sql` is validated, so it must
    /// never contain caller-supplied identifiers.
    pub fn raw(table: &str, op: &'static str, sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            table: table.to_string(),
            op,
        }
    }

    pub(crate) fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Parameters for a SELECT
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectParams {
    pub table: String,
    /// Projection; empty means `*`
    pub columns: Vec<String>,
    /// Equality filter; `Null` compiles to `IS NULL`
    pub filter: ColumnValues,
    pub order_by: Option<String>,
    pub descending: bool,
    /// `None` applies [`MAX_LIMIT`], negative disables the limit, larger
    /// values are capped at [`MAX_LIMIT`]
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl SelectParams {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.filter.insert(column.into(), value.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Effective limit after clamping; `None` means unlimited
    pub fn effective_limit(&self) -> Option<i64> {
        match self.limit {
            None => Some(MAX_LIMIT),
            Some(limit) if limit < 0 => None,
            Some(limit) => Some(limit.min(MAX_LIMIT)),
        }
    }
}

/// Collects bound values and hands out placeholders
struct Binder {
    dialect: Dialect,
    params: Vec<SqlValue>,
}

impl Binder {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    fn push(&mut self, value: &SqlValue) -> String {
        self.params.push(value.clone());
        self.dialect.placeholder(self.params.len())
    }

    /// Placeholder for a written value; NULL is inlined so no typed NULL is
    /// ever bound
    fn value(&mut self, value: &SqlValue) -> String {
        if value.is_null() {
            "NULL".to_string()
        } else {
            self.push(value)
        }
    }
}

/// Statement builder for one dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryBuilder {
    dialect: Dialect,
}

impl QueryBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn select(&self, params: &SelectParams) -> Result<CompiledQuery> {
        let table = validate_identifier(&params.table)?;

        let projection = if params.columns.is_empty() {
            "*".to_string()
        } else {
            params
                .columns
                .iter()
                .map(|column| validate_identifier(column))
                .collect::<Result<Vec<_>>>()?
                .join(", ")
        };

        let mut binder = Binder::new(self.dialect);
        let mut sql = format!("SELECT {} FROM {}", projection, table);
        self.push_where(&mut sql, &params.filter, &mut binder)?;

        if let Some(order_by) = &params.order_by {
            let column = validate_identifier(order_by)?;
            sql.push_str(" ORDER BY ");
            sql.push_str(column);
            if params.descending {
                sql.push_str(" DESC");
            }
        }

        let offset = params.offset.filter(|offset| *offset > 0);
        match params.effective_limit() {
            Some(limit) => sql.push_str(&format!(" LIMIT {}", limit)),
            None if offset.is_some() => {
                if let Some(unbounded) = self.dialect.unbounded_limit() {
                    sql.push(' ');
                    sql.push_str(unbounded);
                }
            }
            None => {}
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        Ok(self.finish(sql, binder, table, "SELECT"))
    }

    pub fn insert(&self, table: &str, values: &ColumnValues) -> Result<CompiledQuery> {
        let table = validate_identifier(table)?;
        if values.is_empty() {
            return Err(Error::EmptyValues(table.to_string()));
        }

        let mut binder = Binder::new(self.dialect);
        let mut columns = Vec::with_capacity(values.len());
        let mut placeholders = Vec::with_capacity(values.len());
        for (column, value) in values {
            columns.push(validate_identifier(column)?);
            placeholders.push(binder.value(value));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );
        Ok(self.finish(sql, binder, table, "INSERT"))
    }

    pub fn update(&self, table: &str, set: &ColumnValues, filter: &ColumnValues) -> Result<CompiledQuery> {
        let table = validate_identifier(table)?;
        if set.is_empty() {
            return Err(Error::EmptySet(table.to_string()));
        }
        if filter.is_empty() {
            return Err(Error::EmptyWhere {
                table: table.to_string(),
                op: "UPDATE",
            });
        }

        let mut binder = Binder::new(self.dialect);
        let assignments = set
            .iter()
            .map(|(column, value)| {
                let column = validate_identifier(column)?;
                Ok(format!("{} = {}", column, binder.value(value)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
        self.push_where(&mut sql, filter, &mut binder)?;
        Ok(self.finish(sql, binder, table, "UPDATE"))
    }

    pub fn delete(&self, table: &str, filter: &ColumnValues) -> Result<CompiledQuery> {
        let table = validate_identifier(table)?;
        if filter.is_empty() {
            return Err(Error::EmptyWhere {
                table: table.to_string(),
                op: "DELETE",
            });
        }

        let mut binder = Binder::new(self.dialect);
        let mut sql = format!("DELETE FROM {}", table);
        self.push_where(&mut sql, filter, &mut binder)?;
        Ok(self.finish(sql, binder, table, "DELETE"))
    }

    pub fn count(&self, table: &str, filter: &ColumnValues) -> Result<CompiledQuery> {
        let table = validate_identifier(table)?;
        let mut binder = Binder::new(self.dialect);
        let mut sql = format!("SELECT COUNT(*) AS row_count FROM {}", table);
        self.push_where(&mut sql, filter, &mut binder)?;
        Ok(self.finish(sql, binder, table, "COUNT"))
    }

    pub fn exists(&self, table: &str, filter: &ColumnValues) -> Result<CompiledQuery> {
        let table = validate_identifier(table)?;
        let mut binder = Binder::new(self.dialect);
        let mut sql = format!("SELECT 1 AS present FROM {}", table);
        self.push_where(&mut sql, filter, &mut binder)?;
        sql.push_str(" LIMIT 1");
        Ok(self.finish(sql, binder, table, "EXISTS"))
    }

    fn push_where(&self, sql: &mut String, filter: &ColumnValues, binder: &mut Binder) -> Result<()> {
        if filter.is_empty() {
            return Ok(());
        }

        let conditions = filter
            .iter()
            .map(|(column, value)| {
                let column = validate_identifier(column)?;
                Ok(if value.is_null() {
                    format!("{} IS NULL", column)
                } else {
                    format!("{} = {}", column, binder.push(value))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
        Ok(())
    }

    fn finish(&self, sql: String, binder: Binder, table: &str, op: &'static str) -> CompiledQuery {
        debug!(dialect = %self.dialect, table, op, params = binder.params.len(), "Compiled statement");
        CompiledQuery {
            sql,
            params: binder.params,
            table: table.to_string(),
            op,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, SqlValue)]) -> ColumnValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_select_defaults() {
        let q = QueryBuilder::new(Dialect::Sqlite)
            .select(&SelectParams::new("backup"))
            .unwrap();
        assert_eq!(q.sql, "SELECT * FROM backup LIMIT 10000");
        assert!(q.params.is_empty());
        assert_eq!(q.op, "SELECT");
    }

    #[test]
    fn test_select_full_postgres() {
        let params = SelectParams::new("backup")
            .columns(["backup_id", "status"])
            .filter("node_id", "n1")
            .filter("status", "completed")
            .order_by("started_at")
            .descending()
            .limit(20)
            .offset(40);
        let q = QueryBuilder::new(Dialect::Postgres).select(&params).unwrap();

        assert_eq!(
            q.sql,
            "SELECT backup_id, status FROM backup WHERE node_id = $1 AND status = $2 \
             ORDER BY started_at DESC LIMIT 20 OFFSET 40"
        );
        assert_eq!(q.params, vec![SqlValue::from("n1"), SqlValue::from("completed")]);
    }

    #[test]
    fn test_where_null_compiles_to_is_null() {
        let params = SelectParams::new("articles")
            .filter("deleted_at", SqlValue::Null)
            .filter("slug", "home");
        let q = QueryBuilder::new(Dialect::MySql).select(&params).unwrap();
        assert_eq!(
            q.sql,
            "SELECT * FROM articles WHERE deleted_at IS NULL AND slug = ? LIMIT 10000"
        );
        assert_eq!(q.params, vec![SqlValue::from("home")]);
    }

    #[test]
    fn test_limit_clamping() {
        let builder = QueryBuilder::new(Dialect::Sqlite);

        let capped = builder.select(&SelectParams::new("t").limit(99_999)).unwrap();
        assert!(capped.sql.ends_with("LIMIT 10000"));

        let unlimited = builder.select(&SelectParams::new("t").limit(-1)).unwrap();
        assert_eq!(unlimited.sql, "SELECT * FROM t");

        let zero = builder.select(&SelectParams::new("t").limit(0)).unwrap();
        assert!(zero.sql.ends_with("LIMIT 0"));
    }

    #[test]
    fn test_offset_without_limit_per_dialect() {
        let params = SelectParams::new("t").limit(-1).offset(5);
        assert_eq!(
            QueryBuilder::new(Dialect::Sqlite).select(&params).unwrap().sql,
            "SELECT * FROM t LIMIT -1 OFFSET 5"
        );
        assert_eq!(
            QueryBuilder::new(Dialect::MySql).select(&params).unwrap().sql,
            "SELECT * FROM t LIMIT 18446744073709551615 OFFSET 5"
        );
        assert_eq!(
            QueryBuilder::new(Dialect::Postgres).select(&params).unwrap().sql,
            "SELECT * FROM t OFFSET 5"
        );
    }

    #[test]
    fn test_insert_inlines_null_and_numbers_placeholders() {
        let q = QueryBuilder::new(Dialect::Postgres)
            .insert(
                "backup",
                &values(&[
                    ("backup_id", "b1".into()),
                    ("checksum", SqlValue::Null),
                    ("size_bytes", 10i64.into()),
                ]),
            )
            .unwrap();
        assert_eq!(
            q.sql,
            "INSERT INTO backup (backup_id, checksum, size_bytes) VALUES ($1, NULL, $2)"
        );
        assert_eq!(q.params, vec![SqlValue::from("b1"), SqlValue::from(10i64)]);
    }

    #[test]
    fn test_update_numbers_set_then_where() {
        let q = QueryBuilder::new(Dialect::Postgres)
            .update(
                "backup",
                &values(&[("status", "failed".into()), ("error_message", "boom".into())]),
                &values(&[("backup_id", "b1".into())]),
            )
            .unwrap();
        assert_eq!(
            q.sql,
            "UPDATE backup SET error_message = $1, status = $2 WHERE backup_id = $3"
        );
        assert_eq!(q.params.len(), 3);
    }

    #[test]
    fn test_mandatory_maps() {
        let builder = QueryBuilder::new(Dialect::Sqlite);
        let id = values(&[("id", 1i64.into())]);
        let set = values(&[("x", 1i64.into())]);
        let empty = ColumnValues::new();

        assert!(matches!(builder.insert("t", &empty), Err(Error::EmptyValues(_))));
        assert!(matches!(builder.update("t", &empty, &id), Err(Error::EmptySet(_))));
        assert!(matches!(
            builder.update("t", &set, &empty),
            Err(Error::EmptyWhere { op: "UPDATE", .. })
        ));
        assert!(matches!(
            builder.delete("t", &empty),
            Err(Error::EmptyWhere { op: "DELETE", .. })
        ));
    }

    #[test]
    fn test_every_entry_point_rejects_unsafe_identifiers() {
        let builder = QueryBuilder::new(Dialect::Sqlite);
        let ok = values(&[("id", 1i64.into())]);
        let bad_column = values(&[("id; DROP TABLE x", 1i64.into())]);

        for table in ["DROP TABLE--", "select", "t where 1=1", ""] {
            assert!(builder.select(&SelectParams::new(table)).unwrap_err().is_validation());
            assert!(builder.insert(table, &ok).unwrap_err().is_validation());
            assert!(builder.update(table, &ok, &ok).unwrap_err().is_validation());
            assert!(builder.delete(table, &ok).unwrap_err().is_validation());
            assert!(builder.count(table, &ok).unwrap_err().is_validation());
            assert!(builder.exists(table, &ok).unwrap_err().is_validation());
        }

        assert!(builder.insert("t", &bad_column).unwrap_err().is_validation());
        assert!(builder.update("t", &bad_column, &ok).unwrap_err().is_validation());
        assert!(builder.update("t", &ok, &bad_column).unwrap_err().is_validation());
        assert!(builder.delete("t", &bad_column).unwrap_err().is_validation());
        assert!(builder.count("t", &bad_column).unwrap_err().is_validation());
        assert!(
            builder
                .select(&SelectParams::new("t").columns(["a", "b,c"]))
                .unwrap_err()
                .is_validation()
        );
        assert!(
            builder
                .select(&SelectParams::new("t").order_by("id DESC; --"))
                .unwrap_err()
                .is_validation()
        );
        assert!(
            builder
                .select(&SelectParams::new("t").filter("Where", 1i64))
                .unwrap_err()
                .is_validation()
        );
    }

    #[test]
    fn test_count_and_exists() {
        let builder = QueryBuilder::new(Dialect::Postgres);
        let filter = values(&[("status", "pending".into())]);

        let count = builder.count("backup", &filter).unwrap();
        assert_eq!(count.sql, "SELECT COUNT(*) AS row_count FROM backup WHERE status = $1");

        let exists = builder.exists("backup", &ColumnValues::new()).unwrap();
        assert_eq!(exists.sql, "SELECT 1 AS present FROM backup LIMIT 1");
    }
}
