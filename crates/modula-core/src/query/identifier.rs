//! Table and column name validation
//!
//! Every identifier that is concatenated into statement text goes through
//! [`validate_identifier`] first. Values never reach statement text; they are
//! always bound as parameters.

use crate::error::{Error, Result};

/// Keywords that may not be used as a table or column name
pub const RESERVED_KEYWORDS: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "ATTACH", "BEGIN", "BETWEEN", "BY",
    "CALL", "CASE", "CHECK", "COLUMN", "COMMIT", "CONSTRAINT", "CREATE", "CROSS", "DATABASE",
    "DECLARE", "DEFAULT", "DELETE", "DESC", "DETACH", "DISTINCT", "DROP", "ELSE", "END",
    "EXCEPT", "EXEC", "EXECUTE", "EXISTS", "FOREIGN", "FROM", "FULL", "FUNCTION", "GRANT",
    "GROUP", "HAVING", "IN", "INDEX", "INNER", "INSERT", "INTERSECT", "INTO", "IS", "JOIN",
    "LEFT", "LIKE", "LIMIT", "MERGE", "NOT", "NULL", "OFFSET", "ON", "OR", "ORDER", "OUTER",
    "PRAGMA", "PRIMARY", "PROCEDURE", "REFERENCES", "RENAME", "REPLACE", "REVOKE", "RIGHT",
    "ROLLBACK", "SCHEMA", "SELECT", "SET", "TABLE", "THEN", "TRIGGER", "TRUNCATE", "UNION",
    "UNIQUE", "UPDATE", "USING", "VALUES", "VIEW", "WHEN", "WHERE", "WITH",
];

/// Validate a table or column name, returning it unchanged on success
pub fn validate_identifier(name: &str) -> Result<&str> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidIdentifier(name.to_string()));
    }
    if is_reserved(name) {
        return Err(Error::ReservedIdentifier(name.to_string()));
    }
    Ok(name)
}

pub fn is_safe_identifier(name: &str) -> bool {
    validate_identifier(name).is_ok()
}

fn is_reserved(name: &str) -> bool {
    RESERVED_KEYWORDS
        .iter()
        .any(|keyword| keyword.eq_ignore_ascii_case(name))
}
