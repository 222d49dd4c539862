//! Error types for the Modula persistence core

use thiserror::Error;

/// Result type alias using Modula's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Persistence errors, grouped by how a caller is expected to react
#[derive(Error, Debug)]
pub enum Error {
    // Validation errors (E001-E099): raised before any SQL is issued
    #[error("Invalid identifier '{0}': only letters, digits and '_' are allowed")]
    InvalidIdentifier(String),

    #[error("Identifier '{0}' is a reserved SQL keyword")]
    ReservedIdentifier(String),

    #[error("Insert into '{0}' requires at least one column value")]
    EmptyValues(String),

    #[error("Update of '{0}' requires at least one SET column")]
    EmptySet(String),

    #[error("{op} on '{table}' requires a WHERE clause")]
    EmptyWhere { table: String, op: &'static str },

    #[error("Value {value} does not fit the {width}-bit column '{column}'")]
    CounterOverflow {
        column: &'static str,
        value: i64,
        width: u32,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Not-found errors (E100-E199)
    #[error("Record '{id}' not found in '{table}'")]
    NotFound { table: String, id: String },

    // Backend errors (E200-E299)
    #[error("{op} on '{table}' failed: {source}")]
    Database {
        table: String,
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Column '{column}' has unsupported type '{type_name}'")]
    UnsupportedColumnType { column: String, type_name: String },

    // Audit errors (E300-E399)
    #[error("Failed to record change event for '{table}' record '{id}': {source}")]
    RecordFailed {
        table: String,
        id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation exceeded its deadline")]
    DeadlineExceeded,

    // State machine errors (E400-E499)
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    // Generic errors
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a mapper that wraps a driver error with its table and operation
    pub fn database(table: impl Into<String>, op: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        let table = table.into();
        move |source| Self::Database { table, op, source }
    }

    /// Shorthand for a not-found error
    pub fn not_found(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.into(),
            id: id.into(),
        }
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier(_) => "E001",
            Self::ReservedIdentifier(_) => "E002",
            Self::EmptyValues(_) => "E003",
            Self::EmptySet(_) => "E004",
            Self::EmptyWhere { .. } => "E005",
            Self::CounterOverflow { .. } => "E006",
            Self::InvalidInput(_) => "E010",
            Self::NotFound { .. } => "E100",
            Self::Database { .. } => "E200",
            Self::DatabaseError(_) => "E201",
            Self::UnsupportedColumnType { .. } => "E202",
            Self::RecordFailed { .. } => "E300",
            Self::Cancelled => "E301",
            Self::DeadlineExceeded => "E302",
            Self::InvalidTransition { .. } => "E400",
            Self::Parse(_) | Self::Serialization(_) | Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Whether the error was raised before reaching the database
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidIdentifier(_)
                | Self::ReservedIdentifier(_)
                | Self::EmptyValues(_)
                | Self::EmptySet(_)
                | Self::EmptyWhere { .. }
                | Self::CounterOverflow { .. }
                | Self::InvalidInput(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::InvalidIdentifier(_) | Self::ReservedIdentifier(_) => {
                Some("Use a plain snake_case table or column name".to_string())
            }
            Self::EmptyWhere { .. } => {
                Some("Mass updates and deletes are not allowed through the dynamic query path".to_string())
            }
            Self::CounterOverflow { width, .. } => {
                Some(format!("Keep the value within the signed {}-bit range", width))
            }
            Self::Cancelled | Self::DeadlineExceeded => {
                Some("The transaction was rolled back; retry with a fresh context".to_string())
            }
            _ => None,
        }
    }
}
