//! SQL dialect differences

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// The SQL variant spoken by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    MySql,
    Postgres,
}

impl Dialect {
    /// Placeholder for the 1-based parameter `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::Sqlite | Self::MySql => "?".to_string(),
            Self::Postgres => format!("${}", index),
        }
    }

    /// LIMIT clause to pair with an OFFSET when no limit applies
    pub fn unbounded_limit(&self) -> Option<&'static str> {
        match self {
            Self::Sqlite => Some("LIMIT -1"),
            Self::MySql => Some("LIMIT 18446744073709551615"),
            Self::Postgres => None,
        }
    }

    /// Width of the integer type used for set counters
    pub fn counter_width(&self) -> u32 {
        match self {
            Self::Sqlite => 64,
            Self::MySql | Self::Postgres => 32,
        }
    }

    /// SQL type used for set counters
    pub fn counter_type(&self) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER",
            Self::MySql => "INT",
            Self::Postgres => "INTEGER",
        }
    }

    /// Check that a counter fits this dialect's column width
    pub fn check_counter(&self, column: &'static str, value: i64) -> Result<i64> {
        let width = self.counter_width();
        if width == 32 && i32::try_from(value).is_err() {
            return Err(Error::CounterOverflow { column, value, width });
        }
        Ok(value)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
