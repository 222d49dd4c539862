//! Modula Core Library
//!
//! Persistence core shared by every Modula node:
//! - Causal clock (hybrid logical timestamps)
//! - Safe dynamic queries over SQLite, MySQL and PostgreSQL
//! - Audited create/update/delete with change events in the same transaction
//! - Backup, backup set and verification coordination

pub mod audit;
pub mod backup;
pub mod clock;
pub mod config;
pub mod error;
pub mod query;
pub mod storage;
pub mod telemetry;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::audit::{
        AuditContext, ChangeEvent, ChangeEventLog, Entity, ExecContext, MemoryRecorder, Operation,
        Recorder, SqlRecorder,
    };
    pub use crate::backup::{BackupRepository, BackupStatus, BackupType};
    pub use crate::clock::{HybridClock, Timestamp};
    pub use crate::config::{Config, DatabaseConfig};
    pub use crate::error::{Error, Result};
    pub use crate::query::{Dialect, Row, SelectParams, SqlValue};
    pub use crate::storage::{Backend, Database, MySqlBackend, PostgresBackend, SqliteBackend};
}
