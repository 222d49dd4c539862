//! Database migrations
//!
//! Versioned schema for the change event log and backup coordination
//! tables. Statements are portable across the three dialects; the only
//! dialect-dependent type is the backup set counter width.

use chrono::Utc;

use super::backend::{Backend, Conn};
use crate::error::Result;
use crate::query::value::format_datetime;
use crate::query::{CompiledQuery, Dialect};

/// Current schema version
pub const CURRENT_VERSION: i64 = 3;

const MIGRATIONS_TABLE: &str = "_migrations";

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY NOT NULL,
    applied_at VARCHAR(64) NOT NULL
)";

/// Migration 1: change event log
fn migration_v1() -> Vec<String> {
    vec![
        "CREATE TABLE IF NOT EXISTS change_events (
            event_id VARCHAR(64) PRIMARY KEY NOT NULL,
            hlc_timestamp BIGINT NOT NULL,
            wall_timestamp VARCHAR(64) NOT NULL,
            node_id VARCHAR(191) NOT NULL,
            table_name VARCHAR(191) NOT NULL,
            record_id VARCHAR(191) NOT NULL,
            operation VARCHAR(16) NOT NULL,
            user_id VARCHAR(191),
            request_id VARCHAR(191),
            ip VARCHAR(64),
            old_values TEXT,
            new_values TEXT
        )"
        .to_string(),
        "CREATE INDEX idx_change_events_record ON change_events(table_name, record_id)".to_string(),
        "CREATE INDEX idx_change_events_hlc ON change_events(hlc_timestamp)".to_string(),
    ]
}

/// Migration 2: backups, backup sets and verifications
fn migration_v2(dialect: Dialect) -> Vec<String> {
    let counter = dialect.counter_type();
    vec![
        "CREATE TABLE IF NOT EXISTS backup (
            backup_id VARCHAR(64) PRIMARY KEY NOT NULL,
            node_id VARCHAR(191) NOT NULL,
            backup_type VARCHAR(32) NOT NULL,
            status VARCHAR(32) NOT NULL,
            started_at VARCHAR(64) NOT NULL,
            completed_at VARCHAR(64),
            hlc_timestamp BIGINT NOT NULL,
            replication_lsn VARCHAR(191),
            size_bytes BIGINT,
            record_count BIGINT,
            storage_path TEXT NOT NULL,
            checksum VARCHAR(128),
            triggered_by VARCHAR(191),
            error_message TEXT,
            metadata TEXT
        )"
        .to_string(),
        "CREATE INDEX idx_backup_node ON backup(node_id, started_at)".to_string(),
        "CREATE INDEX idx_backup_status ON backup(status)".to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS backup_set (
            backup_set_id VARCHAR(64) PRIMARY KEY NOT NULL,
            created_at VARCHAR(64) NOT NULL,
            hlc_timestamp BIGINT NOT NULL,
            status VARCHAR(32) NOT NULL,
            backup_ids TEXT NOT NULL,
            node_count {counter} NOT NULL,
            completed_count {counter},
            failed_count {counter} NOT NULL,
            error_message TEXT
        )"
        ),
        "CREATE TABLE IF NOT EXISTS backup_verification (
            verification_id VARCHAR(64) PRIMARY KEY NOT NULL,
            backup_id VARCHAR(64) NOT NULL REFERENCES backup(backup_id) ON DELETE CASCADE,
            verified_at VARCHAR(64) NOT NULL,
            hlc_timestamp BIGINT NOT NULL,
            verified_by VARCHAR(191),
            restore_tested SMALLINT,
            checksum_valid SMALLINT,
            record_count_match SMALLINT,
            status VARCHAR(32) NOT NULL,
            error_message TEXT,
            duration_ms BIGINT
        )"
        .to_string(),
        "CREATE INDEX idx_backup_verification_backup ON backup_verification(backup_id)".to_string(),
    ]
}

/// Migration 3: which backup set members have reported
fn migration_v3() -> Vec<String> {
    vec![
        "ALTER TABLE backup_set ADD COLUMN completed_ids TEXT".to_string(),
        "ALTER TABLE backup_set ADD COLUMN failed_ids TEXT".to_string(),
    ]
}

fn migration(version: i64, dialect: Dialect) -> Vec<String> {
    match version {
        1 => migration_v1(),
        2 => migration_v2(dialect),
        3 => migration_v3(),
        _ => Vec::new(),
    }
}

fn description(version: i64) -> &'static str {
    match version {
        1 => "Change event log",
        2 => "Backup coordination",
        3 => "Backup set member tracking",
        _ => "Unknown",
    }
}

async fn get_current_version<B: Backend>(conn: &mut Conn<B>) -> Result<i64> {
    // Ensure migrations table exists
    B::execute(conn, &CompiledQuery::raw(MIGRATIONS_TABLE, "CREATE", CREATE_MIGRATIONS_TABLE)).await?;

    let rows = B::fetch_all(
        conn,
        &CompiledQuery::raw(
            MIGRATIONS_TABLE,
            "SELECT",
            "SELECT version FROM _migrations ORDER BY version DESC LIMIT 1",
        ),
    )
    .await?;

    match rows.first() {
        Some(row) => row.get_i64("version"),
        None => Ok(0),
    }
}

async fn record_migration<B: Backend>(conn: &mut Conn<B>, version: i64) -> Result<()> {
    let sql = format!(
        "INSERT INTO _migrations (version, applied_at) VALUES ({}, {})",
        B::DIALECT.placeholder(1),
        B::DIALECT.placeholder(2)
    );
    let query = CompiledQuery::raw(MIGRATIONS_TABLE, "INSERT", sql)
        .bind(version)
        .bind(format_datetime(&Utc::now()));
    B::execute(conn, &query).await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations<B: Backend>(conn: &mut Conn<B>) -> Result<()> {
    let current_version = get_current_version::<B>(conn).await?;

    tracing::info!(
        backend = B::NAME,
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    for version in (current_version + 1)..=CURRENT_VERSION {
        tracing::info!(version, "Applying migration: {}", description(version));
        for statement in migration(version, B::DIALECT) {
            B::execute(conn, &CompiledQuery::raw(MIGRATIONS_TABLE, "MIGRATE", statement)).await?;
        }
        record_migration::<B>(conn, version).await?;
    }

    tracing::info!(version = CURRENT_VERSION, "Database migrations complete");
    Ok(())
}

/// Get migration status information
pub async fn migration_status<B: Backend>(conn: &mut Conn<B>) -> Result<MigrationStatus> {
    let current_version = get_current_version::<B>(conn).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
        pending: ((current_version + 1)..=CURRENT_VERSION).collect(),
    })
}

/// Migration status information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i64,
    /// Target schema version (latest)
    pub target_version: i64,
    /// Whether migrations need to be run
    pub needs_migration: bool,
    /// Versions not yet applied
    pub pending: Vec<i64>,
}
