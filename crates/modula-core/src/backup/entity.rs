//! Backup coordination entities
//!
//! `Backup` follows `pending -> in_progress -> {completed, failed}`.
//! `BackupSet` aggregates member backups across nodes and derives its status
//! from the member counters. `BackupVerification` is written once.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::Entity;
use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::query::{ColumnValues, Dialect, Row, SqlValue};

pub const BACKUP_TABLE: &str = "backup";
pub const BACKUP_SET_TABLE: &str = "backup_set";
pub const BACKUP_VERIFICATION_TABLE: &str = "backup_verification";

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn flag(value: Option<bool>) -> SqlValue {
    value.map(|v| SqlValue::Integer(i64::from(v))).into()
}

/// Kind of backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    Full,
    Incremental,
    Differential,
}

impl BackupType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "incremental" => Some(Self::Incremental),
            "differential" => Some(Self::Differential),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::Differential => "differential",
        }
    }
}

impl std::fmt::Display for BackupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a single backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// A run may fail before it starts, but only completes once started
    pub fn can_transition_to(&self, next: BackupStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Failed)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate status of a backup set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupSetStatus {
    Pending,
    Partial,
    Complete,
}

impl BackupSetStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "partial" => Some(Self::Partial),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Partial => "partial",
            Self::Complete => "complete",
        }
    }

    /// Status implied by the member counters
    pub fn derive(completed: i64, failed: i64, node_count: i64) -> Self {
        if completed == node_count {
            Self::Complete
        } else if completed == 0 && failed == 0 {
            Self::Pending
        } else {
            Self::Partial
        }
    }
}

impl std::fmt::Display for BackupSetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Failed,
}

impl VerificationStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "verified" => Some(Self::Verified),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }

    /// Any failed check fails the verification; with no failures, at least
    /// one passed check verifies it; nothing checked stays pending.
    pub fn from_checks(checks: &VerificationChecks) -> Self {
        let results = [checks.restore_tested, checks.checksum_valid, checks.record_count_match];
        if results.contains(&Some(false)) {
            Self::Failed
        } else if results.contains(&Some(true)) {
            Self::Verified
        } else {
            Self::Pending
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn parse_enum<T>(row: &Row, column: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
    let text = row.get_string(column)?;
    parse(&text).ok_or_else(|| Error::Parse(format!("Unknown {} '{}'", column, text)))
}

/// One backup run on one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub backup_id: String,
    pub node_id: String,
    pub backup_type: BackupType,
    pub status: BackupStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub hlc: Timestamp,
    /// Replication position at backup time
    pub replication_lsn: Option<String>,
    pub size_bytes: Option<i64>,
    pub record_count: Option<i64>,
    pub storage_path: String,
    pub checksum: Option<String>,
    pub triggered_by: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Figures reported when a backup run finishes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupCompletion {
    pub size_bytes: Option<i64>,
    pub record_count: Option<i64>,
    pub checksum: Option<String>,
    pub replication_lsn: Option<String>,
}

impl Backup {
    /// A new pending backup
    pub fn new(
        node_id: impl Into<String>,
        backup_type: BackupType,
        storage_path: impl Into<String>,
        hlc: Timestamp,
    ) -> Self {
        Self {
            backup_id: Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            backup_type,
            status: BackupStatus::Pending,
            started_at: now(),
            completed_at: None,
            hlc,
            replication_lsn: None,
            size_bytes: None,
            record_count: None,
            storage_path: storage_path.into(),
            checksum: None,
            triggered_by: None,
            error_message: None,
            metadata: None,
        }
    }

    pub fn triggered_by(mut self, actor: impl Into<String>) -> Self {
        self.triggered_by = Some(actor.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn transition(&mut self, next: BackupStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                entity: "backup",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(BackupStatus::InProgress)
    }

    pub fn complete(&mut self, completion: BackupCompletion) -> Result<()> {
        self.transition(BackupStatus::Completed)?;
        self.completed_at = Some(now());
        self.size_bytes = completion.size_bytes;
        self.record_count = completion.record_count;
        self.checksum = completion.checksum;
        if completion.replication_lsn.is_some() {
            self.replication_lsn = completion.replication_lsn;
        }
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(BackupStatus::Failed)?;
        self.completed_at = Some(now());
        self.error_message = Some(error.into());
        Ok(())
    }
}

impl Entity for Backup {
    const TABLE: &'static str = BACKUP_TABLE;
    const ID_COLUMN: &'static str = "backup_id";

    fn id(&self) -> String {
        self.backup_id.clone()
    }

    fn to_values(&self, _dialect: Dialect) -> Result<ColumnValues> {
        let metadata = self.metadata.as_ref().map(serde_json::to_string).transpose()?;

        let mut values = ColumnValues::new();
        values.insert("backup_id".into(), self.backup_id.as_str().into());
        values.insert("node_id".into(), self.node_id.as_str().into());
        values.insert("backup_type".into(), self.backup_type.as_str().into());
        values.insert("status".into(), self.status.as_str().into());
        values.insert("started_at".into(), self.started_at.into());
        values.insert("completed_at".into(), self.completed_at.into());
        values.insert("hlc_timestamp".into(), self.hlc.into());
        values.insert("replication_lsn".into(), self.replication_lsn.clone().into());
        values.insert("size_bytes".into(), self.size_bytes.into());
        values.insert("record_count".into(), self.record_count.into());
        values.insert("storage_path".into(), self.storage_path.as_str().into());
        values.insert("checksum".into(), self.checksum.clone().into());
        values.insert("triggered_by".into(), self.triggered_by.clone().into());
        values.insert("error_message".into(), self.error_message.clone().into());
        values.insert("metadata".into(), metadata.into());
        Ok(values)
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            backup_id: row.get_string("backup_id")?,
            node_id: row.get_string("node_id")?,
            backup_type: parse_enum(row, "backup_type", BackupType::from_str)?,
            status: parse_enum(row, "status", BackupStatus::from_str)?,
            started_at: row.get_datetime("started_at")?,
            completed_at: row.get_opt_datetime("completed_at")?,
            hlc: Timestamp::from_i64(row.get_i64("hlc_timestamp")?),
            replication_lsn: row.get_opt_string("replication_lsn")?,
            size_bytes: row.get_opt_i64("size_bytes")?,
            record_count: row.get_opt_i64("record_count")?,
            storage_path: row.get_string("storage_path")?,
            checksum: row.get_opt_string("checksum")?,
            triggered_by: row.get_opt_string("triggered_by")?,
            error_message: row.get_opt_string("error_message")?,
            metadata: row.get_opt_json("metadata")?,
        })
    }
}

/// Backups taken together across nodes.
///
/// Each member reports once, either completed or failed. The counters are
/// the lengths of the reported id lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSet {
    pub backup_set_id: String,
    pub created_at: DateTime<Utc>,
    pub hlc: Timestamp,
    pub status: BackupSetStatus,
    pub backup_ids: Vec<String>,
    pub node_count: i64,
    pub completed_count: Option<i64>,
    pub failed_count: i64,
    pub completed_ids: Vec<String>,
    pub failed_ids: Vec<String>,
    pub error_message: Option<String>,
}

impl BackupSet {
    pub fn new(backup_ids: Vec<String>, hlc: Timestamp) -> Result<Self> {
        if backup_ids.is_empty() {
            return Err(Error::InvalidInput("A backup set needs at least one member".into()));
        }
        let node_count = i64::try_from(backup_ids.len())
            .map_err(|_| Error::InvalidInput("Too many backup set members".into()))?;

        Ok(Self {
            backup_set_id: Uuid::new_v4().to_string(),
            created_at: now(),
            hlc,
            status: BackupSetStatus::Pending,
            backup_ids,
            node_count,
            completed_count: None,
            failed_count: 0,
            completed_ids: Vec::new(),
            failed_ids: Vec::new(),
            error_message: None,
        })
    }

    pub fn completed(&self) -> i64 {
        self.completed_count.unwrap_or(0)
    }

    fn admit(&self, backup_id: &str) -> Result<()> {
        if !self.backup_ids.iter().any(|id| id == backup_id) {
            return Err(Error::InvalidInput(format!(
                "Backup '{}' is not a member of set '{}'",
                backup_id, self.backup_set_id
            )));
        }
        if self.completed_ids.iter().chain(&self.failed_ids).any(|id| id == backup_id) {
            return Err(Error::InvalidTransition {
                entity: "backup_set",
                from: format!("member '{}' reported", backup_id),
                to: "reported again".into(),
            });
        }
        if self.completed() + self.failed_count >= self.node_count {
            return Err(Error::InvalidTransition {
                entity: "backup_set",
                from: self.status.to_string(),
                to: format!("more than {} member results", self.node_count),
            });
        }
        Ok(())
    }

    pub fn record_completion(&mut self, backup_id: &str) -> Result<()> {
        self.admit(backup_id)?;
        self.completed_ids.push(backup_id.to_string());
        self.completed_count = Some(count(&self.completed_ids)?);
        self.status = BackupSetStatus::derive(self.completed(), self.failed_count, self.node_count);
        Ok(())
    }

    /// A failed member leaves its siblings untouched; the set turns partial
    pub fn record_failure(&mut self, backup_id: &str, error: &str) -> Result<()> {
        self.admit(backup_id)?;
        self.failed_ids.push(backup_id.to_string());
        self.failed_count = count(&self.failed_ids)?;
        let line = format!("{}: {}", backup_id, error);
        self.error_message = Some(match self.error_message.take() {
            Some(existing) => format!("{}\n{}", existing, line),
            None => line,
        });
        self.status = BackupSetStatus::derive(self.completed(), self.failed_count, self.node_count);
        Ok(())
    }
}

fn count(ids: &[String]) -> Result<i64> {
    i64::try_from(ids.len()).map_err(|_| Error::InvalidInput("Too many backup set members".into()))
}

fn id_list(row: &Row, column: &str) -> Result<Vec<String>> {
    match row.get_opt_string(column)? {
        Some(text) => Ok(serde_json::from_str(&text)?),
        None => Ok(Vec::new()),
    }
}

impl Entity for BackupSet {
    const TABLE: &'static str = BACKUP_SET_TABLE;
    const ID_COLUMN: &'static str = "backup_set_id";

    fn id(&self) -> String {
        self.backup_set_id.clone()
    }

    fn to_values(&self, dialect: Dialect) -> Result<ColumnValues> {
        let node_count = dialect.check_counter("node_count", self.node_count)?;
        let completed_count = self
            .completed_count
            .map(|count| dialect.check_counter("completed_count", count))
            .transpose()?;
        let failed_count = dialect.check_counter("failed_count", self.failed_count)?;

        let mut values = ColumnValues::new();
        values.insert("backup_set_id".into(), self.backup_set_id.as_str().into());
        values.insert("created_at".into(), self.created_at.into());
        values.insert("hlc_timestamp".into(), self.hlc.into());
        values.insert("status".into(), self.status.as_str().into());
        values.insert("backup_ids".into(), serde_json::to_string(&self.backup_ids)?.into());
        values.insert("node_count".into(), node_count.into());
        values.insert("completed_count".into(), completed_count.into());
        values.insert("failed_count".into(), failed_count.into());
        values.insert("completed_ids".into(), serde_json::to_string(&self.completed_ids)?.into());
        values.insert("failed_ids".into(), serde_json::to_string(&self.failed_ids)?.into());
        values.insert("error_message".into(), self.error_message.clone().into());
        Ok(values)
    }

    fn from_row(row: &Row) -> Result<Self> {
        let backup_ids = serde_json::from_str(&row.get_string("backup_ids")?)?;
        Ok(Self {
            backup_set_id: row.get_string("backup_set_id")?,
            created_at: row.get_datetime("created_at")?,
            hlc: Timestamp::from_i64(row.get_i64("hlc_timestamp")?),
            status: parse_enum(row, "status", BackupSetStatus::from_str)?,
            backup_ids,
            node_count: row.get_i64("node_count")?,
            completed_count: row.get_opt_i64("completed_count")?,
            failed_count: row.get_i64("failed_count")?,
            completed_ids: id_list(row, "completed_ids")?,
            failed_ids: id_list(row, "failed_ids")?,
            error_message: row.get_opt_string("error_message")?,
        })
    }
}

/// Individually optional checks; `None` means not checked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationChecks {
    pub restore_tested: Option<bool>,
    pub checksum_valid: Option<bool>,
    pub record_count_match: Option<bool>,
}

/// A post-hoc check of one backup; append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupVerification {
    pub verification_id: String,
    pub backup_id: String,
    pub verified_at: DateTime<Utc>,
    pub hlc: Timestamp,
    pub verified_by: Option<String>,
    pub checks: VerificationChecks,
    pub status: VerificationStatus,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
}

impl BackupVerification {
    /// Status follows the checks; an error message always fails it
    pub fn new(
        backup_id: impl Into<String>,
        checks: VerificationChecks,
        error_message: Option<String>,
        hlc: Timestamp,
    ) -> Self {
        let status = if error_message.is_some() {
            VerificationStatus::Failed
        } else {
            VerificationStatus::from_checks(&checks)
        };

        Self {
            verification_id: Uuid::new_v4().to_string(),
            backup_id: backup_id.into(),
            verified_at: now(),
            hlc,
            verified_by: None,
            checks,
            status,
            error_message,
            duration_ms: None,
        }
    }

    pub fn verified_by(mut self, actor: impl Into<String>) -> Self {
        self.verified_by = Some(actor.into());
        self
    }

    pub fn duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

impl Entity for BackupVerification {
    const TABLE: &'static str = BACKUP_VERIFICATION_TABLE;
    const ID_COLUMN: &'static str = "verification_id";

    fn id(&self) -> String {
        self.verification_id.clone()
    }

    fn to_values(&self, _dialect: Dialect) -> Result<ColumnValues> {
        let mut values = ColumnValues::new();
        values.insert("verification_id".into(), self.verification_id.as_str().into());
        values.insert("backup_id".into(), self.backup_id.as_str().into());
        values.insert("verified_at".into(), self.verified_at.into());
        values.insert("hlc_timestamp".into(), self.hlc.into());
        values.insert("verified_by".into(), self.verified_by.clone().into());
        values.insert("restore_tested".into(), flag(self.checks.restore_tested));
        values.insert("checksum_valid".into(), flag(self.checks.checksum_valid));
        values.insert("record_count_match".into(), flag(self.checks.record_count_match));
        values.insert("status".into(), self.status.as_str().into());
        values.insert("error_message".into(), self.error_message.clone().into());
        values.insert("duration_ms".into(), self.duration_ms.into());
        Ok(values)
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            verification_id: row.get_string("verification_id")?,
            backup_id: row.get_string("backup_id")?,
            verified_at: row.get_datetime("verified_at")?,
            hlc: Timestamp::from_i64(row.get_i64("hlc_timestamp")?),
            verified_by: row.get_opt_string("verified_by")?,
            checks: VerificationChecks {
                restore_tested: row.get_opt_bool("restore_tested")?,
                checksum_valid: row.get_opt_bool("checksum_valid")?,
                record_count_match: row.get_opt_bool("record_count_match")?,
            },
            status: parse_enum(row, "status", VerificationStatus::from_str)?,
            error_message: row.get_opt_string("error_message")?,
            duration_ms: row.get_opt_i64("duration_ms")?,
        })
    }
}
