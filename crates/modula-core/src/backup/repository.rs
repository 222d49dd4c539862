//! Backup coordination over an audited database
//!
//! Every write goes through the audited command functions, so each state
//! change of a backup, set or verification leaves a change event.

use std::sync::Arc;

use tracing::{info, warn};

use super::entity::{
    BACKUP_SET_TABLE, BACKUP_TABLE, BACKUP_VERIFICATION_TABLE, Backup, BackupCompletion, BackupSet,
    BackupStatus, BackupType, BackupVerification,
};
use crate::audit::{
    AuditContext, Entity, ExecContext, InsertEntity, Mutation, Precondition, Recorder, UpdateEntity,
    create, update,
};
use crate::clock::HybridClock;
use crate::error::Result;
use crate::query::SelectParams;
use crate::storage::{Backend, Database};

/// Backup, backup set and verification records for one database
#[derive(Debug)]
pub struct BackupRepository<B: Backend> {
    db: Database<B>,
    recorder: Arc<dyn Recorder<B>>,
    clock: Arc<HybridClock>,
    audit: AuditContext,
}

impl<B: Backend> Clone for BackupRepository<B> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            recorder: Arc::clone(&self.recorder),
            clock: Arc::clone(&self.clock),
            audit: self.audit.clone(),
        }
    }
}

impl<B: Backend> BackupRepository<B> {
    pub fn new(db: Database<B>, recorder: Arc<dyn Recorder<B>>, clock: Arc<HybridClock>) -> Self {
        let audit = AuditContext::new(db.node_id());
        Self {
            db,
            recorder,
            clock,
            audit,
        }
    }

    /// Same repository acting on behalf of another caller
    pub fn acting_as(&self, audit: AuditContext) -> Self {
        Self {
            audit,
            ..self.clone()
        }
    }

    pub fn database(&self) -> &Database<B> {
        &self.db
    }

    async fn insert<E: Entity>(
        &self,
        ctx: &ExecContext,
        entity: E,
        preconditions: Vec<Precondition>,
    ) -> Result<E> {
        let cmd = preconditions.into_iter().fold(
            InsertEntity::new(
                self.db.clone(),
                self.recorder.clone(),
                ctx.clone(),
                self.audit.clone(),
                entity,
            ),
            InsertEntity::require,
        );
        let audited = create(&cmd).await?;
        E::from_row(&audited.value)
    }

    async fn modify<E: Entity>(
        &self,
        ctx: &ExecContext,
        id: &str,
        label: &str,
        mutation: Mutation<E>,
        preconditions: Vec<Precondition>,
    ) -> Result<E> {
        let cmd = preconditions.into_iter().fold(
            UpdateEntity::new(
                self.db.clone(),
                self.recorder.clone(),
                ctx.clone(),
                self.audit.clone(),
                id,
                mutation,
            )
            .labelled(label),
            UpdateEntity::require,
        );
        let audited = update(&cmd).await?;
        E::from_row(&audited.value)
    }

    async fn find<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        let params = SelectParams::new(E::TABLE).filter(E::ID_COLUMN, id);
        self.db
            .select_one(&params)
            .await?
            .map(|row| E::from_row(&row))
            .transpose()
    }

    async fn list<E: Entity>(&self, params: &SelectParams) -> Result<Vec<E>> {
        self.db.select(params).await?.iter().map(E::from_row).collect()
    }

    /// Register a new pending backup for `node_id`
    pub async fn start_backup(
        &self,
        ctx: &ExecContext,
        node_id: &str,
        backup_type: BackupType,
        storage_path: &str,
        triggered_by: Option<&str>,
    ) -> Result<Backup> {
        let mut backup = Backup::new(node_id, backup_type, storage_path, self.clock.now());
        if let Some(actor) = triggered_by {
            backup = backup.triggered_by(actor);
        }

        let backup = self.insert(ctx, backup, Vec::new()).await?;
        info!(
            backup_id = %backup.backup_id,
            node_id = %backup.node_id,
            backup_type = %backup.backup_type,
            "Backup registered"
        );
        Ok(backup)
    }

    pub async fn mark_in_progress(&self, ctx: &ExecContext, backup_id: &str) -> Result<Backup> {
        let mutation: Mutation<Backup> = Box::new(|mut backup| {
            backup.start()?;
            Ok(backup)
        });
        self.modify(ctx, backup_id, "backup.start", mutation, Vec::new()).await
    }

    pub async fn complete_backup(
        &self,
        ctx: &ExecContext,
        backup_id: &str,
        completion: BackupCompletion,
    ) -> Result<Backup> {
        let mutation: Mutation<Backup> = Box::new(move |mut backup| {
            backup.complete(completion.clone())?;
            Ok(backup)
        });
        let backup = self.modify(ctx, backup_id, "backup.complete", mutation, Vec::new()).await?;
        info!(
            backup_id = %backup.backup_id,
            size_bytes = ?backup.size_bytes,
            record_count = ?backup.record_count,
            "Backup completed"
        );
        Ok(backup)
    }

    pub async fn fail_backup(&self, ctx: &ExecContext, backup_id: &str, error: &str) -> Result<Backup> {
        let message = error.to_string();
        let mutation: Mutation<Backup> = Box::new(move |mut backup| {
            backup.fail(message.clone())?;
            Ok(backup)
        });
        let backup = self.modify(ctx, backup_id, "backup.fail", mutation, Vec::new()).await?;
        warn!(backup_id = %backup.backup_id, error, "Backup failed");
        Ok(backup)
    }

    pub async fn get_backup(&self, backup_id: &str) -> Result<Option<Backup>> {
        self.find(backup_id).await
    }

    /// Newest first
    pub async fn list_backups_for_node(&self, node_id: &str, limit: i64) -> Result<Vec<Backup>> {
        let params = SelectParams::new(BACKUP_TABLE)
            .filter("node_id", node_id)
            .order_by("started_at")
            .descending()
            .limit(limit);
        self.list(&params).await
    }

    pub async fn latest_completed(&self, node_id: &str) -> Result<Option<Backup>> {
        let params = SelectParams::new(BACKUP_TABLE)
            .filter("node_id", node_id)
            .filter("status", BackupStatus::Completed.as_str())
            .order_by("started_at")
            .descending()
            .limit(1);
        Ok(self.list(&params).await?.into_iter().next())
    }

    /// Group existing backups into a set; every member must exist
    pub async fn create_set(&self, ctx: &ExecContext, backup_ids: Vec<String>) -> Result<BackupSet> {
        let members = backup_ids
            .iter()
            .map(|id| Precondition::exists::<Backup>(id.as_str()))
            .collect();
        let set = BackupSet::new(backup_ids, self.clock.now())?;
        let set = self.insert(ctx, set, members).await?;
        info!(backup_set_id = %set.backup_set_id, node_count = set.node_count, "Backup set created");
        Ok(set)
    }

    /// Count `backup_id` as completed; its backup must already be completed
    pub async fn record_member_completion(
        &self,
        ctx: &ExecContext,
        backup_set_id: &str,
        backup_id: &str,
    ) -> Result<BackupSet> {
        let member = backup_id.to_string();
        let mutation: Mutation<BackupSet> = Box::new(move |mut set| {
            set.record_completion(&member)?;
            Ok(set)
        });
        let member_done = Precondition::exists::<Backup>(backup_id)
            .in_state("status", &[BackupStatus::Completed.as_str()]);
        self.modify(ctx, backup_set_id, "backup_set.complete_member", mutation, vec![member_done])
            .await
    }

    /// Count `backup_id` as failed; its backup must already be failed
    pub async fn record_member_failure(
        &self,
        ctx: &ExecContext,
        backup_set_id: &str,
        backup_id: &str,
        error: &str,
    ) -> Result<BackupSet> {
        let member = backup_id.to_string();
        let message = error.to_string();
        let mutation: Mutation<BackupSet> = Box::new(move |mut set| {
            set.record_failure(&member, &message)?;
            Ok(set)
        });
        let set = self
            .modify(
                ctx,
                backup_set_id,
                "backup_set.fail_member",
                mutation,
                vec![Precondition::exists::<Backup>(backup_id)
                    .in_state("status", &[BackupStatus::Failed.as_str()])],
            )
            .await?;
        warn!(backup_set_id, backup_id, error, status = %set.status, "Backup set member failed");
        Ok(set)
    }

    pub async fn get_set(&self, backup_set_id: &str) -> Result<Option<BackupSet>> {
        self.find(backup_set_id).await
    }

    /// Append a verification of an existing backup
    pub async fn record_verification(
        &self,
        ctx: &ExecContext,
        verification: BackupVerification,
    ) -> Result<BackupVerification> {
        let backup = Precondition::exists::<Backup>(verification.backup_id.as_str());
        let verification = self.insert(ctx, verification, vec![backup]).await?;
        info!(
            verification_id = %verification.verification_id,
            backup_id = %verification.backup_id,
            status = %verification.status,
            "Backup verification recorded"
        );
        Ok(verification)
    }

    /// Oldest first
    pub async fn verifications_for(&self, backup_id: &str) -> Result<Vec<BackupVerification>> {
        let params = SelectParams::new(BACKUP_VERIFICATION_TABLE)
            .filter("backup_id", backup_id)
            .order_by("verified_at");
        self.list(&params).await
    }

    /// Sets are only read back by id; this lists the newest ones
    pub async fn recent_sets(&self, limit: i64) -> Result<Vec<BackupSet>> {
        let params = SelectParams::new(BACKUP_SET_TABLE)
            .order_by("created_at")
            .descending()
            .limit(limit);
        self.list(&params).await
    }
}
