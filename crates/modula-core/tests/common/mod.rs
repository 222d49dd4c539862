//! Backend-independent pipeline scenarios shared by the per-backend suites

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use modula_core::audit::{
    AuditContext, AuditedCommand, ChangeEventLog, DeleteEntity, Entity, ExecContext, InsertEntity,
    MemoryRecorder, Mutation, Operation, Recorder, SqlRecorder, UpdateCommand, UpdateEntity, create,
    delete, update,
};
use modula_core::backup::{
    BackupCompletion, BackupRepository, BackupSetStatus, BackupStatus, BackupType, BackupVerification,
    VerificationChecks, VerificationStatus,
};
use modula_core::clock::HybridClock;
use modula_core::query::{ColumnValues, CompiledQuery, Dialect, Row, SelectParams, SqlValue};
use modula_core::storage::{Backend, Conn, Database};
use modula_core::{Error, Result};
use serde::Serialize;
use uuid::Uuid;

pub const ARTICLES: &str = "articles";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub id: String,
    pub slug: String,
    pub title: Option<String>,
    pub views: i64,
}

impl Article {
    pub fn new(slug: &str, title: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            slug: slug.to_string(),
            title: title.map(str::to_string),
            views: 0,
        }
    }
}

impl Entity for Article {
    const TABLE: &'static str = ARTICLES;
    const ID_COLUMN: &'static str = "id";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn to_values(&self, _dialect: Dialect) -> Result<ColumnValues> {
        Ok(ColumnValues::from([
            ("id".to_string(), SqlValue::from(self.id.as_str())),
            ("slug".to_string(), SqlValue::from(self.slug.as_str())),
            ("title".to_string(), SqlValue::from(self.title.clone())),
            ("views".to_string(), SqlValue::from(self.views)),
        ]))
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_string("id")?,
            slug: row.get_string("slug")?,
            title: row.get_opt_string("title")?,
            views: row.get_i64("views")?,
        })
    }
}

/// Recreate the scratch table
pub async fn prepare<B: Backend>(db: &Database<B>) {
    let mut conn = db.acquire().await.unwrap();
    for sql in [
        "DROP TABLE IF EXISTS articles",
        "CREATE TABLE articles (
            id VARCHAR(64) PRIMARY KEY NOT NULL,
            slug VARCHAR(191) NOT NULL,
            title TEXT,
            views BIGINT NOT NULL
        )",
    ] {
        B::execute(&mut *conn, &CompiledQuery::raw(ARTICLES, "DDL", sql))
            .await
            .unwrap();
    }
}

pub fn sql_recorder<B: Backend>() -> Arc<dyn Recorder<B>> {
    Arc::new(SqlRecorder::<B>::new(Arc::new(HybridClock::new())))
}

async fn insert_article<B: Backend>(
    db: &Database<B>,
    recorder: Arc<dyn Recorder<B>>,
    article: Article,
) -> Result<Article> {
    let cmd = InsertEntity::new(
        db.clone(),
        recorder,
        ExecContext::new(),
        AuditContext::new("node-a").user("editor"),
        article,
    );
    Article::from_row(&create(&cmd).await?.value)
}

async fn find_article<B: Backend>(db: &Database<B>, id: &str) -> Option<Row> {
    db.select_one(&SelectParams::new(ARTICLES).filter("id", id))
        .await
        .unwrap()
}

/// Parameters of [`RenameArticle`]
#[derive(Debug, Serialize)]
pub struct RenameParams {
    pub slug: String,
    pub title: Option<String>,
    pub views: i64,
}

/// Hand-written update command, the way an entity adapter would supply one
pub struct RenameArticle<B: Backend> {
    pub db: Database<B>,
    pub recorder: Arc<dyn Recorder<B>>,
    pub ctx: ExecContext,
    pub audit: AuditContext,
    pub id: String,
    pub params: RenameParams,
}

impl<B: Backend> AuditedCommand<B> for RenameArticle<B> {
    fn context(&self) -> &ExecContext {
        &self.ctx
    }

    fn audit(&self) -> &AuditContext {
        &self.audit
    }

    fn table(&self) -> &str {
        ARTICLES
    }

    fn database(&self) -> &Database<B> {
        &self.db
    }

    fn recorder(&self) -> &dyn Recorder<B> {
        self.recorder.as_ref()
    }
}

#[async_trait]
impl<B: Backend> UpdateCommand<B> for RenameArticle<B> {
    type Params = RenameParams;

    fn params(&self) -> &RenameParams {
        &self.params
    }

    fn get_id(&self) -> String {
        self.id.clone()
    }

    async fn get_before(&self, conn: &mut Conn<B>) -> Result<Option<Row>> {
        let params = SelectParams::new(ARTICLES).filter("id", self.id.as_str());
        self.db.query().select_one(conn, &params).await
    }

    async fn execute(&self, conn: &mut Conn<B>) -> Result<()> {
        let set = ColumnValues::from([
            ("slug".to_string(), SqlValue::from(self.params.slug.as_str())),
            ("title".to_string(), SqlValue::from(self.params.title.clone())),
            ("views".to_string(), SqlValue::from(self.params.views)),
        ]);
        let filter = ColumnValues::from([("id".to_string(), SqlValue::from(self.id.as_str()))]);
        self.db.query().update(conn, ARTICLES, &set, &filter).await?;
        Ok(())
    }
}

/// Insert, update and delete each leave exactly one event with the right
/// before/after snapshots
pub async fn audited_crud<B: Backend>(db: &Database<B>) {
    prepare(db).await;
    let recorder = sql_recorder::<B>();

    let article = insert_article(db, recorder.clone(), Article::new("hello", Some("Hello")))
        .await
        .unwrap();

    let mutation: Mutation<Article> = Box::new(|mut a| {
        a.views += 10;
        Ok(a)
    });
    let cmd = UpdateEntity::new(
        db.clone(),
        recorder.clone(),
        ExecContext::new(),
        AuditContext::new("node-a"),
        &article.id,
        mutation,
    );
    let updated = update(&cmd).await.unwrap();
    assert_eq!(updated.value.get_i64("views").unwrap(), 10);

    let cmd = DeleteEntity::<B, Article>::new(
        db.clone(),
        recorder.clone(),
        ExecContext::new(),
        AuditContext::new("node-a"),
        &article.id,
    );
    let deleted = delete(&cmd).await.unwrap();
    assert_eq!(deleted.value.get_string("slug").unwrap(), "hello");
    assert!(find_article(db, &article.id).await.is_none());

    let history = ChangeEventLog::new(db.clone())
        .for_record(ARTICLES, &article.id)
        .await
        .unwrap();
    let ops: Vec<_> = history.iter().map(|e| e.operation).collect();
    assert_eq!(ops, vec![Operation::Insert, Operation::Update, Operation::Delete]);

    assert!(history[0].before.is_none());
    assert_eq!(history[0].audit.user_id.as_deref(), Some("editor"));
    assert_eq!(history[1].before.as_ref().unwrap()["views"], 0);
    assert_eq!(history[1].after.as_ref().unwrap()["views"], 10);
    assert!(history[2].after.is_none());
    assert!(history[0].hlc < history[1].hlc && history[1].hlc < history[2].hlc);
}

/// A failing recorder leaves no row behind
pub async fn recorder_failure_rolls_back<B: Backend>(db: &Database<B>) {
    prepare(db).await;
    let memory = Arc::new(MemoryRecorder::default());
    memory.fail_next(true);

    let article = Article::new("ghost", None);
    let id = article.id.clone();
    let err = insert_article(db, memory.clone() as Arc<dyn Recorder<B>>, article)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RecordFailed { .. }));
    assert!(find_article(db, &id).await.is_none());
    assert!(memory.is_empty());
}

/// The before-state is read ahead of an update that rewrites every column
pub async fn before_after_capture<B: Backend>(db: &Database<B>) {
    prepare(db).await;
    let memory = Arc::new(MemoryRecorder::default());
    let recorder: Arc<dyn Recorder<B>> = memory.clone();

    let article = insert_article(db, recorder.clone(), Article::new("draft", Some("Draft")))
        .await
        .unwrap();

    let cmd = RenameArticle {
        db: db.clone(),
        recorder,
        ctx: ExecContext::new(),
        audit: AuditContext::new("node-b"),
        id: article.id.clone(),
        params: RenameParams {
            slug: "final".into(),
            title: None,
            views: 99,
        },
    };
    let result = update(&cmd).await.unwrap();
    assert_eq!(result.value.get_string("slug").unwrap(), "final");

    let events = memory.events();
    assert_eq!(events.len(), 2);
    let before = events[1].before.as_ref().unwrap();
    let after = events[1].after.as_ref().unwrap();
    assert_eq!(before["slug"], "draft");
    assert_eq!(before["title"], "Draft");
    assert_eq!(before["views"], 0);
    assert_eq!(after["slug"], "final");
    assert!(after["title"].is_null());
    assert_eq!(after["views"], 99);
    assert_eq!(events[1].audit.node_id, "node-b");
}

/// Update and delete of a missing row fail without recording anything
pub async fn missing_target_is_not_found<B: Backend>(db: &Database<B>) {
    prepare(db).await;
    let memory = Arc::new(MemoryRecorder::default());
    let recorder: Arc<dyn Recorder<B>> = memory.clone();

    let cmd = RenameArticle {
        db: db.clone(),
        recorder: recorder.clone(),
        ctx: ExecContext::new(),
        audit: AuditContext::new("node-a"),
        id: "missing".into(),
        params: RenameParams {
            slug: "x".into(),
            title: None,
            views: 0,
        },
    };
    assert!(update(&cmd).await.unwrap_err().is_not_found());

    let cmd = DeleteEntity::<B, Article>::new(
        db.clone(),
        recorder,
        ExecContext::new(),
        AuditContext::new("node-a"),
        "missing",
    );
    assert!(delete(&cmd).await.unwrap_err().is_not_found());
    assert!(memory.is_empty());
}

/// A cancelled context aborts before anything is written
pub async fn cancellation_aborts<B: Backend>(db: &Database<B>) {
    prepare(db).await;
    let memory = Arc::new(MemoryRecorder::default());
    let ctx = ExecContext::new();
    ctx.cancel();

    let article = Article::new("late", None);
    let id = article.id.clone();
    let cmd = InsertEntity::new(
        db.clone(),
        memory.clone() as Arc<dyn Recorder<B>>,
        ctx,
        AuditContext::new("node-a"),
        article,
    );
    assert!(matches!(create(&cmd).await, Err(Error::Cancelled)));
    assert!(find_article(db, &id).await.is_none());
    assert!(memory.is_empty());
}

/// `IS NULL` matches NULL but not the empty string
pub async fn where_null_semantics<B: Backend>(db: &Database<B>) {
    prepare(db).await;
    let recorder = sql_recorder::<B>();
    let untitled = insert_article(db, recorder.clone(), Article::new("a", None))
        .await
        .unwrap();
    insert_article(db, recorder, Article::new("b", Some("")))
        .await
        .unwrap();

    let rows = db
        .select(&SelectParams::new(ARTICLES).filter("title", SqlValue::Null))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_string("id").unwrap(), untitled.id);

    let empty = ColumnValues::from([("title".to_string(), SqlValue::from(""))]);
    assert_eq!(db.count(ARTICLES, &empty).await.unwrap(), 1);
}

/// Oversized limits are capped, negative limits lift the cap, zero is honoured
pub async fn limit_clamping<B: Backend>(db: &Database<B>) {
    prepare(db).await;
    let total = 10_005;

    let mut tx = db.begin().await.unwrap();
    for i in 0..total {
        let values = Article::new(&format!("bulk-{i}"), None)
            .to_values(B::DIALECT)
            .unwrap();
        db.query().insert(&mut *tx, ARTICLES, &values).await.unwrap();
    }
    tx.commit().await.unwrap();

    let select = |limit: Option<i64>| {
        let mut params = SelectParams::new(ARTICLES).columns(["id"]);
        if let Some(limit) = limit {
            params = params.limit(limit);
        }
        params
    };

    assert_eq!(db.select(&select(Some(99_999))).await.unwrap().len(), 10_000);
    assert_eq!(db.select(&select(None)).await.unwrap().len(), 10_000);
    assert_eq!(db.select(&select(Some(-1))).await.unwrap().len(), total);
    assert!(db.select(&select(Some(0))).await.unwrap().is_empty());
    assert_eq!(db.count(ARTICLES, &ColumnValues::new()).await.unwrap(), total as i64);
}

/// Unsafe names are rejected before any statement runs
pub async fn injection_is_rejected<B: Backend>(db: &Database<B>) {
    prepare(db).await;

    for table in ["DROP TABLE--", "articles; DELETE FROM articles", "select", ""] {
        let err = db.select(&SelectParams::new(table)).await.unwrap_err();
        assert!(err.is_validation(), "{table:?} was accepted");
    }

    let err = db
        .select(&SelectParams::new(ARTICLES).filter("id = id OR 1", "x"))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = db
        .select(&SelectParams::new(ARTICLES).order_by("slug DESC"))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = db.delete(ARTICLES, &ColumnValues::new()).await.unwrap_err();
    assert!(matches!(err, Error::EmptyWhere { .. }));

    // Values are bound, never spliced
    let hostile = "'; DROP TABLE articles; --";
    let rows = db
        .select(&SelectParams::new(ARTICLES).filter("slug", hostile))
        .await
        .unwrap();
    assert!(rows.is_empty());
    assert!(db.exists(ARTICLES, &ColumnValues::new()).await.is_ok());
}

/// Full backup coordination flow over the audited pipeline
pub async fn backup_workflow<B: Backend>(db: &Database<B>) {
    let clock = Arc::new(HybridClock::new());
    let recorder: Arc<dyn Recorder<B>> = Arc::new(SqlRecorder::<B>::new(clock.clone()));
    let repo = BackupRepository::new(db.clone(), recorder, clock.clone());
    let ctx = ExecContext::new();

    let node = format!("node-{}", Uuid::new_v4());
    let mut ids = Vec::new();
    for kind in [BackupType::Full, BackupType::Incremental] {
        let backup = repo
            .start_backup(&ctx, &node, kind, "/var/backups/snapshot", Some("scheduler"))
            .await
            .unwrap();
        ids.push(backup.backup_id);
    }
    let set = repo.create_set(&ctx, ids.clone()).await.unwrap();
    assert_eq!(set.node_count, 2);

    repo.mark_in_progress(&ctx, &ids[0]).await.unwrap();
    let done = repo
        .complete_backup(
            &ctx,
            &ids[0],
            BackupCompletion {
                size_bytes: Some(1 << 20),
                record_count: Some(1234),
                checksum: Some("0".repeat(64)),
                replication_lsn: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(done.status, BackupStatus::Completed);
    repo.record_member_completion(&ctx, &set.backup_set_id, &ids[0])
        .await
        .unwrap();

    let failed = repo.fail_backup(&ctx, &ids[1], "disk full").await.unwrap();
    assert_eq!(failed.status, BackupStatus::Failed);
    let set = repo
        .record_member_failure(&ctx, &set.backup_set_id, &ids[1], "disk full")
        .await
        .unwrap();

    assert_eq!(set.status, BackupSetStatus::Partial);
    assert!(set.completed() <= set.node_count);
    assert_eq!(set.completed_ids, vec![ids[0].clone()]);
    assert!(
        repo.record_member_completion(&ctx, &set.backup_set_id, &ids[0])
            .await
            .is_err()
    );
    assert_eq!(
        repo.get_backup(&ids[0]).await.unwrap().unwrap().status,
        BackupStatus::Completed
    );

    let verification = BackupVerification::new(
        &ids[0],
        VerificationChecks {
            restore_tested: Some(true),
            checksum_valid: Some(true),
            record_count_match: None,
        },
        None,
        clock.now(),
    );
    repo.record_verification(&ctx, verification).await.unwrap();
    let checks = repo.verifications_for(&ids[0]).await.unwrap();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].status, VerificationStatus::Verified);
    assert_eq!(checks[0].checks.record_count_match, None);

    let latest = repo.latest_completed(&node).await.unwrap().unwrap();
    assert_eq!(latest.backup_id, ids[0]);
    assert_eq!(latest.record_count, Some(1234));
}

/// Every scenario in order, for suites sharing one live database
pub async fn run_all<B: Backend>(db: &Database<B>) {
    audited_crud(db).await;
    recorder_failure_rolls_back(db).await;
    before_after_capture(db).await;
    missing_target_is_not_found(db).await;
    cancellation_aborts(db).await;
    where_null_semantics(db).await;
    injection_is_rejected(db).await;
    backup_workflow(db).await;
    limit_clamping(db).await;
}
