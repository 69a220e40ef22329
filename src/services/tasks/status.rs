use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Context, Result};
use sea_orm::prelude::Expr;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, Set};
use serde::Serialize;

use crate::database::Database;
use crate::entities;
use crate::entities::task_status::{TaskCounters, TaskState};

/// How often a run refreshes its row while it works.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// A running row this long without a heartbeat belongs to a dead process.
const STALE_AFTER_SECS: i64 = 60;

fn stale_before() -> i64 {
    chrono::Utc::now().timestamp() - STALE_AFTER_SECS
}

/// What the status endpoint reports for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatusView {
    pub name: String,
    pub status: TaskState,
    pub current: i64,
    pub total: i64,
    pub extra: BTreeMap<String, i64>,
    pub message: Option<String>,
    pub stop_requested: bool,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl TaskStatusView {
    fn idle(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: TaskState::Idle,
            current: 0,
            total: 0,
            extra: BTreeMap::new(),
            message: None,
            stop_requested: false,
            started_at: None,
            finished_at: None,
        }
    }
}

impl From<entities::task_status::Model> for TaskStatusView {
    fn from(model: entities::task_status::Model) -> Self {
        Self {
            name: model.name,
            status: model.status,
            current: model.current,
            total: model.total,
            extra: model.extra.0,
            message: model.message,
            stop_requested: model.stop_requested,
            started_at: model.started_at,
            finished_at: model.finished_at,
        }
    }
}

/// One row per task name, overwritten by every run of that task.
#[derive(Clone)]
pub struct TaskStatusStore {
    db: Arc<Database>,
}

impl TaskStatusStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn get(&self, name: &str) -> Result<Option<entities::task_status::Model>> {
        entities::task_status::Entity::find_by_id(name.to_string())
            .one(&self.db.conn)
            .await
            .wrap_err_with(|| format!("Failed to load status of task {name}"))
    }

    /// Current status, reported as idle for tasks that never ran.
    pub async fn view(&self, name: &str) -> Result<TaskStatusView> {
        Ok(self
            .get(name)
            .await?
            .map(TaskStatusView::from)
            .unwrap_or_else(|| TaskStatusView::idle(name)))
    }

    /// Claim the row for a fresh run and reset it.
    ///
    /// Returns `false` without touching anything while another run of the
    /// task, possibly in another process, is still beating.
    pub async fn begin(&self, name: &str, total: i64) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let fresh = entities::task_status::ActiveModel {
            name: Set(name.to_string()),
            status: Set(TaskState::Running),
            stop_requested: Set(false),
            current: Set(0),
            total: Set(total),
            extra: Set(TaskCounters::default()),
            message: Set(None),
            started_at: Set(Some(now)),
            finished_at: Set(None),
            updated_at: Set(now),
        };
        let inserted = entities::task_status::Entity::insert(fresh)
            .on_conflict(
                OnConflict::column(entities::task_status::Column::Name)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db.conn)
            .await
            .wrap_err_with(|| format!("Failed to record start of task {name}"))?;
        if inserted > 0 {
            return Ok(true);
        }

        let result = entities::task_status::Entity::update_many()
            .col_expr(
                entities::task_status::Column::Status,
                Expr::value(TaskState::Running),
            )
            .col_expr(entities::task_status::Column::StopRequested, Expr::value(false))
            .col_expr(entities::task_status::Column::Current, Expr::value(0i64))
            .col_expr(entities::task_status::Column::Total, Expr::value(total))
            .col_expr(
                entities::task_status::Column::Extra,
                Expr::value(TaskCounters::default()),
            )
            .col_expr(
                entities::task_status::Column::Message,
                Expr::value(Option::<String>::None),
            )
            .col_expr(entities::task_status::Column::StartedAt, Expr::value(Some(now)))
            .col_expr(
                entities::task_status::Column::FinishedAt,
                Expr::value(Option::<i64>::None),
            )
            .col_expr(entities::task_status::Column::UpdatedAt, Expr::value(now))
            .filter(entities::task_status::Column::Name.eq(name))
            .filter(
                Condition::any()
                    .add(entities::task_status::Column::Status.ne(TaskState::Running))
                    .add(entities::task_status::Column::UpdatedAt.lt(stale_before())),
            )
            .exec(&self.db.conn)
            .await
            .wrap_err_with(|| format!("Failed to record start of task {name}"))?;
        Ok(result.rows_affected > 0)
    }

    /// Keep a running row fresh so it isn't taken for an abandoned run.
    pub async fn heartbeat(&self, name: &str) -> Result<()> {
        entities::task_status::Entity::update_many()
            .col_expr(
                entities::task_status::Column::UpdatedAt,
                Expr::value(chrono::Utc::now().timestamp()),
            )
            .filter(entities::task_status::Column::Name.eq(name))
            .filter(entities::task_status::Column::Status.eq(TaskState::Running))
            .exec(&self.db.conn)
            .await
            .wrap_err_with(|| format!("Failed to refresh task {name}"))?;
        Ok(())
    }

    pub async fn progress(
        &self,
        name: &str,
        current: i64,
        total: i64,
        extra: TaskCounters,
    ) -> Result<()> {
        let Some(existing) = self.get(name).await? else {
            return Ok(());
        };
        let mut status: entities::task_status::ActiveModel = existing.into();
        status.current = Set(current);
        status.total = Set(total);
        status.extra = Set(extra);
        status
            .update(&self.db.conn)
            .await
            .wrap_err_with(|| format!("Failed to record progress of task {name}"))?;
        Ok(())
    }

    pub async fn finish(&self, name: &str, state: TaskState, message: Option<String>) -> Result<()> {
        let Some(existing) = self.get(name).await? else {
            return Ok(());
        };
        let mut status: entities::task_status::ActiveModel = existing.into();
        status.status = Set(state);
        status.message = Set(message);
        status.finished_at = Set(Some(chrono::Utc::now().timestamp()));
        status
            .update(&self.db.conn)
            .await
            .wrap_err_with(|| format!("Failed to record end of task {name}"))?;
        Ok(())
    }

    /// Raise the stop flag of a running task. Returns `false` when it isn't running.
    pub async fn request_stop(&self, name: &str) -> Result<bool> {
        let result = entities::task_status::Entity::update_many()
            .col_expr(entities::task_status::Column::StopRequested, Expr::value(true))
            .col_expr(
                entities::task_status::Column::UpdatedAt,
                Expr::value(chrono::Utc::now().timestamp()),
            )
            .filter(entities::task_status::Column::Name.eq(name))
            .filter(entities::task_status::Column::Status.eq(TaskState::Running))
            .exec(&self.db.conn)
            .await
            .wrap_err_with(|| format!("Failed to request stop of task {name}"))?;
        Ok(result.rows_affected > 0)
    }

    pub async fn is_stop_requested(&self, name: &str) -> Result<bool> {
        Ok(self
            .get(name)
            .await?
            .is_some_and(|status| status.stop_requested))
    }

    /// Runs whose process died can never finish. Rows that stopped beating
    /// are marked failed; live runs of other processes are left alone.
    #[tracing::instrument(skip(self))]
    pub async fn mark_interrupted(&self) -> Result<u64> {
        let result = entities::task_status::Entity::update_many()
            .col_expr(
                entities::task_status::Column::Status,
                Expr::value(TaskState::Error),
            )
            .col_expr(
                entities::task_status::Column::Message,
                Expr::value("Interrupted by restart"),
            )
            .col_expr(
                entities::task_status::Column::FinishedAt,
                Expr::value(chrono::Utc::now().timestamp()),
            )
            .filter(entities::task_status::Column::Status.eq(TaskState::Running))
            .filter(entities::task_status::Column::UpdatedAt.lt(stale_before()))
            .exec(&self.db.conn)
            .await
            .wrap_err("Failed to clean up interrupted tasks")?;
        tracing::info!("Marked {} interrupted tasks as failed", result.rows_affected);
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_db;

    fn counters(pairs: &[(&str, i64)]) -> TaskCounters {
        TaskCounters(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }

    #[tokio::test]
    async fn test_unknown_task_is_idle() {
        let store = TaskStatusStore::new(test_db().await);
        let view = store.view("discover").await.unwrap();
        assert_eq!(view.status, TaskState::Idle);
        assert_eq!(view.current, 0);
    }

    #[tokio::test]
    async fn test_run_lifecycle_overwrites_previous_run() {
        let store = TaskStatusStore::new(test_db().await);

        store.begin("discover", 1000).await.unwrap();
        store
            .progress("discover", 3, 1000, counters(&[("created", 2), ("updated", 1)]))
            .await
            .unwrap();
        store
            .finish("discover", TaskState::Error, Some("boom".into()))
            .await
            .unwrap();

        let view = store.view("discover").await.unwrap();
        assert_eq!(view.status, TaskState::Error);
        assert_eq!(view.current, 3);
        assert_eq!(view.extra.get("created"), Some(&2));
        assert_eq!(view.message.as_deref(), Some("boom"));

        store.begin("discover", 500).await.unwrap();
        let view = store.view("discover").await.unwrap();
        assert_eq!(view.status, TaskState::Running);
        assert_eq!(view.current, 0);
        assert_eq!(view.total, 500);
        assert!(view.extra.is_empty());
        assert_eq!(view.message, None);
        assert_eq!(view.finished_at, None);
    }

    #[tokio::test]
    async fn test_stop_only_applies_to_running_task() {
        let store = TaskStatusStore::new(test_db().await);

        assert!(!store.request_stop("scan").await.unwrap());

        store.begin("scan", 2).await.unwrap();
        assert!(!store.is_stop_requested("scan").await.unwrap());
        assert!(store.request_stop("scan").await.unwrap());
        assert!(store.is_stop_requested("scan").await.unwrap());

        store.finish("scan", TaskState::Stopped, None).await.unwrap();
        assert!(!store.request_stop("scan").await.unwrap());
    }

    async fn stop_beating(db: &Database, name: &str) {
        entities::task_status::Entity::update_many()
            .col_expr(entities::task_status::Column::UpdatedAt, Expr::value(0i64))
            .filter(entities::task_status::Column::Name.eq(name))
            .exec(&db.conn)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mark_interrupted_spares_live_runs() {
        let db = test_db().await;
        let store = TaskStatusStore::new(db.clone());
        store.begin("discover", 10).await.unwrap();
        store.begin("scan", 10).await.unwrap();
        stop_beating(&db, "discover").await;

        assert_eq!(store.mark_interrupted().await.unwrap(), 1);

        let discover = store.view("discover").await.unwrap();
        assert_eq!(discover.status, TaskState::Error);
        assert_eq!(discover.message.as_deref(), Some("Interrupted by restart"));
        assert_eq!(store.view("scan").await.unwrap().status, TaskState::Running);
    }

    #[tokio::test]
    async fn test_begin_refused_while_another_run_beats() {
        let db = test_db().await;
        let store = TaskStatusStore::new(db.clone());

        assert!(store.begin("scan", 3).await.unwrap());
        store.progress("scan", 2, 3, TaskCounters::default()).await.unwrap();
        assert!(!store.begin("scan", 5).await.unwrap());
        assert_eq!(store.view("scan").await.unwrap().current, 2);

        store.heartbeat("scan").await.unwrap();
        assert!(!store.begin("scan", 5).await.unwrap());

        // The other process died without finishing
        stop_beating(&db, "scan").await;
        assert!(store.begin("scan", 5).await.unwrap());
        let view = store.view("scan").await.unwrap();
        assert_eq!(view.status, TaskState::Running);
        assert_eq!(view.current, 0);
        assert_eq!(view.total, 5);
    }
}
