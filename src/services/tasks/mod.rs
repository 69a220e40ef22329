//! Background runs of the discovery and scan jobs.
//!
//! Runs execute on tokio tasks gated by a small semaphore. Each run gets its
//! own [`CancellationToken`] and publishes progress to its [`TaskStatusStore`]
//! row, which is what the status endpoints poll.

pub mod discover;
pub mod scan;
pub mod status;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use color_eyre::eyre::Result;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::Config;
use crate::database::Database;
use crate::entities::task_status::{TaskCounters, TaskState};
use crate::ports::spotify::SharedSpotifyApi;
use crate::services::tasks::discover::DiscoveryOptions;
use crate::services::tasks::scan::ScanOptions;
use crate::services::tasks::status::{HEARTBEAT_INTERVAL, TaskStatusStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Discover,
    Scan,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::Discover, TaskKind::Scan];

    /// Name of the task's status row and URL segment
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Discover => "discover",
            TaskKind::Scan => "scan",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown task '{0}', expected one of: discover, scan")]
pub struct UnknownTask(pub String);

impl FromStr for TaskKind {
    type Err = UnknownTask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| UnknownTask(s.to_string()))
    }
}

#[derive(Debug, Clone)]
pub enum TaskRequest {
    Discover(DiscoveryOptions),
    Scan(ScanOptions),
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::Discover(_) => TaskKind::Discover,
            TaskRequest::Scan(_) => TaskKind::Scan,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopping,
    NotRunning,
}

/// Handed to an orchestrator for the duration of one run.
pub struct RunContext {
    kind: TaskKind,
    cancel: CancellationToken,
    status: TaskStatusStore,
}

impl RunContext {
    pub fn new(kind: TaskKind, cancel: CancellationToken, status: TaskStatusStore) -> Self {
        Self {
            kind,
            cancel,
            status,
        }
    }

    /// Checked between steps. Also honours a stop flag raised through the
    /// status row, e.g. by another process.
    pub async fn should_stop(&self) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        match self.status.is_stop_requested(self.kind.name()).await {
            Ok(true) => {
                self.cancel.cancel();
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(task = %self.kind, error = ?e, "Failed to read stop flag");
                false
            }
        }
    }

    /// Publish progress. Failing to do so is logged and otherwise ignored.
    pub async fn report(&self, current: i64, total: i64, counters: impl Into<TaskCounters>) {
        if let Err(e) = self
            .status
            .progress(self.kind.name(), current, total, counters.into())
            .await
        {
            tracing::warn!(task = %self.kind, error = ?e, "Failed to publish progress");
        }
    }

    /// Politeness delay between API pages, cut short by cancellation.
    pub async fn pause(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

struct RunHandle {
    run_id: u64,
    cancel: CancellationToken,
}

/// Starts, tracks and stops background runs. At most one run per [`TaskKind`].
#[derive(Clone)]
pub struct TaskRunner {
    db: Arc<Database>,
    api: SharedSpotifyApi,
    config: Arc<Config>,
    status: TaskStatusStore,
    permits: Arc<Semaphore>,
    running: Arc<Mutex<HashMap<TaskKind, RunHandle>>>,
    next_run_id: Arc<AtomicU64>,
}

impl TaskRunner {
    pub fn new(db: Arc<Database>, api: SharedSpotifyApi, config: Arc<Config>) -> Self {
        let pool_size = config.tasks.worker_pool_size.max(1);
        Self {
            status: TaskStatusStore::new(db.clone()),
            db,
            api,
            config,
            permits: Arc::new(Semaphore::new(pool_size)),
            running: Arc::new(Mutex::new(HashMap::new())),
            next_run_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn status(&self) -> &TaskStatusStore {
        &self.status
    }

    /// A request using the configured defaults.
    pub fn default_request(&self, kind: TaskKind) -> TaskRequest {
        match kind {
            TaskKind::Discover => {
                TaskRequest::Discover(DiscoveryOptions::from(&self.config.discovery))
            }
            TaskKind::Scan => TaskRequest::Scan(ScanOptions::from(&self.config.scan)),
        }
    }

    /// Spawn a run unless one of the same kind is in progress. Returns once the
    /// run is registered; the run itself waits for a free worker.
    pub async fn start(&self, request: TaskRequest) -> Result<StartOutcome> {
        let kind = request.kind();
        let cancel = CancellationToken::new();
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut running = self.running.lock().await;
            if running.contains_key(&kind) {
                tracing::info!(task = %kind, "Task already running");
                return Ok(StartOutcome::AlreadyRunning);
            }
            running.insert(
                kind,
                RunHandle {
                    run_id,
                    cancel: cancel.clone(),
                },
            );
        }

        match self.status.begin(kind.name(), 0).await {
            Ok(true) => {}
            Ok(false) => {
                self.release(kind, run_id).await;
                tracing::info!(task = %kind, "Task already running in another process");
                return Ok(StartOutcome::AlreadyRunning);
            }
            Err(e) => {
                self.release(kind, run_id).await;
                return Err(e);
            }
        }

        let runner = self.clone();
        let span = tracing::info_span!("task_run", task = %kind, run_id);
        tokio::spawn(
            async move {
                match runner.permits.clone().acquire_owned().await {
                    Ok(_permit) => {
                        runner.execute(request, cancel).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Worker pool closed");
                        if let Err(e) = runner
                            .status
                            .finish(kind.name(), TaskState::Error, Some(e.to_string()))
                            .await
                        {
                            tracing::error!(task = %kind, error = ?e, "Failed to record task result");
                        }
                    }
                }
                runner.release(kind, run_id).await;
            }
            .instrument(span),
        );

        tracing::info!(task = %kind, run_id, "Task started");
        Ok(StartOutcome::Started)
    }

    /// Ask a run to stop after its current step.
    pub async fn stop(&self, kind: TaskKind) -> Result<StopOutcome> {
        let cancelled_local = match self.running.lock().await.get(&kind) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        };
        let flagged = self.status.request_stop(kind.name()).await?;

        if cancelled_local || flagged {
            tracing::info!(task = %kind, "Stop requested");
            Ok(StopOutcome::Stopping)
        } else {
            Ok(StopOutcome::NotRunning)
        }
    }

    /// Run in the foreground, stopping cooperatively on Ctrl-C.
    pub async fn run_inline(&self, request: TaskRequest) -> Result<TaskState> {
        let kind = request.kind();
        let cancel = CancellationToken::new();

        let on_ctrl_c = cancel.clone();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping after the current step");
                on_ctrl_c.cancel();
            }
        });

        let claimed = self.status.begin(kind.name(), 0).await;
        let state = match claimed {
            Ok(true) => Ok(self.execute(request, cancel).await),
            Ok(false) => Err(color_eyre::eyre::eyre!("Task {kind} is already running")),
            Err(e) => Err(e),
        };
        ctrl_c.abort();
        state
    }

    async fn execute(&self, request: TaskRequest, cancel: CancellationToken) -> TaskState {
        let kind = request.kind();
        let ctx = RunContext::new(kind, cancel, self.status.clone());

        let status = self.status.clone();
        let heartbeat = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = status.heartbeat(kind.name()).await {
                    tracing::warn!(task = %kind, error = ?e, "Failed to refresh task status");
                }
            }
        });

        let result = match request {
            TaskRequest::Discover(options) => {
                discover::run(&ctx, self.api.clone(), self.db.clone(), &options).await
            }
            TaskRequest::Scan(options) => {
                scan::run(&ctx, self.api.clone(), self.db.clone(), &options).await
            }
        };

        heartbeat.abort();

        let (state, message) = match result {
            Ok(RunOutcome::Completed) => (TaskState::Done, None),
            Ok(RunOutcome::Stopped) => (TaskState::Stopped, None),
            Err(e) => {
                tracing::error!(task = %kind, error = ?e, "Task failed");
                (TaskState::Error, Some(format!("{e:#}")))
            }
        };

        if let Err(e) = self.status.finish(kind.name(), state, message).await {
            tracing::error!(task = %kind, error = ?e, "Failed to record task result");
        }
        tracing::info!(task = %kind, status = ?state, "Task finished");
        state
    }

    async fn release(&self, kind: TaskKind, run_id: u64) {
        let mut running = self.running.lock().await;
        if running.get(&kind).is_some_and(|handle| handle.run_id == run_id) {
            running.remove(&kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::spotify::{MockSpotifyApi, SearchPage};
    use crate::services::playlist::PlaylistService;
    use crate::services::tasks::status::TaskStatusView;
    use crate::test_utils::{summary, test_db};
    use sea_orm::ConnectionTrait;

    async fn wait_until_finished(runner: &TaskRunner, kind: TaskKind) -> TaskStatusView {
        for _ in 0..500 {
            let view = runner.status().view(kind.name()).await.unwrap();
            if view.status.is_finished() && !runner.running.lock().await.contains_key(&kind) {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {kind} did not finish");
    }

    fn quick_config() -> Arc<Config> {
        let mut config = Config::default();
        config.discovery.keywords = vec!["chill".into()];
        config.discovery.page_delay = Duration::ZERO;
        config.scan.page_delay = Duration::ZERO;
        Arc::new(config)
    }

    #[test]
    fn test_task_kind_names() {
        assert_eq!("discover".parse::<TaskKind>().unwrap(), TaskKind::Discover);
        assert_eq!("scan".parse::<TaskKind>().unwrap(), TaskKind::Scan);
        assert!("import".parse::<TaskKind>().is_err());
        assert_eq!(TaskKind::Scan.to_string(), "scan");
    }

    #[tokio::test]
    async fn test_discovery_run_reaches_done() {
        let db = test_db().await;
        let mut api = MockSpotifyApi::new();
        api.expect_search_playlists().returning(|_, _, _| {
            Ok(SearchPage {
                items: vec![summary("pl1", "One"), summary("pl2", "Two")],
                fetched: 2,
                has_more: false,
            })
        });
        let runner = TaskRunner::new(db, Arc::new(api), quick_config());

        let outcome = runner
            .start(runner.default_request(TaskKind::Discover))
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::Started);

        let view = wait_until_finished(&runner, TaskKind::Discover).await;
        assert_eq!(view.status, TaskState::Done);
        assert_eq!(view.extra.get("created"), Some(&2));
        assert_eq!(view.current, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_start_is_rejected_while_running() {
        let db = test_db().await;
        let gate = CancellationToken::new();
        let mut api = MockSpotifyApi::new();
        {
            let gate = gate.clone();
            api.expect_search_playlists().returning(move |_, _, _| {
                // Keep the first run busy until the test is done with it
                while !gate.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(SearchPage::default())
            });
        }
        let runner = TaskRunner::new(db, Arc::new(api), quick_config());

        let first = runner
            .start(runner.default_request(TaskKind::Discover))
            .await
            .unwrap();
        let second = runner
            .start(runner.default_request(TaskKind::Discover))
            .await
            .unwrap();
        assert_eq!(first, StartOutcome::Started);
        assert_eq!(second, StartOutcome::AlreadyRunning);

        gate.cancel();
        wait_until_finished(&runner, TaskKind::Discover).await;

        let again = runner
            .start(runner.default_request(TaskKind::Discover))
            .await
            .unwrap();
        assert_eq!(again, StartOutcome::Started);
        wait_until_finished(&runner, TaskKind::Discover).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_marks_run_stopped() {
        let db = test_db().await;
        let runner_slot: Arc<std::sync::Mutex<Option<TaskRunner>>> =
            Arc::new(std::sync::Mutex::new(None));
        let mut api = MockSpotifyApi::new();
        {
            let runner_slot = runner_slot.clone();
            api.expect_search_playlists().returning(move |_, _, _| {
                // Cancel the run's token while the search call is in flight
                let runner = runner_slot.lock().unwrap().clone().unwrap();
                tokio::task::block_in_place(|| {
                    tokio::runtime::Handle::current().block_on(runner.stop(TaskKind::Discover))
                })
                .unwrap();
                Ok(SearchPage {
                    items: vec![summary("pl1", "One")],
                    fetched: 1,
                    has_more: false,
                })
            });
        }
        let runner = TaskRunner::new(db.clone(), Arc::new(api), quick_config());
        *runner_slot.lock().unwrap() = Some(runner.clone());

        runner
            .start(runner.default_request(TaskKind::Discover))
            .await
            .unwrap();
        let view = wait_until_finished(&runner, TaskKind::Discover).await;

        assert_eq!(view.status, TaskState::Stopped);
        assert_eq!(view.message, None);
        let playlists = PlaylistService::new(db)
            .list()
            .await
            .unwrap();
        assert!(playlists.is_empty());
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let db = test_db().await;
        let runner = TaskRunner::new(db, Arc::new(MockSpotifyApi::new()), quick_config());
        assert_eq!(
            runner.stop(TaskKind::Scan).await.unwrap(),
            StopOutcome::NotRunning
        );
    }

    #[tokio::test]
    async fn test_run_claimed_elsewhere_is_not_started() {
        let db = test_db().await;
        let mut api = MockSpotifyApi::new();
        api.expect_search_playlists().never();
        let runner = TaskRunner::new(db.clone(), Arc::new(api), quick_config());

        // Another process is in the middle of a discovery
        TaskStatusStore::new(db)
            .begin(TaskKind::Discover.name(), 0)
            .await
            .unwrap();

        assert!(
            runner
                .run_inline(runner.default_request(TaskKind::Discover))
                .await
                .is_err()
        );
        assert_eq!(
            runner
                .start(runner.default_request(TaskKind::Discover))
                .await
                .unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert!(!runner.running.lock().await.contains_key(&TaskKind::Discover));
        let view = runner.status().view("discover").await.unwrap();
        assert_eq!(view.status, TaskState::Running);
    }

    #[tokio::test]
    async fn test_closed_worker_pool_records_error() {
        let db = test_db().await;
        let mut api = MockSpotifyApi::new();
        api.expect_search_playlists().never();
        let runner = TaskRunner::new(db, Arc::new(api), quick_config());
        runner.permits.close();

        let outcome = runner
            .start(runner.default_request(TaskKind::Discover))
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::Started);

        let view = wait_until_finished(&runner, TaskKind::Discover).await;
        assert_eq!(view.status, TaskState::Error);
        assert!(view.message.unwrap().contains("closed"));
    }

    #[tokio::test]
    async fn test_failed_run_records_error() {
        let db = test_db().await;
        let runner = TaskRunner::new(db.clone(), Arc::new(MockSpotifyApi::new()), quick_config());

        // The scan cannot read tracks once the table is gone
        db.conn
            .execute_unprepared("DROP TABLE appearance")
            .await
            .unwrap();
        db.conn.execute_unprepared("DROP TABLE track").await.unwrap();

        let state = runner
            .run_inline(runner.default_request(TaskKind::Scan))
            .await
            .unwrap();

        assert_eq!(state, TaskState::Error);
        let view = runner.status().view("scan").await.unwrap();
        assert_eq!(view.status, TaskState::Error);
        assert!(view.message.is_some());
    }
}
