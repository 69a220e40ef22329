use async_graphql::{Context, Object, SimpleObject};
use chrono::{DateTime, Utc};

use crate::http_server::graphql::{context::get_task_runner, parse_task_kind, timestamp};
use crate::http_server::graphql_error::GraphqlResult;
use crate::services::tasks::status::TaskStatusView;

#[derive(Debug, Clone, SimpleObject)]
pub struct TaskCounter {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, SimpleObject)]
pub struct TaskStatus {
    pub name: String,
    /// One of idle, running, done, error, stopped
    pub status: String,
    pub current: i64,
    pub total: i64,
    pub counters: Vec<TaskCounter>,
    pub message: Option<String>,
    pub stop_requested: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskStatusView> for TaskStatus {
    type Error = color_eyre::Report;

    fn try_from(view: TaskStatusView) -> Result<Self, Self::Error> {
        Ok(Self {
            name: view.name,
            status: view.status.as_str().to_string(),
            current: view.current,
            total: view.total,
            counters: view
                .extra
                .into_iter()
                .map(|(name, value)| TaskCounter { name, value })
                .collect(),
            message: view.message,
            stop_requested: view.stop_requested,
            started_at: view.started_at.map(timestamp).transpose()?,
            finished_at: view.finished_at.map(timestamp).transpose()?,
        })
    }
}

#[derive(Default)]
pub struct TaskQuery;

#[Object]
impl TaskQuery {
    async fn task_status(&self, ctx: &Context<'_>, name: String) -> GraphqlResult<TaskStatus> {
        let kind = parse_task_kind(&name)?;
        let view = get_task_runner(ctx)?.status().view(kind.name()).await?;
        Ok(TaskStatus::try_from(view)?)
    }
}
