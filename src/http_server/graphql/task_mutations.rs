use async_graphql::{Context, Object};

use crate::http_server::graphql::{context::get_task_runner, parse_task_kind};
use crate::http_server::graphql_error::{GraphqlError, GraphqlResult};
use crate::services::tasks::{StartOutcome, StopOutcome, TaskKind, TaskRequest};

fn positive(name: &str, value: Option<i32>) -> Result<Option<usize>, GraphqlError> {
    match value {
        None => Ok(None),
        Some(v) if v > 0 => Ok(Some(v as usize)),
        Some(_) => Err(GraphqlError::InvalidInput(format!(
            "{name} must be greater than zero"
        ))),
    }
}

#[derive(Default)]
pub struct TaskMutation;

#[Object]
impl TaskMutation {
    /// Returns `false` when a discovery is already running.
    async fn start_discovery(
        &self,
        ctx: &Context<'_>,
        keywords: Option<Vec<String>>,
        max_per_keyword: Option<i32>,
        max_total: Option<i32>,
    ) -> GraphqlResult<bool> {
        let runner = get_task_runner(ctx)?;
        let TaskRequest::Discover(mut options) = runner.default_request(TaskKind::Discover) else {
            return Err(GraphqlError::ServerError("Unexpected task request".to_string()).into());
        };
        if let Some(keywords) = keywords {
            let keywords: Vec<String> = keywords
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            if keywords.is_empty() {
                return Err(
                    GraphqlError::InvalidInput("keywords must not be empty".to_string()).into(),
                );
            }
            options.keywords = keywords;
        }
        if let Some(max) = positive("maxPerKeyword", max_per_keyword)? {
            options.max_per_keyword = max;
        }
        if let Some(max) = positive("maxTotal", max_total)? {
            options.max_total = max;
        }

        let outcome = runner.start(TaskRequest::Discover(options)).await?;
        Ok(outcome == StartOutcome::Started)
    }

    /// Returns `false` when a scan is already running.
    async fn start_scan(&self, ctx: &Context<'_>) -> GraphqlResult<bool> {
        let runner = get_task_runner(ctx)?;
        let outcome = runner.start(runner.default_request(TaskKind::Scan)).await?;
        Ok(outcome == StartOutcome::Started)
    }

    /// Returns `false` when the task isn't running.
    async fn stop_task(&self, ctx: &Context<'_>, name: String) -> GraphqlResult<bool> {
        let kind = parse_task_kind(&name)?;
        let outcome = get_task_runner(ctx)?.stop(kind).await?;
        Ok(outcome == StopOutcome::Stopping)
    }
}
