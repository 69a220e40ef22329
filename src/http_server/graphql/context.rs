use std::sync::Arc;

use async_graphql::Context;

use crate::database::Database;
use crate::http_server::{graphql_error::GraphqlError, state::AppState};
use crate::services::tasks::TaskRunner;

pub fn get_app_state<'a>(ctx: &Context<'a>) -> Result<&'a Arc<AppState>, GraphqlError> {
    ctx.data::<Arc<AppState>>()
        .map_err(|_| GraphqlError::FailedToGetAppState)
}

pub fn get_db(ctx: &Context<'_>) -> Result<Arc<Database>, GraphqlError> {
    Ok(get_app_state(ctx)?.db.clone())
}

pub fn get_task_runner<'a>(ctx: &Context<'a>) -> Result<&'a TaskRunner, GraphqlError> {
    Ok(&get_app_state(ctx)?.task_runner)
}
