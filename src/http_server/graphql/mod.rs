use std::sync::Arc;

use async_graphql::http::GraphiQLSource;
use async_graphql::{EmptySubscription, MergedObject, Schema};
use axum::response::{Html, IntoResponse};
use chrono::{DateTime, Utc};
use color_eyre::eyre::OptionExt;

use crate::http_server::graphql_error::GraphqlError;
use crate::http_server::state::AppState;
use crate::services::tasks::TaskKind;

mod context;
pub mod task_mutations;
pub mod task_queries;
pub mod tracker_mutations;
pub mod tracker_queries;

use task_mutations::TaskMutation;
use task_queries::TaskQuery;
use tracker_mutations::TrackerMutation;
use tracker_queries::TrackerQuery;

pub(crate) fn timestamp(secs: i64) -> color_eyre::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_secs(secs).ok_or_eyre("Invalid timestamp")
}

pub(crate) fn parse_task_kind(name: &str) -> Result<TaskKind, GraphqlError> {
    name.parse()
        .map_err(|e: crate::services::tasks::UnknownTask| GraphqlError::InvalidInput(e.to_string()))
}

#[derive(Default, MergedObject)]
pub struct Query(TrackerQuery, TaskQuery);

#[derive(Default, MergedObject)]
pub struct Mutation(TrackerMutation, TaskMutation);

pub type TrackerSchema = Schema<Query, Mutation, EmptySubscription>;

pub async fn graphql() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

pub fn create_schema(app_state: Arc<AppState>) -> TrackerSchema {
    Schema::build(Query::default(), Mutation::default(), EmptySubscription)
        .data(app_state)
        .finish()
}
