use axum::{
    Json,
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use serde_json::json;

use crate::services::import::ImportError;
use crate::services::tasks::UnknownTask;

/// Error returned from REST handlers. Anything convertible into a
/// `color_eyre::Report` can be propagated with `?`.
pub struct Report(color_eyre::Report);

impl std::fmt::Debug for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<E> From<E> for Report
where
    E: Into<color_eyre::Report>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for Report {
    fn into_response(self) -> Response<Body> {
        let err = self.0;

        if let Some(unknown) = err.downcast_ref::<UnknownTask>() {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": unknown.to_string() })),
            )
                .into_response();
        }

        if let Some(invalid) = err.downcast_ref::<ImportError>() {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": invalid.to_string() })),
            )
                .into_response();
        }

        log::error!("{err:?}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Something went wrong" })),
        )
            .into_response()
    }
}
