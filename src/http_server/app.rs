use std::sync::Arc;

use async_graphql_axum::GraphQL;
use axum::{
    Router,
    routing::{get, post},
};
use color_eyre::eyre::{Context, eyre};
use tower::ServiceBuilder;
#[cfg(not(debug_assertions))]
use tower_http::cors::{AllowMethods, AllowOrigin};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::http_server::{
    graphql,
    http_routes::{export, import, tasks},
    state::AppState,
};

async fn root() -> &'static str {
    "playlist-watcher"
}

pub fn router(app_state: Arc<AppState>) -> Router {
    let schema = graphql::create_schema(app_state.clone());

    #[cfg(debug_assertions)]
    let cors_layer = CorsLayer::permissive();

    #[cfg(not(debug_assertions))]
    let cors_layer = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::any());

    Router::new()
        .route("/", get(root))
        .route(
            "/graphql",
            get(graphql::graphql).post_service(GraphQL::new(schema)),
        )
        .route("/api/tasks/{name}/status", get(tasks::task_status))
        .route("/api/tasks/{name}/start", post(tasks::start_task))
        .route("/api/tasks/{name}/stop", post(tasks::stop_task))
        .route("/api/export/appearances", get(export::export_appearances))
        .route("/api/import/appearances", post(import::import_appearances))
        .route("/api/import/playlists", post(import::import_playlists))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state)
}

pub async fn start(port: u16, app_state: Arc<AppState>) -> color_eyre::Result<()> {
    // Runs abandoned by a dead process; live CLI runs keep beating
    app_state.task_runner.status().mark_interrupted().await?;

    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .wrap_err_with(|| eyre!("Failed to bind to port {}", port))?;
    tracing::info!(port, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .wrap_err("Failed to start HTTP server")?;

    Ok(())
}
