use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::http_server::{error::Report, state::AppState};
use crate::services::import::{
    AppearanceImportRow, ImportMode, ImportService, PlaylistImportRow,
};

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    /// `overwrite` or `complete`, defaults to `complete`
    mode: Option<String>,
    /// Only report what would change
    #[serde(default)]
    dry_run: bool,
}

impl ImportQuery {
    fn mode(&self) -> Result<ImportMode, Report> {
        Ok(match &self.mode {
            Some(mode) => mode.parse::<ImportMode>()?,
            None => ImportMode::default(),
        })
    }
}

/// Takes the document produced by the appearance export.
#[tracing::instrument(skip(app_state, rows))]
pub async fn import_appearances(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ImportQuery>,
    Json(rows): Json<Vec<AppearanceImportRow>>,
) -> Result<impl IntoResponse, Report> {
    let summary = ImportService::new(app_state.db.clone())
        .import_appearances(rows, query.mode()?, query.dry_run)
        .await?;
    Ok(Json(summary))
}

#[tracing::instrument(skip(app_state, rows))]
pub async fn import_playlists(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ImportQuery>,
    Json(rows): Json<Vec<PlaylistImportRow>>,
) -> Result<impl IntoResponse, Report> {
    let summary = ImportService::new(app_state.db.clone())
        .import_playlists(rows, query.mode()?, query.dry_run)
        .await?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::http_server::app::router;
    use crate::http_server::app::tests::test_state;
    use crate::ports::spotify::MockSpotifyApi;
    use crate::services::appearance::AppearanceService;
    use crate::test_utils::insert_playlist;

    async fn post(app: axum::Router, uri: &str, body: Value) -> (u16, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status().as_u16();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_preview_then_import_appearances() {
        let state = test_state(MockSpotifyApi::new()).await;
        let app = router(state.clone());
        let document = json!([{
            "track_name": "Song",
            "playlist_name": "Late night",
            "playlist_url": "https://open.spotify.com/playlist/pl1",
            "contact": "curator@example.com",
            "id": 12,
            "updated_at": 1700000000
        }]);

        let (status, body) = post(
            app.clone(),
            "/api/import/appearances?dry_run=true",
            document.clone(),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({ "imported": 1, "updated": 0, "dry_run": true }));
        let appearances = AppearanceService::new(state.db.clone());
        assert!(appearances.dashboard_rows().await.unwrap().is_empty());

        let (status, body) = post(app, "/api/import/appearances?mode=overwrite", document).await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({ "imported": 1, "updated": 0, "dry_run": false }));
        let rows = appearances.dashboard_rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].playlist_name, "Late night");
        assert_eq!(rows[0].contact.as_deref(), Some("curator@example.com"));
    }

    #[tokio::test]
    async fn test_import_playlists_completes_metadata() {
        let state = test_state(MockSpotifyApi::new()).await;
        insert_playlist(&state.db, "pl1", None).await;

        let (status, body) = post(
            router(state),
            "/api/import/playlists",
            json!([{ "url": "https://open.spotify.com/playlist/pl1", "curator": "Curator" }]),
        )
        .await;

        assert_eq!(status, 200);
        assert_eq!(body, json!({ "imported": 0, "updated": 1, "dry_run": false }));
    }

    #[tokio::test]
    async fn test_unknown_mode_is_bad_request() {
        let app = router(test_state(MockSpotifyApi::new()).await);

        let (status, body) = post(app, "/api/import/playlists?mode=replace", json!([])).await;

        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("replace"));
    }
}
