use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::header,
    response::IntoResponse,
};

use crate::http_server::{error::Report, state::AppState};
use crate::services::appearance::AppearanceService;

/// Dashboard rows as a downloadable JSON document.
pub async fn export_appearances(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, Report> {
    let rows = AppearanceService::new(app_state.db.clone())
        .dashboard_rows()
        .await?;
    tracing::info!(rows = rows.len(), "Exporting appearances");

    Ok((
        [(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"appearances.json\"",
        )],
        Json(rows),
    ))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::http_server::app::router;
    use crate::http_server::app::tests::test_state;
    use crate::ports::spotify::MockSpotifyApi;
    use crate::services::appearance::AppearanceService;
    use crate::test_utils::{insert_playlist, insert_track};

    #[tokio::test]
    async fn test_export_contains_dashboard_rows() {
        let state = test_state(MockSpotifyApi::new()).await;
        let track = insert_track(&state.db, "t1", "Song", Some("Artist")).await;
        let playlist = insert_playlist(&state.db, "pl1", Some("s1")).await;
        AppearanceService::new(state.db.clone())
            .upsert_confirmed(track.id, playlist.id)
            .await
            .unwrap();

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/export/appearances")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 200);
        assert!(
            response.headers()[header::CONTENT_DISPOSITION]
                .to_str()
                .unwrap()
                .contains("appearances.json")
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let rows: Value = serde_json::from_slice(&body).unwrap();
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["track_name"], "Song");
        assert_eq!(rows[0]["playlist_name"], "Playlist pl1");
        assert_eq!(rows[0]["state"], "confirmed");
        assert_eq!(rows[0]["contact"], Value::Null);
    }
}
