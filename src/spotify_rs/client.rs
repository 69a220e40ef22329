use std::time::Duration;

use reqwest::{StatusCode, header};
use url::Url;

use crate::ports::spotify::{ApiResult, SpotifyApiError};
use crate::spotify_rs::types::{
    FullPlaylist, PlaylistSearchResponse, PlaylistSnapshot, PlaylistTracksResponse,
};

const PLAYLIST_DETAIL_FIELDS: &str = "id,name,description,snapshot_id,external_urls,owner(display_name,external_urls),followers(total)";
const PLAYLIST_TRACK_FIELDS: &str = "items(track(id)),next";

/// Thin Spotify Web API client. Every call takes the bearer token to use and
/// classifies failures into [`SpotifyApiError`]; retrying is left to the caller.
pub struct SpotifyClient {
    client: reqwest::Client,
    api_base: Url,
}

impl SpotifyClient {
    pub fn new(api_base: &str, timeout: Duration) -> color_eyre::Result<Self> {
        let mut api_base = Url::parse(api_base)?;
        // Url::join drops the last segment unless the base ends with a slash
        if !api_base.path().ends_with('/') {
            api_base.set_path(&format!("{}/", api_base.path()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, api_base })
    }

    fn endpoint(&self, path: &str) -> ApiResult<Url> {
        self.api_base
            .join(path)
            .map_err(|e| SpotifyApiError::Fatal(format!("Invalid endpoint {path}: {e}")))
    }

    fn playlist_endpoint(&self, playlist_id: &str, suffix: &str) -> ApiResult<Url> {
        self.endpoint(&format!(
            "playlists/{}{}",
            urlencoding::encode(playlist_id),
            suffix
        ))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        access_token: &str,
        url: Url,
        query: &[(&str, String)],
    ) -> ApiResult<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(classify_send_error)?;

        let response = classify_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| SpotifyApiError::Fatal(format!("Failed to parse response: {e}")))
    }

    pub async fn search_playlists(
        &self,
        access_token: String,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> ApiResult<PlaylistSearchResponse> {
        let url = self.endpoint("search")?;
        self.get_json(
            &access_token,
            url,
            &[
                ("q", query.to_string()),
                ("type", "playlist".to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    pub async fn playlist_snapshot(
        &self,
        access_token: String,
        playlist_id: &str,
    ) -> ApiResult<PlaylistSnapshot> {
        let url = self.playlist_endpoint(playlist_id, "")?;
        self.get_json(&access_token, url, &[("fields", "snapshot_id".to_string())])
            .await
    }

    pub async fn playlist_tracks(
        &self,
        access_token: String,
        playlist_id: &str,
        offset: u32,
        limit: u32,
    ) -> ApiResult<PlaylistTracksResponse> {
        let url = self.playlist_endpoint(playlist_id, "/tracks")?;
        self.get_json(
            &access_token,
            url,
            &[
                ("fields", PLAYLIST_TRACK_FIELDS.to_string()),
                ("additional_types", "track".to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    pub async fn playlist(&self, access_token: String, playlist_id: &str) -> ApiResult<FullPlaylist> {
        let url = self.playlist_endpoint(playlist_id, "")?;
        self.get_json(
            &access_token,
            url,
            &[("fields", PLAYLIST_DETAIL_FIELDS.to_string())],
        )
        .await
    }
}

fn classify_send_error(error: reqwest::Error) -> SpotifyApiError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        SpotifyApiError::Transient(error.to_string())
    } else {
        SpotifyApiError::Fatal(error.to_string())
    }
}

async fn classify_status(response: reqwest::Response) -> ApiResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(SpotifyApiError::RateLimited { retry_after });
    }

    let url = response.url().to_string();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to get error text".to_string());

    Err(match status {
        StatusCode::NOT_FOUND => SpotifyApiError::NotFound(url),
        StatusCode::UNAUTHORIZED => SpotifyApiError::Unauthorized(body),
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            SpotifyApiError::Transient(format!("HTTP {s} from {url}: {body}"))
        }
        s => SpotifyApiError::Fatal(format!("HTTP {s} from {url}: {body}")),
    })
}
