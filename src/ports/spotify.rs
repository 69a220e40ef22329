use std::sync::Arc;
use std::time::Duration;

/// Errors surfaced by the Spotify API, classified so callers can pick a
/// retry policy by variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpotifyApiError {
    #[error("Rate limited by Spotify (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Transient Spotify API error: {0}")]
    Transient(String),
    #[error("Spotify resource not found: {0}")]
    NotFound(String),
    #[error("Spotify rejected our credentials: {0}")]
    Unauthorized(String),
    #[error("Spotify API error: {0}")]
    Fatal(String),
}

pub type ApiResult<T> = Result<T, SpotifyApiError>;

/// Playlist as returned by search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub url: String,
    pub owner_name: Option<String>,
    pub owner_url: Option<String>,
    pub description: Option<String>,
    pub snapshot_id: Option<String>,
}

/// Full playlist object, which unlike search results carries the follower count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistDetails {
    pub summary: PlaylistSummary,
    pub followers: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub items: Vec<PlaylistSummary>,
    /// Entries Spotify returned for the page, counting removed playlists
    /// that are left out of `items`. The next page starts this far on.
    pub fetched: u32,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackIdPage {
    pub track_ids: Vec<String>,
    pub has_more: bool,
}

/// Port trait wrapping the Spotify API calls used by discovery and scan.
///
/// The production implementation (`services::spotify::client`) retries rate
/// limited calls itself, so implementations never return `RateLimited` unless
/// a retry ceiling is configured.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SpotifyApi: Send + Sync {
    async fn search_playlists(&self, query: &str, limit: u32, offset: u32)
    -> ApiResult<SearchPage>;

    /// Lightweight probe returning only the playlist's current snapshot id.
    async fn playlist_snapshot_id(&self, playlist_id: &str) -> ApiResult<String>;

    async fn playlist_track_ids(
        &self,
        playlist_id: &str,
        offset: u32,
        limit: u32,
    ) -> ApiResult<TrackIdPage>;

    async fn playlist_details(&self, playlist_id: &str) -> ApiResult<PlaylistDetails>;
}

pub type SharedSpotifyApi = Arc<dyn SpotifyApi>;
