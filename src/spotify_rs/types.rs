use serde::{Deserialize, Serialize};

/// Spotify OAuth token response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// Spotify paging object
#[derive(Debug, Clone, Deserialize)]
pub struct Paging<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistSearchResponse {
    pub playlists: Paging<Option<SimplifiedPlaylist>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalUrls {
    pub spotify: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistOwner {
    pub display_name: Option<String>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Followers {
    pub total: Option<i64>,
}

/// Playlist object as embedded in search results
#[derive(Debug, Clone, Deserialize)]
pub struct SimplifiedPlaylist {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    pub owner: Option<PlaylistOwner>,
}

/// Playlist object from `GET /playlists/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct FullPlaylist {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    pub owner: Option<PlaylistOwner>,
    pub followers: Option<Followers>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistSnapshot {
    pub snapshot_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistTrackItem {
    pub track: Option<TrackRef>,
}

/// Only the id is requested from the listing endpoint. Local files have no id.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackRef {
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistTracksResponse {
    pub items: Vec<PlaylistTrackItem>,
    pub next: Option<String>,
}
