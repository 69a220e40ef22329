use std::future::Future;
use std::sync::Arc;

use color_eyre::Result;

use crate::config::Config;
use crate::ports::spotify::{
    ApiResult, PlaylistDetails, PlaylistSummary, SearchPage, SpotifyApi, SpotifyApiError,
    TrackIdPage,
};
use crate::services::spotify::credentials::CredentialStore;
use crate::services::spotify::rate_limit::{RateLimitPolicy, with_rate_limit_retry};
use crate::spotify_rs::client::SpotifyClient;
use crate::spotify_rs::types::{ExternalUrls, FullPlaylist, PlaylistOwner, SimplifiedPlaylist};

/// [`SpotifyApi`] backed by the real Web API.
///
/// Rate limited calls are retried according to the configured policy and a
/// rejected token is renewed once before the error is surfaced.
pub struct SpotifyHttpAdapter {
    client: SpotifyClient,
    credentials: Arc<CredentialStore>,
    policy: RateLimitPolicy,
}

impl SpotifyHttpAdapter {
    pub fn new(config: &Config, credentials: Arc<CredentialStore>) -> Result<Self> {
        Ok(Self {
            client: SpotifyClient::new(
                &config.spotify.api_base_url,
                config.spotify.request_timeout,
            )?,
            credentials,
            policy: RateLimitPolicy::from(&config.rate_limit),
        })
    }

    async fn call<T, F, Fut>(&self, operation: &str, f: F) -> ApiResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let f = &f;
        let credentials = &self.credentials;
        with_rate_limit_retry(&self.policy, operation, move || async move {
            let token = credentials.access_token().await?;
            match f(token).await {
                Err(SpotifyApiError::Unauthorized(reason)) => {
                    tracing::warn!(operation, %reason, "Access token rejected, renewing");
                    credentials.invalidate().await?;
                    f(credentials.access_token().await?).await
                }
                other => other,
            }
        })
        .await
    }
}

#[async_trait::async_trait]
impl SpotifyApi for SpotifyHttpAdapter {
    #[tracing::instrument(skip(self))]
    async fn search_playlists(
        &self,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> ApiResult<SearchPage> {
        let client = &self.client;
        let response = self
            .call("search_playlists", move |token| {
                client.search_playlists(token, query, limit, offset)
            })
            .await?;

        Ok(SearchPage {
            has_more: response.playlists.next.is_some(),
            fetched: response.playlists.items.len() as u32,
            // Search results contain nulls for playlists that were removed
            items: response
                .playlists
                .items
                .into_iter()
                .flatten()
                .map(summary_from_simplified)
                .collect(),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn playlist_snapshot_id(&self, playlist_id: &str) -> ApiResult<String> {
        let client = &self.client;
        let snapshot = self
            .call("playlist_snapshot_id", move |token| {
                client.playlist_snapshot(token, playlist_id)
            })
            .await?;
        Ok(snapshot.snapshot_id)
    }

    #[tracing::instrument(skip(self))]
    async fn playlist_track_ids(
        &self,
        playlist_id: &str,
        offset: u32,
        limit: u32,
    ) -> ApiResult<TrackIdPage> {
        let client = &self.client;
        let response = self
            .call("playlist_track_ids", move |token| {
                client.playlist_tracks(token, playlist_id, offset, limit)
            })
            .await?;

        Ok(TrackIdPage {
            has_more: response.next.is_some(),
            track_ids: response
                .items
                .into_iter()
                .filter_map(|item| item.track.and_then(|track| track.id))
                .collect(),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn playlist_details(&self, playlist_id: &str) -> ApiResult<PlaylistDetails> {
        let client = &self.client;
        let playlist = self
            .call("playlist_details", move |token| {
                client.playlist(token, playlist_id)
            })
            .await?;
        Ok(details_from_full(playlist))
    }
}

fn playlist_url(id: &str, urls: ExternalUrls) -> String {
    urls.spotify
        .unwrap_or_else(|| format!("https://open.spotify.com/playlist/{id}"))
}

fn owner_fields(owner: Option<PlaylistOwner>) -> (Option<String>, Option<String>) {
    match owner {
        Some(owner) => (owner.display_name, owner.external_urls.spotify),
        None => (None, None),
    }
}

/// Spotify returns an empty string rather than null for missing descriptions.
fn non_empty(description: Option<String>) -> Option<String> {
    description.filter(|d| !d.trim().is_empty())
}

fn summary_from_simplified(playlist: SimplifiedPlaylist) -> PlaylistSummary {
    let (owner_name, owner_url) = owner_fields(playlist.owner);
    PlaylistSummary {
        url: playlist_url(&playlist.id, playlist.external_urls),
        id: playlist.id,
        name: playlist.name,
        owner_name,
        owner_url,
        description: non_empty(playlist.description),
        snapshot_id: playlist.snapshot_id,
    }
}

fn details_from_full(playlist: FullPlaylist) -> PlaylistDetails {
    let (owner_name, owner_url) = owner_fields(playlist.owner);
    PlaylistDetails {
        followers: playlist.followers.and_then(|f| f.total).unwrap_or(0),
        summary: PlaylistSummary {
            url: playlist_url(&playlist.id, playlist.external_urls),
            id: playlist.id,
            name: playlist.name,
            owner_name,
            owner_url,
            description: non_empty(playlist.description),
            snapshot_id: playlist.snapshot_id,
        },
    }
}
