use async_graphql::{Context, Object, SimpleObject};
use chrono::{DateTime, Utc};

use crate::entities;
use crate::http_server::graphql::{context::get_db, timestamp};
use crate::http_server::graphql_error::GraphqlResult;
use crate::services::appearance::{AppearanceRow, AppearanceService};
use crate::services::playlist::PlaylistService;
use crate::services::track::TrackService;

#[derive(Debug, Clone, SimpleObject)]
pub struct Track {
    pub id: i64,
    pub spotify_id: String,
    pub name: String,
    pub artist_name: Option<String>,
    pub spotify_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<entities::track::Model> for Track {
    type Error = color_eyre::Report;

    fn try_from(track: entities::track::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            created_at: timestamp(track.created_at)?,
            id: track.id,
            spotify_id: track.spotify_id,
            name: track.name,
            artist_name: track.artist_name,
            spotify_url: track.spotify_url,
        })
    }
}

#[derive(Debug, Clone, SimpleObject)]
pub struct Playlist {
    pub id: i64,
    pub spotify_id: String,
    pub name: String,
    pub url: String,
    pub owner_name: Option<String>,
    pub owner_url: Option<String>,
    pub followers: i64,
    pub description: Option<String>,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<entities::playlist::Model> for Playlist {
    type Error = color_eyre::Report;

    fn try_from(playlist: entities::playlist::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            last_scanned_at: playlist.last_scanned_at.map(timestamp).transpose()?,
            updated_at: timestamp(playlist.updated_at)?,
            id: playlist.id,
            spotify_id: playlist.spotify_id,
            name: playlist.name,
            url: playlist.url,
            owner_name: playlist.owner_name,
            owner_url: playlist.owner_url,
            followers: playlist.followers,
            description: playlist.description,
        })
    }
}

/// A dashboard line: which curator's playlist carries which track.
#[derive(Debug, Clone, SimpleObject)]
pub struct Appearance {
    pub id: i64,
    pub track_name: String,
    pub track_spotify_id: String,
    pub artist_name: Option<String>,
    pub playlist_name: String,
    pub playlist_url: String,
    pub curator: Option<String>,
    pub curator_url: Option<String>,
    pub contact: Option<String>,
    pub curation_status: Option<String>,
    pub followers: i64,
    pub description: Option<String>,
    pub state: String,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AppearanceRow> for Appearance {
    type Error = color_eyre::Report;

    fn try_from(row: AppearanceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            added_at: timestamp(row.added_at)?,
            updated_at: timestamp(row.updated_at)?,
            id: row.id,
            track_name: row.track_name,
            track_spotify_id: row.track_spotify_id,
            artist_name: row.artist_name,
            playlist_name: row.playlist_name,
            playlist_url: row.playlist_url,
            curator: row.curator,
            curator_url: row.curator_url,
            contact: row.contact,
            curation_status: row.curation_status,
            followers: row.followers,
            description: row.description,
            state: row.state,
        })
    }
}

#[derive(Default)]
pub struct TrackerQuery;

#[Object]
impl TrackerQuery {
    async fn tracks(&self, ctx: &Context<'_>) -> GraphqlResult<Vec<Track>> {
        let tracks = TrackService::new(get_db(ctx)?).list().await?;
        Ok(tracks
            .into_iter()
            .map(Track::try_from)
            .collect::<color_eyre::Result<Vec<_>>>()?)
    }

    /// Known playlists, most followed first.
    async fn playlists(&self, ctx: &Context<'_>) -> GraphqlResult<Vec<Playlist>> {
        let playlists = PlaylistService::new(get_db(ctx)?).list().await?;
        Ok(playlists
            .into_iter()
            .map(Playlist::try_from)
            .collect::<color_eyre::Result<Vec<_>>>()?)
    }

    /// Every appearance, most recently updated first.
    async fn appearances(&self, ctx: &Context<'_>) -> GraphqlResult<Vec<Appearance>> {
        let rows = AppearanceService::new(get_db(ctx)?)
            .dashboard_rows()
            .await?;
        Ok(rows
            .into_iter()
            .map(Appearance::try_from)
            .collect::<color_eyre::Result<Vec<_>>>()?)
    }
}
