use std::collections::BTreeSet;
use std::sync::Arc;

use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};

use crate::database::Database;
use crate::entities;
use crate::entities::playlist_membership_cache::TrackIdSet;
use crate::ports::spotify::{SharedSpotifyApi, SpotifyApiError};

/// Page size for the playlist track listing endpoint (the API maximum).
pub const TRACK_PAGE_SIZE: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error(transparent)]
    Api(#[from] SpotifyApiError),
    #[error("Failed to access membership cache: {0}")]
    Database(#[from] sea_orm::DbErr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipSource {
    /// Answered from the cache after a snapshot probe
    Cache,
    /// The full listing was fetched
    Fetched,
}

#[derive(Debug, Clone)]
pub struct PlaylistMembership {
    pub track_ids: BTreeSet<String>,
    pub source: MembershipSource,
    /// Snapshot the track ids belong to, when known
    pub snapshot_id: Option<String>,
}

impl PlaylistMembership {
    pub fn contains(&self, track_id: &str) -> bool {
        self.track_ids.contains(track_id)
    }
}

/// Answers "which tracks are in this playlist" with as few listing fetches
/// as possible.
///
/// Playlists we already store are probed for their snapshot id first. The
/// cached track ids are reused while the snapshot is unchanged; otherwise the
/// listing is fetched again and replaces the cache entry. Playlists we don't
/// store yet are always fetched and never cached.
pub struct MembershipService {
    db: Arc<Database>,
    api: SharedSpotifyApi,
}

impl MembershipService {
    pub fn new(db: Arc<Database>, api: SharedSpotifyApi) -> Self {
        Self { db, api }
    }

    #[tracing::instrument(skip(self))]
    pub async fn membership(
        &self,
        playlist_spotify_id: &str,
    ) -> Result<PlaylistMembership, MembershipError> {
        let playlist = entities::playlist::Entity::find()
            .filter(entities::playlist::Column::SpotifyId.eq(playlist_spotify_id))
            .one(&self.db.conn)
            .await?;

        let Some(playlist) = playlist else {
            tracing::debug!("Playlist not stored yet, fetching full listing");
            return Ok(PlaylistMembership {
                track_ids: self.fetch_track_ids(playlist_spotify_id).await?,
                source: MembershipSource::Fetched,
                snapshot_id: None,
            });
        };

        let snapshot_id = match self.api.playlist_snapshot_id(playlist_spotify_id).await {
            Ok(snapshot_id) => snapshot_id,
            Err(e) => {
                tracing::warn!(error = %e, "Snapshot probe failed, fetching full listing");
                return Ok(PlaylistMembership {
                    track_ids: self.fetch_track_ids(playlist_spotify_id).await?,
                    source: MembershipSource::Fetched,
                    snapshot_id: None,
                });
            }
        };

        let cached = entities::playlist_membership_cache::Entity::find()
            .filter(entities::playlist_membership_cache::Column::PlaylistId.eq(playlist.id))
            .one(&self.db.conn)
            .await?;

        if let Some(cached) = cached
            && cached.snapshot_id == snapshot_id
        {
            tracing::debug!(%snapshot_id, "Snapshot unchanged, using cached track ids");
            return Ok(PlaylistMembership {
                track_ids: cached.track_ids.0,
                source: MembershipSource::Cache,
                snapshot_id: Some(snapshot_id),
            });
        }

        let track_ids = self.fetch_track_ids(playlist_spotify_id).await?;
        self.store(playlist, &snapshot_id, &track_ids).await?;
        tracing::debug!(
            %snapshot_id,
            tracks = track_ids.len(),
            "Cached track ids for new snapshot"
        );

        Ok(PlaylistMembership {
            track_ids,
            source: MembershipSource::Fetched,
            snapshot_id: Some(snapshot_id),
        })
    }

    async fn fetch_track_ids(
        &self,
        playlist_spotify_id: &str,
    ) -> Result<BTreeSet<String>, SpotifyApiError> {
        let mut track_ids = BTreeSet::new();
        let mut offset = 0;
        loop {
            let page = self
                .api
                .playlist_track_ids(playlist_spotify_id, offset, TRACK_PAGE_SIZE)
                .await?;
            track_ids.extend(page.track_ids);
            if !page.has_more {
                break;
            }
            offset += TRACK_PAGE_SIZE;
        }
        Ok(track_ids)
    }

    /// Record the new snapshot on the playlist and replace its cache entry.
    async fn store(
        &self,
        playlist: entities::playlist::Model,
        snapshot_id: &str,
        track_ids: &BTreeSet<String>,
    ) -> Result<(), sea_orm::DbErr> {
        let txn = self.db.conn.begin().await?;

        let playlist_id = playlist.id;
        if playlist.snapshot_id.as_deref() != Some(snapshot_id) {
            let mut playlist: entities::playlist::ActiveModel = playlist.into();
            playlist.snapshot_id = Set(Some(snapshot_id.to_string()));
            playlist.update(&txn).await?;
        }

        let existing = entities::playlist_membership_cache::Entity::find()
            .filter(entities::playlist_membership_cache::Column::PlaylistId.eq(playlist_id))
            .one(&txn)
            .await?;

        match existing {
            Some(existing) => {
                let mut entry: entities::playlist_membership_cache::ActiveModel = existing.into();
                entry.snapshot_id = Set(snapshot_id.to_string());
                entry.track_ids = Set(TrackIdSet(track_ids.clone()));
                entry.update(&txn).await?;
            }
            None => {
                let entry = entities::playlist_membership_cache::ActiveModel {
                    playlist_id: Set(playlist_id),
                    snapshot_id: Set(snapshot_id.to_string()),
                    track_ids: Set(TrackIdSet(track_ids.clone())),
                    ..entities::playlist_membership_cache::ActiveModel::new()
                };
                entry.insert(&txn).await?;
            }
        }

        txn.commit().await
    }
}
