use std::sync::Arc;

use color_eyre::eyre::{OptionExt, Result};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::database::Database;
use crate::entities;
use crate::ports::spotify::{PlaylistDetails, PlaylistSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Updated,
}

pub struct PlaylistService {
    db: Arc<Database>,
}

impl PlaylistService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or update a playlist from a search result, keyed by its Spotify id.
    ///
    /// Search results carry no follower count, so the stored count is left alone.
    pub async fn upsert_from_summary(
        &self,
        summary: &PlaylistSummary,
        scanned_at: Option<i64>,
    ) -> Result<(entities::playlist::Model, Upserted)> {
        self.upsert(summary, None, scanned_at).await
    }

    pub async fn upsert_from_details(
        &self,
        details: &PlaylistDetails,
    ) -> Result<(entities::playlist::Model, Upserted)> {
        self.upsert(&details.summary, Some(details.followers), None)
            .await
    }

    async fn upsert(
        &self,
        summary: &PlaylistSummary,
        followers: Option<i64>,
        scanned_at: Option<i64>,
    ) -> Result<(entities::playlist::Model, Upserted)> {
        // Discovery and scan may reach the same playlist at once, so creation
        // goes through the unique key instead of a lookup
        let fresh = entities::playlist::ActiveModel {
            spotify_id: Set(summary.id.clone()),
            name: Set(summary.name.clone()),
            url: Set(summary.url.clone()),
            owner_name: Set(summary.owner_name.clone()),
            owner_url: Set(summary.owner_url.clone()),
            followers: Set(followers.unwrap_or(0)),
            description: Set(summary.description.clone()),
            snapshot_id: Set(summary.snapshot_id.clone()),
            last_scanned_at: Set(scanned_at),
            ..entities::playlist::ActiveModel::new()
        };
        let inserted = entities::playlist::Entity::insert(fresh)
            .on_conflict(
                OnConflict::column(entities::playlist::Column::SpotifyId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db.conn)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to save playlist {}: {}", summary.id, e))?;

        let existing = self
            .find_by_spotify_id(&summary.id)
            .await?
            .ok_or_eyre("Playlist disappeared while saving it")?;
        if inserted > 0 {
            return Ok((existing, Upserted::Created));
        }

        let mut playlist: entities::playlist::ActiveModel = existing.into();
        playlist.name = Set(summary.name.clone());
        playlist.url = Set(summary.url.clone());
        playlist.owner_name = Set(summary.owner_name.clone());
        playlist.owner_url = Set(summary.owner_url.clone());
        playlist.description = Set(summary.description.clone());
        if let Some(snapshot_id) = &summary.snapshot_id {
            playlist.snapshot_id = Set(Some(snapshot_id.clone()));
        }
        if let Some(followers) = followers {
            playlist.followers = Set(followers);
        }
        if let Some(scanned_at) = scanned_at {
            playlist.last_scanned_at = Set(Some(scanned_at));
        }

        let model = playlist
            .update(&self.db.conn)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to save playlist {}: {}", summary.id, e))?;

        Ok((model, Upserted::Updated))
    }

    pub async fn find_by_spotify_id(
        &self,
        spotify_id: &str,
    ) -> Result<Option<entities::playlist::Model>> {
        entities::playlist::Entity::find()
            .filter(entities::playlist::Column::SpotifyId.eq(spotify_id))
            .one(&self.db.conn)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to find playlist: {}", e))
    }

    /// All stored playlists, most followed first.
    pub async fn list(&self) -> Result<Vec<entities::playlist::Model>> {
        entities::playlist::Entity::find()
            .order_by_desc(entities::playlist::Column::Followers)
            .order_by_asc(entities::playlist::Column::Name)
            .all(&self.db.conn)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to list playlists: {}", e))
    }
}
