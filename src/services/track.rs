use std::sync::Arc;

use color_eyre::eyre::{OptionExt, Result, bail};
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::database::Database;
use crate::entities;

pub struct TrackService {
    db: Arc<Database>,
}

impl TrackService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Start tracking a Spotify track. The artist name is used as the search hint by scans.
    pub async fn create(
        &self,
        spotify_id: String,
        name: String,
        artist_name: Option<String>,
    ) -> Result<entities::track::Model> {
        let spotify_id = spotify_id.trim().to_string();
        let name = name.trim().to_string();
        if spotify_id.is_empty() || name.is_empty() {
            bail!("A track needs both a Spotify id and a name");
        }

        let existing = entities::track::Entity::find()
            .filter(entities::track::Column::SpotifyId.eq(&spotify_id))
            .one(&self.db.conn)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to check existing track: {}", e))?;
        if existing.is_some() {
            bail!("Track {} is already tracked", spotify_id);
        }

        let track = entities::track::ActiveModel {
            spotify_url: Set(Some(format!("https://open.spotify.com/track/{spotify_id}"))),
            spotify_id: Set(spotify_id),
            name: Set(name),
            artist_name: Set(artist_name
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())),
            ..entities::track::ActiveModel::new()
        };

        track
            .insert(&self.db.conn)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to create track: {}", e))
    }

    pub async fn list(&self) -> Result<Vec<entities::track::Model>> {
        entities::track::Entity::find()
            .order_by_asc(entities::track::Column::Name)
            .all(&self.db.conn)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to list tracks: {}", e))
    }

    pub async fn get(&self, track_id: i64) -> Result<entities::track::Model> {
        entities::track::Entity::find_by_id(track_id)
            .one(&self.db.conn)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to fetch track: {}", e))?
            .ok_or_eyre("Track not found")
    }

    /// Stop tracking a track. Its appearances are removed with it.
    pub async fn delete(&self, track_id: i64) -> Result<()> {
        let track = self.get(track_id).await?;
        track
            .delete(&self.db.conn)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to delete track: {}", e))?;
        Ok(())
    }
}
