use std::collections::HashMap;
use std::sync::Arc;

use color_eyre::eyre::{OptionExt, Result};
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;

use crate::database::Database;
use crate::entities;
use crate::entities::appearance::AppearanceState;

/// One line of the appearance dashboard and its export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppearanceRow {
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
    pub added_at: i64,
    pub updated_at: i64,
}

/// Changes to apply to an appearance. `None` leaves a field untouched.
#[derive(Debug, Default)]
pub struct AppearanceUpdate {
    /// `Some(None)` clears the contact
    pub contact: Option<Option<String>>,
    pub state: Option<AppearanceState>,
    /// `Some(None)` clears the curator follow-up
    pub curation_status: Option<Option<String>>,
}

/// Blank hand-typed text is stored as NULL.
pub(crate) fn clean_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub struct AppearanceService {
    db: Arc<Database>,
}

impl AppearanceService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record that a playlist listing contained the track.
    ///
    /// Returns `true` when a new appearance was created. An existing one is
    /// marked confirmed and its `updated_at` bumped. Contact and curation
    /// status belong to the curator and are left as they are.
    pub async fn upsert_confirmed(&self, track_id: i64, playlist_id: i64) -> Result<bool> {
        let existing = entities::appearance::Entity::find()
            .filter(
                Condition::all()
                    .add(entities::appearance::Column::TrackId.eq(track_id))
                    .add(entities::appearance::Column::PlaylistId.eq(playlist_id)),
            )
            .one(&self.db.conn)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to check existing appearance: {}", e))?;

        match existing {
            Some(existing) => {
                let mut appearance: entities::appearance::ActiveModel = existing.into();
                appearance.state = Set(AppearanceState::Confirmed);
                appearance
                    .update(&self.db.conn)
                    .await
                    .map_err(|e| color_eyre::eyre::eyre!("Failed to update appearance: {}", e))?;
                Ok(false)
            }
            None => {
                let appearance = entities::appearance::ActiveModel {
                    track_id: Set(track_id),
                    playlist_id: Set(playlist_id),
                    state: Set(AppearanceState::Confirmed),
                    contact: Set(None),
                    curation_status: Set(None),
                    ..entities::appearance::ActiveModel::new()
                };
                appearance
                    .insert(&self.db.conn)
                    .await
                    .map_err(|e| color_eyre::eyre::eyre!("Failed to create appearance: {}", e))?;
                Ok(true)
            }
        }
    }

    pub async fn update(
        &self,
        appearance_id: i64,
        changes: AppearanceUpdate,
    ) -> Result<entities::appearance::Model> {
        let existing = entities::appearance::Entity::find_by_id(appearance_id)
            .one(&self.db.conn)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to fetch appearance: {}", e))?
            .ok_or_eyre("Appearance not found")?;

        let mut appearance: entities::appearance::ActiveModel = existing.into();
        if let Some(contact) = changes.contact {
            appearance.contact = Set(clean_text(contact));
        }
        if let Some(curation_status) = changes.curation_status {
            appearance.curation_status = Set(clean_text(curation_status));
        }
        if let Some(state) = changes.state {
            appearance.state = Set(state);
        }

        appearance
            .update(&self.db.conn)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to update appearance: {}", e))
    }

    /// Every appearance joined with its track and playlist, most recently updated first.
    pub async fn dashboard_rows(&self) -> Result<Vec<AppearanceRow>> {
        let appearances = entities::appearance::Entity::find()
            .order_by_desc(entities::appearance::Column::UpdatedAt)
            .order_by_desc(entities::appearance::Column::Id)
            .all(&self.db.conn)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to list appearances: {}", e))?;

        let track_ids: Vec<i64> = appearances.iter().map(|a| a.track_id).collect();
        let playlist_ids: Vec<i64> = appearances.iter().map(|a| a.playlist_id).collect();

        let tracks: HashMap<i64, entities::track::Model> = entities::track::Entity::find()
            .filter(entities::track::Column::Id.is_in(track_ids))
            .all(&self.db.conn)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to fetch tracks: {}", e))?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        let playlists: HashMap<i64, entities::playlist::Model> =
            entities::playlist::Entity::find()
                .filter(entities::playlist::Column::Id.is_in(playlist_ids))
                .all(&self.db.conn)
                .await
                .map_err(|e| color_eyre::eyre::eyre!("Failed to fetch playlists: {}", e))?
                .into_iter()
                .map(|p| (p.id, p))
                .collect();

        let rows = appearances
            .into_iter()
            .filter_map(|appearance| {
                // Both sides cascade on delete, so a miss means a concurrent delete
                let track = tracks.get(&appearance.track_id)?;
                let playlist = playlists.get(&appearance.playlist_id)?;
                Some(AppearanceRow {
                    id: appearance.id,
                    track_name: track.name.clone(),
                    track_spotify_id: track.spotify_id.clone(),
                    artist_name: track.artist_name.clone(),
                    playlist_name: playlist.name.clone(),
                    playlist_url: playlist.url.clone(),
                    curator: playlist.owner_name.clone(),
                    curator_url: playlist.owner_url.clone(),
                    contact: appearance.contact,
                    curation_status: appearance.curation_status,
                    followers: playlist.followers,
                    description: playlist.description.clone(),
                    state: appearance.state.as_str().to_string(),
                    added_at: appearance.added_at,
                    updated_at: appearance.updated_at,
                })
            })
            .collect();

        Ok(rows)
    }
}
