use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use color_eyre::eyre::{Context, Result};
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseTransaction, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::database::Database;
use crate::entities;
use crate::entities::appearance::AppearanceState;
use crate::services::appearance::clean_text;

/// How imported values are merged into rows that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Every non-empty imported value replaces the stored one
    Overwrite,
    /// Only empty stored fields are filled in
    #[default]
    Complete,
}

impl ImportMode {
    pub fn name(&self) -> &'static str {
        match self {
            ImportMode::Overwrite => "overwrite",
            ImportMode::Complete => "complete",
        }
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ImportMode {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [ImportMode::Overwrite, ImportMode::Complete]
            .into_iter()
            .find(|mode| mode.name() == s)
            .ok_or_else(|| ImportError::UnknownMode(s.to_string()))
    }
}

/// Problems with the imported document itself. Nothing is written when one occurs.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Unknown import mode '{0}', expected one of: overwrite, complete")]
    UnknownMode(String),
    #[error("Row {row}: unknown state '{state}', expected one of: discovered, confirmed")]
    UnknownState { row: usize, state: String },
    #[error("Row {row}: a track name or Spotify id is required")]
    MissingTrack { row: usize },
    #[error("Row {row}: a playlist name or URL is required")]
    MissingPlaylist { row: usize },
}

/// One appearance as found in an export. Columns the import does not use,
/// like `id` and `updated_at`, are ignored so an export can be fed back in.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppearanceImportRow {
    pub track_name: Option<String>,
    pub track_spotify_id: Option<String>,
    pub artist_name: Option<String>,
    pub playlist_name: Option<String>,
    pub playlist_url: Option<String>,
    pub curator: Option<String>,
    pub curator_url: Option<String>,
    pub followers: Option<i64>,
    pub description: Option<String>,
    pub contact: Option<String>,
    pub curation_status: Option<String>,
    pub state: Option<String>,
    pub added_at: Option<i64>,
}

impl AppearanceImportRow {
    fn playlist(&self) -> PlaylistImportRow {
        PlaylistImportRow {
            name: self.playlist_name.clone(),
            url: self.playlist_url.clone(),
            curator: self.curator.clone(),
            curator_url: self.curator_url.clone(),
            followers: self.followers,
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlaylistImportRow {
    pub name: Option<String>,
    pub url: Option<String>,
    pub curator: Option<String>,
    pub curator_url: Option<String>,
    pub followers: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Rows that created a new record
    pub imported: u32,
    /// Rows that changed an existing record
    pub updated: u32,
    /// The counts are a preview and nothing was saved
    pub dry_run: bool,
}

pub struct ImportService {
    db: Arc<Database>,
}

impl ImportService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Import appearances, creating missing tracks and playlists on the way.
    ///
    /// Runs in a single transaction. With `dry_run` the transaction is rolled
    /// back so the summary previews what a real import would do.
    #[tracing::instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn import_appearances(
        &self,
        rows: Vec<AppearanceImportRow>,
        mode: ImportMode,
        dry_run: bool,
    ) -> Result<ImportSummary> {
        let txn = self
            .db
            .conn
            .begin()
            .await
            .wrap_err("Failed to begin transaction")?;
        let mut summary = ImportSummary {
            dry_run,
            ..Default::default()
        };

        for (index, row) in rows.iter().enumerate() {
            let row_number = index + 1;
            let state = match clean_text(row.state.clone()) {
                Some(name) => Some(AppearanceState::from_name(&name).ok_or(
                    ImportError::UnknownState {
                        row: row_number,
                        state: name,
                    },
                )?),
                None => None,
            };
            let track = find_or_create_track(&txn, row, row_number).await?;
            let (playlist, _) = find_or_create_playlist(&txn, &row.playlist(), row_number).await?;

            let existing = entities::appearance::Entity::find()
                .filter(
                    Condition::all()
                        .add(entities::appearance::Column::TrackId.eq(track.id))
                        .add(entities::appearance::Column::PlaylistId.eq(playlist.id)),
                )
                .one(&txn)
                .await
                .wrap_err("Failed to check existing appearance")?;

            let Some(existing) = existing else {
                let mut appearance = entities::appearance::ActiveModel {
                    track_id: Set(track.id),
                    playlist_id: Set(playlist.id),
                    state: Set(state.unwrap_or(AppearanceState::Discovered)),
                    contact: Set(clean_text(row.contact.clone())),
                    curation_status: Set(clean_text(row.curation_status.clone())),
                    ..entities::appearance::ActiveModel::new()
                };
                if let Some(added_at) = row.added_at {
                    appearance.added_at = Set(added_at);
                }
                appearance
                    .insert(&txn)
                    .await
                    .wrap_err("Failed to create appearance")?;
                summary.imported += 1;
                continue;
            };

            let contact = clean_text(row.contact.clone());
            let curation_status = clean_text(row.curation_status.clone());
            let mut appearance: entities::appearance::ActiveModel = existing.clone().into();
            let changed = match mode {
                ImportMode::Overwrite => {
                    appearance.contact = Set(contact.or(existing.contact));
                    appearance.curation_status = Set(curation_status.or(existing.curation_status));
                    appearance.state = Set(state.unwrap_or(existing.state));
                    appearance.added_at = Set(row.added_at.unwrap_or(existing.added_at));
                    true
                }
                ImportMode::Complete => {
                    let mut changed = false;
                    if existing.contact.is_none() && contact.is_some() {
                        appearance.contact = Set(contact);
                        changed = true;
                    }
                    if existing.curation_status.is_none() && curation_status.is_some() {
                        appearance.curation_status = Set(curation_status);
                        changed = true;
                    }
                    changed
                }
            };
            if changed {
                appearance
                    .update(&txn)
                    .await
                    .wrap_err("Failed to update appearance")?;
                summary.updated += 1;
            }
        }

        finish(txn, dry_run).await?;
        tracing::info!(
            imported = summary.imported,
            updated = summary.updated,
            %mode,
            dry_run,
            "Imported appearances"
        );
        Ok(summary)
    }

    /// Import playlist metadata. Same transaction and preview rules as
    /// [`ImportService::import_appearances`].
    #[tracing::instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn import_playlists(
        &self,
        rows: Vec<PlaylistImportRow>,
        mode: ImportMode,
        dry_run: bool,
    ) -> Result<ImportSummary> {
        let txn = self
            .db
            .conn
            .begin()
            .await
            .wrap_err("Failed to begin transaction")?;
        let mut summary = ImportSummary {
            dry_run,
            ..Default::default()
        };

        for (index, row) in rows.iter().enumerate() {
            let (existing, created) = find_or_create_playlist(&txn, row, index + 1).await?;
            if created {
                summary.imported += 1;
                continue;
            }

            let url = clean_text(row.url.clone());
            let owner_name = clean_text(row.curator.clone());
            let owner_url = clean_text(row.curator_url.clone());
            let followers = row.followers.filter(|f| *f > 0);
            let description = clean_text(row.description.clone());

            let mut playlist: entities::playlist::ActiveModel = existing.clone().into();
            let changed = match mode {
                ImportMode::Overwrite => {
                    playlist.url = Set(url.unwrap_or(existing.url));
                    playlist.owner_name = Set(owner_name.or(existing.owner_name));
                    playlist.owner_url = Set(owner_url.or(existing.owner_url));
                    playlist.followers = Set(followers.unwrap_or(existing.followers));
                    playlist.description = Set(description.or(existing.description));
                    true
                }
                ImportMode::Complete => {
                    let mut changed = false;
                    if let Some(url) = url.filter(|_| existing.url.is_empty()) {
                        playlist.url = Set(url);
                        changed = true;
                    }
                    if existing.owner_name.is_none() && owner_name.is_some() {
                        playlist.owner_name = Set(owner_name);
                        changed = true;
                    }
                    if existing.owner_url.is_none() && owner_url.is_some() {
                        playlist.owner_url = Set(owner_url);
                        changed = true;
                    }
                    if let Some(followers) = followers.filter(|_| existing.followers == 0) {
                        playlist.followers = Set(followers);
                        changed = true;
                    }
                    if existing.description.is_none() && description.is_some() {
                        playlist.description = Set(description);
                        changed = true;
                    }
                    changed
                }
            };
            if changed {
                playlist
                    .update(&txn)
                    .await
                    .wrap_err("Failed to update playlist")?;
                summary.updated += 1;
            }
        }

        finish(txn, dry_run).await?;
        tracing::info!(
            imported = summary.imported,
            updated = summary.updated,
            %mode,
            dry_run,
            "Imported playlists"
        );
        Ok(summary)
    }
}

async fn finish(txn: DatabaseTransaction, dry_run: bool) -> Result<()> {
    if dry_run {
        txn.rollback()
            .await
            .wrap_err("Failed to roll back import preview")
    } else {
        txn.commit().await.wrap_err("Failed to commit import")
    }
}

/// Placeholder id for records imported without a Spotify id
fn temp_id(name: &str) -> String {
    format!("temp_{}", name.chars().take(64).collect::<String>())
}

/// The playlist id in an `open.spotify.com` link, with or without a locale prefix.
fn playlist_id_from_url(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    if url.host_str() != Some("open.spotify.com") {
        return None;
    }
    let mut segments = url.path_segments()?;
    while let Some(segment) = segments.next() {
        if segment == "playlist" {
            return segments
                .next()
                .filter(|id| !id.is_empty())
                .map(str::to_string);
        }
    }
    None
}

/// Match by Spotify id first, then by name.
async fn find_or_create_track(
    txn: &impl ConnectionTrait,
    row: &AppearanceImportRow,
    row_number: usize,
) -> Result<entities::track::Model> {
    let given_id = clean_text(row.track_spotify_id.clone());
    let name = clean_text(row.track_name.clone())
        .or_else(|| given_id.clone())
        .ok_or(ImportError::MissingTrack { row: row_number })?;
    let spotify_id = given_id.clone().unwrap_or_else(|| temp_id(&name));

    for condition in [
        entities::track::Column::SpotifyId.eq(spotify_id.as_str()),
        entities::track::Column::Name.eq(name.as_str()),
    ] {
        let found = entities::track::Entity::find()
            .filter(condition)
            .one(txn)
            .await
            .wrap_err("Failed to look up track")?;
        if let Some(track) = found {
            return Ok(track);
        }
    }

    let track = entities::track::ActiveModel {
        spotify_url: Set(given_id.map(|id| format!("https://open.spotify.com/track/{id}"))),
        spotify_id: Set(spotify_id),
        name: Set(name),
        artist_name: Set(clean_text(row.artist_name.clone())),
        ..entities::track::ActiveModel::new()
    };
    track
        .insert(txn)
        .await
        .wrap_err("Failed to create track")
}

/// Match by the id in the playlist URL first, then by name. Returns whether
/// the playlist had to be created.
async fn find_or_create_playlist(
    txn: &impl ConnectionTrait,
    row: &PlaylistImportRow,
    row_number: usize,
) -> Result<(entities::playlist::Model, bool)> {
    let url = clean_text(row.url.clone());
    let name = clean_text(row.name.clone())
        .or_else(|| url.clone())
        .ok_or(ImportError::MissingPlaylist { row: row_number })?;
    let spotify_id = url
        .as_deref()
        .and_then(playlist_id_from_url)
        .unwrap_or_else(|| temp_id(&name));

    for condition in [
        entities::playlist::Column::SpotifyId.eq(spotify_id.as_str()),
        entities::playlist::Column::Name.eq(name.as_str()),
    ] {
        let found = entities::playlist::Entity::find()
            .filter(condition)
            .one(txn)
            .await
            .wrap_err("Failed to look up playlist")?;
        if let Some(playlist) = found {
            return Ok((playlist, false));
        }
    }

    let playlist = entities::playlist::ActiveModel {
        spotify_id: Set(spotify_id),
        name: Set(name),
        url: Set(url.unwrap_or_default()),
        owner_name: Set(clean_text(row.curator.clone())),
        owner_url: Set(clean_text(row.curator_url.clone())),
        followers: Set(row.followers.unwrap_or(0).max(0)),
        description: Set(clean_text(row.description.clone())),
        snapshot_id: Set(None),
        last_scanned_at: Set(None),
        ..entities::playlist::ActiveModel::new()
    };
    let playlist = playlist
        .insert(txn)
        .await
        .wrap_err("Failed to create playlist")?;
    Ok((playlist, true))
}
