use std::sync::Arc;

use sea_orm::{ActiveModelBehavior, ActiveModelTrait, Set};

use crate::database::Database;
use crate::entities;
use crate::ports::spotify::{PlaylistDetails, PlaylistSummary};

pub async fn test_db() -> Arc<Database> {
    Arc::new(
        Database::open_in_memory()
            .await
            .expect("Failed to open in-memory test database"),
    )
}

pub async fn insert_track(
    db: &Database,
    spotify_id: &str,
    name: &str,
    artist_name: Option<&str>,
) -> entities::track::Model {
    let track = entities::track::ActiveModel {
        spotify_id: Set(spotify_id.into()),
        name: Set(name.into()),
        artist_name: Set(artist_name.map(Into::into)),
        spotify_url: Set(None),
        ..entities::track::ActiveModel::new()
    };
    track.insert(&db.conn).await.unwrap()
}

pub async fn insert_playlist(
    db: &Database,
    spotify_id: &str,
    snapshot_id: Option<&str>,
) -> entities::playlist::Model {
    let playlist = entities::playlist::ActiveModel {
        spotify_id: Set(spotify_id.into()),
        name: Set(format!("Playlist {spotify_id}")),
        url: Set(format!("https://open.spotify.com/playlist/{spotify_id}")),
        owner_name: Set(None),
        owner_url: Set(None),
        description: Set(None),
        snapshot_id: Set(snapshot_id.map(Into::into)),
        last_scanned_at: Set(None),
        ..entities::playlist::ActiveModel::new()
    };
    playlist.insert(&db.conn).await.unwrap()
}

pub fn summary(id: &str, name: &str) -> PlaylistSummary {
    PlaylistSummary {
        id: id.into(),
        name: name.into(),
        url: format!("https://open.spotify.com/playlist/{id}"),
        owner_name: Some("curator".into()),
        owner_url: Some("https://open.spotify.com/user/curator".into()),
        description: None,
        snapshot_id: Some(format!("{id}-snap")),
    }
}

pub fn details(id: &str, followers: i64) -> PlaylistDetails {
    PlaylistDetails {
        summary: summary(id, &format!("Playlist {id}")),
        followers,
    }
}
