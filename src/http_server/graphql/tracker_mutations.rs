use async_graphql::{Context, Enum, MaybeUndefined, Object};

use crate::entities::appearance::AppearanceState;
use crate::http_server::graphql::context::get_db;
use crate::http_server::graphql::tracker_queries::Track;
use crate::http_server::graphql_error::{GraphqlError, GraphqlResult};
use crate::services::appearance::{AppearanceService, AppearanceUpdate};
use crate::services::track::TrackService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
pub enum AppearanceStateInput {
    Discovered,
    Confirmed,
}

impl From<AppearanceStateInput> for AppearanceState {
    fn from(state: AppearanceStateInput) -> Self {
        match state {
            AppearanceStateInput::Discovered => AppearanceState::Discovered,
            AppearanceStateInput::Confirmed => AppearanceState::Confirmed,
        }
    }
}

#[derive(Default)]
pub struct TrackerMutation;

#[Object]
impl TrackerMutation {
    /// Start looking for a track in public playlists.
    async fn add_track(
        &self,
        ctx: &Context<'_>,
        spotify_id: String,
        name: String,
        artist_name: Option<String>,
    ) -> GraphqlResult<Track> {
        if spotify_id.trim().is_empty() || name.trim().is_empty() {
            return Err(GraphqlError::InvalidInput(
                "spotifyId and name must not be empty".to_string(),
            )
            .into());
        }
        let track = TrackService::new(get_db(ctx)?)
            .create(spotify_id, name, artist_name)
            .await?;
        Ok(Track::try_from(track)?)
    }

    async fn delete_track(&self, ctx: &Context<'_>, id: i64) -> GraphqlResult<bool> {
        TrackService::new(get_db(ctx)?).delete(id).await?;
        Ok(true)
    }

    /// Edit the hand-maintained fields of an appearance. Passing `null` for
    /// `contact` or `curationStatus` clears it.
    async fn update_appearance(
        &self,
        ctx: &Context<'_>,
        id: i64,
        contact: MaybeUndefined<String>,
        state: Option<AppearanceStateInput>,
        curation_status: MaybeUndefined<String>,
    ) -> GraphqlResult<bool> {
        let changes = AppearanceUpdate {
            contact: field_change(contact),
            state: state.map(AppearanceState::from),
            curation_status: field_change(curation_status),
        };
        AppearanceService::new(get_db(ctx)?)
            .update(id, changes)
            .await?;
        Ok(true)
    }
}

fn field_change(value: MaybeUndefined<String>) -> Option<Option<String>> {
    match value {
        MaybeUndefined::Undefined => None,
        MaybeUndefined::Null => Some(None),
        MaybeUndefined::Value(value) => Some(Some(value)),
    }
}
