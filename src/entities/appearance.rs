use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue::Set, Iterable};

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum AppearanceState {
    /// Recorded without checking the playlist contents (manual entry)
    #[sea_orm(string_value = "discovered")]
    Discovered,
    /// The playlist listing was checked and contains the track
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
}

impl AppearanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppearanceState::Discovered => "discovered",
            AppearanceState::Confirmed => "confirmed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::iter().find(|state| state.as_str() == name)
    }
}

/// A track appearing in a playlist. Unique per (track, playlist).
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "appearance")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub track_id: i64,
    pub playlist_id: i64,
    pub state: AppearanceState,
    /// Curator contact, filled in by hand
    pub contact: Option<String>,
    /// Follow-up state kept by hand. Scans only ever touch `state`.
    pub curation_status: Option<String>,
    pub added_at: i64,
    pub updated_at: i64,

    #[sea_orm(belongs_to, from = "track_id", to = "id")]
    pub track: HasOne<super::track::Entity>,
    #[sea_orm(belongs_to, from = "playlist_id", to = "id")]
    pub playlist: HasOne<super::playlist::Entity>,
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    fn new() -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            added_at: Set(now),
            updated_at: Set(now),
            ..ActiveModelTrait::default()
        }
    }

    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, sea_orm::DbErr>
    where
        C: ConnectionTrait,
    {
        if !insert {
            self.updated_at = Set(chrono::Utc::now().timestamp());
        }
        Ok(self)
    }
}
