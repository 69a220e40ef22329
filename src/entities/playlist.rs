use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue::Set};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "playlist")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub spotify_id: String,
    pub name: String,
    pub url: String,
    pub owner_name: Option<String>,
    pub owner_url: Option<String>,
    pub followers: i64,
    pub description: Option<String>,
    /// Last snapshot id seen for this playlist. Changes whenever the contents change.
    pub snapshot_id: Option<String>,
    pub last_scanned_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,

    #[sea_orm(has_many)]
    pub appearances: HasMany<super::appearance::Entity>,
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    fn new() -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            followers: Set(0),
            created_at: Set(now),
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
