use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Tracks we want to find in playlists
        manager
            .create_table(
                Table::create()
                    .table("track")
                    .if_not_exists()
                    .col(
                        ColumnDef::new("id")
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new("spotify_id")
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new("name").string().not_null())
                    .col(ColumnDef::new("artist_name").string())
                    .col(ColumnDef::new("spotify_url").string())
                    .col(ColumnDef::new("created_at").big_integer().not_null())
                    .col(ColumnDef::new("updated_at").big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        // Playlists found through discovery or scan
        manager
            .create_table(
                Table::create()
                    .table("playlist")
                    .if_not_exists()
                    .col(
                        ColumnDef::new("id")
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new("spotify_id")
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new("name").string().not_null())
                    .col(ColumnDef::new("url").string().not_null())
                    .col(ColumnDef::new("owner_name").string())
                    .col(ColumnDef::new("owner_url").string())
                    .col(
                        ColumnDef::new("followers")
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new("description").text())
                    .col(ColumnDef::new("snapshot_id").string())
                    .col(ColumnDef::new("last_scanned_at").big_integer())
                    .col(ColumnDef::new("created_at").big_integer().not_null())
                    .col(ColumnDef::new("updated_at").big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        // Track <-> playlist appearances
        manager
            .create_table(
                Table::create()
                    .table("appearance")
                    .if_not_exists()
                    .col(
                        ColumnDef::new("id")
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new("track_id").big_integer().not_null())
                    .col(ColumnDef::new("playlist_id").big_integer().not_null())
                    .col(
                        ColumnDef::new("state")
                            .string()
                            .not_null()
                            .default("discovered"),
                    )
                    .col(ColumnDef::new("contact").string())
                    .col(ColumnDef::new("added_at").big_integer().not_null())
                    .col(ColumnDef::new("updated_at").big_integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_appearance_track_id")
                            .from("appearance", "track_id")
                            .to("track", "id")
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_appearance_playlist_id")
                            .from("appearance", "playlist_id")
                            .to("playlist", "id")
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_appearance_track_playlist")
                    .table("appearance")
                    .col("track_id")
                    .col("playlist_id")
                    .unique()
                    .to_owned(),
            )
            .await?;

        // One membership snapshot per playlist, replaced when the snapshot changes
        manager
            .create_table(
                Table::create()
                    .table("playlist_membership_cache")
                    .if_not_exists()
                    .col(
                        ColumnDef::new("id")
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new("playlist_id")
                            .big_integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new("snapshot_id").string().not_null())
                    .col(ColumnDef::new("track_ids").text().not_null())
                    .col(ColumnDef::new("created_at").big_integer().not_null())
                    .col(ColumnDef::new("updated_at").big_integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_playlist_membership_cache_playlist_id")
                            .from("playlist_membership_cache", "playlist_id")
                            .to("playlist", "id")
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table("playlist_membership_cache").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table("appearance").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table("playlist").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table("track").to_owned())
            .await?;

        Ok(())
    }
}
