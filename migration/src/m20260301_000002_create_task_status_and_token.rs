use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table("task_status")
                    .if_not_exists()
                    .col(ColumnDef::new("name").string().not_null().primary_key())
                    .col(
                        ColumnDef::new("status")
                            .string()
                            .not_null()
                            .default("idle"),
                    )
                    .col(
                        ColumnDef::new("stop_requested")
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new("current")
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new("total")
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new("extra").text().not_null())
                    .col(ColumnDef::new("message").text())
                    .col(ColumnDef::new("started_at").big_integer())
                    .col(ColumnDef::new("finished_at").big_integer())
                    .col(ColumnDef::new("updated_at").big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table("spotify_token")
                    .if_not_exists()
                    .col(
                        ColumnDef::new("id")
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new("access_token").string().not_null())
                    .col(ColumnDef::new("token_type").string().not_null())
                    .col(ColumnDef::new("refresh_token").string())
                    .col(ColumnDef::new("expires_at").big_integer().not_null())
                    .col(ColumnDef::new("created_at").big_integer().not_null())
                    .col(ColumnDef::new("updated_at").big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table("spotify_token").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table("task_status").to_owned())
            .await?;

        Ok(())
    }
}
