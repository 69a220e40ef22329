use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Free-text follow-up state kept by the curator, e.g. "contacted"
        manager
            .alter_table(
                Table::alter()
                    .table("appearance")
                    .add_column(ColumnDef::new("curation_status").string().null())
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table("appearance")
                    .drop_column("curation_status")
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}
