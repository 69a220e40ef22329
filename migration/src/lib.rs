pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_tracker_tables;
mod m20260301_000002_create_task_status_and_token;
mod m20260320_000003_add_appearance_curation_status;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_tracker_tables::Migration),
            Box::new(m20260301_000002_create_task_status_and_token::Migration),
            Box::new(m20260320_000003_add_appearance_curation_status::Migration),
        ]
    }
}
