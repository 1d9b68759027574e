pub use sea_orm_migration::prelude::*;

mod m20250902_000001_create_users_table;
mod m20250902_000002_create_tasks_table;
mod m20250909_000003_create_flashcards_table;
mod m20250916_000004_add_google_event_index;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250902_000001_create_users_table::Migration),
            Box::new(m20250902_000002_create_tasks_table::Migration),
            Box::new(m20250909_000003_create_flashcards_table::Migration),
            Box::new(m20250916_000004_add_google_event_index::Migration),
        ]
    }
}
