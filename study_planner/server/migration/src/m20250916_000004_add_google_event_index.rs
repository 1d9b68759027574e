use sea_orm_migration::prelude::*;

use crate::m20250902_000002_create_tasks_table::Tasks;

#[derive(DeriveMigrationName)]
pub struct Migration;

const IDX_TASKS_USER_GOOGLE_EVENT: &str = "idx-tasks-user_id-google_event_id";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One task per (user, calendar event); NULL event ids stay unconstrained
        manager
            .create_index(
                Index::create()
                    .name(IDX_TASKS_USER_GOOGLE_EVENT)
                    .table(Tasks::Table)
                    .col(Tasks::UserId)
                    .col(Tasks::GoogleEventId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name(IDX_TASKS_USER_GOOGLE_EVENT)
                    .table(Tasks::Table)
                    .to_owned(),
            )
            .await
    }
}
