use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::*;

use crate::m20250902_000001_create_users_table::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

const FK_TASKS_TO_USERS: &str = "fk-tasks-user_id";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tasks::Table)
                    .if_not_exists()
                    .col(pk_auto(Tasks::Id))
                    .col(integer(Tasks::UserId))
                    .col(string_len(Tasks::Title, 100))
                    .col(text_null(Tasks::Description))
                    .col(
                        timestamp_with_time_zone(Tasks::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(date_time_null(Tasks::DueDate))
                    .col(string_len_null(Tasks::Category, 50))
                    .col(boolean(Tasks::IsComplete).default(false))
                    .col(string_len(Tasks::Status, 20).default("todo"))
                    .col(string_null(Tasks::GoogleEventId))
                    .col(boolean(Tasks::SyncedToCalendar).default(false))
                    .foreign_key(
                        ForeignKey::create()
                            .name(FK_TASKS_TO_USERS)
                            .from(Tasks::Table, Tasks::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::NoAction),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tasks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Tasks {
    Table,
    Id,
    UserId,
    Title,
    Description,
    CreatedAt,
    DueDate,
    Category,
    IsComplete,
    Status,
    GoogleEventId,
    SyncedToCalendar,
}
