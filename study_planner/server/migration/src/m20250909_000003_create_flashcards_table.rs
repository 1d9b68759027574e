use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::*;

use crate::m20250902_000001_create_users_table::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

const FK_FLASHCARDS_TO_USERS: &str = "fk-flashcards-user_id";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Flashcards::Table)
                    .if_not_exists()
                    .col(pk_auto(Flashcards::Id))
                    .col(integer(Flashcards::UserId))
                    .col(text(Flashcards::Question))
                    .col(text(Flashcards::Answer))
                    .col(
                        timestamp_with_time_zone(Flashcards::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name(FK_FLASHCARDS_TO_USERS)
                            .from(Flashcards::Table, Flashcards::UserId)
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
            .drop_table(Table::drop().table(Flashcards::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Flashcards {
    Table,
    Id,
    UserId,
    Question,
    Answer,
    CreatedAt,
}
