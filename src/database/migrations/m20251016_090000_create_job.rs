use sea_orm::{sea_query::extension::postgres::Type, ActiveEnum, DbBackend, Schema};
use sea_orm_migration::{
    prelude::*,
    schema::{integer, json_binary, string, timestamp, uuid},
};

use crate::database::models::job_result::JobResult;
use crate::database::models::job_status::JobStatus;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let schema = Schema::new(DbBackend::Postgres);

        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE OR REPLACE FUNCTION update_updated_at_column()
                RETURNS TRIGGER AS $$
                BEGIN
                    NEW.updated_at = CURRENT_TIMESTAMP;
                    RETURN NEW;
                END;
                $$ language 'plpgsql';
                ",
            )
            .await?;

        manager
            .create_type(schema.create_enum_from_active_enum::<JobStatus>())
            .await?;

        manager
            .create_type(schema.create_enum_from_active_enum::<JobResult>())
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Job::Table)
                    .if_not_exists()
                    .col(
                        uuid(Job::Id)
                            .primary_key()
                            .default(Expr::cust("gen_random_uuid()")),
                    )
                    .col(
                        timestamp(Job::CreatedAt)
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .col(
                        timestamp(Job::UpdatedAt)
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .col(string(Job::JobType).not_null())
                    .col(json_binary(Job::Payload).not_null())
                    .col(string(Job::QueueName).not_null().default("default"))
                    .col(
                        ColumnDef::new(Job::Status)
                            .custom(JobStatus::name())
                            .not_null()
                            .default("pending"),
                    )
                    .col(integer(Job::Attempts).not_null().default(0))
                    .col(integer(Job::MaxTries).not_null().default(3))
                    .col(
                        timestamp(Job::AvailableAt)
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .col(ColumnDef::new(Job::Owner).string().null())
                    .col(ColumnDef::new(Job::LeaseExpiresAt).timestamp().null())
                    .col(ColumnDef::new(Job::LastError).text().null())
                    .col(ColumnDef::new(Job::CompletedAt).timestamp().null())
                    .check(Expr::col(Job::MaxTries).gte(1))
                    .check(Expr::col(Job::Attempts).lte(Expr::col(Job::MaxTries)))
                    .to_owned(),
            )
            .await?;

        // Serves the claim query: pending rows of a queue, oldest eligible first
        manager
            .create_index(
                Index::create()
                    .name("idx-job-claim")
                    .table(Job::Table)
                    .col(Job::Status)
                    .col(Job::QueueName)
                    .col(Job::AvailableAt)
                    .to_owned(),
            )
            .await?;

        // Serves the reaper scan
        manager
            .create_index(
                Index::create()
                    .name("idx-job-lease_expires_at")
                    .table(Job::Table)
                    .col(Job::Status)
                    .col(Job::LeaseExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(JobExecution::Table)
                    .if_not_exists()
                    .col(
                        uuid(JobExecution::Id)
                            .primary_key()
                            .default(Expr::cust("gen_random_uuid()")),
                    )
                    .col(uuid(JobExecution::JobId).not_null())
                    .col(integer(JobExecution::Attempt).not_null())
                    .col(string(JobExecution::Worker).not_null())
                    .col(
                        ColumnDef::new(JobExecution::Result)
                            .custom(JobResult::name())
                            .not_null(),
                    )
                    .col(ColumnDef::new(JobExecution::FailureReason).text().null())
                    .col(
                        timestamp(JobExecution::CreatedAt)
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-job_execution-job_id")
                            .from(JobExecution::Table, JobExecution::JobId)
                            .to(Job::Table, Job::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-job_execution-job_id")
                    .table(JobExecution::Table)
                    .col(JobExecution::JobId)
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE TRIGGER update_job_updated_at
                    BEFORE UPDATE ON job
                    FOR EACH ROW
                    EXECUTE FUNCTION update_updated_at_column();
                ",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TRIGGER IF EXISTS update_job_updated_at ON job;")
            .await?;

        manager
            .drop_table(Table::drop().table(JobExecution::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Job::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(JobResult::name()).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(JobStatus::name()).to_owned())
            .await?;

        manager
            .get_connection()
            .execute_unprepared("DROP FUNCTION IF EXISTS update_updated_at_column();")
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Job {
    Table,
    Id,
    CreatedAt,
    UpdatedAt,
    JobType,
    Payload,
    QueueName,
    Status,
    Attempts,
    MaxTries,
    AvailableAt,
    Owner,
    LeaseExpiresAt,
    LastError,
    CompletedAt,
}

#[derive(DeriveIden)]
enum JobExecution {
    Table,
    Id,
    JobId,
    Attempt,
    Worker,
    Result,
    FailureReason,
    CreatedAt,
}
