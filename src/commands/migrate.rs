use std::process;

use sea_orm::{DatabaseConnection, DbErr};
use sea_orm_migration::{Migration, MigratorTrait};

use crate::{cli::MigrateAction, config::Config, database::migrations::Migrator};

use super::connect_or_exit;

pub async fn handle_migrate_command(config: &Config, action: MigrateAction) {
    let db = connect_or_exit(config).await;

    let result = match action {
        MigrateAction::Up { steps } => migrate_up(&db, steps).await,
        MigrateAction::Down { steps } => migrate_down(&db, steps).await,
        MigrateAction::Status => print_status(&db).await,
    };

    if let Err(e) = result {
        eprintln!("❌ Migration failed: {e}");
        process::exit(1);
    }
}

/// The first `steps` entries, or all of them
fn take_steps(migrations: &[Migration], steps: Option<u32>) -> &[Migration] {
    let count = steps.map_or(migrations.len(), |steps| migrations.len().min(steps as usize));
    &migrations[..count]
}

async fn migrate_up(db: &DatabaseConnection, steps: Option<u32>) -> Result<(), DbErr> {
    let pending = Migrator::get_pending_migrations(db).await?;
    if pending.is_empty() {
        println!("✅ Job tables are up to date");
        return Ok(());
    }

    for migration in take_steps(&pending, steps) {
        println!("  ⬆️  {}", migration.name());
    }
    Migrator::up(db, steps).await?;

    println!("✅ Migrations applied");
    Ok(())
}

async fn migrate_down(db: &DatabaseConnection, steps: u32) -> Result<(), DbErr> {
    let mut applied = Migrator::get_applied_migrations(db).await?;
    if applied.is_empty() {
        println!("Nothing to roll back");
        return Ok(());
    }

    // Rolled back newest first
    applied.reverse();
    for migration in take_steps(&applied, Some(steps)) {
        println!("  ⬇️  {}", migration.name());
    }
    Migrator::down(db, Some(steps)).await?;

    println!("✅ Rollback finished");
    Ok(())
}

async fn print_status(db: &DatabaseConnection) -> Result<(), DbErr> {
    for migration in Migrator::get_applied_migrations(db).await? {
        println!("  ✓ {}", migration.name());
    }
    for migration in Migrator::get_pending_migrations(db).await? {
        println!("  … {} (pending)", migration.name());
    }
    Ok(())
}
