//! Database module for SQLite persistence.
//!
//! SQLite plays the role of the remote backend: it holds the rows, publishes
//! the change-feed and runs the server-side procedures.

mod procedures;
mod sql;
mod store;
mod triggers;

pub use store::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            id TEXT PRIMARY KEY,
            full_name TEXT,
            role TEXT NOT NULL CHECK (role IN ('admin', 'driver')),
            phone TEXT,
            push_token TEXT,
            bank_info TEXT,
            address TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            pickup_address TEXT,
            dropoff_address TEXT,
            scheduled_date TEXT,
            scheduled_time TEXT,
            price REAL,
            status TEXT NOT NULL DEFAULT 'open',
            admin_id TEXT NOT NULL,
            driver_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            job_id TEXT,
            title TEXT,
            body TEXT,
            kind TEXT,
            read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoices (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            admin_id TEXT NOT NULL,
            driver_id TEXT NOT NULL,
            amount REAL,
            status TEXT NOT NULL DEFAULT 'unpaid',
            bank_info TEXT,
            paid_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for the per-role list queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_jobs_admin_id ON jobs(admin_id);
        CREATE INDEX IF NOT EXISTS idx_jobs_driver_id ON jobs(driver_id);
        CREATE INDEX IF NOT EXISTS idx_jobs_status_date ON jobs(status, scheduled_date);
        CREATE INDEX IF NOT EXISTS idx_notifications_user_id ON notifications(user_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_invoices_admin_id ON invoices(admin_id);
        CREATE INDEX IF NOT EXISTS idx_invoices_driver_id ON invoices(driver_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_invoices_job_id ON invoices(job_id);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Store over a fresh database in a temporary directory.
#[cfg(test)]
pub(crate) async fn test_store() -> (SqliteStore, tempfile::TempDir) {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("test.sqlite"))
        .await
        .unwrap();
    (SqliteStore::new(pool, 64), temp_dir)
}
