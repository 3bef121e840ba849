//! Schema bootstrap. Raw `sqlx::query` table creation rather than a migrations
//! framework — matches how the rest of this crate talks to SQLite.

use anyhow::Result;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use std::str::FromStr;

pub async fn init_db(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;

    // `clubs` is ambient: the core only ever SELECTs it — ownership lives with
    // the admin flow — but something has to create the table for local runs and
    // integration tests to seed tenants into.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS clubs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            subdomain TEXT NOT NULL UNIQUE,
            timezone TEXT NOT NULL,
            status TEXT NOT NULL,
            base_url TEXT NOT NULL,
            credentials_blob TEXT NOT NULL
        )",
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS boat_cache (
            id TEXT PRIMARY KEY,
            club_id TEXT NOT NULL,
            revsport_boat_id TEXT NOT NULL,
            name TEXT NOT NULL,
            boat_type TEXT,
            category TEXT NOT NULL,
            classification TEXT,
            weight_kg INTEGER,
            is_damaged INTEGER NOT NULL DEFAULT 0,
            damaged_reason TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            last_scraped_at DATETIME NOT NULL
        )",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_boat_cache_club_external
         ON boat_cache (club_id, revsport_boat_id)",
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS booking_cache (
            id TEXT PRIMARY KEY,
            club_id TEXT NOT NULL,
            boat_id TEXT NOT NULL,
            booking_date TEXT NOT NULL,
            external_id TEXT,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            member_name TEXT NOT NULL,
            session_name TEXT,
            raw_payload TEXT NOT NULL,
            FOREIGN KEY(boat_id) REFERENCES boat_cache(id)
        )",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_booking_cache_club_date
         ON booking_cache (club_id, booking_date)",
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS scrape_jobs (
            id TEXT PRIMARY KEY,
            club_id TEXT NOT NULL,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at DATETIME NOT NULL,
            completed_at DATETIME NOT NULL,
            error_message TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scrape_jobs_club_completed
         ON scrape_jobs (club_id, completed_at DESC)",
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_a_fresh_sqlite_file_and_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.db");
        let url = format!("sqlite://{}", path.display());

        let pool = init_db(&url).await.unwrap();
        assert!(path.exists());

        for table in ["clubs", "boat_cache", "booking_cache", "scrape_jobs"] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(count, 0);
        }
    }

    #[tokio::test]
    async fn in_memory_url_works_for_tests() {
        let pool = init_db("sqlite::memory:").await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clubs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
