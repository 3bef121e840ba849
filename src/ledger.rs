//! Append-only job ledger. `started_at` is backfilled from
//! `completed_at - duration` to avoid a second clock read — `Utc::now()` is
//! captured once and threaded through rather than read twice.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{JobStatus, JobType, ScrapeJob};

#[derive(Clone)]
pub struct JobLedger {
    pool: SqlitePool,
}

impl JobLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends exactly one row. Called unconditionally by the sync transaction
    /// regardless of outcome — the ledger must be total, never skipped on failure.
    pub async fn record(
        &self,
        tenant_id: &str,
        job_type: JobType,
        status: JobStatus,
        duration_ms: u64,
        error_message: Option<&str>,
        retry_count: u32,
    ) -> Result<ScrapeJob> {
        let completed_at = Utc::now();
        let started_at = completed_at - Duration::milliseconds(duration_ms as i64);
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO scrape_jobs
             (id, club_id, job_type, status, started_at, completed_at, error_message, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(job_type_to_str(job_type))
        .bind(job_status_to_str(status))
        .bind(started_at)
        .bind(completed_at)
        .bind(error_message)
        .bind(retry_count)
        .execute(&self.pool)
        .await?;

        Ok(ScrapeJob {
            id,
            tenant_id: tenant_id.to_string(),
            job_type,
            status,
            started_at,
            completed_at,
            error_message: error_message.map(str::to_string),
            retry_count,
        })
    }

    pub async fn last_successful(&self, tenant_id: &str) -> Result<Option<DateTime<Utc>>> {
        let row: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT completed_at FROM scrape_jobs
             WHERE club_id = ?1 AND status = 'completed'
             ORDER BY completed_at DESC LIMIT 1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn last_n(&self, tenant_id: &str, n: i64) -> Result<Vec<ScrapeJob>> {
        let rows = sqlx::query(
            "SELECT * FROM scrape_jobs WHERE club_id = ?1 ORDER BY completed_at DESC LIMIT ?2",
        )
        .bind(tenant_id)
        .bind(n)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    pub async fn last_n_failed(&self, tenant_id: &str, n: i64) -> Result<Vec<ScrapeJob>> {
        let rows = sqlx::query(
            "SELECT * FROM scrape_jobs WHERE club_id = ?1 AND status = 'failed'
             ORDER BY completed_at DESC LIMIT ?2",
        )
        .bind(tenant_id)
        .bind(n)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    /// 24-hour aggregate counts and average duration, for admin status pages.
    pub async fn aggregate_24h(&self, tenant_id: &str) -> Result<LedgerAggregate> {
        let since = Utc::now() - Duration::hours(24);
        let row = sqlx::query(
            "SELECT
                COUNT(*) as total,
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) as completed,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) as failed,
                AVG((julianday(completed_at) - julianday(started_at)) * 86400000.0) as avg_duration_ms
             FROM scrape_jobs WHERE club_id = ?1 AND completed_at >= ?2",
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerAggregate {
            total: row.get::<i64, _>("total"),
            completed: row.get::<Option<i64>, _>("completed").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
            avg_duration_ms: row.get::<Option<f64>, _>("avg_duration_ms").unwrap_or(0.0),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerAggregate {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub avg_duration_ms: f64,
}

fn job_type_to_str(t: JobType) -> &'static str {
    match t {
        JobType::BoatMetadata => "boat_metadata",
        JobType::BookingCalendar => "booking_calendar",
    }
}

fn job_status_to_str(s: JobStatus) -> &'static str {
    match s {
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    }
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<ScrapeJob> {
    let job_type_str: String = row.get("job_type");
    let job_type = if job_type_str == "boat_metadata" { JobType::BoatMetadata } else { JobType::BookingCalendar };
    let status_str: String = row.get("status");
    let status = if status_str == "completed" { JobStatus::Completed } else { JobStatus::Failed };

    Ok(ScrapeJob {
        id: row.get("id"),
        tenant_id: row.get("club_id"),
        job_type,
        status,
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error_message: row.get("error_message"),
        retry_count: row.get::<i64, _>("retry_count") as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_ledger() -> JobLedger {
        let pool = crate::db::init_db("sqlite::memory:").await.unwrap();
        JobLedger::new(pool)
    }

    #[tokio::test]
    async fn every_record_call_appends_exactly_one_row() {
        let ledger = test_ledger().await;
        ledger
            .record("acme", JobType::BookingCalendar, JobStatus::Completed, 250, None, 0)
            .await
            .unwrap();
        ledger
            .record("acme", JobType::BookingCalendar, JobStatus::Failed, 100, Some("Timeout"), 2)
            .await
            .unwrap();

        let jobs = ledger.last_n("acme", 10).await.unwrap();
        assert_eq!(jobs.len(), 2);
    }

    #[tokio::test]
    async fn last_successful_ignores_failed_jobs() {
        let ledger = test_ledger().await;
        ledger
            .record("acme", JobType::BookingCalendar, JobStatus::Failed, 100, Some("AuthError"), 2)
            .await
            .unwrap();
        assert!(ledger.last_successful("acme").await.unwrap().is_none());

        ledger
            .record("acme", JobType::BookingCalendar, JobStatus::Completed, 250, None, 0)
            .await
            .unwrap();
        assert!(ledger.last_successful("acme").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn last_n_failed_filters_by_status() {
        let ledger = test_ledger().await;
        ledger
            .record("acme", JobType::BookingCalendar, JobStatus::Completed, 250, None, 0)
            .await
            .unwrap();
        ledger
            .record("acme", JobType::BookingCalendar, JobStatus::Failed, 100, Some("Timeout"), 1)
            .await
            .unwrap();

        let failed = ledger.last_n_failed("acme", 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error_message.as_deref(), Some("Timeout"));
    }
}
