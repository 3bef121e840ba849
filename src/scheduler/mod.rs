//! Tenant scheduler. A one-minute `tokio-cron-scheduler` heartbeat
//! decides per-tick whether the current adaptive-cadence bucket wants a run,
//! a singleton gate drops overlapping ticks rather than queuing them, and a
//! serialized per-tenant loop fans out into `sync_transaction::run` under a
//! per-tenant timeout.

pub mod cadence;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use sqlx::SqlitePool;
use tokio::sync::Mutex as AsyncMutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::ledger::JobLedger;
use crate::model::ClubScrapeResult;
use crate::store::CacheStore;
use crate::sync_transaction::{self, SyncTransactionConfig};
use crate::vault::CredentialVault;

pub struct SchedulerConfig {
    pub system_timezone: String,
    pub per_tenant_timeout_ms: u64,
    pub inter_tenant_delay_ms: u64,
    pub sync_config: SyncTransactionConfig,
}

/// Owns the cron job registration and the singleton run-gate. `start`/`stop`
/// bracket the process lifetime; `run_all_clubs` is also exposed directly so
/// an operator (or an integration test) can trigger an out-of-band run.
pub struct Scheduler {
    pool: SqlitePool,
    vault: Arc<CredentialVault>,
    config: Arc<SchedulerConfig>,
    run_gate: Arc<AsyncMutex<()>>,
    cron: Option<JobScheduler>,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, vault: CredentialVault, config: SchedulerConfig) -> Self {
        Self {
            pool,
            vault: Arc::new(vault),
            config: Arc::new(config),
            run_gate: Arc::new(AsyncMutex::new(())),
            cron: None,
        }
    }

    /// Registers and starts the one-minute heartbeat. Each tick checks
    /// `cadence::should_run_now` against the configured system timezone before
    /// doing anything else.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        let pool = self.pool.clone();
        let vault = self.vault.clone();
        let config = self.config.clone();
        let run_gate = self.run_gate.clone();

        let job = Job::new_async("0 * * * * *", move |_uuid, _lock| {
            let pool = pool.clone();
            let vault = vault.clone();
            let config = config.clone();
            let run_gate = run_gate.clone();
            Box::pin(async move {
                heartbeat_tick(pool, vault, config, run_gate).await;
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;
        self.cron = Some(scheduler);
        Ok(())
    }

    pub async fn stop(&mut self) -> anyhow::Result<()> {
        if let Some(mut scheduler) = self.cron.take() {
            scheduler.shutdown().await?;
        }
        Ok(())
    }

    /// Runs every active tenant once, serialized with an inter-tenant delay.
    /// Bypasses the cadence check — used by the heartbeat once it has already
    /// decided this tick should run, and available directly for manual runs.
    pub async fn run_all_clubs(&self) -> Vec<ClubScrapeResult> {
        run_all_clubs(&self.pool, &self.vault, &self.config).await
    }

    /// Runs a single tenant by id, outside the serialized fan-out — for
    /// operator-triggered one-off reruns.
    pub async fn scrape_club(&self, tenant_id: &str) -> Result<ClubScrapeResult, String> {
        let tenants = crate::tenants::list_active(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        let tenant = tenants
            .into_iter()
            .find(|t| t.id == tenant_id)
            .ok_or_else(|| format!("no active tenant with id {tenant_id}"))?;

        let store = CacheStore::new(self.pool.clone());
        let ledger = JobLedger::new(self.pool.clone());
        Ok(run_one_tenant(&tenant, &self.vault, &store, &ledger, &self.config).await)
    }
}

async fn heartbeat_tick(
    pool: SqlitePool,
    vault: Arc<CredentialVault>,
    config: Arc<SchedulerConfig>,
    run_gate: Arc<AsyncMutex<()>>,
) {
    let tz: Tz = config.system_timezone.parse().unwrap_or(chrono_tz::UTC);
    let local_time = Utc::now().with_timezone(&tz).time();

    if !cadence::should_run_now(local_time) {
        return;
    }

    // Drop-not-queue: if a previous tick's fan-out is still running, this tick
    // is simply skipped rather than piling up behind it.
    let guard = match run_gate.try_lock() {
        Ok(guard) => guard,
        Err(_) => {
            tracing::warn!("heartbeat tick skipped — previous scrape run still in flight");
            return;
        }
    };

    let results = run_all_clubs(&pool, &vault, &config).await;
    tracing::info!(clubs_run = results.len(), "heartbeat fan-out completed");
    drop(guard);
}

async fn run_all_clubs(
    pool: &SqlitePool,
    vault: &CredentialVault,
    config: &SchedulerConfig,
) -> Vec<ClubScrapeResult> {
    let tenants = match crate::tenants::list_active(pool).await {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "failed to load active tenants — skipping this run");
            return Vec::new();
        }
    };

    let store = CacheStore::new(pool.clone());
    let ledger = JobLedger::new(pool.clone());

    let mut results = Vec::with_capacity(tenants.len());
    for (index, tenant) in tenants.iter().enumerate() {
        if index > 0 && config.inter_tenant_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.inter_tenant_delay_ms)).await;
        }
        results.push(run_one_tenant(tenant, vault, &store, &ledger, config).await);
    }
    results
}

async fn run_one_tenant(
    tenant: &crate::model::Tenant,
    vault: &CredentialVault,
    store: &CacheStore,
    ledger: &JobLedger,
    config: &SchedulerConfig,
) -> ClubScrapeResult {
    let timeout = Duration::from_millis(config.per_tenant_timeout_ms);
    let outcome = tokio::time::timeout(
        timeout,
        sync_transaction::run(tenant, vault, store, ledger, &config.sync_config),
    )
    .await;

    match outcome {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                tenant_id = %tenant.id,
                timeout_ms = config.per_tenant_timeout_ms,
                "tenant scrape exceeded its per-tenant timeout"
            );
            let _ = ledger
                .record(&tenant.id, crate::model::JobType::BookingCalendar, crate::model::JobStatus::Failed, config.per_tenant_timeout_ms, Some("Timeout"), 0)
                .await;
            ClubScrapeResult {
                club_id: tenant.id.clone(),
                club_name: tenant.name.clone(),
                success: false,
                boats_count: 0,
                bookings_count: 0,
                duration_ms: config.per_tenant_timeout_ms,
                error: Some("Timeout".to_string()),
                warnings: Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serial_test::serial;

    fn test_scheduler_config() -> SchedulerConfig {
        SchedulerConfig {
            system_timezone: "Australia/Sydney".to_string(),
            per_tenant_timeout_ms: 100,
            inter_tenant_delay_ms: 0,
            sync_config: SyncTransactionConfig { days_ahead: 7, batch_size: 5, inter_batch_delay_ms: 0 },
        }
    }

    /// `serial` because this test exercises the shared run-gate lock directly
    /// rather than going through a fresh `Scheduler` instance.
    #[tokio::test]
    #[serial]
    async fn run_gate_drops_an_overlapping_tick_instead_of_queuing() {
        let run_gate = Arc::new(AsyncMutex::new(()));
        let held = run_gate.clone().try_lock_owned().unwrap();

        assert!(run_gate.try_lock().is_err(), "a held gate must reject a second tick");
        drop(held);
        assert!(run_gate.try_lock().is_ok(), "the gate must be free once released");
    }

    #[tokio::test]
    async fn per_tenant_timeout_produces_a_failed_result_not_a_panic() {
        let pool = crate::db::init_db("sqlite::memory:").await.unwrap();
        let store = CacheStore::new(pool.clone());
        let ledger = JobLedger::new(pool);
        let vault = CredentialVault::new(&STANDARD.encode([4u8; 32])).unwrap();

        let tenant = crate::model::Tenant {
            id: "slow-club".to_string(),
            name: "Slow Club".to_string(),
            subdomain: "slow".to_string(),
            timezone: "UTC".to_string(),
            status: crate::model::TenantStatus::Active,
            base_url: "http://127.0.0.1:9".to_string(), // nothing listens here
            credentials_blob: "garbage".to_string(),
        };

        let config = test_scheduler_config();
        let result = run_one_tenant(&tenant, &vault, &store, &ledger, &config).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Timeout"));
    }
}
