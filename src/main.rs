use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scrape_orchestrator::config::Config;
use scrape_orchestrator::db;
use scrape_orchestrator::scheduler::{Scheduler, SchedulerConfig};
use scrape_orchestrator::sync_transaction::SyncTransactionConfig;
use scrape_orchestrator::vault::CredentialVault;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load Environment Variables
    let dotenv_found = dotenvy::dotenv().is_ok();

    // 2. Load Configuration
    let config = Config::from_env()?;

    // 3. Initialize Tracing (Structured Logging)
    // RUST_LOG takes precedence when set; otherwise SCRAPE_DEBUG decides the default level.
    let default_filter = if config.debug { "scrape_orchestrator=debug" } else { "scrape_orchestrator=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !dotenv_found {
        tracing::warn!("No .env file found. Relying on system environment variables.");
    }

    // 4. Open the database and bootstrap schema
    let pool = db::init_db(&config.database_url).await?;

    // 5. Construct the credential vault
    let vault = CredentialVault::new(&config.encryption_key)?;

    // 6. Start the scheduler
    let mut scheduler = Scheduler::new(
        pool,
        vault,
        SchedulerConfig {
            system_timezone: config.system_timezone.clone(),
            per_tenant_timeout_ms: config.per_tenant_timeout_ms,
            inter_tenant_delay_ms: config.inter_tenant_delay_ms,
            sync_config: SyncTransactionConfig {
                days_ahead: config.days_ahead,
                batch_size: config.batch_size,
                inter_batch_delay_ms: config.inter_batch_delay_ms,
            },
        },
    );
    scheduler.start().await?;

    tracing::info!(
        days_ahead = config.days_ahead,
        timezone = %config.system_timezone,
        "scrape orchestrator started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping scheduler");
    scheduler.stop().await?;

    Ok(())
}
