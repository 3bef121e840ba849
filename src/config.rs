//! Process-start configuration. Loaded once in `main`, then shared by
//! reference with the scheduler, vault, and HTTP client builder.

use crate::error::{Result, ScrapeError};

#[derive(Debug, Clone)]
pub struct Config {
    /// Base64-encoded 32-byte key for the credential vault. Required — the
    /// process refuses to start the scheduler without it.
    pub encryption_key: String,
    /// Sliding sync window length, clamped to 1..=14.
    pub days_ahead: u32,
    pub debug: bool,
    pub system_timezone: String,
    pub per_tenant_timeout_ms: u64,
    pub batch_size: usize,
    pub inter_batch_delay_ms: u64,
    pub inter_tenant_delay_ms: u64,
    pub database_url: String,
}

impl Config {
    /// Builds configuration from the process environment. Call `dotenvy::dotenv()`
    /// first if you want `.env` files honored — this function only reads `std::env`.
    pub fn from_env() -> Result<Self> {
        let encryption_key = std::env::var("VAULT_ENCRYPTION_KEY").map_err(|_| {
            ScrapeError::Configuration(
                "VAULT_ENCRYPTION_KEY is not set — the credential vault cannot start without it"
                    .to_string(),
            )
        })?;

        let days_ahead = parse_env_u32("DAYS_AHEAD", 7)?.clamp(1, 14);
        let debug = std::env::var("SCRAPE_DEBUG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let system_timezone =
            std::env::var("SYSTEM_TIMEZONE").unwrap_or_else(|_| "UTC".to_string());
        let per_tenant_timeout_ms = parse_env_u64("PER_TENANT_TIMEOUT_MS", 120_000)?;
        let batch_size = parse_env_u32("BATCH_SIZE", 5)? as usize;
        let inter_batch_delay_ms = parse_env_u64("INTER_BATCH_DELAY_MS", 500)?;
        let inter_tenant_delay_ms = parse_env_u64("INTER_TENANT_DELAY_MS", 1_000)?;
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:scrape_orchestrator.db".to_string());

        Ok(Self {
            encryption_key,
            days_ahead,
            debug,
            system_timezone,
            per_tenant_timeout_ms,
            batch_size,
            inter_batch_delay_ms,
            inter_tenant_delay_ms,
            database_url,
        })
    }
}

fn parse_env_u32(key: &str, default: u32) -> Result<u32> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u32>()
            .map_err(|_| ScrapeError::Configuration(format!("{key} must be a non-negative integer, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| ScrapeError::Configuration(format!("{key} must be a non-negative integer, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
