use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Tenant lifecycle status. Only `Active` tenants are ever scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
}

/// A club row as read from the `clubs` table. The core never writes this table —
/// it is owned by the admin/provisioning flow, not the scrape orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub subdomain: String,
    pub timezone: String,
    pub status: TenantStatus,
    pub base_url: String,
    /// Base64-encoded AES-GCM ciphertext — opaque to everything except the vault.
    pub credentials_blob: String,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// Inclusive date range, always `start <= end`, used for both sync windows and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        assert!(start <= end, "DateRange requires start <= end");
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Boat category as discovered by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoatCategory {
    Race,
    Tinnie,
}

/// `R` (racer), `T` (training), or `RT` (both). `null` for non-racing craft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    R,
    T,
    RT,
}

/// A cached boat, adapter-scoped metadata kept as an opaque JSON blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Boat {
    pub id: String,
    pub tenant_id: String,
    pub external_id: String,
    pub name: String,
    pub boat_type: Option<String>,
    pub category: BoatCategory,
    pub classification: Option<Classification>,
    pub weight_kg: Option<u32>,
    pub is_damaged: bool,
    pub damaged_reason: Option<String>,
    pub metadata: serde_json::Value,
    pub last_scraped_at: DateTime<Utc>,
}

/// The parsed body of a booking: the part that genuinely varies per record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingPayload {
    pub external_id: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub member_name: String,
    pub session_name: Option<String>,
    /// The untouched upstream record, preserved verbatim for forensics.
    pub raw: serde_json::Value,
}

/// A cached booking. Bookings have no natural key — they're identified only by
/// membership in the `(tenant_id, date)` slice that a range-replace wrote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub tenant_id: String,
    pub boat_id: String,
    pub date: NaiveDate,
    pub payload: BookingPayload,
}

/// A boat freshly fetched from upstream, not yet resolved to an internal boat id.
/// `external_boat_id` ties a booking to the boat it belongs to before range-replace
/// resolves it through `CacheStore::boat_id_map`.
#[derive(Debug, Clone)]
pub struct FetchedBooking {
    pub external_boat_id: String,
    pub payload: BookingPayload,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    BoatMetadata,
    BookingCalendar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
}

/// One row of the insert-only job ledger (`scrape_jobs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: String,
    pub tenant_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

/// The non-throwing result an adapter's `sync` returns.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub success: bool,
    pub boats: Vec<Boat>,
    pub bookings: Vec<FetchedBooking>,
    pub boats_count: usize,
    pub bookings_count: usize,
    pub range: Option<DateRange>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl SyncResult {
    pub fn failure(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            duration_ms,
            ..Default::default()
        }
    }
}

/// What the scheduler hands back to its caller for one tenant-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClubScrapeResult {
    pub club_id: String,
    pub club_name: String,
    pub success: bool,
    pub boats_count: usize,
    pub bookings_count: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Non-fatal issues from this run: boat cards skipped for lacking a
    /// calendar link, bookings dropped for referencing an unknown boat, and
    /// the like. Never causes `success` to be `false` on its own.
    pub warnings: Vec<String>,
}
