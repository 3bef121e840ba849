//! Adapter contract. `DataSourceAdapter` is the polymorphic seam the
//! scheduler and sync transaction code against — they hold only
//! `Box<dyn DataSourceAdapter>` and never know which concrete upstream provider
//! is behind it.

pub mod http_scrape;
mod parse;
mod session;

pub(crate) use session::{SessionState, SessionTracker};

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Boat, DateRange, FetchedBooking, SyncResult};

/// Capabilities an adapter declares about itself. Phase-A implementations always
/// return `supports_booking_entry: false` — the scheduler ignores writes even
/// when a future adapter supports them.
#[derive(Debug, Clone, Copy)]
pub struct AdapterCapabilities {
    pub adapter_type: &'static str,
    pub supports_booking_entry: bool,
}

#[async_trait]
pub trait DataSourceAdapter: Send {
    fn capabilities(&self) -> AdapterCapabilities;

    /// Must be called exactly once before any data call. A second call is a
    /// no-op when already `Ready`.
    async fn initialize(&mut self) -> Result<()>;

    async fn get_boats(&mut self) -> Result<Vec<Boat>>;

    /// `range` is inclusive and must not exceed 14 days.
    async fn get_bookings(&mut self, range: DateRange) -> Result<Vec<FetchedBooking>>;

    /// Never throws — failures are captured into `SyncResult.error`.
    async fn sync(&mut self, range: DateRange) -> SyncResult;

    /// Safe to call from any state, any number of times.
    async fn dispose(&mut self);
}
