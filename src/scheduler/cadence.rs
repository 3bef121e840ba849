//! Adaptive cadence bucket arithmetic. A one-minute heartbeat job asks
//! `should_run_now` on every tick rather than registering four separate cron
//! expressions — simpler to test and to reason about at bucket boundaries.

use chrono::{NaiveTime, Timelike};

/// The four cadence tiers, ordered by how urgently a club's calendar
/// changes during that part of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceBucket {
    EarlyMorning,
    BusinessHours,
    Evening,
    Overnight,
}

impl CadenceBucket {
    pub fn interval_minutes(self) -> u32 {
        match self {
            CadenceBucket::EarlyMorning => 2,
            CadenceBucket::BusinessHours => 5,
            CadenceBucket::Evening => 2,
            CadenceBucket::Overnight => 10,
        }
    }
}

/// Maps a local wall-clock time to its cadence bucket. Boundaries are
/// inclusive on the start hour, exclusive on the end — 09:00:00 belongs to
/// `BusinessHours`, 08:59:59 to `EarlyMorning`.
pub fn bucket_for(local_time: NaiveTime) -> CadenceBucket {
    let hour = local_time.hour();
    match hour {
        5..=8 => CadenceBucket::EarlyMorning,
        9..=16 => CadenceBucket::BusinessHours,
        17..=20 => CadenceBucket::Evening,
        _ => CadenceBucket::Overnight,
    }
}

/// Whether the scrape heartbeat should fire a run for this minute. A bucket's
/// interval must evenly divide the minute-of-hour for the run to fire — e.g. a
/// 5-minute bucket fires at :00, :05, :10, ... regardless of which hour it's in.
pub fn should_run_now(local_time: NaiveTime) -> bool {
    let bucket = bucket_for(local_time);
    local_time.minute() % bucket.interval_minutes() == 0
}
