//! The only concrete adapter today: cookie-session scraping of a
//! RevSport-style booking portal. Session plumbing lives in `session.rs`,
//! parsing in `parse.rs`; this file is the HTTP protocol and retry/backoff
//! glue between them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::TimeZone;
use chrono_tz::Tz;
use futures::future::join_all;
use regex::Regex;
use reqwest::{Client, StatusCode};

use crate::error::{Result, ScrapeError};
use crate::model::{Boat, DateRange, FetchedBooking, SyncResult};
use crate::vault::Credentials;

use super::parse::{parse_boats_html, parse_bookings_json};
use super::session::{LoginMutex, SessionState, SessionTracker};
use super::{AdapterCapabilities, DataSourceAdapter};

const MAX_REAUTH_RETRIES: u32 = 2;

/// Configuration the adapter needs that isn't a credential — all sourced from
/// `Config` by the sync transaction, never read from the environment directly.
#[derive(Debug, Clone)]
pub struct HttpScrapeConfig {
    pub base_url: String,
    pub timezone: String,
    pub batch_size: usize,
    pub inter_batch_delay_ms: u64,
}

pub struct HttpScrapeAdapter {
    client: Client,
    base_url: String,
    timezone: Tz,
    credentials: Credentials,
    batch_size: usize,
    inter_batch_delay_ms: u64,
    /// Shared rather than owned outright: the sync transaction's dispose guard
    /// keeps its own handle so it can mark the session disposed even while it
    /// no longer holds a mutable borrow of the adapter (e.g. under a timeout
    /// that drops the adapter's future but still runs pending `Drop`s).
    session: Arc<SessionTracker>,
    login_mutex: LoginMutex,
}

impl HttpScrapeAdapter {
    pub fn new(config: HttpScrapeConfig, credentials: Credentials) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| ScrapeError::Configuration(format!("failed to build HTTP client: {e}")))?;

        let timezone: Tz = config.timezone.parse().unwrap_or_else(|_| {
            tracing::warn!(timezone = %config.timezone, "unrecognized tenant timezone, falling back to UTC");
            chrono_tz::UTC
        });

        Ok(Self {
            client,
            base_url: config.base_url,
            timezone,
            credentials,
            batch_size: config.batch_size.max(1),
            inter_batch_delay_ms: config.inter_batch_delay_ms,
            session: Arc::new(SessionTracker::new()),
            login_mutex: LoginMutex::new(),
        })
    }

    fn login_url(&self) -> String {
        format!("{}/login", self.base_url.trim_end_matches('/'))
    }

    fn bookings_index_url(&self) -> String {
        format!("{}/bookings", self.base_url.trim_end_matches('/'))
    }

    /// `start`/`end` are the local-timezone ISO-8601 timestamps (with offset)
    /// bounding the requested range.
    fn calendar_url(&self, boat_external_id: &str, start: &str, end: &str) -> String {
        format!(
            "{}/bookings/retrieve-calendar/{}?start={}&end={}",
            self.base_url.trim_end_matches('/'),
            boat_external_id,
            urlencode(start),
            urlencode(end),
        )
    }

    /// Local-timezone day bounds for `range`, formatted as offset-bearing
    /// RFC 3339 timestamps for the calendar endpoint's `start`/`end` query params.
    fn range_bounds_iso(&self, range: DateRange) -> (String, String) {
        let start_naive = range.start.and_hms_opt(0, 0, 0).unwrap();
        let end_naive = range.end.and_hms_opt(23, 59, 59).unwrap();
        let start = self
            .timezone
            .from_local_datetime(&start_naive)
            .earliest()
            .unwrap_or_else(|| self.timezone.from_utc_datetime(&start_naive));
        let end = self
            .timezone
            .from_local_datetime(&end_naive)
            .latest()
            .unwrap_or_else(|| self.timezone.from_utc_datetime(&end_naive));
        (start.to_rfc3339(), end.to_rfc3339())
    }

    /// CSRF-token login protocol: GET the login page, pull `_token`
    /// out of the form, POST credentials with Referer/Origin set, then verify
    /// the session actually took by re-fetching the bookings index.
    async fn login(&self) -> Result<()> {
        let login_url = self.login_url();

        let page = self
            .client
            .get(&login_url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ScrapeError::Auth(format!("login page fetch failed: {e}")))?
            .text()
            .await?;

        let token = extract_csrf_token(&page).ok_or_else(|| {
            ScrapeError::Auth("login page did not contain a _token field".to_string())
        })?;

        let form = [
            ("_token", token.as_str()),
            ("username", &self.credentials.username),
            ("password", self.credentials.expose_password()),
            ("remember", "on"),
        ];

        let response = self
            .client
            .post(&login_url)
            .header("Referer", &login_url)
            .header("Origin", self.base_url.trim_end_matches('/'))
            .form(&form)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED || response.status() == StatusCode::FORBIDDEN {
            return Err(ScrapeError::Auth("credentials were rejected".to_string()));
        }
        if !response.status().is_success() && !response.status().is_redirection() {
            return Err(ScrapeError::from_status(
                response.status().as_u16(),
                "unexpected status during login POST",
            ));
        }

        let verify = self.client.get(self.bookings_index_url()).send().await?;
        if verify.status() == StatusCode::UNAUTHORIZED || verify.status() == StatusCode::FORBIDDEN {
            return Err(ScrapeError::Auth(
                "post-login verification request was rejected — credentials likely invalid".to_string(),
            ));
        }
        let verify_body = verify.text().await?;
        if extract_csrf_token(&verify_body).is_some() {
            return Err(ScrapeError::Auth(
                "post-login verification page still rendered a login form — credentials likely invalid"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Issues a GET, retrying through the login mutex on session-invalidation
    /// statuses (401/403 only) up to `MAX_REAUTH_RETRIES` times with
    /// exponential backoff. Any other non-2xx status is a plain `Upstream` error.
    async fn get_with_reauth(&self, url: &str) -> Result<String> {
        let mut retry = 0u32;
        loop {
            let observed_generation = self.login_mutex.generation().await;
            let response = self.client.get(url).send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                if retry >= MAX_REAUTH_RETRIES {
                    return Err(ScrapeError::Auth(
                        "Authentication failed after multiple retries".to_string(),
                    ));
                }
                self.session.set(SessionState::Reauthenticating);
                self.login_mutex
                    .reauthenticate(observed_generation, || self.login())
                    .await?;
                self.session.set(SessionState::Ready);

                let backoff_ms = 1000u64 * 2u64.pow(retry);
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                retry += 1;
                continue;
            }

            if !status.is_success() {
                return Err(ScrapeError::from_status(
                    status.as_u16(),
                    format!("unexpected status fetching {url}"),
                ));
            }

            return Ok(response.text().await?);
        }
    }

    /// Fetches and parses the bookings index, returning both the boats that
    /// parsed cleanly and a human-readable warning for every card that didn't.
    async fn boats_with_warnings(&self) -> Result<(Vec<Boat>, Vec<String>)> {
        let html = self.get_with_reauth(&self.bookings_index_url()).await?;
        Ok(parse_boats_html(&html, chrono::Utc::now()))
    }

    /// Fetches every boat's calendar for `range`, batched and concurrent within
    /// each batch. Takes the already-fetched boat list so callers that already
    /// hold one (namely `sync`) don't pay for a second bookings-index fetch.
    async fn bookings_for_boats(&self, boats: &[Boat], range: DateRange) -> Result<Vec<FetchedBooking>> {
        if range.days() > 14 {
            return Err(ScrapeError::Configuration(format!(
                "booking range of {} days exceeds the 14-day ceiling",
                range.days()
            )));
        }

        let (start_iso, end_iso) = self.range_bounds_iso(range);
        let mut bookings = Vec::new();

        // Batches of `batch_size` boats, every member of a batch in flight
        // concurrently — the structural throttle that keeps upstream from
        // seeing a storm of simultaneous requests.
        for batch in boats.chunks(self.batch_size) {
            let fetches = batch.iter().map(|boat| {
                let url = self.calendar_url(&boat.external_id, &start_iso, &end_iso);
                let external_id = boat.external_id.clone();
                async move {
                    let body = self.get_with_reauth(&url).await?;
                    Result::<_>::Ok((external_id, body))
                }
            });

            for outcome in join_all(fetches).await {
                let (external_id, body) = outcome?;
                bookings.extend(parse_bookings_json(&body, &external_id)?);
            }

            if self.inter_batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.inter_batch_delay_ms)).await;
            }
        }

        Ok(bookings.into_iter().filter(|b| range.contains(b.date)).collect())
    }
}

#[async_trait]
impl DataSourceAdapter for HttpScrapeAdapter {
    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities { adapter_type: "http_scrape", supports_booking_entry: false }
    }

    async fn initialize(&mut self) -> Result<()> {
        if self.session.is_ready() {
            return Ok(());
        }
        self.session.set(SessionState::Authenticating);
        self.login_mutex.reauthenticate(0, || self.login()).await?;
        self.session.set(SessionState::Ready);
        Ok(())
    }

    async fn get_boats(&mut self) -> Result<Vec<Boat>> {
        let (boats, warnings) = self.boats_with_warnings().await?;
        for warning in &warnings {
            tracing::warn!(warning, "boat card skipped during parse");
        }
        Ok(boats)
    }

    async fn get_bookings(&mut self, range: DateRange) -> Result<Vec<FetchedBooking>> {
        let (boats, _warnings) = self.boats_with_warnings().await?;
        self.bookings_for_boats(&boats, range).await
    }

    async fn sync(&mut self, range: DateRange) -> SyncResult {
        let started = Instant::now();
        let mut warnings = Vec::new();

        if let Err(e) = self.initialize().await {
            return SyncResult::failure(e.to_string(), started.elapsed().as_millis() as u64);
        }

        let (boats, parse_warnings) = match self.boats_with_warnings().await {
            Ok(result) => result,
            Err(e) => return SyncResult::failure(e.to_string(), started.elapsed().as_millis() as u64),
        };
        for warning in &parse_warnings {
            tracing::warn!(warning, "boat card skipped during parse");
        }
        warnings.extend(parse_warnings);

        let bookings = match self.bookings_for_boats(&boats, range).await {
            Ok(bookings) => bookings,
            Err(e) => return SyncResult::failure(e.to_string(), started.elapsed().as_millis() as u64),
        };

        if boats.is_empty() {
            warnings.push("zero boats parsed from bookings index".to_string());
        }

        SyncResult {
            success: true,
            boats_count: boats.len(),
            bookings_count: bookings.len(),
            boats,
            bookings,
            range: Some(range),
            duration_ms: started.elapsed().as_millis() as u64,
            error: None,
            warnings,
        }
    }

    async fn dispose(&mut self) {
        self.session.set(SessionState::Disposed);
    }
}

impl HttpScrapeAdapter {
    /// A cloneable handle onto this adapter's session state, independent of any
    /// `&mut` borrow of the adapter itself — see `session` field docs.
    pub fn session_handle(&self) -> Arc<SessionTracker> {
        self.session.clone()
    }
}

fn extract_csrf_token(html: &str) -> Option<String> {
    static PATTERN: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
        Regex::new(r#"name=["']_token["']\s+value=["']([^"']+)["']"#).unwrap()
    });
    PATTERN.captures(html).map(|c| c[1].to_string())
}

fn urlencode(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}
