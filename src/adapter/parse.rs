//! HTML-to-boat and JSON-to-booking parsing. Regex-driven recovery with a
//! `once_cell::sync::Lazy<Regex>` set — the HTML shape here is liable to drift
//! whenever the upstream portal changes its markup, hence `ScrapeError::Parse`
//! rather than a panic whenever an assumption doesn't hold.

use chrono::{DateTime, FixedOffset, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

use crate::error::{Result, ScrapeError};
use crate::model::{Boat, BoatCategory, Classification, FetchedBooking};

static TYPE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<type>8\+|4\+|4-|2-|8X|4X|2X|1X)(?:/(?P<sweep>-))?").unwrap());
static RACER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)RACER").unwrap());
static TINNIE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*Tinnie\b").unwrap());
static WEIGHT_KG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{2,3})\s*KG").unwrap());
static NICKNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([^()]+)\)\s*$").unwrap());
static DAMAGED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)damaged").unwrap());
static CALENDAR_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/bookings/(?:retrieve-)?calendar/([^/?#]+)").unwrap());

const DAMAGE_REASON: &str = "Marked as damaged in RevSport";

/// One bookable-asset "card" extracted from the index page, before it is typed
/// as a `Boat` — this is the seam unit tests exercise because it needs no HTML
/// parsing, only the fields a real card would expose.
#[derive(Debug, Clone)]
pub struct BoatCard {
    pub title: String,
    pub has_danger_badge: bool,
    pub calendar_href: Option<String>,
}

/// Parses the full bookings-index HTML document into boats, recording a
/// warning for every card skipped because it lacked a calendar link.
pub fn parse_boats_html(html: &str, now: DateTime<Utc>) -> (Vec<Boat>, Vec<String>) {
    let document = Html::parse_document(html);
    // Assumes the upstream renders one bookable asset per `.boat-card` element,
    // with the display name in `.boat-title` and a "danger" badge class marking
    // damage. If the upstream changes this markup, `card_selector` simply stops
    // matching and `get_boats` degenerates to an empty list rather than a
    // parser panic.
    let card_selector = Selector::parse("div.boat-card, li.boat-card, article.boat-card").unwrap();
    let title_selector = Selector::parse(".boat-title, .card-title, h3, h4").unwrap();
    let link_selector = Selector::parse("a[href]").unwrap();

    let mut boats = Vec::new();
    let mut warnings = Vec::new();

    for card in document.select(&card_selector) {
        let title = card
            .select(&title_selector)
            .next()
            .map(|t| t.text().collect::<String>())
            .unwrap_or_else(|| card.text().collect::<String>());
        let title = title.trim().to_string();

        let calendar_href = card
            .select(&link_selector)
            .filter_map(|a| a.value().attr("href"))
            .find(|href| CALENDAR_LINK.is_match(href))
            .map(str::to_string);

        let has_danger_badge = card
            .value()
            .attr("class")
            .map(|c| c.contains("danger"))
            .unwrap_or(false)
            || card.select(&Selector::parse(".badge-danger, .danger").unwrap()).next().is_some();

        let card_data = BoatCard { title: title.clone(), has_danger_badge, calendar_href };

        match parse_boat_card(&card_data, now) {
            Some(boat) => boats.push(boat),
            None => warnings.push(format!(
                "skipped boat card {:?}: no calendar link found",
                title
            )),
        }
    }

    (boats, warnings)
}

/// Pure parsing of a single card's already-extracted fields. Returns
/// `None` when the card has no calendar link — such cards are skipped, never
/// stored with a synthetic id.
pub fn parse_boat_card(card: &BoatCard, now: DateTime<Utc>) -> Option<Boat> {
    let external_id = card
        .calendar_href
        .as_deref()
        .and_then(|href| CALENDAR_LINK.captures(href))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())?;

    let title = card.title.trim();

    let is_damaged = DAMAGED.is_match(title) || card.has_danger_badge;
    let damaged_reason = is_damaged.then(|| DAMAGE_REASON.to_string());

    let (boat_type, category, classification) = if TINNIE_PREFIX.is_match(title) {
        (None, BoatCategory::Tinnie, None)
    } else if let Some(caps) = TYPE_PREFIX.captures(title) {
        let mut boat_type = caps.name("type").unwrap().as_str().to_string();
        if caps.name("sweep").is_some() {
            boat_type.push_str("/-");
        }
        let classification = if RACER.is_match(title) { Classification::R } else { Classification::T };
        (Some(boat_type), BoatCategory::Race, Some(classification))
    } else {
        let classification = if RACER.is_match(title) { Classification::R } else { Classification::T };
        (None, BoatCategory::Race, Some(classification))
    };

    let weight_kg = WEIGHT_KG.captures(title).and_then(|c| c.get(1)).and_then(|m| m.as_str().parse().ok());

    let mut metadata = serde_json::Map::new();
    if let Some(caps) = NICKNAME.captures(title) {
        metadata.insert("nickname".to_string(), serde_json::Value::String(caps[1].to_string()));
    }

    Some(Boat {
        id: uuid::Uuid::new_v4().to_string(),
        tenant_id: String::new(), // filled in by the caller, which knows the tenant
        external_id,
        name: title.to_string(),
        boat_type,
        category,
        classification,
        weight_kg,
        is_damaged,
        damaged_reason,
        metadata: serde_json::Value::Object(metadata),
        last_scraped_at: now,
    })
}

/// The fields of an upstream calendar record this adapter actually reads.
/// The record may carry more (`url`, `extendedProps`, ...) — those ride along
/// untouched in the caller's copy of the raw `serde_json::Value` rather than
/// being named here.
#[derive(Debug, Clone, serde::Deserialize)]
struct BookingFields {
    id: Option<serde_json::Value>,
    title: String,
    start: String,
    end: String,
}

/// Parses a calendar JSON response body into `FetchedBooking`s tied to the
/// boat that was queried. `external_boat_id` is the id of the
/// boat whose calendar endpoint produced this body — the upstream response
/// itself carries no boat identifier.
pub fn parse_bookings_json(body: &str, external_boat_id: &str) -> Result<Vec<FetchedBooking>> {
    let records: Vec<serde_json::Value> = serde_json::from_str(body)
        .map_err(|e| ScrapeError::Parse(format!("malformed booking calendar JSON: {e}")))?;

    records
        .into_iter()
        .map(|record| parse_booking_record(record, external_boat_id))
        .collect()
}

fn parse_booking_record(record: serde_json::Value, external_boat_id: &str) -> Result<FetchedBooking> {
    let fields: BookingFields = serde_json::from_value(record.clone())
        .map_err(|e| ScrapeError::Parse(format!("malformed booking record: {e}")))?;

    let start = parse_offset_datetime(&fields.start)?;
    let end = parse_offset_datetime(&fields.end)?;

    let external_id = fields.id.map(|v| match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    });

    let member_name = fields
        .title
        .strip_prefix("Booked by ")
        .unwrap_or(&fields.title)
        .to_string();

    Ok(FetchedBooking {
        external_boat_id: external_boat_id.to_string(),
        date: start.date_naive(),
        payload: crate::model::BookingPayload {
            external_id,
            start_time: start.format("%H:%M").to_string(),
            end_time: end.format("%H:%M").to_string(),
            member_name,
            session_name: None,
            // The complete upstream record — `id`, `title`, `start`, `end`,
            // and whatever else it carries (`url`, `extendedProps`, ...) —
            // preserved verbatim rather than rebuilt from the fields we parsed.
            raw: record,
        },
    })
}

fn parse_offset_datetime(raw: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw)
        .map_err(|e| ScrapeError::Parse(format!("malformed ISO-8601 timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(title: &str, href: Option<&str>, danger: bool) -> BoatCard {
        BoatCard {
            title: title.to_string(),
            has_danger_badge: danger,
            calendar_href: href.map(str::to_string),
        }
    }

    #[test]
    fn skips_cards_without_a_calendar_link() {
        let c = card("1X Racer", None, false);
        assert!(parse_boat_card(&c, Utc::now()).is_none());
    }

    #[test]
    fn parses_racer_single_scull() {
        let c = card("1X RACER Speedy (Thunderbird)", Some("/bookings/calendar/42"), false);
        let boat = parse_boat_card(&c, Utc::now()).unwrap();
        assert_eq!(boat.external_id, "42");
        assert_eq!(boat.boat_type.as_deref(), Some("1X"));
        assert_eq!(boat.category, BoatCategory::Race);
        assert_eq!(boat.classification, Some(Classification::R));
        assert_eq!(boat.metadata["nickname"], "Thunderbird");
    }

    #[test]
    fn parses_training_sweep_combined_token() {
        let c = card("2X/- Training Pair", Some("/bookings/retrieve-calendar/7"), false);
        let boat = parse_boat_card(&c, Utc::now()).unwrap();
        assert_eq!(boat.boat_type.as_deref(), Some("2X/-"));
        assert_eq!(boat.classification, Some(Classification::T));
    }

    #[test]
    fn parses_tinnie_with_no_type_or_classification() {
        let c = card("Tinnie Rescue Boat", Some("/bookings/calendar/9"), false);
        let boat = parse_boat_card(&c, Utc::now()).unwrap();
        assert_eq!(boat.category, BoatCategory::Tinnie);
        assert!(boat.boat_type.is_none());
        assert!(boat.classification.is_none());
    }

    #[test]
    fn extracts_weight_in_kg() {
        let c = card("4X RACER Big Boat 95KG", Some("/bookings/calendar/3"), false);
        let boat = parse_boat_card(&c, Utc::now()).unwrap();
        assert_eq!(boat.weight_kg, Some(95));
    }

    #[test]
    fn detects_damage_from_name_substring() {
        let c = card("1X damaged hull", Some("/bookings/calendar/5"), false);
        let boat = parse_boat_card(&c, Utc::now()).unwrap();
        assert!(boat.is_damaged);
        assert_eq!(boat.damaged_reason.as_deref(), Some(DAMAGE_REASON));
    }

    #[test]
    fn detects_damage_from_danger_badge_even_without_name_hint() {
        let c = card("1X RACER Fine Name", Some("/bookings/calendar/6"), true);
        let boat = parse_boat_card(&c, Utc::now()).unwrap();
        assert!(boat.is_damaged);
    }

    #[test]
    fn parses_boats_from_html_document() {
        let html = r#"
            <html><body>
              <div class="boat-card">
                <h3 class="boat-title">1X RACER Nice Boat</h3>
                <a href="/bookings/calendar/101">Calendar</a>
              </div>
              <div class="boat-card">
                <h3 class="boat-title">2X Training No Link</h3>
              </div>
            </body></html>
        "#;
        let (boats, warnings) = parse_boats_html(html, Utc::now());
        assert_eq!(boats.len(), 1);
        assert_eq!(boats[0].external_id, "101");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn booking_json_strips_booked_by_prefix_and_splits_times() {
        let body = r#"[{"id": 55, "title": "Booked by Jane Doe", "start": "2026-07-28T09:00:00+10:00", "end": "2026-07-28T10:30:00+10:00"}]"#;
        let bookings = parse_bookings_json(body, "101").unwrap();
        assert_eq!(bookings.len(), 1);
        let b = &bookings[0];
        assert_eq!(b.external_boat_id, "101");
        assert_eq!(b.payload.member_name, "Jane Doe");
        assert_eq!(b.payload.start_time, "09:00");
        assert_eq!(b.payload.end_time, "10:30");
        assert_eq!(b.payload.external_id.as_deref(), Some("55"));
    }

    #[test]
    fn booking_json_preserves_the_full_upstream_record() {
        let body = r#"[{"id": 55, "title": "Booked by Jane Doe", "start": "2026-07-28T09:00:00+10:00",
                        "end": "2026-07-28T10:30:00+10:00", "url": "/bookings/55",
                        "extendedProps": {"boatId": 101, "notes": "bow seat"}}]"#;
        let bookings = parse_bookings_json(body, "101").unwrap();
        let raw = &bookings[0].payload.raw;
        assert_eq!(raw["url"], "/bookings/55");
        assert_eq!(raw["extendedProps"]["boatId"], 101);
        assert_eq!(raw["extendedProps"]["notes"], "bow seat");
    }

    #[test]
    fn booking_json_rejects_malformed_payload() {
        let err = parse_bookings_json("not json", "101").unwrap_err();
        assert!(matches!(err, ScrapeError::Parse(_)));
    }
}
