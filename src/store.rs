//! Cache store. Owns writes to `boat_cache` and `booking_cache`.
//! Raw `sqlx::query(...).bind(...)` throughout, with manual `sqlx::Row` mapping
//! rather than the compile-time-checked query macros.

use chrono::{NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Boat, BoatCategory, Classification, DateRange, FetchedBooking};

#[derive(Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert-or-update keyed on `(tenant_id, external_id)`.
    pub async fn store_boats(&self, tenant_id: &str, boats: &[Boat]) -> Result<()> {
        for boat in boats {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT id FROM boat_cache WHERE club_id = ?1 AND revsport_boat_id = ?2")
                    .bind(tenant_id)
                    .bind(&boat.external_id)
                    .fetch_optional(&self.pool)
                    .await?;

            let category = category_to_str(boat.category);
            let classification = boat.classification.map(classification_to_str);
            let metadata = boat.metadata.to_string();

            if let Some(id) = existing {
                sqlx::query(
                    "UPDATE boat_cache SET name = ?1, boat_type = ?2, category = ?3,
                     classification = ?4, weight_kg = ?5, is_damaged = ?6, damaged_reason = ?7,
                     metadata = ?8, last_scraped_at = ?9 WHERE id = ?10",
                )
                .bind(&boat.name)
                .bind(&boat.boat_type)
                .bind(category)
                .bind(classification)
                .bind(boat.weight_kg.map(|w| w as i64))
                .bind(boat.is_damaged)
                .bind(&boat.damaged_reason)
                .bind(metadata)
                .bind(boat.last_scraped_at)
                .bind(id)
                .execute(&self.pool)
                .await?;
            } else {
                sqlx::query(
                    "INSERT INTO boat_cache
                     (id, club_id, revsport_boat_id, name, boat_type, category, classification,
                      weight_kg, is_damaged, damaged_reason, metadata, last_scraped_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(tenant_id)
                .bind(&boat.external_id)
                .bind(&boat.name)
                .bind(&boat.boat_type)
                .bind(category)
                .bind(classification)
                .bind(boat.weight_kg.map(|w| w as i64))
                .bind(boat.is_damaged)
                .bind(&boat.damaged_reason)
                .bind(metadata)
                .bind(boat.last_scraped_at)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Atomic range replace. Returns the number of bookings dropped
    /// because they referenced an unknown boat (the caller surfaces these as warnings).
    pub async fn store_bookings(
        &self,
        tenant_id: &str,
        range: DateRange,
        bookings: &[FetchedBooking],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM booking_cache WHERE club_id = ?1 AND booking_date >= ?2 AND booking_date <= ?3",
        )
        .bind(tenant_id)
        .bind(range.start.format("%Y-%m-%d").to_string())
        .bind(range.end.format("%Y-%m-%d").to_string())
        .execute(&mut *tx)
        .await?;

        let boat_map = Self::boat_id_map_tx(&mut tx, tenant_id).await?;

        let mut dropped = 0usize;
        const INSERT_BATCH: usize = 100;

        let resolvable: Vec<&FetchedBooking> = bookings
            .iter()
            .filter(|b| {
                let known = boat_map.contains_key(&b.external_boat_id);
                if !known {
                    dropped += 1;
                }
                known
            })
            .collect();

        for batch in resolvable.chunks(INSERT_BATCH) {
            for booking in batch {
                let internal_boat_id = &boat_map[&booking.external_boat_id];
                sqlx::query(
                    "INSERT INTO booking_cache
                     (id, club_id, boat_id, booking_date, external_id, start_time, end_time,
                      member_name, session_name, raw_payload)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(tenant_id)
                .bind(internal_boat_id)
                .bind(booking.date.format("%Y-%m-%d").to_string())
                .bind(&booking.payload.external_id)
                .bind(&booking.payload.start_time)
                .bind(&booking.payload.end_time)
                .bind(&booking.payload.member_name)
                .bind(&booking.payload.session_name)
                .bind(booking.payload.raw.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(dropped)
    }

    /// External-id-to-internal-id lookup. Used internally during range replace; exposed for
    /// callers (e.g. the sync transaction) that need to pre-check boat resolution.
    pub async fn boat_id_map(&self, tenant_id: &str) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT id, revsport_boat_id FROM boat_cache WHERE club_id = ?1")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("revsport_boat_id"), row.get::<String, _>("id")))
            .collect())
    }

    async fn boat_id_map_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        tenant_id: &str,
    ) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT id, revsport_boat_id FROM boat_cache WHERE club_id = ?1")
            .bind(tenant_id)
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("revsport_boat_id"), row.get::<String, _>("id")))
            .collect())
    }

    /// Count of cached boats for a tenant — used by the sync transaction to decide
    /// whether a zero-boat parse result looks like a parser regression rather
    /// than a genuinely empty fleet.
    pub async fn count_boats(&self, tenant_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM boat_cache WHERE club_id = ?1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn boats_for_tenant(&self, tenant_id: &str) -> Result<Vec<Boat>> {
        let rows = sqlx::query("SELECT * FROM boat_cache WHERE club_id = ?1")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_boat).collect()
    }

    pub async fn bookings_for_range(
        &self,
        tenant_id: &str,
        range: DateRange,
    ) -> Result<Vec<(String, NaiveDate)>> {
        let rows = sqlx::query(
            "SELECT id, booking_date FROM booking_cache
             WHERE club_id = ?1 AND booking_date >= ?2 AND booking_date <= ?3",
        )
        .bind(tenant_id)
        .bind(range.start.format("%Y-%m-%d").to_string())
        .bind(range.end.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let date_str: String = row.get("booking_date");
                let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").unwrap_or_default();
                (row.get::<String, _>("id"), date)
            })
            .collect())
    }

    pub async fn last_scrape_time(&self, tenant_id: &str) -> Result<Option<chrono::DateTime<Utc>>> {
        let row: Option<chrono::DateTime<Utc>> = sqlx::query_scalar(
            "SELECT completed_at FROM scrape_jobs
             WHERE club_id = ?1 AND status = 'completed'
             ORDER BY completed_at DESC LIMIT 1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

fn category_to_str(c: BoatCategory) -> &'static str {
    match c {
        BoatCategory::Race => "race",
        BoatCategory::Tinnie => "tinnie",
    }
}

fn classification_to_str(c: Classification) -> &'static str {
    match c {
        Classification::R => "R",
        Classification::T => "T",
        Classification::RT => "RT",
    }
}

fn row_to_boat(row: sqlx::sqlite::SqliteRow) -> Result<Boat> {
    let category_str: String = row.get("category");
    let category = match category_str.as_str() {
        "tinnie" => BoatCategory::Tinnie,
        _ => BoatCategory::Race,
    };
    let classification: Option<String> = row.get("classification");
    let classification = classification.and_then(|c| match c.as_str() {
        "R" => Some(Classification::R),
        "T" => Some(Classification::T),
        "RT" => Some(Classification::RT),
        _ => None,
    });
    let metadata_str: String = row.get("metadata");
    let metadata = serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null);
    let weight_kg: Option<i64> = row.get("weight_kg");

    Ok(Boat {
        id: row.get("id"),
        tenant_id: row.get("club_id"),
        external_id: row.get("revsport_boat_id"),
        name: row.get("name"),
        boat_type: row.get("boat_type"),
        category,
        classification,
        weight_kg: weight_kg.map(|w| w as u32),
        is_damaged: row.get("is_damaged"),
        damaged_reason: row.get("damaged_reason"),
        metadata,
        last_scraped_at: row.get("last_scraped_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookingPayload;
    use chrono::NaiveDate;

    async fn test_store() -> CacheStore {
        let pool = crate::db::init_db("sqlite::memory:").await.unwrap();
        CacheStore::new(pool)
    }

    fn boat(tenant: &str, external_id: &str, name: &str) -> Boat {
        Boat {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant.to_string(),
            external_id: external_id.to_string(),
            name: name.to_string(),
            boat_type: Some("1X".to_string()),
            category: BoatCategory::Race,
            classification: Some(Classification::R),
            weight_kg: Some(85),
            is_damaged: false,
            damaged_reason: None,
            metadata: serde_json::json!({}),
            last_scraped_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn boat_upsert_is_idempotent_on_external_id() {
        let store = test_store().await;
        store.store_boats("acme", &[boat("acme", "101", "Skiff")]).await.unwrap();
        store.store_boats("acme", &[boat("acme", "101", "Skiff Renamed")]).await.unwrap();

        let boats = store.boats_for_tenant("acme").await.unwrap();
        assert_eq!(boats.len(), 1);
        assert_eq!(boats[0].name, "Skiff Renamed");
    }

    #[tokio::test]
    async fn range_replace_wipes_only_the_window() {
        let store = test_store().await;
        store.store_boats("acme", &[boat("acme", "101", "Skiff")]).await.unwrap();

        let old_range = DateRange::new(
            NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
        );
        let fb = |date: NaiveDate| FetchedBooking {
            external_boat_id: "101".to_string(),
            date,
            payload: BookingPayload {
                external_id: None,
                start_time: "09:00".to_string(),
                end_time: "10:00".to_string(),
                member_name: "A Rower".to_string(),
                session_name: None,
                raw: serde_json::json!({}),
            },
        };
        store
            .store_bookings("acme", old_range, &[fb(old_range.start)])
            .await
            .unwrap();

        let new_range = DateRange::new(
            NaiveDate::from_ymd_opt(2026, 7, 28).unwrap(),
            NaiveDate::from_ymd_opt(2026, 8, 4).unwrap(),
        );
        store
            .store_bookings("acme", new_range, &[fb(NaiveDate::from_ymd_opt(2026, 7, 29).unwrap())])
            .await
            .unwrap();

        let old_rows = store.bookings_for_range("acme", old_range).await.unwrap();
        assert_eq!(old_rows.len(), 1, "booking outside the new window must survive untouched");

        let new_rows = store.bookings_for_range("acme", new_range).await.unwrap();
        assert_eq!(new_rows.len(), 1);
    }

    #[tokio::test]
    async fn unresolvable_bookings_are_dropped_not_inserted() {
        let store = test_store().await;
        store.store_boats("acme", &[boat("acme", "101", "Skiff")]).await.unwrap();

        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2026, 7, 28).unwrap(),
            NaiveDate::from_ymd_opt(2026, 7, 28).unwrap(),
        );
        let unknown = FetchedBooking {
            external_boat_id: "999-unknown".to_string(),
            date: range.start,
            payload: BookingPayload {
                external_id: None,
                start_time: "09:00".to_string(),
                end_time: "10:00".to_string(),
                member_name: "A Rower".to_string(),
                session_name: None,
                raw: serde_json::json!({}),
            },
        };

        let dropped = store.store_bookings("acme", range, &[unknown]).await.unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(store.bookings_for_range("acme", range).await.unwrap().len(), 0);
    }
}
