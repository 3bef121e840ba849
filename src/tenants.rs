//! Read-only access to the `clubs` table — owned by the admin flow, read-only
//! to the core. Same `sqlx::query` + manual row mapping idiom as `store.rs`.

use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::model::{Tenant, TenantStatus};

pub async fn list_active(pool: &SqlitePool) -> Result<Vec<Tenant>> {
    let rows = sqlx::query("SELECT * FROM clubs WHERE status = 'active'")
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(row_to_tenant).collect()
}

fn row_to_tenant(row: sqlx::sqlite::SqliteRow) -> Result<Tenant> {
    let status_str: String = row.get("status");
    let status = if status_str == "active" { TenantStatus::Active } else { TenantStatus::Suspended };

    Ok(Tenant {
        id: row.get("id"),
        name: row.get("name"),
        subdomain: row.get("subdomain"),
        timezone: row.get("timezone"),
        status,
        base_url: row.get("base_url"),
        credentials_blob: row.get("credentials_blob"),
    })
}
