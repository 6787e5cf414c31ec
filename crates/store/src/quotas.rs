//! Campaign ESP quota lookups.
//!
//! A campaign with quota rows splits its volume across several sending
//! profiles; one without any uses its single configured profile.

use sqlx::PgPool;
use uuid::Uuid;

use postbote_core::model::EspQuota;

use crate::error::StoreError;

#[derive(Debug, sqlx::FromRow)]
struct QuotaRow {
    profile_id: Uuid,
    percentage: i32,
}

/// Fetch a campaign's quota list in configured order. Empty when the
/// campaign routes everything through its default profile.
pub async fn fetch_quotas(pool: &PgPool, campaign_id: Uuid) -> Result<Vec<EspQuota>, StoreError> {
    let rows: Vec<QuotaRow> = sqlx::query_as(
        "SELECT profile_id, percentage \
         FROM campaign_esp_quotas \
         WHERE campaign_id = $1 \
         ORDER BY position ASC",
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| EspQuota::new(r.profile_id, r.percentage))
        .collect())
}
