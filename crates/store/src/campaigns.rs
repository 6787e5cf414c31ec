//! Campaign content lookups for the send path.

use std::str::FromStr;

use sqlx::PgPool;
use uuid::Uuid;

use postbote_core::model::{CampaignContent, CampaignStatus, EspKind, SendingProfile};

use crate::error::StoreError;

#[derive(Debug, sqlx::FromRow)]
struct CampaignRow {
    id: Uuid,
    subject: String,
    html_content: String,
    plain_content: String,
    from_name: String,
    from_email: String,
    reply_to: Option<String>,
    status: String,
    profile_id: Option<Uuid>,
    vendor_type: Option<String>,
    profile_from_name: Option<String>,
    profile_from_email: Option<String>,
    credentials: Option<serde_json::Value>,
    ip_pool: Option<String>,
}

/// Fetch a campaign's content plus its sending profile, if any.
///
/// Campaigns without a profile still resolve; the caller decides how
/// to handle them (the default vendor is SES).
pub async fn fetch_content(
    pool: &PgPool,
    campaign_id: Uuid,
) -> Result<Option<CampaignContent>, StoreError> {
    let row: Option<CampaignRow> = sqlx::query_as(
        "SELECT c.id, c.subject, c.html_content, c.plain_content, c.from_name, \
                c.from_email, c.reply_to, c.status, \
                p.id AS profile_id, p.vendor_type, \
                p.from_name AS profile_from_name, p.from_email AS profile_from_email, \
                p.credentials, p.ip_pool \
         FROM campaigns c \
         LEFT JOIN sending_profiles p ON p.id = c.sending_profile_id \
         WHERE c.id = $1",
    )
    .bind(campaign_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status = CampaignStatus::from_str(&row.status)
        .map_err(|e| StoreError::Decode(e.to_string()))?;

    let profile = row.profile_id.map(|id| SendingProfile {
        id,
        kind: EspKind::parse(row.vendor_type.as_deref().unwrap_or("")),
        from_name: row.profile_from_name.unwrap_or_else(|| row.from_name.clone()),
        from_email: row.profile_from_email.unwrap_or_else(|| row.from_email.clone()),
        credentials: row.credentials.unwrap_or(serde_json::Value::Null),
        ip_pool: row.ip_pool,
    });

    Ok(Some(CampaignContent {
        campaign_id: row.id,
        subject: row.subject,
        html_content: row.html_content,
        plain_content: row.plain_content,
        from_name: row.from_name,
        from_email: row.from_email,
        reply_to: row.reply_to,
        status,
        profile,
    }))
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    vendor_type: String,
    from_name: String,
    from_email: String,
    credentials: serde_json::Value,
    ip_pool: Option<String>,
}

/// Fetch one sending profile by id (quota-selected profiles).
pub async fn fetch_profile(
    pool: &PgPool,
    profile_id: Uuid,
) -> Result<Option<SendingProfile>, StoreError> {
    let row: Option<ProfileRow> = sqlx::query_as(
        "SELECT id, vendor_type, from_name, from_email, credentials, ip_pool \
         FROM sending_profiles WHERE id = $1",
    )
    .bind(profile_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| SendingProfile {
        id: r.id,
        kind: EspKind::parse(&r.vendor_type),
        from_name: r.from_name,
        from_email: r.from_email,
        credentials: r.credentials,
        ip_pool: r.ip_pool,
    }))
}
