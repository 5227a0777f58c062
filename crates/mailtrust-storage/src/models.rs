//! Database models

use chrono::{DateTime, Utc};
use mailtrust_common::types::{
    ContactId, ContactStatus, DomainId, DomainStatus, ProviderConfigId, ProviderType,
    RateLimitWindowId, UserId,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Sending domain model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub user_id: UserId,
    pub name: String,
    pub status: String,
    pub spf_verified: bool,
    pub dkim_verified: bool,
    pub dmarc_verified: bool,
    pub dkim_selector: String,
    pub dkim_public_key: Option<String>,
    /// Encrypted with the credential vault
    #[serde(skip_serializing)]
    pub dkim_private_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl Domain {
    pub fn status_enum(&self) -> Option<DomainStatus> {
        self.status.parse().ok()
    }

    /// Whether every authentication record passed on the latest check
    pub fn all_verified(&self) -> bool {
        self.spf_verified && self.dkim_verified && self.dmarc_verified
    }
}

/// Create domain input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDomain {
    pub user_id: UserId,
    pub name: String,
    pub dkim_selector: String,
    pub dkim_public_key: String,
    pub dkim_private_key: String,
}

/// Outcome of one verification pass, persisted as a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainCheck {
    pub status: DomainStatus,
    pub spf_verified: bool,
    pub dkim_verified: bool,
    pub dmarc_verified: bool,
    pub checked_at: DateTime<Utc>,
    /// Set only when the domain becomes verified; `None` keeps the stored value
    pub verified_at: Option<DateTime<Utc>>,
}

/// Email provider configuration model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EmailProviderConfig {
    pub id: ProviderConfigId,
    pub user_id: UserId,
    pub name: String,
    pub provider_type: String,
    /// Flat string map; sensitive values are stored encrypted
    pub config: serde_json::Value,
    pub is_active: bool,
    pub is_default: bool,
    pub emails_sent: i64,
    pub emails_failed: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailProviderConfig {
    pub fn provider_type_enum(&self) -> Option<ProviderType> {
        self.provider_type.parse().ok()
    }
}

/// Create provider configuration input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProviderConfig {
    pub user_id: UserId,
    pub name: String,
    pub provider_type: ProviderType,
    pub config: serde_json::Value,
    pub is_active: bool,
}

/// Contact model (deliverability fields)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub user_id: UserId,
    pub email: String,
    pub status: String,
    /// Shared counter compared against the soft bounce threshold
    pub bounce_count: i32,
    pub hard_bounce_count: i32,
    pub soft_bounce_count: i32,
    pub last_bounced_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    /// Optimistic concurrency token
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn status_enum(&self) -> Option<ContactStatus> {
        self.status.parse().ok()
    }
}

/// Create contact input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContact {
    pub user_id: UserId,
    pub email: String,
}

/// Deliverability fields written back with a compare-and-swap on `expected_version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactUpdate {
    pub id: ContactId,
    pub expected_version: i64,
    pub status: ContactStatus,
    pub bounce_count: i32,
    pub hard_bounce_count: i32,
    pub soft_bounce_count: i32,
    pub last_bounced_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Per-user bounce and complaint statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct BounceStatistics {
    pub total_contacts: i64,
    pub hard_bounces: i64,
    pub soft_bounces: i64,
    pub bounced_contacts: i64,
    pub complained_contacts: i64,
    pub unsubscribed_contacts: i64,
}

/// Fixed rate-limit window model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub id: RateLimitWindowId,
    pub user_id: UserId,
    pub resource_type: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub limit_value: i32,
    pub request_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RateLimitWindow {
    /// Active means `window_start <= now < window_end`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.window_start <= now && now < self.window_end
    }

    pub fn is_exhausted(&self) -> bool {
        self.request_count >= self.limit_value
    }

    pub fn remaining(&self) -> i32 {
        (self.limit_value - self.request_count).max(0)
    }
}
