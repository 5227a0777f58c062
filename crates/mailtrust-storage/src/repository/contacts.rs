//! Contact repository (deliverability fields)

use crate::db::DatabasePool;
use crate::models::{BounceStatistics, Contact, ContactUpdate, CreateContact};
use async_trait::async_trait;
use mailtrust_common::types::{ContactId, ContactStatus, UserId};
use mailtrust_common::{Error, Result};
use uuid::Uuid;

/// Contact repository trait
#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn create(&self, input: CreateContact) -> Result<Contact>;
    async fn get(&self, id: ContactId) -> Result<Option<Contact>>;
    /// Lookup by address, scoped to one user
    async fn find_by_email(&self, user_id: UserId, email: &str) -> Result<Option<Contact>>;
    /// Compare-and-swap on `version`; `Ok(None)` means the row changed underneath
    async fn update_deliverability(&self, update: ContactUpdate) -> Result<Option<Contact>>;
    async fn statistics(&self, user_id: UserId) -> Result<BounceStatistics>;
}

/// Database contact repository
pub struct DbContactRepository {
    pool: DatabasePool,
}

impl DbContactRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactRepository for DbContactRepository {
    async fn create(&self, input: CreateContact) -> Result<Contact> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();

        sqlx::query_as::<_, Contact>(
            r#"
            INSERT INTO contacts (id, user_id, email, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.user_id)
        .bind(input.email.trim().to_ascii_lowercase())
        .bind(ContactStatus::Active.as_str())
        .bind(now)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::Conflict(format!("Contact {} already exists", input.email))
            }
            other => Error::Database(other.to_string()),
        })
    }

    async fn get(&self, id: ContactId) -> Result<Option<Contact>> {
        sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn find_by_email(&self, user_id: UserId, email: &str) -> Result<Option<Contact>> {
        sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE user_id = $1 AND email = $2")
            .bind(user_id)
            .bind(email.trim().to_ascii_lowercase())
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn update_deliverability(&self, update: ContactUpdate) -> Result<Option<Contact>> {
        sqlx::query_as::<_, Contact>(
            r#"
            UPDATE contacts
            SET status = $3,
                bounce_count = $4,
                hard_bounce_count = $5,
                soft_bounce_count = $6,
                last_bounced_at = $7,
                unsubscribed_at = $8,
                notes = $9,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(update.id)
        .bind(update.expected_version)
        .bind(update.status.as_str())
        .bind(update.bounce_count)
        .bind(update.hard_bounce_count)
        .bind(update.soft_bounce_count)
        .bind(update.last_bounced_at)
        .bind(update.unsubscribed_at)
        .bind(&update.notes)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn statistics(&self, user_id: UserId) -> Result<BounceStatistics> {
        sqlx::query_as::<_, BounceStatistics>(
            r#"
            SELECT
                COUNT(*)::BIGINT AS total_contacts,
                COALESCE(SUM(hard_bounce_count), 0)::BIGINT AS hard_bounces,
                COALESCE(SUM(soft_bounce_count), 0)::BIGINT AS soft_bounces,
                COUNT(*) FILTER (WHERE status = 'bounced')::BIGINT AS bounced_contacts,
                COUNT(*) FILTER (WHERE status = 'complained')::BIGINT AS complained_contacts,
                COUNT(*) FILTER (WHERE status = 'unsubscribed')::BIGINT AS unsubscribed_contacts
            FROM contacts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
