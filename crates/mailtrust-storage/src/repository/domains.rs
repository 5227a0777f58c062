//! Domain repository

use crate::db::DatabasePool;
use crate::models::{CreateDomain, Domain, DomainCheck};
use async_trait::async_trait;
use mailtrust_common::types::{DomainId, DomainStatus, UserId};
use mailtrust_common::{Error, Result};
use uuid::Uuid;

/// Domain repository trait
#[async_trait]
pub trait DomainRepository: Send + Sync {
    async fn create(&self, input: CreateDomain) -> Result<Domain>;
    async fn get_for_user(&self, user_id: UserId, id: DomainId) -> Result<Option<Domain>>;
    async fn find_by_name(&self, name: &str) -> Result<Option<Domain>>;
    async fn list_by_status(&self, status: DomainStatus) -> Result<Vec<Domain>>;
    async fn list_all(&self) -> Result<Vec<Domain>>;
    /// Persist the status, flags and timestamps of one check
    async fn record_check(&self, id: DomainId, check: DomainCheck) -> Result<Domain>;
}

/// Database domain repository
pub struct DbDomainRepository {
    pool: DatabasePool,
}

impl DbDomainRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DomainRepository for DbDomainRepository {
    async fn create(&self, input: CreateDomain) -> Result<Domain> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();

        sqlx::query_as::<_, Domain>(
            r#"
            INSERT INTO domains (id, user_id, name, status, dkim_selector, dkim_public_key,
                                 dkim_private_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.user_id)
        .bind(&input.name)
        .bind(DomainStatus::Pending.as_str())
        .bind(&input.dkim_selector)
        .bind(&input.dkim_public_key)
        .bind(&input.dkim_private_key)
        .bind(now)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::Conflict(format!("Domain {} already exists", input.name))
            }
            other => Error::Database(other.to_string()),
        })
    }

    async fn get_for_user(&self, user_id: UserId, id: DomainId) -> Result<Option<Domain>> {
        sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE user_id = $1 AND id = $2")
            .bind(user_id)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Domain>> {
        sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE name = $1")
            .bind(name.to_ascii_lowercase())
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_by_status(&self, status: DomainStatus) -> Result<Vec<Domain>> {
        sqlx::query_as::<_, Domain>(
            "SELECT * FROM domains WHERE status = $1 ORDER BY created_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_all(&self) -> Result<Vec<Domain>> {
        sqlx::query_as::<_, Domain>("SELECT * FROM domains ORDER BY created_at ASC")
            .fetch_all(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn record_check(&self, id: DomainId, check: DomainCheck) -> Result<Domain> {
        sqlx::query_as::<_, Domain>(
            r#"
            UPDATE domains
            SET status = $2,
                spf_verified = $3,
                dkim_verified = $4,
                dmarc_verified = $5,
                last_checked_at = $6,
                verified_at = COALESCE($7, verified_at),
                updated_at = $6
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(check.status.as_str())
        .bind(check.spf_verified)
        .bind(check.dkim_verified)
        .bind(check.dmarc_verified)
        .bind(check.checked_at)
        .bind(check.verified_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?
        .ok_or_else(|| Error::NotFound(format!("Domain {}", id)))
    }
}
