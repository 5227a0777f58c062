//! Email provider configuration repository

use crate::db::DatabasePool;
use crate::models::{CreateProviderConfig, EmailProviderConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailtrust_common::types::{ProviderConfigId, UserId};
use mailtrust_common::{Error, Result};
use uuid::Uuid;

/// Provider configuration repository trait
#[async_trait]
pub trait ProviderConfigRepository: Send + Sync {
    async fn create(&self, input: CreateProviderConfig) -> Result<EmailProviderConfig>;
    async fn get(&self, user_id: UserId, id: ProviderConfigId)
        -> Result<Option<EmailProviderConfig>>;
    async fn get_default(&self, user_id: UserId) -> Result<Option<EmailProviderConfig>>;
    /// Flag one provider as default and unset every other default of the user atomically
    async fn set_default(&self, user_id: UserId, id: ProviderConfigId) -> Result<()>;
    /// Bump `emails_sent` or `emails_failed` and stamp `last_used_at`
    async fn record_result(
        &self,
        id: ProviderConfigId,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Database provider configuration repository
pub struct DbProviderConfigRepository {
    pool: DatabasePool,
}

impl DbProviderConfigRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderConfigRepository for DbProviderConfigRepository {
    async fn create(&self, input: CreateProviderConfig) -> Result<EmailProviderConfig> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query_as::<_, EmailProviderConfig>(
            r#"
            INSERT INTO email_provider_configs
                (id, user_id, name, provider_type, config, is_active, is_default,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, false, $7, $7)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.user_id)
        .bind(&input.name)
        .bind(input.provider_type.as_str())
        .bind(&input.config)
        .bind(input.is_active)
        .bind(now)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get(
        &self,
        user_id: UserId,
        id: ProviderConfigId,
    ) -> Result<Option<EmailProviderConfig>> {
        sqlx::query_as::<_, EmailProviderConfig>(
            "SELECT * FROM email_provider_configs WHERE user_id = $1 AND id = $2",
        )
        .bind(user_id)
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get_default(&self, user_id: UserId) -> Result<Option<EmailProviderConfig>> {
        sqlx::query_as::<_, EmailProviderConfig>(
            "SELECT * FROM email_provider_configs WHERE user_id = $1 AND is_default",
        )
        .bind(user_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn set_default(&self, user_id: UserId, id: ProviderConfigId) -> Result<()> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE email_provider_configs
            SET is_default = false, updated_at = $2
            WHERE user_id = $1 AND is_default
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE email_provider_configs
            SET is_default = true, updated_at = $3
            WHERE user_id = $1 AND id = $2
            "#,
        )
        .bind(user_id)
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls back the unset
            return Err(Error::NotFound(format!("Provider configuration {}", id)));
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn record_result(
        &self,
        id: ProviderConfigId,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let query = if success {
            r#"
            UPDATE email_provider_configs
            SET emails_sent = emails_sent + 1, last_used_at = $2, updated_at = $2
            WHERE id = $1
            "#
        } else {
            r#"
            UPDATE email_provider_configs
            SET emails_failed = emails_failed + 1, last_used_at = $2, updated_at = $2
            WHERE id = $1
            "#
        };

        let result = sqlx::query(query)
            .bind(id)
            .bind(at)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Provider configuration {}", id)));
        }
        Ok(())
    }
}
