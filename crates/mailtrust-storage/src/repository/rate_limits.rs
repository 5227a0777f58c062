//! Fixed-window rate limit repository

use crate::db::DatabasePool;
use crate::models::RateLimitWindow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mailtrust_common::types::{RateLimitWindowId, ResourceType, UserId};
use mailtrust_common::{Error, Result};
use uuid::Uuid;

/// Result of an attempted counter increment
#[derive(Debug, Clone)]
pub enum IncrementOutcome {
    /// Counter was below the limit and has been incremented
    Incremented(RateLimitWindow),
    /// Counter already at the limit; the window is returned unchanged
    LimitReached(RateLimitWindow),
    /// Window ended (or was purged) before the increment landed
    Expired,
}

/// Rate limit window repository trait
#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    /// Return the window active at `now`, creating a fresh one if none is.
    /// Calls for the same (user, resource) are serialized.
    async fn get_or_create_active(
        &self,
        user_id: UserId,
        resource: ResourceType,
        limit: i32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitWindow>;

    async fn get_active(
        &self,
        user_id: UserId,
        resource: ResourceType,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitWindow>>;

    /// Atomic conditional increment
    async fn try_increment(
        &self,
        id: RateLimitWindowId,
        now: DateTime<Utc>,
    ) -> Result<IncrementOutcome>;

    /// Remove windows that ended at or before `now`
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Database rate limit repository
pub struct DbRateLimitRepository {
    pool: DatabasePool,
}

impl DbRateLimitRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitRepository for DbRateLimitRepository {
    async fn get_or_create_active(
        &self,
        user_id: UserId,
        resource: ResourceType,
        limit: i32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitWindow> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        // Serializes window creation per (user, resource) until commit
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("rate_limit:{}:{}", user_id, resource))
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let existing = sqlx::query_as::<_, RateLimitWindow>(
            r#"
            SELECT * FROM rate_limit_windows
            WHERE user_id = $1 AND resource_type = $2
              AND window_start <= $3 AND window_end > $3
            ORDER BY window_start DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(resource.as_str())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let window = match existing {
            Some(window) => window,
            None => sqlx::query_as::<_, RateLimitWindow>(
                r#"
                INSERT INTO rate_limit_windows
                    (id, user_id, resource_type, window_start, window_end, limit_value,
                     request_count, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, 0, $4, $4)
                RETURNING *
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(user_id)
            .bind(resource.as_str())
            .bind(now)
            .bind(now + window)
            .bind(limit)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?,
        };

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(window)
    }

    async fn get_active(
        &self,
        user_id: UserId,
        resource: ResourceType,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitWindow>> {
        sqlx::query_as::<_, RateLimitWindow>(
            r#"
            SELECT * FROM rate_limit_windows
            WHERE user_id = $1 AND resource_type = $2
              AND window_start <= $3 AND window_end > $3
            ORDER BY window_start DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(resource.as_str())
        .bind(now)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn try_increment(
        &self,
        id: RateLimitWindowId,
        now: DateTime<Utc>,
    ) -> Result<IncrementOutcome> {
        let updated = sqlx::query_as::<_, RateLimitWindow>(
            r#"
            UPDATE rate_limit_windows
            SET request_count = request_count + 1, updated_at = $2
            WHERE id = $1 AND request_count < limit_value AND window_end > $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if let Some(window) = updated {
            return Ok(IncrementOutcome::Incremented(window));
        }

        let current =
            sqlx::query_as::<_, RateLimitWindow>("SELECT * FROM rate_limit_windows WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool.pool())
                .await
                .map_err(|e| Error::Database(e.to_string()))?;

        Ok(match current {
            Some(window) if window.window_end > now => IncrementOutcome::LimitReached(window),
            _ => IncrementOutcome::Expired,
        })
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_windows WHERE window_end <= $1")
            .bind(now)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
