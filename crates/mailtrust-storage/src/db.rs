//! PostgreSQL pool setup and migrations

use mailtrust_common::config::DatabaseConfig;
use mailtrust_common::{Error, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, warn};

/// Delay before the second connection attempt, doubled after each failure
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(8);

/// Shared connection pool handed to every repository
#[derive(Clone, Debug)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Connect, retrying with backoff up to `connect_attempts` times
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let url = Self::build_url(config)?;
        let attempts = config.connect_attempts.max(1);
        let options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout());

        let mut delay = INITIAL_RETRY_DELAY;
        let mut attempt = 1;
        loop {
            info!(
                backend = %config.backend,
                max_connections = config.max_connections,
                attempt,
                "Connecting to database"
            );
            match options.clone().connect(&url).await {
                Ok(pool) => return Ok(Self { pool }),
                Err(e) if attempt < attempts => {
                    warn!(
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Database not reachable"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(Error::Database(format!(
                        "Failed to connect after {} attempts: {}",
                        attempts, e
                    )))
                }
            }
        }
    }

    fn build_url(config: &DatabaseConfig) -> Result<String> {
        match config.backend.as_str() {
            "postgres" => config
                .url
                .clone()
                .filter(|url| !url.trim().is_empty())
                .ok_or_else(|| Error::Config("database.url is required".to_string())),
            other => Err(Error::Config(format!(
                "Unsupported database backend: {}",
                other
            ))),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Migration failed: {}", e)))
    }

    /// Server version string, also proves the pool can run a query
    pub async fn server_version(&self) -> Result<String> {
        sqlx::query_scalar::<_, String>("SHOW server_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Version query failed: {}", e)))
    }
}

/// Pool for repository tests against a real server.
///
/// Returns `None` unless `MAILTRUST_TEST_DATABASE_URL` is set, so those tests
/// pass trivially on machines without PostgreSQL.
#[cfg(test)]
pub(crate) async fn test_pool() -> Option<DatabasePool> {
    let url = std::env::var("MAILTRUST_TEST_DATABASE_URL").ok()?;
    let config = DatabaseConfig {
        backend: "postgres".to_string(),
        url: Some(url),
        max_connections: 5,
        min_connections: 1,
        acquire_timeout_secs: 10,
        connect_attempts: 1,
    };
    let pool = DatabasePool::new(&config).await.unwrap();
    pool.migrate().await.unwrap();
    Some(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: &str, url: Option<&str>) -> DatabaseConfig {
        DatabaseConfig {
            backend: backend.to_string(),
            url: url.map(str::to_string),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 30,
            connect_attempts: 1,
        }
    }

    #[test]
    fn test_build_url_requires_url() {
        let err = DatabasePool::build_url(&config("postgres", None)).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");

        let err = DatabasePool::build_url(&config("postgres", Some("  "))).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_build_url_rejects_other_backends() {
        let err = DatabasePool::build_url(&config("sqlite", Some("sqlite::memory:"))).unwrap_err();
        assert!(err.to_string().contains("sqlite"));
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_attempts() {
        let mut config = config("postgres", Some("postgres://mailtrust@127.0.0.1:1/none"));
        config.acquire_timeout_secs = 1;
        config.connect_attempts = 2;

        let err = DatabasePool::new(&config).await.unwrap_err();
        assert_eq!(err.code(), "DATABASE_ERROR");
        assert!(err.to_string().contains("after 2 attempts"));
    }

    #[tokio::test]
    async fn test_server_version_against_live_database() {
        let Some(pool) = test_pool().await else {
            return;
        };
        assert!(!pool.server_version().await.unwrap().is_empty());
    }
}
