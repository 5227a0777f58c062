//! MailTrust - Deliverability worker entry point

use anyhow::Result;
use mailtrust_common::config::{Config, LoggingConfig};
use mailtrust_core::{
    CredentialVault, DeliverabilityMetrics, DnsTrustVerifier, QuotaEnforcer, SystemResolver,
    TrustScheduler, TrustStateMachine,
};
use mailtrust_storage::repository::{DbDomainRepository, DbRateLimitRepository};
use mailtrust_storage::DatabasePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Expired rate-limit windows are purged this often
const WINDOW_CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_logging(&config.logging);

    info!(
        hostname = %config.server.hostname,
        environment = ?config.server.environment,
        "Starting MailTrust deliverability worker"
    );

    // Fails in production when no key is configured
    let vault = Arc::new(CredentialVault::from_config(
        &config.security,
        config.server.environment,
    )?);

    let db_pool = DatabasePool::new(&config.database).await?;
    let version = db_pool.server_version().await?;
    info!(server_version = %version, "Database connection established");

    db_pool.migrate().await?;
    info!("Database migrations completed");

    let metrics = DeliverabilityMetrics::new()?;

    let resolver = Arc::new(SystemResolver::from_config(&config.verification)?);
    let verifier = Arc::new(DnsTrustVerifier::new(
        resolver,
        &config.verification.spf_include,
        config.verification.dns_timeout(),
    ));
    let machine = Arc::new(
        TrustStateMachine::new(
            Arc::new(DbDomainRepository::new(db_pool.clone())),
            verifier,
            vault,
            &config.verification,
        )
        .with_metrics(metrics.clone()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Arc::new(TrustScheduler::new(machine, &config.verification));
    let mut handles = scheduler.spawn(shutdown_rx.clone());

    let quota = Arc::new(
        QuotaEnforcer::new(
            Arc::new(DbRateLimitRepository::new(db_pool.clone())),
            config.quota.clone(),
        )
        .with_metrics(metrics),
    );
    handles.push(tokio::spawn(run_window_cleanup(quota, shutdown_rx)));

    info!("MailTrust worker started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Background task ended abnormally: {}", e);
        }
    }

    info!("MailTrust worker shutdown complete");
    Ok(())
}

async fn run_window_cleanup(quota: Arc<QuotaEnforcer>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(WINDOW_CLEANUP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = quota.cleanup_expired().await {
                    error!("Error cleaning up rate limit windows: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},mailtrust=debug", logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
