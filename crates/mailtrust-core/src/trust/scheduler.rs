//! Periodic domain verification sweeps
//!
//! Two independent loops: an hourly sweep over pending domains and a weekly
//! sweep over every domain. Items run concurrently under a semaphore; a
//! failing or hanging domain never stops its siblings.

use super::machine::TrustStateMachine;
use mailtrust_common::config::VerificationConfig;
use mailtrust_common::types::DomainStatus;
use mailtrust_common::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

/// Which domains a sweep covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    /// Domains currently pending
    Pending,
    /// Every domain regardless of status
    All,
}

impl std::fmt::Display for SweepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepKind::Pending => write!(f, "pending"),
            SweepKind::All => write!(f, "all"),
        }
    }
}

/// Counts of resulting statuses for one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub checked: usize,
    pub verified: usize,
    pub partial: usize,
    pub pending: usize,
    pub failed: usize,
    pub error: usize,
    /// Items whose check itself failed (storage error, panic)
    pub errors: usize,
}

impl SweepSummary {
    fn record(&mut self, status: Option<DomainStatus>) {
        self.checked += 1;
        match status {
            Some(DomainStatus::Verified) => self.verified += 1,
            Some(DomainStatus::Partial) => self.partial += 1,
            Some(DomainStatus::Pending) => self.pending += 1,
            Some(DomainStatus::Failed) => self.failed += 1,
            Some(DomainStatus::Error) | None => self.error += 1,
        }
    }
}

pub struct TrustScheduler {
    machine: Arc<TrustStateMachine>,
    concurrency: usize,
    pending_interval: Duration,
    full_interval: Duration,
}

impl TrustScheduler {
    pub fn new(machine: Arc<TrustStateMachine>, config: &VerificationConfig) -> Self {
        Self {
            machine,
            concurrency: config.sweep_concurrency.max(1),
            pending_interval: Duration::from_secs(config.pending_sweep_interval_secs),
            full_interval: Duration::from_secs(config.full_sweep_interval_secs),
        }
    }

    /// Check every domain selected by `kind` once
    pub async fn run_sweep(&self, kind: SweepKind) -> Result<SweepSummary> {
        let domains = match kind {
            SweepKind::Pending => {
                self.machine
                    .domains()
                    .list_by_status(DomainStatus::Pending)
                    .await?
            }
            SweepKind::All => self.machine.domains().list_all().await?,
        };

        info!(sweep = %kind, domains = domains.len(), "Starting domain sweep");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for domain in domains {
            let machine = self.machine.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let name = domain.name.clone();
                (name, machine.check_domain(&domain).await)
            });
        }

        let mut summary = SweepSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => summary.record(outcome.domain.status_enum()),
                Ok((name, Err(e))) => {
                    error!(domain = %name, error = %e, "Domain check failed");
                    summary.errors += 1;
                }
                Err(e) => {
                    error!(error = %e, "Domain check task aborted");
                    summary.errors += 1;
                }
            }
        }

        info!(
            sweep = %kind,
            checked = summary.checked,
            verified = summary.verified,
            partial = summary.partial,
            failed = summary.failed,
            errors = summary.errors,
            "Domain sweep finished"
        );
        Ok(summary)
    }

    /// Repeat `kind` sweeps until `shutdown` flips to true
    pub async fn run(&self, kind: SweepKind, mut shutdown: watch::Receiver<bool>) {
        let period = match kind {
            SweepKind::Pending => self.pending_interval,
            SweepKind::All => self.full_interval,
        };
        // Pending sweeps start right away; the full sweep waits one period
        let start = match kind {
            SweepKind::Pending => Instant::now(),
            SweepKind::All => Instant::now() + period,
        };
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(sweep = %kind, interval_secs = period.as_secs(), "Domain sweep worker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_sweep(kind).await {
                        error!(sweep = %kind, "Error running domain sweep: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(sweep = %kind, "Domain sweep worker stopped");
    }

    /// Start both sweep loops as independent tasks
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        [SweepKind::Pending, SweepKind::All]
            .into_iter()
            .map(|kind| {
                let scheduler = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { scheduler.run(kind, shutdown).await })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email_auth::{DnsTrustVerifier, StaticResolver};
    use crate::vault::CredentialVault;
    use chrono::Utc;
    use mailtrust_storage::models::Domain;
    use mailtrust_storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    const KEY: &str = "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAtest";

    fn domain(name: &str, status: DomainStatus) -> Domain {
        let now = Utc::now();
        Domain {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            name: name.to_string(),
            status: status.to_string(),
            spf_verified: false,
            dkim_verified: false,
            dmarc_verified: false,
            dkim_selector: "mt".to_string(),
            dkim_public_key: Some(KEY.to_string()),
            dkim_private_key: None,
            created_at: now,
            updated_at: now,
            last_checked_at: None,
            verified_at: None,
        }
    }

    fn scheduler(store: Arc<MemoryStore>, resolver: StaticResolver) -> TrustScheduler {
        let config = VerificationConfig {
            domain_check_timeout_secs: 5,
            dns_timeout_secs: 60,
            sweep_concurrency: 2,
            ..VerificationConfig::default()
        };
        let verifier = Arc::new(DnsTrustVerifier::new(
            Arc::new(resolver),
            &config.spf_include,
            config.dns_timeout(),
        ));
        let machine = Arc::new(TrustStateMachine::new(
            store,
            verifier,
            Arc::new(CredentialVault::new(&[5u8; 32]).unwrap()),
            &config,
        ));
        TrustScheduler::new(machine, &config)
    }

    fn published(resolver: StaticResolver, domain: &str) -> StaticResolver {
        resolver
            .with_txt(domain, &["v=spf1 include:_spf.mailtrust.io -all"])
            .with_txt(
                &format!("mt._domainkey.{}", domain),
                &[&format!("v=DKIM1; p={}", KEY)],
            )
            .with_txt(&format!("_dmarc.{}", domain), &["v=DMARC1; p=none"])
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_sweep_isolates_hanging_domain() {
        let store = Arc::new(MemoryStore::new());
        store.put_domain(domain("good.test", DomainStatus::Pending)).await;
        store.put_domain(domain("slow.test", DomainStatus::Pending)).await;
        store.put_domain(domain("empty.test", DomainStatus::Pending)).await;
        store.put_domain(domain("done.test", DomainStatus::Verified)).await;

        let resolver = published(StaticResolver::new(), "good.test").with_hang("slow.test");
        let summary = scheduler(store.clone(), resolver)
            .run_sweep(SweepKind::Pending)
            .await
            .unwrap();

        assert_eq!(
            summary,
            SweepSummary {
                checked: 3,
                verified: 1,
                partial: 0,
                pending: 1,
                failed: 0,
                error: 1,
                errors: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_full_sweep_rechecks_verified_domains() {
        let store = Arc::new(MemoryStore::new());
        let mut verified = domain("done.test", DomainStatus::Verified);
        verified.spf_verified = true;
        verified.dkim_verified = true;
        verified.dmarc_verified = true;
        store.put_domain(verified.clone()).await;
        store.put_domain(domain("pending.test", DomainStatus::Pending)).await;

        // Records for done.test were removed after verification
        let summary = scheduler(store.clone(), StaticResolver::new())
            .run_sweep(SweepKind::All)
            .await
            .unwrap();
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.pending, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(scheduler(store, StaticResolver::new()));
        let (tx, rx) = watch::channel(false);

        let handles = scheduler.spawn(rx);
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        for handle in handles {
            handle.await.unwrap();
        }
    }
}
