//! Domain trust state machine
//!
//! Every check runs the DNS verifier under a per-domain budget, derives the
//! next status and persists status, flags and `last_checked_at` together.

use crate::email_auth::{
    is_valid_dkim_selector, is_valid_domain_name, DkimKeyGenerator, DnsTrustVerifier,
    VerificationReport,
};
use crate::metrics::DeliverabilityMetrics;
use crate::vault::CredentialVault;
use chrono::{DateTime, Utc};
use mailtrust_common::config::VerificationConfig;
use mailtrust_common::types::{DomainId, DomainStatus, UserId};
use mailtrust_common::{Error, Result};
use mailtrust_storage::models::{CreateDomain, Domain, DomainCheck};
use mailtrust_storage::repository::DomainRepository;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Next status for a completed verification
pub fn next_status(
    report: &VerificationReport,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    grace_period: chrono::Duration,
) -> DomainStatus {
    if report.all_ok() {
        DomainStatus::Verified
    } else if report.any_ok() {
        DomainStatus::Partial
    } else if now - created_at > grace_period {
        DomainStatus::Failed
    } else {
        DomainStatus::Pending
    }
}

/// TXT record the domain owner must publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxtRecord {
    pub host: String,
    pub value: String,
}

/// Records required for a domain to become verified
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpectedRecords {
    pub spf: TxtRecord,
    pub dkim: Option<TxtRecord>,
    pub dmarc: TxtRecord,
}

/// Result of checking one domain
#[derive(Debug, Clone)]
pub struct DomainCheckOutcome {
    pub domain: Domain,
    /// `None` when the check budget ran out
    pub report: Option<VerificationReport>,
}

pub struct TrustStateMachine {
    domains: Arc<dyn DomainRepository>,
    verifier: Arc<DnsTrustVerifier>,
    vault: Arc<CredentialVault>,
    key_generator: DkimKeyGenerator,
    default_selector: String,
    grace_period: chrono::Duration,
    check_timeout: Duration,
    metrics: Option<DeliverabilityMetrics>,
}

impl TrustStateMachine {
    pub fn new(
        domains: Arc<dyn DomainRepository>,
        verifier: Arc<DnsTrustVerifier>,
        vault: Arc<CredentialVault>,
        config: &VerificationConfig,
    ) -> Self {
        Self {
            domains,
            verifier,
            vault,
            key_generator: DkimKeyGenerator::new(),
            default_selector: config.dkim_selector.clone(),
            grace_period: chrono::Duration::days(config.grace_period_days),
            check_timeout: config.domain_check_timeout(),
            metrics: None,
        }
    }

    pub fn with_key_generator(mut self, key_generator: DkimKeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn with_metrics(mut self, metrics: DeliverabilityMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn domains(&self) -> &Arc<dyn DomainRepository> {
        &self.domains
    }

    /// Validate, generate a DKIM key pair and persist a pending domain
    pub async fn register_domain(
        &self,
        user_id: UserId,
        name: &str,
        selector: Option<&str>,
    ) -> Result<Domain> {
        let name = name.trim().trim_end_matches('.').to_ascii_lowercase();
        if !is_valid_domain_name(&name) {
            return Err(Error::Validation(format!("Invalid domain name: {}", name)));
        }

        let selector = selector.unwrap_or(&self.default_selector).to_ascii_lowercase();
        if !is_valid_dkim_selector(&selector) {
            return Err(Error::Validation(format!("Invalid DKIM selector: {}", selector)));
        }

        if self.domains.find_by_name(&name).await?.is_some() {
            return Err(Error::Conflict(format!("Domain {} already exists", name)));
        }

        let keys = self.key_generator.generate().await?;
        let encrypted_private_key = self.vault.encrypt(&keys.private_key)?;

        let domain = self
            .domains
            .create(CreateDomain {
                user_id,
                name,
                dkim_selector: selector,
                dkim_public_key: keys.public_key,
                dkim_private_key: encrypted_private_key,
            })
            .await?;

        info!(domain = %domain.name, user_id = %user_id, "Registered sending domain");
        Ok(domain)
    }

    /// TXT records the owner must publish for `domain`
    pub fn expected_records(&self, domain: &Domain) -> ExpectedRecords {
        let dkim = domain.dkim_public_key.as_deref().map(|key| TxtRecord {
            host: format!("{}._domainkey.{}", domain.dkim_selector, domain.name),
            value: DkimKeyGenerator::dns_record_value(key),
        });

        ExpectedRecords {
            spf: TxtRecord {
                host: domain.name.clone(),
                value: format!("v=spf1 include:{} ~all", self.verifier.spf_include()),
            },
            dkim,
            dmarc: TxtRecord {
                host: format!("_dmarc.{}", domain.name),
                value: format!("v=DMARC1; p=none; rua=mailto:dmarc@{}", domain.name),
            },
        }
    }

    /// Manual re-verification of one domain owned by `user_id`
    pub async fn verify_now(&self, user_id: UserId, id: DomainId) -> Result<DomainCheckOutcome> {
        let domain = self
            .domains
            .get_for_user(user_id, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Domain {}", id)))?;
        self.check_domain(&domain).await
    }

    /// Run one check and persist the transition
    pub async fn check_domain(&self, domain: &Domain) -> Result<DomainCheckOutcome> {
        let expected_key = domain.dkim_public_key.as_deref().unwrap_or_default();
        let verification = self.verifier.verify_domain(
            &domain.name,
            &domain.dkim_selector,
            expected_key,
        );

        let outcome = tokio::time::timeout(self.check_timeout, verification).await;
        let now = Utc::now();

        let (check, report) = match outcome {
            Ok(report) => {
                let status = next_status(&report, domain.created_at, now, self.grace_period);
                let check = DomainCheck {
                    status,
                    spf_verified: report.spf_ok(),
                    dkim_verified: report.dkim_ok(),
                    dmarc_verified: report.dmarc_ok(),
                    checked_at: now,
                    verified_at: (status == DomainStatus::Verified).then_some(now),
                };
                (check, Some(report))
            }
            Err(_) => {
                error!(
                    domain = %domain.name,
                    budget_secs = self.check_timeout.as_secs(),
                    "Domain verification exceeded its time budget"
                );
                let check = DomainCheck {
                    status: DomainStatus::Error,
                    spf_verified: domain.spf_verified,
                    dkim_verified: domain.dkim_verified,
                    dmarc_verified: domain.dmarc_verified,
                    checked_at: now,
                    verified_at: None,
                };
                (check, None)
            }
        };

        let previous = domain.status_enum();
        let updated = self.domains.record_check(domain.id, check).await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_domain_check(&updated.status);
        }

        match (previous, updated.status_enum()) {
            (Some(DomainStatus::Verified), Some(after)) if after != DomainStatus::Verified => {
                warn!(domain = %updated.name, status = %after, "Domain lost verified status");
            }
            (before, Some(after)) if before != Some(after) => {
                info!(domain = %updated.name, status = %after, "Domain status changed");
            }
            _ => {}
        }

        Ok(DomainCheckOutcome {
            domain: updated,
            report,
        })
    }
}
