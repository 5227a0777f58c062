//! SPF, DKIM and DMARC trust record verification
//!
//! Each record is checked independently and concurrently. Lookup failures
//! become negative outcomes; nothing here returns an error to the caller.

use super::dkim::DkimKeyGenerator;
use super::dns::{DnsLookupError, TxtResolver};
use super::parse_tags;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DMARC_POLICIES: [&str; 3] = ["none", "quarantine", "reject"];

/// Outcome for one record type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum RecordOutcome {
    Valid,
    /// No record of the expected kind was published
    Missing,
    /// A record exists but does not match what is expected
    Mismatch(String),
    /// DNS lookup failed or timed out
    LookupFailed(String),
}

impl RecordOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, RecordOutcome::Valid)
    }
}

/// Per-record verification result for one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub spf: RecordOutcome,
    pub dkim: RecordOutcome,
    pub dmarc: RecordOutcome,
}

impl VerificationReport {
    pub fn spf_ok(&self) -> bool {
        self.spf.is_valid()
    }

    pub fn dkim_ok(&self) -> bool {
        self.dkim.is_valid()
    }

    pub fn dmarc_ok(&self) -> bool {
        self.dmarc.is_valid()
    }

    pub fn all_ok(&self) -> bool {
        self.spf_ok() && self.dkim_ok() && self.dmarc_ok()
    }

    pub fn any_ok(&self) -> bool {
        self.spf_ok() || self.dkim_ok() || self.dmarc_ok()
    }
}

/// Checks a domain's published authentication records
pub struct DnsTrustVerifier {
    resolver: Arc<dyn TxtResolver>,
    spf_include: String,
    lookup_timeout: Duration,
}

impl DnsTrustVerifier {
    /// `spf_include` is the domain customer SPF records must reference via `include:`
    pub fn new(
        resolver: Arc<dyn TxtResolver>,
        spf_include: &str,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            spf_include: spf_include.trim().to_ascii_lowercase(),
            lookup_timeout,
        }
    }

    pub fn spf_include(&self) -> &str {
        &self.spf_include
    }

    /// Verify all three records for `domain`
    pub async fn verify_domain(
        &self,
        domain: &str,
        dkim_selector: &str,
        expected_dkim_public_key: &str,
    ) -> VerificationReport {
        let (spf, dkim, dmarc) = tokio::join!(
            self.verify_spf(domain),
            self.verify_dkim(domain, dkim_selector, expected_dkim_public_key),
            self.verify_dmarc(domain),
        );

        let report = VerificationReport { spf, dkim, dmarc };
        info!(
            domain = %domain,
            spf = report.spf_ok(),
            dkim = report.dkim_ok(),
            dmarc = report.dmarc_ok(),
            "Domain verification completed"
        );
        report
    }

    pub async fn verify_spf(&self, domain: &str) -> RecordOutcome {
        let records = match self.lookup(domain).await {
            Ok(records) => records,
            Err(outcome) => return outcome,
        };

        let spf_records: Vec<&String> = records
            .iter()
            .filter(|r| has_version(r, "v=spf1"))
            .collect();

        if spf_records.is_empty() {
            debug!(domain = %domain, "No SPF record found");
            return RecordOutcome::Missing;
        }

        if spf_records.iter().any(|r| self.includes_platform(r)) {
            RecordOutcome::Valid
        } else {
            debug!(
                domain = %domain,
                include = %self.spf_include,
                "SPF record lacks platform include"
            );
            RecordOutcome::Mismatch(format!("SPF record does not include:{}", self.spf_include))
        }
    }

    pub async fn verify_dkim(
        &self,
        domain: &str,
        selector: &str,
        expected_public_key: &str,
    ) -> RecordOutcome {
        let name = format!("{}._domainkey.{}", selector, domain);
        let records = match self.lookup(&name).await {
            Ok(records) => records,
            Err(outcome) => return outcome,
        };

        let expected = DkimKeyGenerator::format_for_dns(expected_public_key);
        let mut saw_dkim = false;

        for record in records.iter().filter(|r| has_version(r, "v=DKIM1")) {
            saw_dkim = true;
            let tags = parse_tags(record);
            if let Some(published) = tags.get("p") {
                if !expected.is_empty() && DkimKeyGenerator::format_for_dns(published) == expected {
                    return RecordOutcome::Valid;
                }
            }
        }

        if saw_dkim {
            debug!(domain = %domain, selector = %selector, "DKIM public key mismatch");
            RecordOutcome::Mismatch("DKIM public key does not match".to_string())
        } else {
            debug!(domain = %domain, selector = %selector, "No DKIM record found");
            RecordOutcome::Missing
        }
    }

    pub async fn verify_dmarc(&self, domain: &str) -> RecordOutcome {
        let name = format!("_dmarc.{}", domain);
        let records = match self.lookup(&name).await {
            Ok(records) => records,
            Err(outcome) => return outcome,
        };

        let mut saw_dmarc = false;
        for record in records.iter().filter(|r| has_version(r, "v=DMARC1")) {
            saw_dmarc = true;
            let tags = parse_tags(record);
            let policy_ok = tags
                .get("p")
                .map(|p| DMARC_POLICIES.contains(&p.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if policy_ok {
                return RecordOutcome::Valid;
            }
        }

        if saw_dmarc {
            RecordOutcome::Mismatch("DMARC record has no valid p= policy".to_string())
        } else {
            debug!(domain = %domain, "No DMARC record found");
            RecordOutcome::Missing
        }
    }

    async fn lookup(&self, name: &str) -> Result<Vec<String>, RecordOutcome> {
        let result = tokio::time::timeout(self.lookup_timeout, self.resolver.lookup_txt(name))
            .await
            .unwrap_or(Err(DnsLookupError::Timeout));

        match result {
            Ok(records) => Ok(records),
            Err(DnsLookupError::NoRecords) => Err(RecordOutcome::Missing),
            Err(e) => {
                info!(name = %name, error = %e, "TXT lookup failed");
                Err(RecordOutcome::LookupFailed(e.to_string()))
            }
        }
    }

    fn includes_platform(&self, record: &str) -> bool {
        record.split_whitespace().any(|term| {
            let term = term.to_ascii_lowercase();
            let term = term.trim_start_matches(['+', '~', '?']);
            term.strip_prefix("include:")
                .map(|target| target.trim_end_matches('.') == self.spf_include)
                .unwrap_or(false)
        })
    }
}

/// Record starts with the version tag, compared case-insensitively
fn has_version(record: &str, version: &str) -> bool {
    let record = record.trim_start();
    match (record.get(..version.len()), record.get(version.len()..)) {
        (Some(head), Some(rest)) => {
            head.eq_ignore_ascii_case(version)
                && rest
                    .chars()
                    .next()
                    .map(|c| c == ';' || c.is_whitespace())
                    .unwrap_or(true)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email_auth::dns::StaticResolver;
    use pretty_assertions::assert_eq;

    const KEY: &str = "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAtest";

    fn verifier(resolver: StaticResolver) -> DnsTrustVerifier {
        DnsTrustVerifier::new(Arc::new(resolver), "_spf.mailtrust.io", Duration::from_secs(10))
    }

    fn fully_published() -> StaticResolver {
        StaticResolver::new()
            .with_txt(
                "example.com",
                &["google-site-verification=abc", "v=spf1 include:_spf.mailtrust.io ~all"],
            )
            .with_txt(
                "mt._domainkey.example.com",
                &["v=DKIM1; k=rsa; p=MIIBIjANBgkqhkiG9w0B AQEFAAOCAQ8AMIIBCgKCAQEAtest"],
            )
            .with_txt("_dmarc.example.com", &["v=DMARC1; p=quarantine; rua=mailto:d@example.com"])
    }

    #[tokio::test]
    async fn test_all_records_valid() {
        let report = verifier(fully_published())
            .verify_domain("example.com", "mt", KEY)
            .await;
        assert!(report.all_ok());
    }

    #[tokio::test]
    async fn test_no_records_at_all() {
        let report = verifier(StaticResolver::new())
            .verify_domain("example.com", "mt", KEY)
            .await;
        assert_eq!(
            report,
            VerificationReport {
                spf: RecordOutcome::Missing,
                dkim: RecordOutcome::Missing,
                dmarc: RecordOutcome::Missing,
            }
        );
        assert!(!report.any_ok());
        assert!(!report.all_ok());
    }

    #[tokio::test]
    async fn test_mismatched_dkim_is_distinct_from_missing() {
        let report = verifier(fully_published())
            .verify_domain("example.com", "mt", "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8Aother")
            .await;
        assert!(report.spf_ok());
        assert!(matches!(report.dkim, RecordOutcome::Mismatch(_)));
        assert!(report.dmarc_ok());
        assert!(!report.all_ok());
    }

    #[tokio::test]
    async fn test_spf_without_platform_include() {
        let resolver = StaticResolver::new().with_txt(
            "example.com",
            &["v=spf1 include:_spf.google.com include:_spf.mailtrust.io.evil ~all"],
        );
        let outcome = verifier(resolver).verify_spf("example.com").await;
        assert!(matches!(outcome, RecordOutcome::Mismatch(_)));
    }

    #[tokio::test]
    async fn test_spf_version_must_lead() {
        let resolver = StaticResolver::new()
            .with_txt("example.com", &["note: v=spf1 include:_spf.mailtrust.io"]);
        assert_eq!(verifier(resolver).verify_spf("example.com").await, RecordOutcome::Missing);
    }

    #[tokio::test]
    async fn test_dmarc_policy_values() {
        for (record, valid) in [
            ("v=DMARC1; p=none", true),
            ("v=DMARC1; p=REJECT; pct=100", true),
            ("v=DMARC1; p=monitor", false),
            ("v=DMARC1; rua=mailto:x@example.com", false),
        ] {
            let resolver = StaticResolver::new().with_txt("_dmarc.example.com", &[record]);
            let outcome = verifier(resolver).verify_dmarc("example.com").await;
            assert_eq!(outcome.is_valid(), valid, "{}", record);
        }
    }

    #[tokio::test]
    async fn test_lookup_errors_become_negative_results() {
        let resolver = StaticResolver::new()
            .with_error("example.com", DnsLookupError::Failed("SERVFAIL".to_string()))
            .with_txt("_dmarc.example.com", &["v=DMARC1; p=reject"]);
        let report = verifier(resolver).verify_domain("example.com", "mt", KEY).await;
        assert!(matches!(report.spf, RecordOutcome::LookupFailed(_)));
        assert_eq!(report.dkim, RecordOutcome::Missing);
        assert!(report.dmarc_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_lookup_times_out_per_record() {
        let resolver = fully_published().with_hang("mt._domainkey.example.com");
        let report = verifier(resolver).verify_domain("example.com", "mt", KEY).await;
        assert!(report.spf_ok());
        assert_eq!(
            report.dkim,
            RecordOutcome::LookupFailed("lookup timed out".to_string())
        );
        assert!(report.dmarc_ok());
    }

    #[test]
    fn test_has_version() {
        assert!(has_version("v=spf1 -all", "v=spf1"));
        assert!(has_version("V=DKIM1;p=abc", "v=DKIM1"));
        assert!(!has_version("v=spf10 -all", "v=spf1"));
    }
}
