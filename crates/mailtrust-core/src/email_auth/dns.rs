//! TXT record lookups

use async_trait::async_trait;
use mailtrust_common::config::VerificationConfig;
use mailtrust_common::Error as ConfigError;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

/// Why a TXT lookup produced no records
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsLookupError {
    #[error("no TXT records")]
    NoRecords,
    #[error("lookup timed out")]
    Timeout,
    #[error("lookup failed: {0}")]
    Failed(String),
}

/// Source of TXT records
#[async_trait]
pub trait TxtResolver: Send + Sync {
    /// Each returned string is one TXT record with its character-strings concatenated
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError>;
}

/// Resolver backed by the host's DNS configuration
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

fn resolver_opts(timeout: Duration) -> ResolverOpts {
    let mut opts = ResolverOpts::default();
    opts.timeout = timeout;
    opts.attempts = 1;
    opts
}

fn parse_nameserver(value: &str) -> Result<SocketAddr, ConfigError> {
    let value = value.trim();
    value
        .parse::<SocketAddr>()
        .or_else(|_| value.parse::<IpAddr>().map(|ip| SocketAddr::new(ip, 53)))
        .map_err(|_| ConfigError::Config(format!("Invalid nameserver address: {}", value)))
}

impl SystemResolver {
    /// Resolver using the host's configuration, or public defaults when unreadable
    pub fn new(timeout: Duration) -> Self {
        let config = match trust_dns_resolver::system_conf::read_system_conf() {
            Ok((config, _)) => config,
            Err(e) => {
                warn!("Failed to read system DNS configuration, using defaults: {}", e);
                ResolverConfig::default()
            }
        };

        Self {
            resolver: TokioAsyncResolver::tokio(config, resolver_opts(timeout)),
            timeout,
        }
    }

    /// Resolver that queries only `servers`, over UDP with TCP fallback
    pub fn with_nameservers(servers: &[SocketAddr], timeout: Duration) -> Self {
        let mut group = NameServerConfigGroup::new();
        for server in servers {
            group.merge(NameServerConfigGroup::from_ips_clear(
                &[server.ip()],
                server.port(),
                true,
            ));
        }

        Self {
            resolver: TokioAsyncResolver::tokio(
                ResolverConfig::from_parts(None, vec![], group),
                resolver_opts(timeout),
            ),
            timeout,
        }
    }

    /// Honour `verification.nameservers` when set
    pub fn from_config(config: &VerificationConfig) -> Result<Self, ConfigError> {
        if config.nameservers.is_empty() {
            return Ok(Self::new(config.dns_timeout()));
        }

        let servers = config
            .nameservers
            .iter()
            .map(|s| parse_nameserver(s))
            .collect::<Result<Vec<_>, _>>()?;
        info!(nameservers = ?servers, "Using configured DNS nameservers");
        Ok(Self::with_nameservers(&servers, config.dns_timeout()))
    }
}

#[async_trait]
impl TxtResolver for SystemResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError> {
        let lookup = tokio::time::timeout(self.timeout, self.resolver.txt_lookup(name))
            .await
            .map_err(|_| DnsLookupError::Timeout)?;

        match lookup {
            Ok(lookup) => {
                let records: Vec<String> = lookup
                    .iter()
                    .map(|record| {
                        record
                            .txt_data()
                            .iter()
                            .map(|d| String::from_utf8_lossy(d))
                            .collect::<String>()
                    })
                    .collect();
                if records.is_empty() {
                    Err(DnsLookupError::NoRecords)
                } else {
                    Ok(records)
                }
            }
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Err(DnsLookupError::NoRecords),
                ResolveErrorKind::Timeout => Err(DnsLookupError::Timeout),
                _ => Err(DnsLookupError::Failed(e.to_string())),
            },
        }
    }
}

#[derive(Debug, Clone)]
enum StaticAnswer {
    Records(Vec<String>),
    Error(DnsLookupError),
    Hang,
}

/// Fixed answers keyed by name; unknown names have no records
#[derive(Debug, Default)]
pub struct StaticResolver {
    answers: RwLock<HashMap<String, StaticAnswer>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_txt(mut self, name: &str, records: &[&str]) -> Self {
        self.answers.get_mut().insert(
            normalize(name),
            StaticAnswer::Records(records.iter().map(|r| r.to_string()).collect()),
        );
        self
    }

    pub fn with_error(mut self, name: &str, error: DnsLookupError) -> Self {
        self.answers
            .get_mut()
            .insert(normalize(name), StaticAnswer::Error(error));
        self
    }

    /// Lookups for `name` never complete
    pub fn with_hang(mut self, name: &str) -> Self {
        self.answers
            .get_mut()
            .insert(normalize(name), StaticAnswer::Hang);
        self
    }

    /// Replace the records for `name`
    pub async fn set_txt(&self, name: &str, records: &[&str]) {
        self.answers.write().await.insert(
            normalize(name),
            StaticAnswer::Records(records.iter().map(|r| r.to_string()).collect()),
        );
    }

    pub async fn remove(&self, name: &str) {
        self.answers.write().await.remove(&normalize(name));
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

#[async_trait]
impl TxtResolver for StaticResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError> {
        let answer = self.answers.read().await.get(&normalize(name)).cloned();
        match answer {
            Some(StaticAnswer::Records(records)) if !records.is_empty() => Ok(records),
            Some(StaticAnswer::Records(_)) | None => Err(DnsLookupError::NoRecords),
            Some(StaticAnswer::Error(e)) => Err(e),
            Some(StaticAnswer::Hang) => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email_auth::{DnsTrustVerifier, RecordOutcome};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_static_resolver_answers() {
        let resolver = StaticResolver::new()
            .with_txt("Example.com.", &["v=spf1 -all"])
            .with_error("broken.test", DnsLookupError::Failed("SERVFAIL".to_string()));

        assert_eq!(
            resolver.lookup_txt("example.com").await,
            Ok(vec!["v=spf1 -all".to_string()])
        );
        assert_eq!(
            resolver.lookup_txt("missing.test").await,
            Err(DnsLookupError::NoRecords)
        );
        assert!(matches!(
            resolver.lookup_txt("broken.test").await,
            Err(DnsLookupError::Failed(_))
        ));

        resolver.remove("example.com").await;
        assert_eq!(
            resolver.lookup_txt("example.com").await,
            Err(DnsLookupError::NoRecords)
        );
    }

    /// Local UDP nameserver answering every query with `rcode` and no records
    async fn fake_nameserver(rcode: u8) -> SocketAddr {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
                let query = &buf[..len];
                // Question: labels up to the root label, then type and class
                let mut end = 12;
                while end < len && query[end] != 0 {
                    end += usize::from(query[end]) + 1;
                }
                let end = (end + 5).min(len);

                let mut reply = Vec::with_capacity(end);
                reply.extend_from_slice(&query[..2]);
                reply.extend_from_slice(&[0x81, 0x80 | rcode, 0, 1, 0, 0, 0, 0, 0, 0]);
                reply.extend_from_slice(&query[12..end]);
                let _ = socket.send_to(&reply, peer).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_system_resolver_maps_nxdomain_and_empty_answers() {
        for rcode in [3u8, 0] {
            let server = fake_nameserver(rcode).await;
            let resolver = SystemResolver::with_nameservers(&[server], Duration::from_secs(2));
            assert_eq!(
                resolver.lookup_txt("absent.example.").await,
                Err(DnsLookupError::NoRecords),
                "rcode {}",
                rcode
            );
        }

        let server = fake_nameserver(3).await;
        let verifier = DnsTrustVerifier::new(
            Arc::new(SystemResolver::with_nameservers(&[server], Duration::from_secs(2))),
            "_spf.mailtrust.io",
            Duration::from_secs(2),
        );
        let report = verifier.verify_domain("absent.example", "mt", "MIIB").await;
        assert_eq!(report.spf, RecordOutcome::Missing);
        assert_eq!(report.dkim, RecordOutcome::Missing);
        assert_eq!(report.dmarc, RecordOutcome::Missing);
    }

    #[tokio::test]
    async fn test_system_resolver_silent_server_is_a_failure() {
        // Bound but never answers
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let resolver = SystemResolver::with_nameservers(
            &[silent.local_addr().unwrap()],
            Duration::from_millis(300),
        );

        let result = resolver.lookup_txt("slow.example.").await;
        assert!(matches!(
            result,
            Err(DnsLookupError::Timeout) | Err(DnsLookupError::Failed(_))
        ));

        let verifier = DnsTrustVerifier::new(
            Arc::new(resolver),
            "_spf.mailtrust.io",
            Duration::from_millis(300),
        );
        assert!(matches!(
            verifier.verify_spf("slow.example").await,
            RecordOutcome::LookupFailed(_)
        ));
    }

    #[test]
    fn test_nameserver_parsing() {
        assert_eq!(
            parse_nameserver("127.0.0.1:5353").unwrap(),
            "127.0.0.1:5353".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_nameserver(" 9.9.9.9 ").unwrap(),
            "9.9.9.9:53".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(parse_nameserver("dns.example").unwrap_err().code(), "CONFIG_ERROR");

        let config = VerificationConfig {
            nameservers: vec!["not-an-ip".to_string()],
            ..VerificationConfig::default()
        };
        assert!(SystemResolver::from_config(&config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_lookup_can_be_timed_out() {
        let resolver = StaticResolver::new().with_hang("slow.test");
        let result =
            tokio::time::timeout(Duration::from_secs(10), resolver.lookup_txt("slow.test")).await;
        assert!(result.is_err());
    }
}
