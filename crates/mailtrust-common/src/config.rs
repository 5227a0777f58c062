//! Configuration for MailTrust

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Secret handling
    #[serde(default)]
    pub security: SecurityConfig,

    /// Domain verification
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Bounce and complaint processing
    #[serde(default)]
    pub feedback: FeedbackConfig,

    /// Sending quotas
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Pre-send content scoring
    #[serde(default)]
    pub content: ContentConfig,

    /// Provider transports
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Deployment profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Development,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Production
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname used in synthesized message identifiers
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Deployment profile
    #[serde(default)]
    pub environment: Environment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            environment: Environment::default(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend: only "postgres" is supported
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL (for postgres)
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Seconds to wait for a free pooled connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Connection attempts at startup before giving up
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_connect_attempts() -> u32 {
    5
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Secret handling configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Credential encryption key: `base64:<encoded>` or a raw 16/24/32-byte string
    pub encryption_key: Option<String>,
}

/// Domain verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Domain that customer SPF records must `include:`
    #[serde(default = "default_spf_include")]
    pub spf_include: String,

    /// DKIM selector assigned to newly registered domains
    #[serde(default = "default_dkim_selector")]
    pub dkim_selector: String,

    /// Timeout for a single DNS lookup in seconds
    #[serde(default = "default_dns_timeout")]
    pub dns_timeout_secs: u64,

    /// Budget for one whole domain check in seconds
    #[serde(default = "default_domain_check_timeout")]
    pub domain_check_timeout_secs: u64,

    /// Days a domain may stay unverified before it is marked failed
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i64,

    /// Interval of the pending-domain sweep in seconds
    #[serde(default = "default_pending_sweep_interval")]
    pub pending_sweep_interval_secs: u64,

    /// Interval of the full re-verification sweep in seconds
    #[serde(default = "default_full_sweep_interval")]
    pub full_sweep_interval_secs: u64,

    /// Domains checked concurrently during a sweep
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,

    /// Nameservers ("ip" or "ip:port") to query instead of the system resolver
    #[serde(default)]
    pub nameservers: Vec<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            spf_include: default_spf_include(),
            dkim_selector: default_dkim_selector(),
            dns_timeout_secs: default_dns_timeout(),
            domain_check_timeout_secs: default_domain_check_timeout(),
            grace_period_days: default_grace_period_days(),
            pending_sweep_interval_secs: default_pending_sweep_interval(),
            full_sweep_interval_secs: default_full_sweep_interval(),
            sweep_concurrency: default_sweep_concurrency(),
            nameservers: Vec::new(),
        }
    }
}

impl VerificationConfig {
    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout_secs)
    }

    pub fn domain_check_timeout(&self) -> Duration {
        Duration::from_secs(self.domain_check_timeout_secs)
    }
}

fn default_spf_include() -> String {
    "_spf.mailtrust.io".to_string()
}

fn default_dkim_selector() -> String {
    "mailtrust".to_string()
}

fn default_dns_timeout() -> u64 {
    10
}

fn default_domain_check_timeout() -> u64 {
    30
}

fn default_grace_period_days() -> i64 {
    7
}

fn default_pending_sweep_interval() -> u64 {
    60 * 60
}

fn default_full_sweep_interval() -> u64 {
    7 * 24 * 60 * 60
}

fn default_sweep_concurrency() -> usize {
    8
}

/// Bounce and complaint processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Bounce count at which a soft-bouncing contact becomes bounced
    #[serde(default = "default_soft_bounce_threshold")]
    pub soft_bounce_threshold: i32,

    /// Attempts for an optimistic contact update before giving up
    #[serde(default = "default_max_update_attempts")]
    pub max_update_attempts: u32,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            soft_bounce_threshold: default_soft_bounce_threshold(),
            max_update_attempts: default_max_update_attempts(),
        }
    }
}

fn default_soft_bounce_threshold() -> i32 {
    3
}

fn default_max_update_attempts() -> u32 {
    5
}

/// Limit applied to one resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimit {
    /// Requests allowed per window
    pub limit: i32,

    /// Window length in seconds
    pub window_secs: u64,
}

/// Sending quota configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Limit used for resources without an override
    #[serde(default = "default_quota_limit")]
    pub default_limit: i32,

    /// Window length used for resources without an override
    #[serde(default = "default_quota_window")]
    pub default_window_secs: u64,

    /// Per-resource overrides keyed by resource name (e.g. "email_send")
    #[serde(default)]
    pub overrides: HashMap<String, QuotaLimit>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_limit: default_quota_limit(),
            default_window_secs: default_quota_window(),
            overrides: HashMap::new(),
        }
    }
}

impl QuotaConfig {
    pub fn limit_for(&self, resource: &str) -> QuotaLimit {
        self.overrides.get(resource).copied().unwrap_or(QuotaLimit {
            limit: self.default_limit,
            window_secs: self.default_window_secs,
        })
    }
}

fn default_quota_limit() -> i32 {
    100
}

fn default_quota_window() -> u64 {
    60 * 60
}

/// Pre-send content scoring configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Refuse to send content scored as high risk
    #[serde(default)]
    pub block_high_risk: bool,
}

/// Provider transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Override for the SES API endpoint (defaults to the regional endpoint)
    pub ses_endpoint: Option<String>,

    /// SendGrid API base URL
    #[serde(default = "default_sendgrid_base_url")]
    pub sendgrid_base_url: String,

    /// Timeout for HTTP provider calls in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Timeout for SMTP connections in seconds
    #[serde(default = "default_smtp_timeout")]
    pub smtp_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            ses_endpoint: None,
            sendgrid_base_url: default_sendgrid_base_url(),
            http_timeout_secs: default_http_timeout(),
            smtp_timeout_secs: default_smtp_timeout(),
        }
    }
}

fn default_sendgrid_base_url() -> String {
    "https://api.sendgrid.com".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_smtp_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from default file locations layered with
    /// `MAILTRUST__SECTION__KEY` environment variables
    pub fn load() -> crate::Result<Self> {
        Self::load_from(&[
            PathBuf::from("./mailtrust.toml"),
            PathBuf::from("/etc/mailtrust/mailtrust.toml"),
        ])
    }

    /// Load configuration from the given files (later files win) and the environment
    pub fn load_from(paths: &[PathBuf]) -> crate::Result<Self> {
        let mut builder = config::Config::builder();

        for path in paths {
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("MAILTRUST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))?;

        settings
            .try_deserialize::<Config>()
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let server = ServerConfig::default();
        assert_eq!(server.hostname, "localhost");
        assert_eq!(server.environment, Environment::Production);

        let verification = VerificationConfig::default();
        assert_eq!(verification.dns_timeout(), Duration::from_secs(10));
        assert_eq!(verification.grace_period_days, 7);
        assert_eq!(verification.pending_sweep_interval_secs, 3600);
        assert_eq!(verification.full_sweep_interval_secs, 604800);

        assert_eq!(FeedbackConfig::default().soft_bounce_threshold, 3);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
hostname = "mta.example.com"
environment = "development"

[database]
backend = "postgres"
url = "postgres://localhost/mailtrust"

[security]
encryption_key = "base64:MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY="

[verification]
spf_include = "spf.sender.example"

[quota.overrides.email_send]
limit = 500
window_secs = 3600
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.hostname, "mta.example.com");
        assert_eq!(config.server.environment, Environment::Development);
        assert_eq!(config.database.backend, "postgres");
        assert_eq!(config.verification.spf_include, "spf.sender.example");
        assert_eq!(config.verification.dkim_selector, "mailtrust");
        assert_eq!(
            config.quota.limit_for("email_send"),
            QuotaLimit {
                limit: 500,
                window_secs: 3600
            }
        );
        assert_eq!(
            config.quota.limit_for("api_request"),
            QuotaLimit {
                limit: 100,
                window_secs: 3600
            }
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[database]\nurl = \"postgres://db/mailtrust\"\n\n[content]\nblock_high_risk = true"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://db/mailtrust")
        );
        assert!(config.content.block_high_risk);
        assert!(config.server.environment.is_production());
    }

    #[test]
    fn test_load_from_layered_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[database]\nurl = \"postgres://layered/mailtrust\"\n\n\
             [feedback]\nsoft_bounce_threshold = 5"
        )
        .unwrap();

        let config = Config::load_from(&[file.path().to_path_buf()]).unwrap();
        assert_eq!(config.feedback.soft_bounce_threshold, 5);
        assert_eq!(config.feedback.max_update_attempts, 5);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/mailtrust.toml"))
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
