//! Sender construction from persisted provider configurations

use super::{ProviderSender, SendGridSender, SesSender, Settings, SmtpSender};
use crate::vault::CredentialVault;
use mailtrust_common::config::ProvidersConfig;
use mailtrust_common::types::ProviderType;
use mailtrust_common::{Error, Result};
use mailtrust_storage::models::EmailProviderConfig;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const SENSITIVE_KEYS: [&str; 4] = ["apikey", "accesskey", "secretkey", "password"];
const SENSITIVE_FRAGMENTS: [&str; 2] = ["secret", "token"];

/// Whether a configuration key holds a secret that is stored encrypted
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.contains(&key.as_str())
        || SENSITIVE_FRAGMENTS.iter().any(|f| key.contains(f))
}

pub struct ProviderFactory {
    vault: Arc<CredentialVault>,
    config: ProvidersConfig,
    hostname: String,
}

impl ProviderFactory {
    pub fn new(vault: Arc<CredentialVault>, config: ProvidersConfig, hostname: &str) -> Self {
        Self {
            vault,
            config,
            hostname: hostname.to_string(),
        }
    }

    /// Build the sender for a configuration. The record itself is never mutated.
    pub fn create_sender(&self, provider: &EmailProviderConfig) -> Result<ProviderSender> {
        if !provider.is_active {
            return Err(Error::Validation(format!(
                "Provider {} is not active",
                provider.name
            )));
        }

        let provider_type = provider.provider_type_enum().ok_or_else(|| {
            Error::Validation(format!("Unknown provider type: {}", provider.provider_type))
        })?;

        let settings = self.decrypt_settings(&provider.config)?;
        let http_timeout = Duration::from_secs(self.config.http_timeout_secs);

        let sender = match provider_type {
            ProviderType::AwsSes => ProviderSender::Ses(SesSender::from_settings(
                &settings,
                self.config.ses_endpoint.as_deref(),
                http_timeout,
            )?),
            ProviderType::Sendgrid => ProviderSender::SendGrid(SendGridSender::from_settings(
                &settings,
                &self.config.sendgrid_base_url,
                http_timeout,
                &self.hostname,
            )?),
            ProviderType::Smtp => ProviderSender::Smtp(SmtpSender::from_settings(
                &settings,
                Duration::from_secs(self.config.smtp_timeout_secs),
                &self.hostname,
            )?),
        };

        debug!(
            provider_id = %provider.id,
            provider_type = %provider_type,
            "Created provider sender"
        );
        Ok(sender)
    }

    /// True when a sender can be built and reports itself configured
    pub fn is_provider_valid(&self, provider: &EmailProviderConfig) -> bool {
        use super::EmailSender;

        match self.create_sender(provider) {
            Ok(sender) => sender.is_configured(),
            Err(e) => {
                debug!(provider_id = %provider.id, error = %e, "Provider configuration is invalid");
                false
            }
        }
    }

    /// Encrypt every sensitive value of a settings object before it is persisted
    pub fn encrypt_settings(&self, config: Value) -> Result<Value> {
        let Value::Object(entries) = config else {
            return Err(Error::Validation(
                "Provider configuration must be an object".to_string(),
            ));
        };

        entries
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) if is_sensitive_key(&key) && !s.is_empty() => {
                        Value::String(self.vault.encrypt(&s)?)
                    }
                    other => other,
                };
                Ok((key, value))
            })
            .collect::<Result<serde_json::Map<_, _>>>()
            .map(Value::Object)
    }

    fn decrypt_settings(&self, config: &Value) -> Result<Settings> {
        let entries = config.as_object().ok_or_else(|| {
            Error::Validation("Provider configuration must be an object".to_string())
        })?;

        let mut settings = Settings::with_capacity(entries.len());
        for (key, value) in entries {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };

            let value = if is_sensitive_key(key) && !value.is_empty() {
                if CredentialVault::is_encrypted(&value) {
                    self.vault.decrypt(&value)?
                } else {
                    warn!(key = %key, "Sensitive provider setting is not encrypted, using as-is");
                    value
                }
            } else {
                value
            };
            settings.insert(key.clone(), value);
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

    fn factory() -> ProviderFactory {
        ProviderFactory::new(
            Arc::new(CredentialVault::new(&[9u8; 32]).unwrap()),
            ProvidersConfig::default(),
            "mta.test",
        )
    }

    fn provider(provider_type: &str, config: Value) -> EmailProviderConfig {
        let now = Utc::now();
        EmailProviderConfig {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            name: "primary".to_string(),
            provider_type: provider_type.to_string(),
            config,
            is_active: true,
            is_default: false,
            emails_sent: 0,
            emails_failed: 0,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_sensitive_key_heuristic() {
        let sensitive = [
            "apiKey",
            "APIKEY",
            "accessKey",
            "secretKey",
            "password",
            "clientSecret",
            "sessionToken",
        ];
        for key in sensitive {
            assert!(is_sensitive_key(key), "{} should be sensitive", key);
        }
        for key in ["host", "port", "region", "username", "encryption", "passwordHint"] {
            assert!(!is_sensitive_key(key), "{} should not be sensitive", key);
        }
    }

    #[test]
    fn test_encrypt_settings_only_touches_secrets() {
        let factory = factory();
        let stored = factory
            .encrypt_settings(json!({ "host": "smtp.example.com", "port": 587, "password": "pw" }))
            .unwrap();

        assert_eq!(stored["host"], "smtp.example.com");
        assert_eq!(stored["port"], 587);
        let password = stored["password"].as_str().unwrap();
        assert!(CredentialVault::is_encrypted(password));
        assert_eq!(factory.vault.decrypt(password).unwrap(), "pw");
    }

    #[test]
    fn test_create_sender_decrypts_without_mutating_record() {
        let factory = factory();
        let config = factory
            .encrypt_settings(json!({
                "host": "smtp.example.com",
                "port": 2525,
                "username": "mailer",
                "password": "pw",
                "encryption": "starttls"
            }))
            .unwrap();
        let record = provider("smtp", config.clone());

        let sender = factory.create_sender(&record).unwrap();
        assert!(matches!(sender, ProviderSender::Smtp(_)));
        assert!(factory.is_provider_valid(&record));
        assert_eq!(record.config, config);
    }

    #[test]
    fn test_inactive_provider_is_rejected() {
        let mut record = provider("sendgrid", json!({ "apiKey": "plain" }));
        record.is_active = false;
        let err = factory().create_sender(&record).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(!factory().is_provider_valid(&record));
    }

    #[test]
    fn test_undecryptable_secret_is_fatal() {
        // Valid base64 of the right length but sealed under a different key
        let foreign = CredentialVault::new(&[1u8; 32]).unwrap().encrypt("key").unwrap();
        let record = provider("sendgrid", json!({ "apiKey": foreign }));

        let err = factory().create_sender(&record).unwrap_err();
        assert_eq!(err.code(), "CRYPTO_ERROR");
        assert!(!factory().is_provider_valid(&record));
    }

    #[test]
    fn test_plaintext_secret_is_used_as_is() {
        let record = provider("sendgrid", json!({ "apiKey": "SG.not-encrypted!" }));
        assert!(factory().is_provider_valid(&record));
    }

    #[test]
    fn test_unknown_type_and_missing_settings() {
        let unknown = provider("mailgun", json!({}));
        assert_eq!(factory().create_sender(&unknown).unwrap_err().code(), "VALIDATION_ERROR");

        let incomplete = provider("aws_ses", json!({ "region": "us-east-1" }));
        assert!(factory().create_sender(&incomplete).is_ok());
        assert!(!factory().is_provider_valid(&incomplete));
    }
}
