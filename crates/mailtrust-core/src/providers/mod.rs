//! Provider dispatch
//!
//! One capability, [`EmailSender`], and exactly three transports behind the
//! sealed [`ProviderSender`] enum. Senders are only built by
//! [`ProviderFactory`], which decrypts sensitive settings first.

pub mod factory;
pub mod sendgrid;
pub mod service;
pub mod ses;
pub mod sigv4;
pub mod smtp;

pub use factory::{is_sensitive_key, ProviderFactory};
pub use sendgrid::SendGridSender;
pub use service::ProviderService;
pub use ses::SesSender;
pub use smtp::SmtpSender;

use async_trait::async_trait;
use mailtrust_common::types::ProviderType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Outbound message handed to a provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendRequest {
    pub from: String,
    pub from_name: Option<String>,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub reply_to: Option<String>,
    pub subject: String,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
}

impl SendRequest {
    pub fn html(&self) -> Option<&str> {
        self.html_body.as_deref().filter(|b| !b.is_empty())
    }

    pub fn text(&self) -> Option<&str> {
        self.text_body.as_deref().filter(|b| !b.is_empty())
    }

    /// Reject requests no transport could deliver
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.from.trim().is_empty() {
            return Err(ProviderError::InvalidRequest("sender address is required".to_string()));
        }
        if self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "at least one recipient is required".to_string(),
            ));
        }
        if self.html().is_none() && self.text().is_none() {
            return Err(ProviderError::InvalidRequest(
                "either an HTML or a text body is required".to_string(),
            ));
        }
        Ok(())
    }

    /// `"Name" <address>` or the bare address
    pub fn from_header(&self) -> String {
        match self.from_name.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(name) => format!("\"{}\" <{}>", name.replace('"', ""), self.from),
            None => self.from.clone(),
        }
    }
}

/// Successful hand-off to a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    pub provider_message_id: String,
}

/// Provider-level failure
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0} provider is not configured")]
    NotConfigured(ProviderType),

    #[error("Invalid provider configuration: {0}")]
    Config(String),

    #[error("Invalid send request: {0}")]
    InvalidRequest(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider rejected the message (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl From<ProviderError> for mailtrust_common::Error {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Config(msg) => mailtrust_common::Error::Config(msg),
            ProviderError::InvalidRequest(msg) => mailtrust_common::Error::Validation(msg),
            other => mailtrust_common::Error::Provider(other.to_string()),
        }
    }
}

/// Sending capability shared by every transport
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, request: &SendRequest) -> Result<SendResponse, ProviderError>;

    /// All required settings are present
    fn is_configured(&self) -> bool;

    fn provider_type(&self) -> ProviderType;
}

/// The three supported transports
#[derive(Debug)]
pub enum ProviderSender {
    Ses(SesSender),
    SendGrid(SendGridSender),
    Smtp(SmtpSender),
}

#[async_trait]
impl EmailSender for ProviderSender {
    async fn send(&self, request: &SendRequest) -> Result<SendResponse, ProviderError> {
        match self {
            ProviderSender::Ses(s) => s.send(request).await,
            ProviderSender::SendGrid(s) => s.send(request).await,
            ProviderSender::Smtp(s) => s.send(request).await,
        }
    }

    fn is_configured(&self) -> bool {
        match self {
            ProviderSender::Ses(s) => s.is_configured(),
            ProviderSender::SendGrid(s) => s.is_configured(),
            ProviderSender::Smtp(s) => s.is_configured(),
        }
    }

    fn provider_type(&self) -> ProviderType {
        match self {
            ProviderSender::Ses(s) => s.provider_type(),
            ProviderSender::SendGrid(s) => s.provider_type(),
            ProviderSender::Smtp(s) => s.provider_type(),
        }
    }
}

/// Decrypted provider settings
pub(crate) type Settings = HashMap<String, String>;

/// Non-empty setting value
pub(crate) fn setting<'a>(settings: &'a Settings, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// `<uuid@hostname>` for transports that return no id
pub(crate) fn synthesize_message_id(hostname: &str) -> String {
    format!("<{}@{}>", Uuid::now_v7(), hostname)
}
