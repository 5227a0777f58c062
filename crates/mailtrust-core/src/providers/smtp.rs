//! Direct SMTP relay sender

use super::{
    setting, synthesize_message_id, EmailSender, ProviderError, SendRequest, SendResponse,
    Settings,
};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::extension::ClientId;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use mailtrust_common::types::ProviderType;
use std::time::Duration;
use tracing::debug;

/// TLS mode for the relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpEncryption {
    /// Implicit TLS (`ssl` / `tls`)
    Tls,
    StartTls,
    None,
}

impl SmtpEncryption {
    fn parse(value: Option<&str>) -> Result<Self, ProviderError> {
        match value.map(str::to_ascii_lowercase).as_deref() {
            None | Some("starttls") => Ok(SmtpEncryption::StartTls),
            Some("ssl") | Some("tls") => Ok(SmtpEncryption::Tls),
            Some("none") => Ok(SmtpEncryption::None),
            Some(other) => Err(ProviderError::Config(format!(
                "Unknown SMTP encryption mode: {}",
                other
            ))),
        }
    }

    fn default_port(self) -> u16 {
        match self {
            SmtpEncryption::Tls => 465,
            SmtpEncryption::StartTls => 587,
            SmtpEncryption::None => 25,
        }
    }
}

pub struct SmtpSender {
    host: Option<String>,
    port: u16,
    encryption: SmtpEncryption,
    hostname: String,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl std::fmt::Debug for SmtpSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSender")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("encryption", &self.encryption)
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl SmtpSender {
    /// Reads `host`, `port`, `username`, `password` and `encryption`
    pub(crate) fn from_settings(
        settings: &Settings,
        timeout: Duration,
        hostname: &str,
    ) -> Result<Self, ProviderError> {
        let encryption = SmtpEncryption::parse(setting(settings, "encryption"))?;
        let port = match setting(settings, "port") {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| ProviderError::Config(format!("Invalid SMTP port: {}", port)))?,
            None => encryption.default_port(),
        };
        let host = setting(settings, "host").map(str::to_string);

        let transport = match (
            host.as_deref(),
            setting(settings, "username"),
            setting(settings, "password"),
        ) {
            (Some(host), Some(username), Some(password)) => {
                let builder = match encryption {
                    SmtpEncryption::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                        .map_err(|e| ProviderError::Config(format!("Invalid SMTP host: {}", e)))?,
                    SmtpEncryption::StartTls => {
                        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map_err(
                            |e| ProviderError::Config(format!("Invalid SMTP host: {}", e)),
                        )?
                    }
                    SmtpEncryption::None => {
                        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                    }
                };
                Some(
                    builder
                        .port(port)
                        .hello_name(ClientId::Domain(hostname.to_string()))
                        .credentials(Credentials::new(username.to_string(), password.to_string()))
                        .timeout(Some(timeout))
                        .build(),
                )
            }
            _ => None,
        };

        Ok(Self {
            host,
            port,
            encryption,
            hostname: hostname.to_string(),
            transport,
        })
    }

    /// Compose the MIME message. Multipart alternative when both bodies are present.
    pub fn build_message(
        &self,
        request: &SendRequest,
        message_id: &str,
    ) -> Result<Message, ProviderError> {
        let mut builder = Message::builder()
            .from(mailbox(&request.from_header())?)
            .subject(&request.subject)
            .message_id(Some(message_id.to_string()));
        for to in &request.to {
            builder = builder.to(mailbox(to)?);
        }
        for cc in &request.cc {
            builder = builder.cc(mailbox(cc)?);
        }
        for bcc in &request.bcc {
            builder = builder.bcc(mailbox(bcc)?);
        }
        if let Some(reply_to) = &request.reply_to {
            builder = builder.reply_to(mailbox(reply_to)?);
        }

        let message = match (request.html(), request.text()) {
            (Some(html), Some(text)) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(text.to_string()))
                    .singlepart(SinglePart::html(html.to_string())),
            ),
            (Some(html), None) => builder.header(ContentType::TEXT_HTML).body(html.to_string()),
            (None, Some(text)) => builder.header(ContentType::TEXT_PLAIN).body(text.to_string()),
            (None, None) => {
                return Err(ProviderError::InvalidRequest(
                    "either an HTML or a text body is required".to_string(),
                ))
            }
        };

        message.map_err(|e| ProviderError::InvalidRequest(format!("Failed to build email: {}", e)))
    }
}

fn mailbox(address: &str) -> Result<Mailbox, ProviderError> {
    address
        .parse()
        .map_err(|e| ProviderError::InvalidRequest(format!("Invalid address {}: {}", address, e)))
}

/// Server-assigned id from a `250 ... queued as <id>` reply
fn queued_id<'a>(lines: impl Iterator<Item = &'a str>) -> Option<String> {
    const MARKER: &str = "queued as ";
    lines.into_iter().find_map(|line| {
        let start = line.to_ascii_lowercase().find(MARKER)? + MARKER.len();
        line.get(start..)?
            .split_whitespace()
            .next()
            .map(|id| id.trim_matches(|c| c == '<' || c == '>').to_string())
            .filter(|id| !id.is_empty())
    })
}

#[async_trait]
impl EmailSender for SmtpSender {
    async fn send(&self, request: &SendRequest) -> Result<SendResponse, ProviderError> {
        let transport = self
            .transport
            .as_ref()
            .ok_or(ProviderError::NotConfigured(ProviderType::Smtp))?;
        request.validate()?;

        let message_id = synthesize_message_id(&self.hostname);
        let message = self.build_message(request, &message_id)?;

        let response = transport
            .send(message)
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let provider_message_id = queued_id(response.message()).unwrap_or(message_id);
        debug!(message_id = %provider_message_id, host = ?self.host, "SMTP relay accepted message");
        Ok(SendResponse {
            provider_message_id,
        })
    }

    fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Smtp
    }
}
