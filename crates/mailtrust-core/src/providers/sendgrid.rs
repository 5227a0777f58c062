//! SendGrid v3 mail send API

use super::{
    setting, synthesize_message_id, EmailSender, ProviderError, SendRequest, SendResponse,
    Settings,
};
use async_trait::async_trait;
use mailtrust_common::types::ProviderType;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl<'a> Address<'a> {
    fn bare(email: &'a str) -> Self {
        Self { email, name: None }
    }
}

fn addresses(list: &[String]) -> Vec<Address<'_>> {
    list.iter().map(|a| Address::bare(a)).collect()
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<Address<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct MailSend<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<Address<'a>>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

impl<'a> MailSend<'a> {
    fn from_request(request: &'a SendRequest) -> Self {
        // text/plain must precede text/html
        let mut content = Vec::new();
        if let Some(text) = request.text() {
            content.push(Content {
                content_type: "text/plain",
                value: text,
            });
        }
        if let Some(html) = request.html() {
            content.push(Content {
                content_type: "text/html",
                value: html,
            });
        }

        Self {
            personalizations: vec![Personalization {
                to: addresses(&request.to),
                cc: addresses(&request.cc),
                bcc: addresses(&request.bcc),
            }],
            from: Address {
                email: &request.from,
                name: request.from_name.as_deref().filter(|n| !n.trim().is_empty()),
            },
            reply_to: request.reply_to.as_deref().map(Address::bare),
            subject: &request.subject,
            content,
        }
    }
}

pub struct SendGridSender {
    api_key: Option<String>,
    base_url: String,
    hostname: String,
    client: Client,
}

impl std::fmt::Debug for SendGridSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendGridSender")
            .field("base_url", &self.base_url)
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl SendGridSender {
    /// Reads `apiKey`
    pub(crate) fn from_settings(
        settings: &Settings,
        base_url: &str,
        timeout: Duration,
        hostname: &str,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key: setting(settings, "apiKey").map(str::to_string),
            base_url: base_url.trim_end_matches('/').to_string(),
            hostname: hostname.to_string(),
            client,
        })
    }
}

#[async_trait]
impl EmailSender for SendGridSender {
    async fn send(&self, request: &SendRequest) -> Result<SendResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::NotConfigured(ProviderType::Sendgrid))?;
        request.validate()?;

        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(api_key)
            .json(&MailSend::from_request(request))
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let provider_message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| synthesize_message_id(&self.hostname));

        debug!(message_id = %provider_message_id, "SendGrid accepted message");
        Ok(SendResponse {
            provider_message_id,
        })
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Sendgrid
    }
}
