//! Amazon SES sender (SES v2 HTTP API, SigV4 signed)

use super::sigv4::{self, Credentials};
use super::{setting, EmailSender, ProviderError, SendRequest, SendResponse, Settings};
use async_trait::async_trait;
use chrono::Utc;
use mailtrust_common::types::ProviderType;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const SEND_PATH: &str = "/v2/email/outbound-emails";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailResponse {
    message_id: String,
}

pub struct SesSender {
    credentials: Option<Credentials>,
    region: Option<String>,
    endpoint: Option<Url>,
    client: Client,
}

impl std::fmt::Debug for SesSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SesSender")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint.as_ref().map(Url::as_str))
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl SesSender {
    /// Reads `accessKey`, `secretKey`, `region` and optional `sessionToken`
    pub(crate) fn from_settings(
        settings: &Settings,
        endpoint_override: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let credentials = match (setting(settings, "accessKey"), setting(settings, "secretKey")) {
            (Some(access_key), Some(secret_key)) => Some(Credentials {
                access_key: access_key.to_string(),
                secret_key: secret_key.to_string(),
                session_token: setting(settings, "sessionToken").map(str::to_string),
            }),
            _ => None,
        };
        let region = setting(settings, "region").map(str::to_string);

        let endpoint = match (endpoint_override, &region) {
            (Some(url), _) => Some(parse_endpoint(url)?),
            (None, Some(region)) => Some(parse_endpoint(&format!(
                "https://email.{}.amazonaws.com",
                region
            ))?),
            (None, None) => None,
        };

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            credentials,
            region,
            endpoint,
            client,
        })
    }

    fn payload(request: &SendRequest) -> Value {
        let mut body = serde_json::Map::new();
        if let Some(html) = request.html() {
            body.insert("Html".to_string(), json!({ "Data": html, "Charset": "UTF-8" }));
        }
        if let Some(text) = request.text() {
            body.insert("Text".to_string(), json!({ "Data": text, "Charset": "UTF-8" }));
        }

        let mut payload = json!({
            "FromEmailAddress": request.from_header(),
            "Destination": {
                "ToAddresses": request.to,
                "CcAddresses": request.cc,
                "BccAddresses": request.bcc,
            },
            "Content": {
                "Simple": {
                    "Subject": { "Data": request.subject, "Charset": "UTF-8" },
                    "Body": body,
                }
            }
        });
        if let Some(reply_to) = &request.reply_to {
            payload["ReplyToAddresses"] = json!([reply_to]);
        }
        payload
    }
}

fn parse_endpoint(url: &str) -> Result<Url, ProviderError> {
    Url::parse(url)
        .map_err(|e| ProviderError::Config(format!("Invalid SES endpoint {}: {}", url, e)))
}

#[async_trait]
impl EmailSender for SesSender {
    async fn send(&self, request: &SendRequest) -> Result<SendResponse, ProviderError> {
        let (credentials, region, endpoint) =
            match (&self.credentials, &self.region, &self.endpoint) {
                (Some(c), Some(r), Some(e)) => (c, r, e),
                _ => return Err(ProviderError::NotConfigured(ProviderType::AwsSes)),
            };
        request.validate()?;

        let url = endpoint
            .join(SEND_PATH)
            .map_err(|e| ProviderError::Config(format!("Invalid SES endpoint: {}", e)))?;
        let body = serde_json::to_vec(&Self::payload(request))
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;

        let signed = sigv4::sign(
            credentials,
            region,
            "ses",
            "POST",
            &url,
            &[("content-type", "application/json")],
            &body,
            Utc::now(),
        )?;

        let mut http_request = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .body(body);
        for (name, value) in signed {
            http_request = http_request.header(name, value);
        }

        let response = http_request
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

        let parsed: SendEmailResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(format!("Invalid SES response: {}", e)))?;

        debug!(message_id = %parsed.message_id, "SES accepted message");
        Ok(SendResponse {
            provider_message_id: parsed.message_id,
        })
    }

    fn is_configured(&self) -> bool {
        self.credentials.is_some() && self.region.is_some() && self.endpoint.is_some()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsSes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn request() -> SendRequest {
        SendRequest {
            from: "news@example.com".to_string(),
            from_name: Some("News".to_string()),
            to: vec!["a@example.org".to_string()],
            cc: vec!["b@example.org".to_string()],
            reply_to: Some("replies@example.com".to_string()),
            subject: "Weekly digest".to_string(),
            html_body: Some("<p>Hello</p>".to_string()),
            text_body: Some("Hello".to_string()),
            ..SendRequest::default()
        }
    }

    #[tokio::test]
    async fn test_send_signs_and_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEND_PATH))
            .and(header_exists("authorization"))
            .and(header_exists("x-amz-date"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "MessageId": "ses-0001" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let sender = SesSender::from_settings(
            &settings(&[("accessKey", "AKID"), ("secretKey", "secret"), ("region", "eu-west-1")]),
            Some(&server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();

        let response = sender.send(&request()).await.unwrap();
        assert_eq!(response.provider_message_id, "ses-0001");

        let received = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["FromEmailAddress"], "\"News\" <news@example.com>");
        assert_eq!(body["Destination"]["CcAddresses"][0], "b@example.org");
        assert_eq!(body["ReplyToAddresses"][0], "replies@example.com");
        assert_eq!(body["Content"]["Simple"]["Body"]["Text"]["Data"], "Hello");

        let auth = received[0]
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKID/"));
        assert!(auth.contains("/eu-west-1/ses/aws4_request"));
    }

    #[tokio::test]
    async fn test_rejection_carries_provider_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("MessageRejected"))
            .mount(&server)
            .await;

        let sender = SesSender::from_settings(
            &settings(&[("accessKey", "AKID"), ("secretKey", "secret"), ("region", "us-east-1")]),
            Some(&server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();

        match sender.send(&request()).await {
            Err(ProviderError::Rejected { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "MessageRejected");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_refuse_to_send() {
        let settings = settings(&[("region", "us-east-1")]);
        let sender = SesSender::from_settings(&settings, None, Duration::from_secs(5)).unwrap();
        assert!(!sender.is_configured());
        assert!(matches!(
            sender.send(&request()).await,
            Err(ProviderError::NotConfigured(ProviderType::AwsSes))
        ));
    }

    #[test]
    fn test_default_endpoint_from_region() {
        let sender = SesSender::from_settings(
            &settings(&[("accessKey", "AKID"), ("secretKey", "s"), ("region", "ap-south-1")]),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(sender.is_configured());
        assert_eq!(
            sender.endpoint.as_ref().map(Url::as_str),
            Some("https://email.ap-south-1.amazonaws.com/")
        );
    }
}
