//! Single outbound send through every gate
//!
//! Content screening, recipient exclusion, quota admission, provider dispatch
//! and provider counters, in that order.

use crate::content::{ContentAnalysis, ContentScorer, RiskLevel};
use crate::feedback::{ContactRef, DeliverabilityFeedback};
use crate::metrics::DeliverabilityMetrics;
use crate::providers::{EmailSender, ProviderService, SendRequest};
use crate::quota::QuotaEnforcer;
use mailtrust_common::config::ContentConfig;
use mailtrust_common::types::{ProviderConfigId, ResourceType, UserId};
use mailtrust_common::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// A message queued by a user, optionally pinned to one provider
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub user_id: UserId,
    /// `None` sends through the user's default provider
    pub provider_id: Option<ProviderConfigId>,
    pub request: SendRequest,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    Sent {
        provider_id: ProviderConfigId,
        provider_message_id: String,
        /// Recipients dropped because they are excluded
        suppressed: Vec<String>,
        analysis: ContentAnalysis,
    },
    /// Every recipient is excluded; nothing was sent and no quota consumed
    Suppressed { recipients: Vec<String> },
    /// High-risk content refused before any other gate
    Blocked { analysis: ContentAnalysis },
}

pub struct OutboundPipeline {
    scorer: Arc<ContentScorer>,
    feedback: Arc<DeliverabilityFeedback>,
    quota: Arc<QuotaEnforcer>,
    providers: Arc<ProviderService>,
    content: ContentConfig,
    metrics: Option<DeliverabilityMetrics>,
}

impl OutboundPipeline {
    pub fn new(
        scorer: Arc<ContentScorer>,
        feedback: Arc<DeliverabilityFeedback>,
        quota: Arc<QuotaEnforcer>,
        providers: Arc<ProviderService>,
        content: ContentConfig,
    ) -> Self {
        Self {
            scorer,
            feedback,
            quota,
            providers,
            content,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: DeliverabilityMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Drop excluded addresses from `list`, collecting them into `suppressed`
    async fn retain_eligible(
        &self,
        user_id: UserId,
        list: Vec<String>,
        suppressed: &mut Vec<String>,
    ) -> Result<Vec<String>> {
        let mut eligible = Vec::with_capacity(list.len());
        for email in list {
            let target = ContactRef::Email {
                user_id,
                email: email.clone(),
            };
            if self.feedback.is_target_excluded(&target).await? {
                suppressed.push(email);
            } else {
                eligible.push(email);
            }
        }
        Ok(eligible)
    }

    pub async fn send(&self, message: OutboundMessage) -> Result<SendOutcome> {
        let OutboundMessage {
            user_id,
            provider_id,
            mut request,
        } = message;

        let analysis = self.scorer.analyze(
            &request.subject,
            request.html_body.as_deref(),
            request.text_body.as_deref(),
        );
        if self.content.block_high_risk && analysis.risk_level == RiskLevel::High {
            if let Some(metrics) = &self.metrics {
                metrics.record_content_blocked();
            }
            warn!(user_id = %user_id, score = analysis.score, "Blocked high-risk content");
            return Ok(SendOutcome::Blocked { analysis });
        }

        let mut suppressed = Vec::new();
        request.to = self
            .retain_eligible(user_id, std::mem::take(&mut request.to), &mut suppressed)
            .await?;
        request.cc = self
            .retain_eligible(user_id, std::mem::take(&mut request.cc), &mut suppressed)
            .await?;
        request.bcc = self
            .retain_eligible(user_id, std::mem::take(&mut request.bcc), &mut suppressed)
            .await?;

        if let Some(metrics) = &self.metrics {
            for _ in &suppressed {
                metrics.record_recipient_suppressed();
            }
        }
        if request.to.is_empty() && request.cc.is_empty() && request.bcc.is_empty() {
            info!(
                user_id = %user_id,
                recipients = suppressed.len(),
                "All recipients excluded, skipping send"
            );
            return Ok(SendOutcome::Suppressed {
                recipients: suppressed,
            });
        }

        self.quota.increment(user_id, ResourceType::EmailSend).await?;

        let (provider, sender) = self.providers.sender_for(user_id, provider_id).await?;
        let started = Instant::now();
        let result = sender.send(&request).await;
        let elapsed = started.elapsed().as_secs_f64();

        if let Some(metrics) = &self.metrics {
            metrics.record_send(sender.provider_type().as_str(), result.is_ok(), elapsed);
        }
        // Counter failures never fail a send the provider accepted
        if let Err(e) = self.providers.record_result(provider.id, result.is_ok()).await {
            error!(provider_id = %provider.id, error = %e, "Failed to record provider result");
        }

        match result {
            Ok(response) => {
                info!(
                    user_id = %user_id,
                    provider_id = %provider.id,
                    message_id = %response.provider_message_id,
                    suppressed = suppressed.len(),
                    "Message handed to provider"
                );
                Ok(SendOutcome::Sent {
                    provider_id: provider.id,
                    provider_message_id: response.provider_message_id,
                    suppressed,
                    analysis,
                })
            }
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    provider_id = %provider.id,
                    error = %e,
                    "Provider send failed"
                );
                Err(Error::from(e))
            }
        }
    }
}
