//! Bounce and complaint processing
//!
//! Provider feedback mutates contact eligibility. Every transition is computed
//! from the row as read and written back with a compare-and-swap on the
//! contact version, retrying on contention, so concurrent events for the same
//! contact are never lost.

use crate::metrics::DeliverabilityMetrics;
use chrono::{DateTime, Utc};
use mailtrust_common::config::FeedbackConfig;
use mailtrust_common::types::{BounceKind, ContactId, ContactStatus, UserId};
use mailtrust_common::{Error, Result};
use mailtrust_storage::models::{BounceStatistics, Contact, ContactUpdate};
use mailtrust_storage::repository::ContactRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a feedback event identifies its contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactRef {
    Id(ContactId),
    /// Webhook payloads without an internal id; always scoped to one user
    Email { user_id: UserId, email: String },
}

/// Normalized provider feedback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedbackEvent {
    Bounce { kind: BounceKind, reason: String },
    Complaint { reason: String },
    Delivered,
}

impl FeedbackEvent {
    fn label(&self) -> &'static str {
        match self {
            FeedbackEvent::Bounce {
                kind: BounceKind::Hard,
                ..
            } => "hard_bounce",
            FeedbackEvent::Bounce {
                kind: BounceKind::Soft,
                ..
            } => "soft_bounce",
            FeedbackEvent::Complaint { .. } => "complaint",
            FeedbackEvent::Delivered => "delivered",
        }
    }
}

/// A contact missing or in a suppressed status must not receive campaign mail
pub fn is_excluded(contact: Option<&Contact>) -> bool {
    match contact {
        None => true,
        Some(contact) => contact
            .status_enum()
            .map(|s| s.is_suppressed())
            .unwrap_or(false),
    }
}

fn append_note(notes: Option<&str>, at: DateTime<Utc>, line: &str) -> Option<String> {
    let entry = format!("[{}] {}", at.to_rfc3339(), line);
    Some(match notes.filter(|n| !n.is_empty()) {
        Some(existing) => format!("{}\n{}", existing, entry),
        None => entry,
    })
}

fn base_update(contact: &Contact, status: ContactStatus) -> ContactUpdate {
    ContactUpdate {
        id: contact.id,
        expected_version: contact.version,
        status,
        bounce_count: contact.bounce_count,
        hard_bounce_count: contact.hard_bounce_count,
        soft_bounce_count: contact.soft_bounce_count,
        last_bounced_at: contact.last_bounced_at,
        unsubscribed_at: contact.unsubscribed_at,
        notes: contact.notes.clone(),
    }
}

/// Next deliverability state for `contact` after `event`.
/// `None` when the event changes nothing.
pub fn transition(
    contact: &Contact,
    event: &FeedbackEvent,
    soft_bounce_threshold: i32,
    now: DateTime<Utc>,
) -> Option<ContactUpdate> {
    let current = contact.status_enum().unwrap_or(ContactStatus::Active);

    match event {
        FeedbackEvent::Bounce { kind, reason } => {
            let bounce_count = contact.bounce_count.saturating_add(1);
            let status = match (current, kind) {
                // Complaints and unsubscribes outrank bounces
                (ContactStatus::Complained | ContactStatus::Unsubscribed, _) => current,
                (_, BounceKind::Hard) => ContactStatus::Bounced,
                (_, BounceKind::Soft) if bounce_count >= soft_bounce_threshold => {
                    ContactStatus::Bounced
                }
                _ => current,
            };

            let mut update = base_update(contact, status);
            update.bounce_count = bounce_count;
            match kind {
                BounceKind::Hard => update.hard_bounce_count += 1,
                BounceKind::Soft => update.soft_bounce_count += 1,
            }
            update.last_bounced_at = Some(now);
            update.notes = append_note(
                contact.notes.as_deref(),
                now,
                &format!("{} bounce: {}", kind, reason),
            );
            Some(update)
        }
        FeedbackEvent::Complaint { reason } => {
            let mut update = base_update(contact, ContactStatus::Complained);
            update.unsubscribed_at = contact.unsubscribed_at.or(Some(now));
            update.notes = append_note(
                contact.notes.as_deref(),
                now,
                &format!("Spam complaint: {}", reason),
            );
            Some(update)
        }
        FeedbackEvent::Delivered => None,
    }
}

/// Zero the shared bounce counter without touching the status
pub fn reset_transition(contact: &Contact, now: DateTime<Utc>) -> ContactUpdate {
    let mut update = base_update(contact, contact.status_enum().unwrap_or(ContactStatus::Active));
    update.bounce_count = 0;
    update.last_bounced_at = None;
    update.notes = append_note(contact.notes.as_deref(), now, "Bounce count reset");
    update
}

pub struct DeliverabilityFeedback {
    contacts: Arc<dyn ContactRepository>,
    config: FeedbackConfig,
    metrics: Option<DeliverabilityMetrics>,
}

impl DeliverabilityFeedback {
    pub fn new(contacts: Arc<dyn ContactRepository>, config: FeedbackConfig) -> Self {
        Self {
            contacts,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: DeliverabilityMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn lookup(&self, target: &ContactRef) -> Result<Option<Contact>> {
        match target {
            ContactRef::Id(id) => self.contacts.get(*id).await,
            ContactRef::Email { user_id, email } => {
                self.contacts.find_by_email(*user_id, email).await
            }
        }
    }

    async fn load(&self, target: &ContactRef) -> Result<Contact> {
        self.lookup(target)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Contact {}", describe(target))))
    }

    /// Read-modify-write with optimistic retries
    async fn apply<F>(&self, target: &ContactRef, mut next: F) -> Result<Contact>
    where
        F: FnMut(&Contact, DateTime<Utc>) -> Option<ContactUpdate>,
    {
        let attempts = self.config.max_update_attempts.max(1);
        for attempt in 1..=attempts {
            let contact = self.load(target).await?;
            let Some(update) = next(&contact, Utc::now()) else {
                return Ok(contact);
            };

            if let Some(updated) = self.contacts.update_deliverability(update).await? {
                return Ok(updated);
            }
            debug!(contact_id = %contact.id, attempt, "Contact changed concurrently, retrying");
        }

        warn!(
            contact = %describe(target),
            attempts,
            "Gave up updating contact after repeated conflicts"
        );
        Err(Error::Conflict(format!(
            "Contact {} was modified concurrently",
            describe(target)
        )))
    }

    /// Apply one provider event to a contact
    pub async fn process(&self, target: &ContactRef, event: &FeedbackEvent) -> Result<Contact> {
        let threshold = self.config.soft_bounce_threshold;
        let contact = self
            .apply(target, |contact, now| transition(contact, event, threshold, now))
            .await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_feedback(event.label());
        }
        info!(
            contact_id = %contact.id,
            event = event.label(),
            status = %contact.status,
            bounce_count = contact.bounce_count,
            "Processed delivery feedback"
        );
        Ok(contact)
    }

    pub async fn record_bounce(
        &self,
        target: &ContactRef,
        kind: BounceKind,
        reason: &str,
    ) -> Result<Contact> {
        self.process(
            target,
            &FeedbackEvent::Bounce {
                kind,
                reason: reason.to_string(),
            },
        )
        .await
    }

    pub async fn record_complaint(&self, target: &ContactRef, reason: &str) -> Result<Contact> {
        self.process(
            target,
            &FeedbackEvent::Complaint {
                reason: reason.to_string(),
            },
        )
        .await
    }

    /// Explicitly zero the bounce counter
    pub async fn reset_bounces(&self, target: &ContactRef) -> Result<Contact> {
        let contact = self
            .apply(target, |contact, now| Some(reset_transition(contact, now)))
            .await?;
        info!(contact_id = %contact.id, "Reset contact bounce count");
        Ok(contact)
    }

    /// Whether campaign sends to this contact must be skipped
    pub async fn is_target_excluded(&self, target: &ContactRef) -> Result<bool> {
        Ok(is_excluded(self.lookup(target).await?.as_ref()))
    }

    pub async fn statistics(&self, user_id: UserId) -> Result<BounceStatistics> {
        self.contacts.statistics(user_id).await
    }
}

fn describe(target: &ContactRef) -> String {
    match target {
        ContactRef::Id(id) => id.to_string(),
        ContactRef::Email { email, .. } => email.clone(),
    }
}
