//! Common types for MailTrust

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for users (tenants owning domains, providers and contacts)
pub type UserId = Uuid;

/// Unique identifier for sending domains
pub type DomainId = Uuid;

/// Unique identifier for contacts
pub type ContactId = Uuid;

/// Unique identifier for email provider configurations
pub type ProviderConfigId = Uuid;

/// Unique identifier for rate-limit windows
pub type RateLimitWindowId = Uuid;

/// Lifecycle status of a sending domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    Pending,
    Partial,
    Verified,
    Failed,
    Error,
}

impl DomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStatus::Pending => "pending",
            DomainStatus::Partial => "partial",
            DomainStatus::Verified => "verified",
            DomainStatus::Failed => "failed",
            DomainStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DomainStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DomainStatus::Pending),
            "partial" => Ok(DomainStatus::Partial),
            "verified" => Ok(DomainStatus::Verified),
            "failed" => Ok(DomainStatus::Failed),
            "error" => Ok(DomainStatus::Error),
            _ => Err(format!("Invalid domain status: {}", s)),
        }
    }
}

/// Deliverability status of a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Active,
    Bounced,
    Unsubscribed,
    Complained,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Active => "active",
            ContactStatus::Bounced => "bounced",
            ContactStatus::Unsubscribed => "unsubscribed",
            ContactStatus::Complained => "complained",
        }
    }

    /// Statuses that exclude a contact from future campaign sends
    pub fn is_suppressed(&self) -> bool {
        !matches!(self, ContactStatus::Active)
    }
}

impl std::fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ContactStatus::Active),
            "bounced" => Ok(ContactStatus::Bounced),
            "unsubscribed" => Ok(ContactStatus::Unsubscribed),
            "complained" => Ok(ContactStatus::Complained),
            _ => Err(format!("Invalid contact status: {}", s)),
        }
    }
}

/// Kind of email provider behind a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    AwsSes,
    Sendgrid,
    Smtp,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::AwsSes => "aws_ses",
            ProviderType::Sendgrid => "sendgrid",
            ProviderType::Smtp => "smtp",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aws_ses" | "ses" => Ok(ProviderType::AwsSes),
            "sendgrid" => Ok(ProviderType::Sendgrid),
            "smtp" => Ok(ProviderType::Smtp),
            _ => Err(format!("Invalid provider type: {}", s)),
        }
    }
}

/// Resource counted by the quota enforcer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    EmailSend,
    CampaignSend,
    ApiRequest,
    DomainVerification,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::EmailSend => "email_send",
            ResourceType::CampaignSend => "campaign_send",
            ResourceType::ApiRequest => "api_request",
            ResourceType::DomainVerification => "domain_verification",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email_send" => Ok(ResourceType::EmailSend),
            "campaign_send" => Ok(ResourceType::CampaignSend),
            "api_request" => Ok(ResourceType::ApiRequest),
            "domain_verification" => Ok(ResourceType::DomainVerification),
            _ => Err(format!("Invalid resource type: {}", s)),
        }
    }
}

/// Bounce classification reported by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BounceKind {
    /// Permanent failure (unknown mailbox, rejected domain)
    Hard,
    /// Temporary failure (mailbox full, greylisting)
    Soft,
}

impl std::fmt::Display for BounceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BounceKind::Hard => write!(f, "hard"),
            BounceKind::Soft => write!(f, "soft"),
        }
    }
}

impl std::str::FromStr for BounceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hard" | "permanent" => Ok(BounceKind::Hard),
            "soft" | "transient" | "temporary" => Ok(BounceKind::Soft),
            _ => Err(format!("Invalid bounce kind: {}", s)),
        }
    }
}
