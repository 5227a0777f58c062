//! MailTrust Core - Domain trust and deliverability engine
//!
//! This crate decides whether, how and through which credentialed provider an
//! outbound email may be sent: credential encryption, DKIM/SPF/DMARC domain
//! verification, provider dispatch, bounce and complaint feedback, sending
//! quotas and content scoring.

pub mod content;
pub mod email_auth;
pub mod feedback;
pub mod metrics;
pub mod pipeline;
pub mod providers;
pub mod quota;
pub mod trust;
pub mod vault;

pub use content::{ContentAnalysis, ContentScorer, RiskLevel};
pub use email_auth::{
    DkimKeyGenerator, DkimKeyPair, DnsTrustVerifier, RecordOutcome, StaticResolver,
    SystemResolver, TxtResolver, VerificationReport,
};
pub use feedback::{ContactRef, DeliverabilityFeedback, FeedbackEvent};
pub use metrics::DeliverabilityMetrics;
pub use pipeline::{OutboundMessage, OutboundPipeline, SendOutcome};
pub use providers::{
    EmailSender, ProviderError, ProviderFactory, ProviderSender, ProviderService, SendRequest,
    SendResponse,
};
pub use quota::QuotaEnforcer;
pub use trust::{SweepKind, SweepSummary, TrustScheduler, TrustStateMachine};
pub use vault::CredentialVault;
