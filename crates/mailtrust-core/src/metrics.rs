//! Prometheus metrics for the deliverability engine
//!
//! Metrics exported:
//!
//! - `mailtrust_sends_total{provider, outcome}`
//! - `mailtrust_send_duration_seconds{provider}`
//! - `mailtrust_content_blocked_total`
//! - `mailtrust_recipients_suppressed_total`
//! - `mailtrust_quota_rejections_total{resource}`
//! - `mailtrust_domain_checks_total{status}`
//! - `mailtrust_feedback_events_total{kind}`

use mailtrust_common::{Error, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Metric handles backed by a private registry
#[derive(Clone)]
pub struct DeliverabilityMetrics {
    registry: Registry,
    sends: IntCounterVec,
    send_duration: HistogramVec,
    content_blocked: IntCounter,
    recipients_suppressed: IntCounter,
    quota_rejections: IntCounterVec,
    domain_checks: IntCounterVec,
    feedback_events: IntCounterVec,
}

impl DeliverabilityMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("mailtrust".to_string()), None)
            .map_err(metrics_error)?;

        let sends = IntCounterVec::new(
            Opts::new("sends_total", "Outbound send attempts by provider and outcome"),
            &["provider", "outcome"],
        )
        .map_err(metrics_error)?;
        let send_duration = HistogramVec::new(
            HistogramOpts::new("send_duration_seconds", "Provider send latency in seconds")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["provider"],
        )
        .map_err(metrics_error)?;
        let content_blocked = IntCounter::new(
            "content_blocked_total",
            "Messages refused because content scored as high risk",
        )
        .map_err(metrics_error)?;
        let recipients_suppressed = IntCounter::new(
            "recipients_suppressed_total",
            "Sends skipped because the recipient is excluded",
        )
        .map_err(metrics_error)?;
        let quota_rejections = IntCounterVec::new(
            Opts::new("quota_rejections_total", "Quota rejections by resource"),
            &["resource"],
        )
        .map_err(metrics_error)?;
        let domain_checks = IntCounterVec::new(
            Opts::new("domain_checks_total", "Domain verification checks by resulting status"),
            &["status"],
        )
        .map_err(metrics_error)?;
        let feedback_events = IntCounterVec::new(
            Opts::new("feedback_events_total", "Processed bounce and complaint events"),
            &["kind"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(sends.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(send_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(content_blocked.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(recipients_suppressed.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(quota_rejections.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(domain_checks.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(feedback_events.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            sends,
            send_duration,
            content_blocked,
            recipients_suppressed,
            quota_rejections,
            domain_checks,
            feedback_events,
        })
    }

    pub fn record_send(&self, provider: &str, success: bool, seconds: f64) {
        let outcome = if success { "success" } else { "failure" };
        self.sends.with_label_values(&[provider, outcome]).inc();
        self.send_duration
            .with_label_values(&[provider])
            .observe(seconds);
    }

    pub fn record_content_blocked(&self) {
        self.content_blocked.inc();
    }

    pub fn record_recipient_suppressed(&self) {
        self.recipients_suppressed.inc();
    }

    pub fn record_quota_rejection(&self, resource: &str) {
        self.quota_rejections.with_label_values(&[resource]).inc();
    }

    pub fn record_domain_check(&self, status: &str) {
        self.domain_checks.with_label_values(&[status]).inc();
    }

    pub fn record_feedback(&self, kind: &str) {
        self.feedback_events.with_label_values(&[kind]).inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Metrics error: {}", e))
}
