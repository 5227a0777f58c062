//! Pre-send content screening
//!
//! Heuristic scoring of subject and body. Scores are advisory; the caller
//! decides whether a high risk level blocks the send.

pub mod scorer;

pub use scorer::ContentScorer;

use serde::{Deserialize, Serialize};

/// Points at or above which content is high risk
pub const HIGH_RISK_SCORE: u32 = 15;
/// Points at or above which content is medium risk
pub const MEDIUM_RISK_SCORE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: u32) -> Self {
        if score >= HIGH_RISK_SCORE {
            RiskLevel::High
        } else if score >= MEDIUM_RISK_SCORE {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

/// Result of scoring one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub score: u32,
    pub risk_level: RiskLevel,
    pub warnings: Vec<String>,
    /// Derived from the warnings, deduplicated in emission order
    pub recommendations: Vec<String>,
}
