//! Rule-based content scorer

use super::{ContentAnalysis, RiskLevel};
use mailtrust_common::{Error, Result};
use regex::Regex;
use tracing::debug;

const TRIGGER_WORDS: &[&str] = &[
    "free",
    "money",
    "cash",
    "winner",
    "win",
    "prize",
    "urgent",
    "guarantee",
    "guaranteed",
    "credit",
    "cheap",
    "discount",
    "bonus",
    "offer",
    "income",
    "earn",
    "lottery",
    "casino",
    "viagra",
    "million",
    "act now",
    "buy now",
    "order now",
    "limited time",
    "risk-free",
    "no cost",
];

const SPAM_PHRASES: &[&str] = &[
    "click here",
    "once in a lifetime",
    "you have been selected",
    "make money fast",
    "earn extra cash",
    "double your income",
    "no credit check",
    "100% free",
    "this is not spam",
    "dear friend",
    "risk free trial",
    "limited time offer",
];

const LINK_SHORTENERS: &[&str] = &[
    "bit.ly",
    "tinyurl.com",
    "goo.gl",
    "t.co",
    "ow.ly",
    "is.gd",
    "buff.ly",
    "rebrand.ly",
];

/// Recommendation emitted for warnings containing the key
const RECOMMENDATIONS: &[(&str, &str)] = &[
    ("capital", "Use sentence case instead of capital letters"),
    ("exclamation", "Reduce the number of exclamation marks"),
    ("trigger", "Rephrase promotional wording that spam filters flag"),
    ("spam phrase", "Rephrase promotional wording that spam filters flag"),
    ("reply or forward", "Do not fake reply or forward prefixes in the subject"),
    ("links", "Reduce the number of links relative to the text"),
    ("shortener", "Link to full URLs on your own domain instead of shorteners"),
    ("currency", "Avoid repeated currency symbols"),
];

struct Pattern {
    label: &'static str,
    regex: Regex,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Internal(format!("Invalid content pattern: {}", e)))
}

/// Heuristic spam-likeness scorer with patterns compiled once
pub struct ContentScorer {
    triggers: Vec<Pattern>,
    phrases: Vec<Pattern>,
    link: Regex,
    shortener: Regex,
    tag: Regex,
    reply_prefix: Regex,
}

impl ContentScorer {
    pub fn new() -> Result<Self> {
        let triggers = TRIGGER_WORDS
            .iter()
            .map(|&word| {
                Ok(Pattern {
                    label: word,
                    regex: compile(&format!(r"(?i)\b{}\b", regex::escape(word)))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let phrases = SPAM_PHRASES
            .iter()
            .map(|&phrase| {
                Ok(Pattern {
                    label: phrase,
                    regex: compile(&format!("(?i){}", regex::escape(phrase)))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let shorteners = LINK_SHORTENERS
            .iter()
            .map(|d| regex::escape(d))
            .collect::<Vec<_>>()
            .join("|");

        Ok(Self {
            triggers,
            phrases,
            link: compile(r"(?i)https?://")?,
            shortener: compile(&format!(r"(?i)https?://(www\.)?({})/", shorteners))?,
            tag: compile(r"<[^>]*>")?,
            reply_prefix: compile(r"(?i)^\s*(re|fw|fwd)\s*:")?,
        })
    }

    /// Score a message. Either body may be absent.
    pub fn analyze(
        &self,
        subject: &str,
        html: Option<&str>,
        text: Option<&str>,
    ) -> ContentAnalysis {
        let mut score = 0u32;
        let mut warnings = Vec::new();

        score += self.score_subject(subject, &mut warnings);
        score += self.score_body(html, text, &mut warnings);

        let risk_level = RiskLevel::from_score(score);
        let recommendations = recommendations_for(&warnings);

        debug!(score, risk = %risk_level, warnings = warnings.len(), "Scored message content");
        ContentAnalysis {
            score,
            risk_level,
            warnings,
            recommendations,
        }
    }

    fn score_subject(&self, subject: &str, warnings: &mut Vec<String>) -> u32 {
        let mut score = 0;
        let trimmed = subject.trim();

        let letters: Vec<char> = trimmed.chars().filter(|c| c.is_alphabetic()).collect();
        if trimmed.chars().count() > 5
            && !letters.is_empty()
            && letters.iter().all(|c| c.is_uppercase())
        {
            score += 5;
            warnings.push("Subject is written in capital letters".to_string());
        }

        let exclamations = trimmed.matches('!').count();
        if exclamations > 1 {
            score += 3;
            warnings.push(format!("Subject has {} exclamation marks", exclamations));
        }

        for trigger in self.triggers.iter().filter(|t| t.regex.is_match(trimmed)) {
            score += 3;
            warnings.push(format!("Subject contains trigger word \"{}\"", trigger.label));
        }

        if self.reply_prefix.is_match(trimmed) {
            score += 4;
            warnings.push("Subject uses a reply or forward prefix".to_string());
        }

        score
    }

    fn score_body(
        &self,
        html: Option<&str>,
        text: Option<&str>,
        warnings: &mut Vec<String>,
    ) -> u32 {
        let html = html.unwrap_or_default();
        let plain = match text.filter(|t| !t.trim().is_empty()) {
            Some(text) => text.to_string(),
            None => self.tag.replace_all(html, " ").into_owned(),
        };
        if plain.trim().is_empty() && html.trim().is_empty() {
            return 0;
        }

        let mut score = 0;

        let triggers = self
            .triggers
            .iter()
            .filter(|t| t.regex.is_match(&plain))
            .count();
        if triggers >= 6 {
            score += 5;
            warnings.push(format!("Body contains {} distinct trigger words", triggers));
        } else if triggers >= 3 {
            score += 2;
            warnings.push(format!("Body contains {} distinct trigger words", triggers));
        }

        for phrase in self.phrases.iter().filter(|p| p.regex.is_match(&plain)) {
            score += 3;
            warnings.push(format!("Body contains spam phrase \"{}\"", phrase.label));
        }

        let (upper, letters) = plain
            .chars()
            .filter(|c| c.is_alphabetic())
            .fold((0usize, 0usize), |(u, n), c| (u + usize::from(c.is_uppercase()), n + 1));
        if letters > 0 {
            let ratio = upper as f64 / letters as f64;
            if ratio > 0.5 {
                score += 4;
                warnings.push("Most of the body is in capital letters".to_string());
            } else if ratio > 0.3 {
                score += 2;
                warnings.push("Body uses many capital letters".to_string());
            }
        }

        // The HTML part carries links in href attributes the text part may omit
        let links = self
            .link
            .find_iter(html)
            .count()
            .max(text.map(|t| self.link.find_iter(t).count()).unwrap_or(0));
        let words = plain.split_whitespace().count();
        if words > 0 && links > 0 {
            let density = links as f64 / words as f64;
            if density > 0.10 {
                score += 3;
                warnings.push(format!("Body has too many links ({} for {} words)", links, words));
            } else if density > 0.05 {
                score += 1;
                warnings.push(format!("Body has many links ({} for {} words)", links, words));
            }
        }

        let shortened = self.shortener.is_match(html)
            || text.map(|t| self.shortener.is_match(t)).unwrap_or(false);
        if shortened {
            score += 2;
            warnings.push("Body links through a URL shortener".to_string());
        }

        let exclamations = plain.matches('!').count();
        if exclamations > 5 {
            score += 2;
            warnings.push(format!("Body has {} exclamation marks", exclamations));
        }

        let currency = plain.matches('$').count();
        if currency > 3 {
            score += 2;
            warnings.push(format!("Body repeats the currency symbol {} times", currency));
        }

        score
    }
}

fn recommendations_for(warnings: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for warning in warnings {
        let lower = warning.to_lowercase();
        for (key, recommendation) in RECOMMENDATIONS {
            if lower.contains(key) && !out.iter().any(|r| r == recommendation) {
                out.push(recommendation.to_string());
            }
        }
    }
    out
}
