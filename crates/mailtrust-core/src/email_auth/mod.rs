//! Email Authentication Module
//!
//! DKIM key generation and DNS verification of the SPF, DKIM and DMARC
//! records a sending domain must publish.

pub mod dkim;
pub mod dns;
pub mod verifier;

pub use dkim::{DkimKeyGenerator, DkimKeyPair};
pub use dns::{DnsLookupError, StaticResolver, SystemResolver, TxtResolver};
pub use verifier::{DnsTrustVerifier, RecordOutcome, VerificationReport};

use std::collections::HashMap;

/// Parse `tag=value; tag=value` lists used by DKIM and DMARC records
pub fn parse_tags(s: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();

    for part in s.split(';') {
        let part = part.trim();
        if let Some(eq_pos) = part.find('=') {
            let name = part[..eq_pos].trim().to_lowercase();
            let value = part[eq_pos + 1..].trim().to_string();
            tags.insert(name, value);
        }
    }

    tags
}

/// RFC 1035 host name rules: 1-63 char labels of letters, digits and inner hyphens
pub fn is_valid_domain_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// DKIM selectors are a single DNS label
pub fn is_valid_dkim_selector(selector: &str) -> bool {
    if selector.is_empty() || selector.len() > 63 {
        return false;
    }

    selector
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false)
        && selector.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags("v=DKIM1; K=rsa; p=MIIB==;");
        assert_eq!(tags.get("v").map(String::as_str), Some("DKIM1"));
        assert_eq!(tags.get("k").map(String::as_str), Some("rsa"));
        assert_eq!(tags.get("p").map(String::as_str), Some("MIIB=="));
    }

    #[test]
    fn test_domain_name_validation() {
        assert!(is_valid_domain_name("example.com"));
        assert!(is_valid_domain_name("mail-1.example.co.uk"));
        assert!(!is_valid_domain_name("localhost"));
        assert!(!is_valid_domain_name("-bad.example.com"));
        assert!(!is_valid_domain_name("bad..example.com"));
        assert!(!is_valid_domain_name("spa ce.example.com"));
        assert!(!is_valid_domain_name(&format!("{}.com", "a".repeat(64))));
    }

    #[test]
    fn test_selector_validation() {
        assert!(is_valid_dkim_selector("mailtrust"));
        assert!(is_valid_dkim_selector("s2024-01"));
        assert!(!is_valid_dkim_selector("-s"));
        assert!(!is_valid_dkim_selector("a.b"));
        assert!(!is_valid_dkim_selector(""));
    }
}
