//! Pulls identifiers out of free-text scammer messages.
//!
//! Matching runs kind by kind in a fixed order; a later kind never claims
//! text already claimed by an earlier one, so `john@bank.com` is an e-mail
//! and not also a UPI handle, and a mobile number is not also reported as a
//! bank account.

use std::collections::HashSet;
use std::ops::Range;

use regex::Regex;
use serde_json::json;

use super::capture::{CaptureDraft, CaptureKind};

pub struct IntelligenceExtractor {
    patterns: Vec<(CaptureKind, Regex)>,
}

impl IntelligenceExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        let patterns = vec![
            (CaptureKind::Url, Regex::new(r#"https?://[^\s<>"']+"#)?),
            (
                CaptureKind::Email,
                Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}")?,
            ),
            (
                CaptureKind::UpiId,
                Regex::new(r"[A-Za-z0-9._-]{2,}@[A-Za-z][A-Za-z0-9]{1,63}")?,
            ),
            (
                CaptureKind::PhoneNumber,
                Regex::new(r"(?:\+\d{1,3}[\s-]?)?\b[6-9]\d{4}[\s-]?\d{5}\b")?,
            ),
            (CaptureKind::BankAccount, Regex::new(r"\b\d{9,18}\b")?),
        ];
        Ok(Self { patterns })
    }

    /// Returns one draft per distinct identifier, in order of kind.
    pub fn extract(&self, text: &str) -> Vec<CaptureDraft> {
        let mut claimed: Vec<Range<usize>> = Vec::new();
        let mut seen: HashSet<(CaptureKind, String)> = HashSet::new();
        let mut drafts = Vec::new();

        for (kind, regex) in &self.patterns {
            for m in regex.find_iter(text) {
                let span = m.range();
                if claimed.iter().any(|c| c.start < span.end && span.start < c.end) {
                    continue;
                }
                claimed.push(span);
                let value = normalize(*kind, m.as_str());
                if value.is_empty() || !seen.insert((*kind, value.clone())) {
                    continue;
                }
                drafts.push(CaptureDraft::new(
                    *kind,
                    json!({ "value": value, "source": "message" }),
                ));
            }
        }
        drafts
    }
}

fn normalize(kind: CaptureKind, raw: &str) -> String {
    match kind {
        CaptureKind::Url => raw
            .trim_end_matches(|c: char| matches!(c, '.' | ',' | ')' | ';' | '!' | '?'))
            .to_string(),
        CaptureKind::Email | CaptureKind::UpiId => raw.to_ascii_lowercase(),
        CaptureKind::PhoneNumber => raw
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect(),
        _ => raw.to_string(),
    }
}
