//! Pure text-to-verdict moderation and PII detection.
//!
//! These run on the quality-gate hot path, so they are synchronous,
//! allocation-light, and make no network calls. The keyword tables are a
//! deliberate heuristic baseline; a caller wanting a hosted moderation
//! service wires it in behind the same verdict shape.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Moderation outcome for a piece of free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationSeverity {
    /// No concerns.
    Allow,
    /// Logged but not blocking.
    Warn,
    /// Hard failure for the safety gate.
    Block,
}

/// A moderation verdict with the term that triggered it, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub severity: ModerationSeverity,
    pub matched: Option<String>,
}

const BLOCK_TERMS: &[&str] = &[
    "bioweapon",
    "mass casualty",
    "assassinate",
    "synthesize nerve agent",
];

const WARN_TERMS: &[&str] = &[
    "exploit",
    "insider trading",
    "lawsuit",
    "data breach",
    "bribe",
];

/// Moderate a piece of free text. Block dominates Warn.
pub fn moderate(text: &str) -> ModerationVerdict {
    let lowered = text.to_lowercase();

    for term in BLOCK_TERMS {
        if lowered.contains(term) {
            return ModerationVerdict {
                severity: ModerationSeverity::Block,
                matched: Some((*term).to_string()),
            };
        }
    }
    for term in WARN_TERMS {
        if lowered.contains(term) {
            return ModerationVerdict {
                severity: ModerationSeverity::Warn,
                matched: Some((*term).to_string()),
            };
        }
    }
    ModerationVerdict {
        severity: ModerationSeverity::Allow,
        matched: None,
    }
}

/// Category of detected personally identifiable information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Email,
    Phone,
    Ssn,
}

impl std::fmt::Display for PiiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Phone => write!(f, "phone"),
            Self::Ssn => write!(f, "ssn"),
        }
    }
}

/// A detected PII occurrence. The excerpt is truncated, never the full match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiMatch {
    pub kind: PiiKind,
    pub excerpt: String,
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\+?\d{1,3}[-. (]?\d{3}[-. )]?\d{3}[-. ]?\d{4}").unwrap())
}

fn ssn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap())
}

fn excerpt(m: &str) -> String {
    let head: String = m.chars().take(4).collect();
    format!("{}\u{2026}", head)
}

/// Detect PII in free text. Detection is logged by the safety gate, never
/// blocking on its own.
pub fn detect_pii(text: &str) -> Vec<PiiMatch> {
    let mut matches = Vec::new();
    for m in email_re().find_iter(text) {
        matches.push(PiiMatch {
            kind: PiiKind::Email,
            excerpt: excerpt(m.as_str()),
        });
    }
    for m in ssn_re().find_iter(text) {
        matches.push(PiiMatch {
            kind: PiiKind::Ssn,
            excerpt: excerpt(m.as_str()),
        });
    }
    for m in phone_re().find_iter(text) {
        // SSNs also look phone-shaped to the loose pattern; skip overlaps.
        if ssn_re().is_match(m.as_str()) {
            continue;
        }
        matches.push(PiiMatch {
            kind: PiiKind::Phone,
            excerpt: excerpt(m.as_str()),
        });
    }
    matches
}
