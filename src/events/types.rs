//! Typed debate events and the normalization boundary.
//!
//! Events are immutable, append-only facts and the sole source of truth for
//! resumption. Freshly generated events are strongly typed; events replayed
//! from storage arrive dict-shaped and are normalized into the same
//! representation here, at the boundary. Malformed-LLM-output coercions
//! (lists where strings were expected, 0-100 confidence scales) also live
//! here so phase logic never sees loose data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::debate::phase::DebatePhase;

/// Search-style findings from one knight's research call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub knight_id: String,
    pub summary: String,
    pub findings: Vec<String>,
    pub citations: Vec<String>,
}

/// A knight's structured opening position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionCard {
    pub knight_id: String,
    pub headline: String,
    pub body: String,
    pub citations: Vec<String>,
    /// Always normalized into [0.0, 1.0].
    pub confidence: f64,
}

/// A challenge raised against another knight's claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub challenger_id: String,
    pub defender_id: String,
    pub claim_id: String,
    pub claim_text: String,
    pub challenge: String,
}

/// A challenged knight's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rebuttal {
    pub knight_id: String,
    pub claim_id: String,
    pub response: String,
    /// If present, overwrites the original opening confidence.
    pub updated_confidence: Option<f64>,
}

/// Severity of the adversarial critique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritiqueSeverity {
    Low,
    Moderate,
    High,
    Critical,
}

impl CritiqueSeverity {
    /// Lenient parse from model output; unknown labels map to Moderate.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "low" | "minor" | "info" => Self::Low,
            "high" | "major" | "severe" => Self::High,
            "critical" | "blocker" | "fatal" => Self::Critical,
            _ => Self::Moderate,
        }
    }
}

/// The red team's structured critique of the whole debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedTeamCritique {
    pub severity: CritiqueSeverity,
    pub summary: String,
    pub flaws: Vec<String>,
}

/// Recommendation-first synthesis of all positions and challenges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Convergence {
    pub recommendation: String,
    pub rationale: String,
    pub analysis: String,
    pub critical_risks: Vec<String>,
    pub known_unknowns: Vec<String>,
    pub dissent: Vec<String>,
    pub confidence: f64,
}

/// Executive-readable translation of the convergence summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatorOutput {
    pub executive_summary: String,
    pub talking_points: Vec<String>,
}

/// The binding ruling that closes a debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeratorRuling {
    pub ruling: String,
    pub rationale: String,
    /// True when the moderator model failed and the canned text was used.
    pub fallback: bool,
}

/// Outcome of the downstream artifact export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Succeeded,
    Failed,
}

/// All debate events, tagged by type for storage and replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    SessionInitialization {
        topic: String,
        knight_count: usize,
    },
    /// Phase identity for the bookkeeping events lives on the surrounding
    /// [`EventRecord`]; duplicating it here would collide under flattening.
    PhaseStarted,
    PhaseProgress {
        completed: usize,
        total: usize,
    },
    PhaseComplete {
        duration_ms: u64,
        event_count: usize,
    },
    ResearchResult(ResearchResult),
    PositionCard(PositionCard),
    Challenge(Challenge),
    Rebuttal(Rebuttal),
    RedTeamCritique(RedTeamCritique),
    Convergence(Convergence),
    TranslatorOutput(TranslatorOutput),
    ArtifactReady {
        locator: Option<String>,
    },
    PdfGenerationStatus {
        status: ExportStatus,
        detail: Option<String>,
    },
    ModeratorRuling(ModeratorRuling),
}

impl EventPayload {
    /// The serialized tag for this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionInitialization { .. } => "session_initialization",
            Self::PhaseStarted => "phase_started",
            Self::PhaseProgress { .. } => "phase_progress",
            Self::PhaseComplete { .. } => "phase_complete",
            Self::ResearchResult(_) => "research_result",
            Self::PositionCard(_) => "position_card",
            Self::Challenge(_) => "challenge",
            Self::Rebuttal(_) => "rebuttal",
            Self::RedTeamCritique(_) => "red_team_critique",
            Self::Convergence(_) => "convergence",
            Self::TranslatorOutput(_) => "translator_output",
            Self::ArtifactReady { .. } => "artifact_ready",
            Self::PdfGenerationStatus { .. } => "pdf_generation_status",
            Self::ModeratorRuling(_) => "moderator_ruling",
        }
    }

    /// Whether this is phase/session bookkeeping rather than debate content.
    pub fn is_bookkeeping(&self) -> bool {
        matches!(
            self,
            Self::SessionInitialization { .. }
                | Self::PhaseStarted
                | Self::PhaseProgress { .. }
                | Self::PhaseComplete { .. }
        )
    }

    /// Citations carried by this event, if the type has a citations field.
    pub fn citations(&self) -> Option<&[String]> {
        match self {
            Self::ResearchResult(r) => Some(&r.citations),
            Self::PositionCard(p) => Some(&p.citations),
            _ => None,
        }
    }

    /// Free-text fields subject to safety gating.
    pub fn free_text(&self) -> Vec<&str> {
        match self {
            Self::SessionInitialization { topic, .. } => vec![topic],
            Self::ResearchResult(r) => {
                let mut t: Vec<&str> = vec![&r.summary];
                t.extend(r.findings.iter().map(String::as_str));
                t
            }
            Self::PositionCard(p) => vec![&p.headline, &p.body],
            Self::Challenge(c) => vec![&c.claim_text, &c.challenge],
            Self::Rebuttal(r) => vec![&r.response],
            Self::RedTeamCritique(c) => {
                let mut t: Vec<&str> = vec![&c.summary];
                t.extend(c.flaws.iter().map(String::as_str));
                t
            }
            Self::Convergence(c) => vec![&c.recommendation, &c.rationale, &c.analysis],
            Self::TranslatorOutput(t) => {
                let mut v: Vec<&str> = vec![&t.executive_summary];
                v.extend(t.talking_points.iter().map(String::as_str));
                v
            }
            Self::ModeratorRuling(m) => vec![&m.ruling, &m.rationale],
            _ => Vec::new(),
        }
    }
}

/// An event plus its session-scoped ordering metadata. This is the unit the
/// ledger persists; everything else wrapped around it is ephemeral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Strictly increasing, gapless, session-scoped; starts at 1.
    pub sequence_id: u64,
    pub session_id: String,
    pub phase: DebatePhase,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl EventRecord {
    pub fn new(sequence_id: u64, session_id: &str, phase: DebatePhase, payload: EventPayload) -> Self {
        Self {
            sequence_id,
            session_id: session_id.to_string(),
            phase,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// Normalize a dict-shaped record replayed from storage. Unknown or
    /// malformed records are skipped with a warning rather than failing
    /// the whole replay.
    pub fn from_value(value: &Value) -> Option<Self> {
        match serde_json::from_value::<Self>(value.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "skipping unreadable event record during replay");
                None
            }
        }
    }
}

/// Normalize a confidence score: values on a 0-100 scale are rescaled,
/// then clamped into [0.0, 1.0].
pub fn normalize_confidence(raw: f64) -> f64 {
    let scaled = if raw > 1.0 { raw / 100.0 } else { raw };
    if scaled.is_nan() {
        return 0.0;
    }
    scaled.clamp(0.0, 1.0)
}

/// Coerce a JSON value into a string. Arrays are joined line-wise; this
/// absorbs models that return a list where a string was expected.
pub fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .map(coerce_string)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Coerce a JSON value into a list of strings. A bare string becomes a
/// single-element list; nulls become empty.
pub fn coerce_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(coerce_string)
            .filter(|s| !s.is_empty())
            .collect(),
        Value::Null => Vec::new(),
        other => {
            let s = coerce_string(other);
            if s.is_empty() {
                Vec::new()
            } else {
                vec![s]
            }
        }
    }
}

/// Coerce a JSON value into a normalized confidence, accepting numbers and
/// numeric strings on either a 0-1 or 0-100 scale.
pub fn coerce_confidence(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().map(normalize_confidence),
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok().map(normalize_confidence),
        _ => None,
    }
}
