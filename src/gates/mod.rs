//! Quality gates — pure, synchronous checks attached to every envelope.
//!
//! Gate failures are advisory metadata; the engine does not retry or abort
//! on a failed gate. Three gates run today: citation density, a
//! contradiction placeholder, and safety (moderation + PII logging).

pub mod moderation;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::events::types::EventPayload;
use moderation::{detect_pii, moderate, ModerationSeverity};

pub const GATE_CITATION_DENSITY: &str = "citation_density";
pub const GATE_CONTRADICTION: &str = "contradiction";
pub const GATE_SAFETY: &str = "safety";

/// Outcome of a single gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    pub detail: Option<String>,
}

impl GateResult {
    fn pass(detail: Option<String>) -> Self {
        Self {
            passed: true,
            detail,
        }
    }

    fn fail(detail: String) -> Self {
        Self {
            passed: false,
            detail: Some(detail),
        }
    }
}

/// Map of gate name to pass/fail result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub results: BTreeMap<String, GateResult>,
}

impl GateReport {
    pub fn passed(&self, gate: &str) -> bool {
        self.results.get(gate).map(|r| r.passed).unwrap_or(true)
    }

    pub fn all_passed(&self) -> bool {
        self.results.values().all(|r| r.passed)
    }
}

/// Configuration for the gate evaluator.
#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    /// Minimum citation count for events that carry citations.
    pub min_citations: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { min_citations: 1 }
    }
}

/// Pure payload-to-report evaluator. No network calls on the hot path.
#[derive(Debug, Clone, Default)]
pub struct QualityGateEvaluator {
    config: GateConfig,
}

impl QualityGateEvaluator {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, payload: &EventPayload) -> GateReport {
        let mut report = GateReport::default();
        report.results.insert(
            GATE_CITATION_DENSITY.to_string(),
            self.citation_gate(payload),
        );
        report
            .results
            .insert(GATE_CONTRADICTION.to_string(), Self::contradiction_gate());
        report
            .results
            .insert(GATE_SAFETY.to_string(), Self::safety_gate(payload));
        report
    }

    fn citation_gate(&self, payload: &EventPayload) -> GateResult {
        match payload.citations() {
            None => GateResult::pass(Some("no citations field".to_string())),
            Some(citations) if citations.len() >= self.config.min_citations => {
                GateResult::pass(Some(format!("{} citations", citations.len())))
            }
            Some(citations) => GateResult::fail(format!(
                "{} citations, {} required",
                citations.len(),
                self.config.min_citations
            )),
        }
    }

    // Extension point: contradiction analysis is not implemented yet and
    // the gate always passes.
    fn contradiction_gate() -> GateResult {
        GateResult::pass(Some("contradiction analysis not configured".to_string()))
    }

    fn safety_gate(payload: &EventPayload) -> GateResult {
        let event_type = payload.event_type();
        let mut worst = ModerationSeverity::Allow;
        let mut worst_term = None;

        for text in payload.free_text() {
            for pii in detect_pii(text) {
                warn!(
                    event_type,
                    kind = %pii.kind,
                    excerpt = %pii.excerpt,
                    "PII detected in event text"
                );
            }
            let verdict = moderate(text);
            if verdict.severity > worst {
                worst = verdict.severity;
                worst_term = verdict.matched;
            }
        }

        match worst {
            ModerationSeverity::Block => GateResult::fail(format!(
                "moderation blocked: {}",
                worst_term.unwrap_or_default()
            )),
            ModerationSeverity::Warn => {
                warn!(
                    event_type,
                    term = worst_term.as_deref().unwrap_or(""),
                    "moderation warning"
                );
                GateResult::pass(Some(format!(
                    "moderation warning: {}",
                    worst_term.unwrap_or_default()
                )))
            }
            ModerationSeverity::Allow => GateResult::pass(None),
        }
    }
}
