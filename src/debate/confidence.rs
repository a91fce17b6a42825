//! Per-claim confidence tracking across a debate run.
//!
//! Scores are probability-like values in [0, 1], keyed by claim identifier
//! (or knight identifier before claims exist). The snapshot is rebuilt from
//! persisted PositionCard/Rebuttal confidences on resume and continued from
//! there.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::events::types::normalize_confidence;

/// Mapping of claim identifier to confidence, plus a small per-knight
/// calibration-bias accumulator (signed sum of confidence revisions).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSnapshot {
    scores: BTreeMap<String, f64>,
    calibration_bias: BTreeMap<String, f64>,
}

impl ConfidenceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an initial confidence for a claim. Input is normalized.
    pub fn set(&mut self, claim_id: &str, confidence: f64) {
        self.scores
            .insert(claim_id.to_string(), normalize_confidence(confidence));
    }

    /// Revise a claim's confidence, accumulating the delta into the
    /// knight's calibration bias.
    pub fn revise(&mut self, knight_id: &str, claim_id: &str, updated: f64) {
        let updated = normalize_confidence(updated);
        let previous = self.scores.get(claim_id).copied().unwrap_or(updated);
        *self
            .calibration_bias
            .entry(knight_id.to_string())
            .or_insert(0.0) += updated - previous;
        self.scores.insert(claim_id.to_string(), updated);
    }

    pub fn get(&self, claim_id: &str) -> Option<f64> {
        self.scores.get(claim_id).copied()
    }

    /// Accumulated calibration bias for a knight; 0 when never revised.
    pub fn bias(&self, knight_id: &str) -> f64 {
        self.calibration_bias.get(knight_id).copied().unwrap_or(0.0)
    }

    pub fn scores(&self) -> &BTreeMap<String, f64> {
        &self.scores
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_normalizes() {
        let mut snapshot = ConfidenceSnapshot::new();
        snapshot.set("k1#c1", 85.0);
        assert!((snapshot.get("k1#c1").unwrap() - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_revise_accumulates_bias() {
        let mut snapshot = ConfidenceSnapshot::new();
        snapshot.set("k1#c1", 0.8);
        snapshot.revise("k1", "k1#c1", 0.6);
        assert!((snapshot.get("k1#c1").unwrap() - 0.6).abs() < 1e-9);
        assert!((snapshot.bias("k1") + 0.2).abs() < 1e-9);

        snapshot.revise("k1", "k1#c1", 0.7);
        assert!((snapshot.bias("k1") + 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_revise_without_prior_score() {
        let mut snapshot = ConfidenceSnapshot::new();
        snapshot.revise("k2", "k2#c1", 0.5);
        assert_eq!(snapshot.get("k2#c1"), Some(0.5));
        assert_eq!(snapshot.bias("k2"), 0.0);
    }

    #[test]
    fn test_bias_default_zero() {
        let snapshot = ConfidenceSnapshot::new();
        assert_eq!(snapshot.bias("nobody"), 0.0);
        assert!(snapshot.is_empty());
    }
}
