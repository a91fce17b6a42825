//! Debate state and the event-replay reducer.
//!
//! Events are the only durable truth; everything here is rebuilt from them.
//! The reducer is pure and side-effect-free so resumption logic is testable
//! independently of the live run path. Per-phase completion is inferred
//! from the rebuilt state, never stored directly.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use super::confidence::ConfidenceSnapshot;
use super::phase::DebatePhase;
use crate::events::types::{
    normalize_confidence, Challenge, Convergence, EventPayload, EventRecord, ModeratorRuling,
    PositionCard, RedTeamCritique,
};

/// Everything a run needs to know about a debate's past, rebuilt by replay.
#[derive(Debug, Clone, Default)]
pub struct DebateState {
    knight_count: usize,
    research_done: BTreeSet<String>,
    openings: HashMap<String, PositionCard>,
    /// Extracted claims per knight. Populated by the silent claims phase;
    /// never persisted, so a resumed run re-derives them.
    claims: HashMap<String, Vec<String>>,
    challenges: Vec<Challenge>,
    rebuttal_count: usize,
    red_team: Option<RedTeamCritique>,
    convergence: Option<Convergence>,
    translator_done: bool,
    artifact_done: bool,
    ruling: Option<ModeratorRuling>,
    last_sequence_id: u64,
    confidence: ConfidenceSnapshot,
}

impl DebateState {
    pub fn new(knight_count: usize) -> Self {
        Self {
            knight_count,
            ..Self::default()
        }
    }

    /// Rebuild state by replaying typed records in order.
    pub fn restore(events: &[EventRecord], knight_count: usize) -> Self {
        let mut state = Self::new(knight_count);
        for record in events {
            state.apply(record);
        }
        state
    }

    /// Rebuild from dict-shaped records as they come back from storage.
    /// Unreadable records are skipped at the normalization boundary.
    pub fn restore_values(values: &[Value], knight_count: usize) -> Self {
        let records: Vec<EventRecord> = values.iter().filter_map(EventRecord::from_value).collect();
        Self::restore(&records, knight_count)
    }

    /// Fold one event into the state. Used identically by replay and by
    /// live emission, so both paths cannot drift apart.
    pub fn apply(&mut self, record: &EventRecord) {
        self.last_sequence_id = self.last_sequence_id.max(record.sequence_id);
        match &record.payload {
            EventPayload::ResearchResult(r) => {
                self.research_done.insert(r.knight_id.clone());
            }
            EventPayload::PositionCard(card) => {
                self.confidence
                    .set(&opening_claim_id(&card.knight_id), card.confidence);
                self.openings.insert(card.knight_id.clone(), card.clone());
            }
            EventPayload::Challenge(challenge) => {
                self.challenges.push(challenge.clone());
            }
            EventPayload::Rebuttal(rebuttal) => {
                self.rebuttal_count += 1;
                if let Some(updated) = rebuttal.updated_confidence {
                    let updated = normalize_confidence(updated);
                    self.confidence
                        .revise(&rebuttal.knight_id, &rebuttal.claim_id, updated);
                    if let Some(card) = self.openings.get_mut(&rebuttal.knight_id) {
                        card.confidence = updated;
                    }
                }
            }
            EventPayload::RedTeamCritique(critique) => {
                self.red_team = Some(critique.clone());
            }
            EventPayload::Convergence(convergence) => {
                self.convergence = Some(convergence.clone());
            }
            EventPayload::TranslatorOutput(_) => {
                self.translator_done = true;
            }
            EventPayload::ArtifactReady { .. } => {
                self.artifact_done = true;
            }
            EventPayload::ModeratorRuling(ruling) => {
                self.ruling = Some(ruling.clone());
            }
            EventPayload::SessionInitialization { .. }
            | EventPayload::PhaseStarted
            | EventPayload::PhaseProgress { .. }
            | EventPayload::PhaseComplete { .. }
            | EventPayload::PdfGenerationStatus { .. } => {}
        }
    }

    /// Whether a phase is already fully represented by past events and must
    /// not be re-executed.
    pub fn is_phase_complete(&self, phase: DebatePhase) -> bool {
        match phase {
            DebatePhase::Idle => true,
            DebatePhase::Research => self.research_done.len() >= self.knight_count,
            DebatePhase::Opening => self.openings.len() >= self.knight_count,
            DebatePhase::Claims => {
                self.knight_count < 2
                    || self
                        .openings
                        .keys()
                        .all(|k| self.claims.get(k).map(|c| !c.is_empty()).unwrap_or(false))
            }
            DebatePhase::CrossExamination => {
                self.knight_count < 2 || self.challenges.len() >= self.knight_count
            }
            DebatePhase::Rebuttals => {
                self.knight_count < 2
                    || (!self.challenges.is_empty()
                        && self.rebuttal_count >= self.challenges.len())
            }
            DebatePhase::RedTeam => self.red_team.is_some(),
            DebatePhase::Convergence => self.convergence.is_some(),
            DebatePhase::Translator => self.translator_done,
            DebatePhase::ArtifactReady => self.artifact_done,
            DebatePhase::Closed => self.ruling.is_some(),
        }
    }

    pub fn knight_count(&self) -> usize {
        self.knight_count
    }

    pub fn last_sequence_id(&self) -> u64 {
        self.last_sequence_id
    }

    pub fn has_research(&self, knight_id: &str) -> bool {
        self.research_done.contains(knight_id)
    }

    pub fn opening(&self, knight_id: &str) -> Option<&PositionCard> {
        self.openings.get(knight_id)
    }

    pub fn claims_for(&self, knight_id: &str) -> Option<&[String]> {
        self.claims.get(knight_id).map(Vec::as_slice)
    }

    /// Store claims extracted by the silent phase. State-only mutation; no
    /// event exists for this.
    pub fn set_claims(&mut self, knight_id: &str, claims: Vec<String>) {
        self.claims.insert(knight_id.to_string(), claims);
    }

    pub fn challenges(&self) -> &[Challenge] {
        &self.challenges
    }

    pub fn rebuttal_count(&self) -> usize {
        self.rebuttal_count
    }

    pub fn red_team(&self) -> Option<&RedTeamCritique> {
        self.red_team.as_ref()
    }

    pub fn convergence(&self) -> Option<&Convergence> {
        self.convergence.as_ref()
    }

    pub fn ruling(&self) -> Option<&ModeratorRuling> {
        self.ruling.as_ref()
    }

    pub fn confidence(&self) -> &ConfidenceSnapshot {
        &self.confidence
    }
}

/// Claim identifier for a knight's overall opening position.
pub fn opening_claim_id(knight_id: &str) -> String {
    format!("{knight_id}#opening")
}

/// Claim identifier for the nth extracted claim of a knight.
pub fn claim_id(knight_id: &str, index: usize) -> String {
    format!("{knight_id}#c{}", index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::Rebuttal;

    fn record(seq: u64, phase: DebatePhase, payload: EventPayload) -> EventRecord {
        EventRecord::new(seq, "s-1", phase, payload)
    }

    fn card(knight_id: &str, confidence: f64) -> EventPayload {
        EventPayload::PositionCard(PositionCard {
            knight_id: knight_id.to_string(),
            headline: "h".to_string(),
            body: "b".to_string(),
            citations: vec!["https://a".to_string()],
            confidence,
        })
    }

    #[test]
    fn test_fresh_state_nothing_complete() {
        let state = DebateState::new(2);
        assert!(!state.is_phase_complete(DebatePhase::Research));
        assert!(!state.is_phase_complete(DebatePhase::Closed));
        assert!(state.is_phase_complete(DebatePhase::Idle));
    }

    #[test]
    fn test_research_completion_counts_knights() {
        let events = vec![record(
            1,
            DebatePhase::Research,
            EventPayload::ResearchResult(crate::events::types::ResearchResult {
                knight_id: "k1".to_string(),
                summary: "s".to_string(),
                findings: vec![],
                citations: vec![],
            }),
        )];
        let state = DebateState::restore(&events, 2);
        assert!(!state.is_phase_complete(DebatePhase::Research));
        assert!(state.has_research("k1"));

        let state = DebateState::restore(&events, 1);
        assert!(state.is_phase_complete(DebatePhase::Research));
    }

    #[test]
    fn test_opening_replay_rebuilds_confidence() {
        let events = vec![
            record(1, DebatePhase::Opening, card("k1", 0.8)),
            record(2, DebatePhase::Opening, card("k2", 0.6)),
        ];
        let state = DebateState::restore(&events, 2);
        assert!(state.is_phase_complete(DebatePhase::Opening));
        assert_eq!(state.confidence().get(&opening_claim_id("k1")), Some(0.8));
        assert_eq!(state.last_sequence_id(), 2);
    }

    #[test]
    fn test_claims_incomplete_until_every_opening_has_claims() {
        let events = vec![
            record(1, DebatePhase::Opening, card("k1", 0.8)),
            record(2, DebatePhase::Opening, card("k2", 0.6)),
        ];
        let mut state = DebateState::restore(&events, 2);
        assert!(!state.is_phase_complete(DebatePhase::Claims));
        state.set_claims("k1", vec!["claim a".to_string()]);
        assert!(!state.is_phase_complete(DebatePhase::Claims));
        state.set_claims("k2", vec!["claim b".to_string()]);
        assert!(state.is_phase_complete(DebatePhase::Claims));
    }

    #[test]
    fn test_claims_noop_with_single_knight() {
        let state = DebateState::new(1);
        assert!(state.is_phase_complete(DebatePhase::Claims));
        assert!(state.is_phase_complete(DebatePhase::CrossExamination));
        assert!(state.is_phase_complete(DebatePhase::Rebuttals));
    }

    #[test]
    fn test_rebuttal_overwrites_opening_confidence() {
        let events = vec![
            record(1, DebatePhase::Opening, card("k1", 0.9)),
            record(
                2,
                DebatePhase::Rebuttals,
                EventPayload::Rebuttal(Rebuttal {
                    knight_id: "k1".to_string(),
                    claim_id: claim_id("k1", 0),
                    response: "holding position".to_string(),
                    // 0-100 scale from the model; normalized on apply.
                    updated_confidence: Some(55.0),
                }),
            ),
        ];
        let state = DebateState::restore(&events, 1);
        assert!((state.opening("k1").unwrap().confidence - 0.55).abs() < 1e-9);
        assert_eq!(state.confidence().get(&claim_id("k1", 0)), Some(0.55));
    }

    #[test]
    fn test_single_shot_completion() {
        let events = vec![record(
            1,
            DebatePhase::Convergence,
            EventPayload::Convergence(Convergence {
                recommendation: "proceed".to_string(),
                rationale: "r".to_string(),
                analysis: "a".to_string(),
                critical_risks: vec![],
                known_unknowns: vec![],
                dissent: vec![],
                confidence: 0.7,
            }),
        )];
        let state = DebateState::restore(&events, 2);
        assert!(state.is_phase_complete(DebatePhase::Convergence));
        assert!(!state.is_phase_complete(DebatePhase::Translator));
        assert_eq!(state.convergence().unwrap().recommendation, "proceed");
    }

    #[test]
    fn test_restore_from_dict_shaped_values_skips_garbage() {
        let values = vec![
            serde_json::json!({
                "sequence_id": 1,
                "session_id": "s-1",
                "phase": "opening",
                "timestamp": "2026-01-05T10:00:00Z",
                "type": "position_card",
                "knight_id": "k1",
                "headline": "h",
                "body": "b",
                "citations": [],
                "confidence": 0.8
            }),
            serde_json::json!({"type": "not_a_real_event"}),
        ];
        let state = DebateState::restore_values(&values, 1);
        assert!(state.is_phase_complete(DebatePhase::Opening));
        assert_eq!(state.last_sequence_id(), 1);
    }

    #[test]
    fn test_bookkeeping_only_advances_sequence() {
        let events = vec![record(5, DebatePhase::Research, EventPayload::PhaseStarted)];
        let state = DebateState::restore(&events, 2);
        assert_eq!(state.last_sequence_id(), 5);
        assert!(!state.is_phase_complete(DebatePhase::Research));
    }

    #[test]
    fn test_restore_counts_persisted_bookkeeping_tail() {
        // A run that crashed right after a phase_complete must resume past
        // that sequence id, not reuse it.
        let values = vec![
            serde_json::json!({
                "sequence_id": 8,
                "session_id": "s-1",
                "phase": "opening",
                "timestamp": "2026-01-05T10:00:00Z",
                "type": "position_card",
                "knight_id": "k1",
                "headline": "h",
                "body": "b",
                "citations": [],
                "confidence": 0.8
            }),
            serde_json::to_value(record(
                9,
                DebatePhase::Opening,
                EventPayload::PhaseComplete {
                    duration_ms: 900,
                    event_count: 1,
                },
            ))
            .unwrap(),
        ];
        let state = DebateState::restore_values(&values, 1);
        assert_eq!(state.last_sequence_id(), 9);
    }
}
