//! Debate phases — fixed ordering and per-phase timing policy.
//!
//! The phase sequence is the backbone of a run. `Idle` is not a real phase
//! and is always skipped; `Claims` is silent by design (internal state only,
//! no events). Timing policies are advisory: they stamp envelope deadlines
//! but the engine never enforces them itself.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One stage of the fixed debate sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebatePhase {
    /// Not a real phase; always skipped.
    Idle,
    /// Each knight gathers search-style findings.
    Research,
    /// Each knight states a structured opening position.
    Opening,
    /// Testable claims are extracted from openings. Silent: no events.
    Claims,
    /// Knights challenge each other's claims in a ring.
    CrossExamination,
    /// Challenged knights respond, possibly revising confidence.
    Rebuttals,
    /// A single adversarial critique of the whole debate.
    RedTeam,
    /// Positions are synthesized into a recommendation-first summary.
    Convergence,
    /// The convergence summary is translated for executives.
    Translator,
    /// The event history is handed to the artifact exporter.
    ArtifactReady,
    /// A binding moderator ruling closes the debate.
    Closed,
}

/// Advisory timing policy for a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTiming {
    /// Expected maximum duration for the phase.
    pub max: Duration,
    /// Additional grace period after the deadline.
    pub grace: Duration,
}

impl DebatePhase {
    /// The fixed execution order. `Idle` is excluded.
    pub const ORDER: [DebatePhase; 10] = [
        DebatePhase::Research,
        DebatePhase::Opening,
        DebatePhase::Claims,
        DebatePhase::CrossExamination,
        DebatePhase::Rebuttals,
        DebatePhase::RedTeam,
        DebatePhase::Convergence,
        DebatePhase::Translator,
        DebatePhase::ArtifactReady,
        DebatePhase::Closed,
    ];

    /// Silent phases update internal state without emitting any events,
    /// including phase bookkeeping.
    pub fn is_silent(self) -> bool {
        matches!(self, Self::Claims)
    }

    /// Single-shot phases are complete as soon as one matching event exists.
    pub fn is_single_shot(self) -> bool {
        matches!(
            self,
            Self::RedTeam | Self::Convergence | Self::Translator | Self::ArtifactReady | Self::Closed
        )
    }

    /// Advisory timing used to stamp envelope deadlines.
    pub fn timing(self) -> PhaseTiming {
        let (max_secs, grace_secs) = match self {
            Self::Idle => (0, 0),
            Self::Research => (180, 30),
            Self::Opening => (120, 30),
            Self::Claims => (90, 15),
            Self::CrossExamination => (120, 30),
            Self::Rebuttals => (120, 30),
            Self::RedTeam => (150, 30),
            Self::Convergence => (180, 45),
            Self::Translator => (90, 15),
            Self::ArtifactReady => (60, 15),
            Self::Closed => (90, 30),
        };
        PhaseTiming {
            max: Duration::from_secs(max_secs),
            grace: Duration::from_secs(grace_secs),
        }
    }
}

impl std::fmt::Display for DebatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Research => "research",
            Self::Opening => "opening",
            Self::Claims => "claims",
            Self::CrossExamination => "cross_examination",
            Self::Rebuttals => "rebuttals",
            Self::RedTeam => "red_team",
            Self::Convergence => "convergence",
            Self::Translator => "translator",
            Self::ArtifactReady => "artifact_ready",
            Self::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_excludes_idle() {
        assert!(!DebatePhase::ORDER.contains(&DebatePhase::Idle));
        assert_eq!(DebatePhase::ORDER.len(), 10);
        assert_eq!(DebatePhase::ORDER[0], DebatePhase::Research);
        assert_eq!(DebatePhase::ORDER[9], DebatePhase::Closed);
    }

    #[test]
    fn test_claims_is_the_only_silent_phase() {
        let silent: Vec<_> = DebatePhase::ORDER
            .iter()
            .filter(|p| p.is_silent())
            .collect();
        assert_eq!(silent, vec![&DebatePhase::Claims]);
    }

    #[test]
    fn test_single_shot_phases() {
        assert!(DebatePhase::RedTeam.is_single_shot());
        assert!(DebatePhase::Closed.is_single_shot());
        assert!(!DebatePhase::Research.is_single_shot());
        assert!(!DebatePhase::CrossExamination.is_single_shot());
    }

    #[test]
    fn test_timing_has_grace() {
        let timing = DebatePhase::Convergence.timing();
        assert_eq!(timing.max, Duration::from_secs(180));
        assert_eq!(timing.grace, Duration::from_secs(45));
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&DebatePhase::CrossExamination).unwrap();
        assert_eq!(json, "\"cross_examination\"");
        let parsed: DebatePhase = serde_json::from_str("\"red_team\"").unwrap();
        assert_eq!(parsed, DebatePhase::RedTeam);
    }

    #[test]
    fn test_display_matches_serde() {
        for phase in DebatePhase::ORDER {
            let via_serde = serde_json::to_string(&phase).unwrap();
            assert_eq!(via_serde, format!("\"{}\"", phase));
        }
    }
}
