//! Envelopes — events wrapped with scheduling and quality metadata.
//!
//! An envelope is what the run yields to its consumer: the persisted record
//! plus advisory deadlines, the quality-gate report computed for it, and a
//! confidence snapshot at that point in time. Envelopes themselves are
//! never persisted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::EventRecord;
use crate::debate::confidence::ConfidenceSnapshot;
use crate::debate::phase::PhaseTiming;
use crate::gates::GateReport;

/// An [`EventRecord`] with ephemeral run metadata attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub record: EventRecord,
    /// Advisory deadline derived from the phase timing policy.
    pub deadline: DateTime<Utc>,
    /// Deadline plus the phase grace period.
    pub grace_deadline: DateTime<Utc>,
    /// Quality-gate results for the inner event. Advisory metadata only.
    pub gates: GateReport,
    /// Confidence snapshot at emission time.
    pub confidence: ConfidenceSnapshot,
}

impl Envelope {
    pub fn new(
        record: EventRecord,
        timing: PhaseTiming,
        gates: GateReport,
        confidence: ConfidenceSnapshot,
    ) -> Self {
        let now = Utc::now();
        let deadline = now + Duration::from_std(timing.max).unwrap_or_else(|_| Duration::zero());
        let grace_deadline =
            deadline + Duration::from_std(timing.grace).unwrap_or_else(|_| Duration::zero());
        Self {
            record,
            deadline,
            grace_deadline,
            gates,
            confidence,
        }
    }

    pub fn sequence_id(&self) -> u64 {
        self.record.sequence_id
    }

    pub fn event_type(&self) -> &'static str {
        self.record.event_type()
    }
}
