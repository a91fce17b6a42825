//! The debate orchestration core: phases, state replay, confidence
//! tracking, prompt assembly, and the engine that drives a run.

pub mod confidence;
pub mod engine;
pub mod phase;
pub mod prompts;
pub mod state;

pub use confidence::ConfidenceSnapshot;
pub use engine::{DebateEngine, DebateError, DebateRun, EngineConfig};
pub use phase::{DebatePhase, PhaseTiming};
pub use state::DebateState;
