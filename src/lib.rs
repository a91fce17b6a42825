//! Roundtable — structured multi-model debate orchestration.
//!
//! A fixed panel of LLM-backed knights argues a strategic question through
//! an ordered sequence of phases: research, openings, claim extraction,
//! cross-examination, rebuttals, red-teaming, convergence, translation,
//! artifact export, and a binding ruling. The engine is a resumable phase
//! state machine over an append-only event ledger; underneath it sits a
//! resilient multi-provider invocation layer with credential resolution,
//! failover, rate limiting, and circuit breaking.
//!
//! The crate is a library consumed by a surrounding service; it owns no
//! wire protocol or CLI.

pub mod artifact;
pub mod debate;
pub mod events;
pub mod gates;
pub mod llm;
pub mod session;

pub use artifact::ArtifactExporter;
pub use debate::{DebateEngine, DebateError, DebatePhase, DebateRun, DebateState, EngineConfig};
pub use events::{Envelope, EventPayload, EventRecord, LedgerWriter};
pub use gates::{GateConfig, GateReport, QualityGateEvaluator};
pub use llm::{
    ApiKeyResolver, CredentialStore, GenerateRequest, LlmClient, LlmRouter, ModelCatalog,
    ProviderId, RouterError, RouterServices,
};
pub use session::{Knight, Session, SessionError, SessionStatus};
