//! The debate engine — a resumable phase state machine.
//!
//! A run is a single forward pass over the fixed phase order. Each phase
//! issues its LLM calls through the router, turns the results into typed
//! events, quality-gates and sequence-numbers each one, persists it, and
//! yields it as an envelope. Phases already complete per the restored
//! state are skipped outright, so resuming never re-issues a call that
//! already succeeded. Cancellation is cooperative: the consumer simply
//! stops polling.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::phase::DebatePhase;
use super::prompts;
use super::state::{claim_id, opening_claim_id, DebateState};
use crate::artifact::ArtifactExporter;
use crate::events::envelope::Envelope;
use crate::events::ledger::SharedLedger;
use crate::events::types::{
    coerce_confidence, coerce_string, coerce_string_list, Challenge, Convergence,
    CritiqueSeverity, EventPayload, EventRecord, ExportStatus, ModeratorRuling, PositionCard,
    Rebuttal, RedTeamCritique, ResearchResult, TranslatorOutput,
};
use crate::gates::{GateConfig, QualityGateEvaluator};
use crate::llm::router::{GenerateRequest, LlmClient, ModelTier, RouterError};
use crate::session::{sanitize_topic, Session, SessionError};

/// Ruling text used when the closing LLM call itself fails. The debate
/// still closes; the ruling is marked as a fallback.
const FALLBACK_RULING: &str = "The moderator could not reach the deliberation model. \
     No binding recommendation is issued; treat the convergence summary as \
     advisory and re-run the closing phase once providers recover.";

const FALLBACK_RULING_RATIONALE: &str =
    "The closing synthesis call failed after provider failover was exhausted.";

/// Errors that abort a run before any phase executes.
#[derive(Debug, thiserror::Error)]
pub enum DebateError {
    #[error(transparent)]
    Validation(#[from] SessionError),

    #[error("invalid phase order: {0}")]
    InvalidPhaseOrder(String),
}

/// Error escaping one phase's generation logic. Caught and counted by the
/// run loop; the debate continues on the next phase.
#[derive(Debug, thiserror::Error)]
enum PhaseError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("unparseable model output: {0}")]
    Parse(String),
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Phase execution order. The default preserves the historical order
    /// in which red-teaming runs after rebuttals; deployments that want
    /// the critique visible to rebuttals reorder here.
    pub phase_order: Vec<DebatePhase>,
    /// Consecutive phase failures tolerated before the run aborts.
    pub max_consecutive_failures: u32,
    /// Bound on concurrent per-knight LLM calls within a phase.
    pub max_concurrent_calls: usize,
    /// Fixed high-capability model for the adversarial critique.
    pub red_team_model: String,
    /// Model used for convergence, translation, and the final ruling.
    pub moderator_model: String,
    pub gate_config: GateConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            phase_order: DebatePhase::ORDER.to_vec(),
            max_consecutive_failures: 5,
            max_concurrent_calls: 4,
            red_team_model: "claude-opus-4".to_string(),
            moderator_model: "gpt-4o".to_string(),
            gate_config: GateConfig::default(),
        }
    }
}

/// The phase state machine. Stateless across runs; everything a run needs
/// is rebuilt from the event history.
pub struct DebateEngine {
    router: Arc<dyn LlmClient>,
    ledger: SharedLedger,
    exporter: Arc<dyn ArtifactExporter>,
    config: EngineConfig,
}

impl DebateEngine {
    pub fn new(
        router: Arc<dyn LlmClient>,
        ledger: SharedLedger,
        exporter: Arc<dyn ArtifactExporter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            router,
            ledger,
            exporter,
            config,
        }
    }

    /// Start (or resume) a debate run. `past_events` is the session's full
    /// persisted history, empty for a fresh session. Validation failures
    /// are fatal and raised before any phase executes.
    pub fn run(
        &self,
        session: &Session,
        past_events: &[EventRecord],
    ) -> Result<DebateRun, DebateError> {
        if session.knights.is_empty() {
            return Err(SessionError::NoKnights.into());
        }
        let topic = sanitize_topic(&session.topic)?;

        if self.config.phase_order.contains(&DebatePhase::Idle) {
            return Err(DebateError::InvalidPhaseOrder(
                "idle is not executable".to_string(),
            ));
        }
        for (i, phase) in self.config.phase_order.iter().enumerate() {
            if self.config.phase_order[i + 1..].contains(phase) {
                return Err(DebateError::InvalidPhaseOrder(format!(
                    "{phase} appears more than once"
                )));
            }
        }

        let state = DebateState::restore(past_events, session.knight_count());
        info!(
            session_id = %session.id,
            knights = session.knight_count(),
            replayed = past_events.len(),
            resumed_sequence = state.last_sequence_id(),
            "debate run starting"
        );

        Ok(DebateRun {
            session: session.clone(),
            topic,
            state,
            router: self.router.clone(),
            ledger: self.ledger.clone(),
            exporter: self.exporter.clone(),
            gates: QualityGateEvaluator::new(self.config.gate_config),
            config: self.config.clone(),
            phase_cursor: 0,
            pending: VecDeque::new(),
            history: past_events.to_vec(),
            research_summaries: HashMap::new(),
            consecutive_failures: 0,
            initialized: false,
            aborted: false,
        })
    }
}

/// One in-flight debate run: a pull-based, forward-only envelope stream.
pub struct DebateRun {
    session: Session,
    topic: String,
    state: DebateState,
    router: Arc<dyn LlmClient>,
    ledger: SharedLedger,
    exporter: Arc<dyn ArtifactExporter>,
    gates: QualityGateEvaluator,
    config: EngineConfig,
    phase_cursor: usize,
    pending: VecDeque<Envelope>,
    history: Vec<EventRecord>,
    /// Summaries gathered this run, fed into opening prompts. Not part of
    /// durable state; a resumed run's openings go without them.
    research_summaries: HashMap<String, String>,
    consecutive_failures: u32,
    initialized: bool,
    aborted: bool,
}

impl fmt::Debug for DebateRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebateRun")
            .field("session_id", &self.session.id)
            .field("phase_cursor", &self.phase_cursor)
            .field("last_sequence_id", &self.state.last_sequence_id())
            .field("aborted", &self.aborted)
            .finish_non_exhaustive()
    }
}

impl DebateRun {
    /// Pull the next envelope, driving phases lazily as needed. Returns
    /// `None` once the run is finished or aborted and all pending
    /// envelopes have been drained.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        loop {
            if let Some(envelope) = self.pending.pop_front() {
                return Some(envelope);
            }
            if self.aborted {
                return None;
            }
            if !self.initialized {
                self.initialized = true;
                if self.state.last_sequence_id() == 0 {
                    self.emit(
                        DebatePhase::Idle,
                        EventPayload::SessionInitialization {
                            topic: self.topic.clone(),
                            knight_count: self.session.knight_count(),
                        },
                    )
                    .await;
                }
                continue;
            }

            let Some(&phase) = self.config.phase_order.get(self.phase_cursor) else {
                return None;
            };
            self.phase_cursor += 1;
            self.step(phase).await;
        }
    }

    /// Drain the whole run into a vector. Convenience for callers that do
    /// not need incremental consumption.
    pub async fn collect(mut self) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        while let Some(envelope) = self.next_envelope().await {
            envelopes.push(envelope);
        }
        envelopes
    }

    pub fn state(&self) -> &DebateState {
        &self.state
    }

    /// Execute one phase, including bookkeeping and failure accounting.
    async fn step(&mut self, phase: DebatePhase) {
        if self.state.is_phase_complete(phase) {
            debug!(%phase, "phase already complete; skipping");
            return;
        }

        let started = Instant::now();
        let result = if phase.is_silent() {
            self.run_claims().await
        } else {
            self.emit(phase, EventPayload::PhaseStarted).await;
            let before = self.history.len();
            let result = self.run_phase(phase).await;
            if result.is_ok() {
                self.emit(
                    phase,
                    EventPayload::PhaseComplete {
                        duration_ms: started.elapsed().as_millis() as u64,
                        event_count: self.history.len() - before,
                    },
                )
                .await;
            }
            result
        };

        match result {
            Ok(()) => {
                self.consecutive_failures = 0;
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    %phase,
                    error = %e,
                    consecutive = self.consecutive_failures,
                    "phase failed; continuing with next phase"
                );
                if self.consecutive_failures >= self.config.max_consecutive_failures {
                    error!(
                        session_id = %self.session.id,
                        failures = self.consecutive_failures,
                        "consecutive failure ceiling reached; aborting run"
                    );
                    self.aborted = true;
                }
            }
        }
    }

    async fn run_phase(&mut self, phase: DebatePhase) -> Result<(), PhaseError> {
        match phase {
            DebatePhase::Research => self.run_research().await,
            DebatePhase::Opening => self.run_opening().await,
            DebatePhase::CrossExamination => self.run_cross_examination().await,
            DebatePhase::Rebuttals => self.run_rebuttals().await,
            DebatePhase::RedTeam => self.run_red_team().await,
            DebatePhase::Convergence => self.run_convergence().await,
            DebatePhase::Translator => self.run_translator().await,
            DebatePhase::ArtifactReady => self.run_artifact().await,
            DebatePhase::Closed => self.run_closed().await,
            DebatePhase::Idle | DebatePhase::Claims => Ok(()),
        }
    }

    /// Assign the next sequence id, gate, persist, and queue one event.
    /// Sequence assignment is the serialization point: generation may be
    /// concurrent, emission never is.
    async fn emit(&mut self, phase: DebatePhase, payload: EventPayload) {
        let sequence_id = self.state.last_sequence_id() + 1;
        let record = EventRecord::new(sequence_id, &self.session.id, phase, payload);
        let gates = self.gates.evaluate(&record.payload);
        self.state.apply(&record);

        if let Err(e) = self.ledger.write(&record).await {
            // Degraded mode: this step will not survive a future resume,
            // but the live run keeps going.
            error!(
                sequence_id,
                event_type = record.event_type(),
                error = %e,
                "ledger write failed after retries; continuing degraded"
            );
        }

        self.history.push(record.clone());
        self.pending.push_back(Envelope::new(
            record,
            phase.timing(),
            gates,
            self.state.confidence().clone(),
        ));
    }

    /// Fan out one router call per item with bounded concurrency,
    /// preserving input order in the results.
    async fn fan_out(
        &self,
        requests: Vec<(String, GenerateRequest)>,
    ) -> Vec<(String, Result<String, RouterError>)> {
        let router = self.router.clone();
        stream::iter(requests)
            .map(|(id, req)| {
                let router = router.clone();
                async move {
                    let result = router.generate(&req).await;
                    (id, result)
                }
            })
            .buffered(self.config.max_concurrent_calls.max(1))
            .collect()
            .await
    }

    fn request(&self, prompt: String, model: &str, temperature: f32) -> GenerateRequest {
        GenerateRequest::new(&prompt, model, &self.session.owner_id)
            .temperature(temperature)
            .json_mode(true)
    }

    async fn run_research(&mut self) -> Result<(), PhaseError> {
        let requests: Vec<(String, GenerateRequest)> = self
            .session
            .knights
            .iter()
            .filter(|k| !self.state.has_research(&k.id))
            .map(|k| {
                let req = self
                    .request(prompts::research(k, &self.topic), &k.model, k.temperature)
                    .web_search(true);
                (k.id.clone(), req)
            })
            .collect();

        let mut first_error = None;
        for (knight_id, result) in self.fan_out(requests).await {
            match result {
                Ok(text) => {
                    let research = parse_research(&knight_id, &text)?;
                    self.research_summaries
                        .insert(knight_id, research.summary.clone());
                    self.emit(DebatePhase::Research, EventPayload::ResearchResult(research))
                        .await;
                }
                Err(e) => {
                    warn!(knight_id = %knight_id, error = %e, "research call failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn run_opening(&mut self) -> Result<(), PhaseError> {
        let requests: Vec<(String, GenerateRequest)> = self
            .session
            .knights
            .iter()
            .filter(|k| self.state.opening(&k.id).is_none())
            .map(|k| {
                let summary = self.research_summaries.get(&k.id).map(String::as_str);
                let prompt = prompts::opening(k, &self.topic, summary);
                (k.id.clone(), self.request(prompt, &k.model, k.temperature))
            })
            .collect();

        let mut first_error = None;
        for (knight_id, result) in self.fan_out(requests).await {
            match result {
                Ok(text) => {
                    let card = parse_opening(&knight_id, &text)?;
                    self.emit(DebatePhase::Opening, EventPayload::PositionCard(card))
                        .await;
                }
                Err(e) => {
                    warn!(knight_id = %knight_id, error = %e, "opening call failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Silent phase: derive 2-3 testable claims per opening. State-only.
    async fn run_claims(&mut self) -> Result<(), PhaseError> {
        let requests: Vec<(String, GenerateRequest)> = self
            .session
            .knights
            .iter()
            .filter_map(|k| {
                if self.state.claims_for(&k.id).is_some() {
                    return None;
                }
                let card = self.state.opening(&k.id)?;
                let prompt = prompts::extract_claims(&self.topic, card);
                Some((k.id.clone(), self.request(prompt, &k.model, 0.3)))
            })
            .collect();

        let mut first_error = None;
        for (knight_id, result) in self.fan_out(requests).await {
            match result {
                Ok(text) => {
                    let claims = parse_claims(&text)?;
                    self.state.set_claims(&knight_id, claims);
                }
                Err(e) => {
                    warn!(knight_id = %knight_id, error = %e, "claim extraction failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn run_cross_examination(&mut self) -> Result<(), PhaseError> {
        let n = self.session.knight_count();
        if n < 2 {
            info!("cross-examination skipped: fewer than two knights");
            return Ok(());
        }

        // Ring: each knight challenges the next one's first claim, or its
        // opening headline when no claims were derived.
        let mut requests = Vec::new();
        let mut targets = Vec::new();
        for (i, challenger) in self.session.knights.iter().enumerate() {
            let defender = &self.session.knights[(i + 1) % n];
            let (target_claim_id, claim_text) = match self.state.claims_for(&defender.id) {
                Some([first, ..]) => (claim_id(&defender.id, 0), first.clone()),
                _ => {
                    let headline = self
                        .state
                        .opening(&defender.id)
                        .map(|c| c.headline.clone())
                        .unwrap_or_else(|| self.topic.clone());
                    (opening_claim_id(&defender.id), headline)
                }
            };
            let prompt =
                prompts::challenge(challenger, &self.topic, &defender.role, &claim_text);
            requests.push((
                challenger.id.clone(),
                self.request(prompt, &challenger.model, challenger.temperature),
            ));
            targets.push((defender.id.clone(), target_claim_id, claim_text));
        }

        let mut first_error = None;
        for ((challenger_id, result), (defender_id, target_claim_id, claim_text)) in
            self.fan_out(requests).await.into_iter().zip(targets)
        {
            match result {
                Ok(text) => {
                    let challenge = Challenge {
                        challenger_id,
                        defender_id,
                        claim_id: target_claim_id,
                        claim_text,
                        challenge: parse_challenge(&text)?,
                    };
                    self.emit(
                        DebatePhase::CrossExamination,
                        EventPayload::Challenge(challenge),
                    )
                    .await;
                }
                Err(e) => {
                    warn!(challenger_id = %challenger_id, error = %e, "challenge call failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn run_rebuttals(&mut self) -> Result<(), PhaseError> {
        // A partially completed phase resumes mid-list: the first
        // `rebuttal_count` challenges were already answered.
        let open_challenges: Vec<Challenge> = self
            .state
            .challenges()
            .iter()
            .skip(self.state.rebuttal_count())
            .cloned()
            .collect();

        for challenge in open_challenges {
            let Some(defender) = self
                .session
                .knights
                .iter()
                .find(|k| k.id == challenge.defender_id)
                .cloned()
            else {
                warn!(
                    defender_id = %challenge.defender_id,
                    "challenge references unknown knight; skipping"
                );
                continue;
            };

            let prompt =
                prompts::rebuttal(&defender, &self.topic, &challenge, self.state.red_team());
            let req = self.request(prompt, &defender.model, defender.temperature);
            let text = self.router.generate(&req).await?;
            let (response, updated_confidence) = parse_rebuttal(&text)?;
            self.emit(
                DebatePhase::Rebuttals,
                EventPayload::Rebuttal(Rebuttal {
                    knight_id: defender.id,
                    claim_id: challenge.claim_id,
                    response,
                    updated_confidence,
                }),
            )
            .await;
        }
        Ok(())
    }

    fn cards_in_panel_order(&self) -> Vec<PositionCard> {
        self.session
            .knights
            .iter()
            .filter_map(|k| self.state.opening(&k.id).cloned())
            .collect()
    }

    async fn run_red_team(&mut self) -> Result<(), PhaseError> {
        let cards = self.cards_in_panel_order();
        let card_refs: Vec<&PositionCard> = cards.iter().collect();
        let prompt = prompts::red_team(&self.topic, &card_refs, self.state.challenges());
        let req = self
            .request(prompt, &self.config.red_team_model, 0.8)
            .tier(ModelTier::Deep);
        let text = self.router.generate(&req).await?;
        let critique = parse_red_team(&text)?;
        self.emit(
            DebatePhase::RedTeam,
            EventPayload::RedTeamCritique(critique),
        )
        .await;
        Ok(())
    }

    async fn run_convergence(&mut self) -> Result<(), PhaseError> {
        let cards = self.cards_in_panel_order();
        let card_refs: Vec<&PositionCard> = cards.iter().collect();
        let prompt = prompts::convergence(&self.topic, &card_refs, self.state.challenges());
        let req = self
            .request(prompt, &self.config.moderator_model, 0.4)
            .tier(ModelTier::Deep);
        let text = self.router.generate(&req).await?;
        let convergence = parse_convergence(&text)?;
        self.emit(
            DebatePhase::Convergence,
            EventPayload::Convergence(convergence),
        )
        .await;
        Ok(())
    }

    async fn run_translator(&mut self) -> Result<(), PhaseError> {
        let Some(convergence) = self.state.convergence().cloned() else {
            info!("translator skipped: no convergence summary");
            return Ok(());
        };
        let prompt = prompts::translator(&self.topic, &convergence);
        let req = self.request(prompt, &self.config.moderator_model, 0.5);
        let text = self.router.generate(&req).await?;
        let output = parse_translator(&text)?;
        self.emit(
            DebatePhase::Translator,
            EventPayload::TranslatorOutput(output),
        )
        .await;
        Ok(())
    }

    async fn run_artifact(&mut self) -> Result<(), PhaseError> {
        let export = self.exporter.export(&self.session.id, &self.history).await;
        let (locator, status, detail) = match export {
            Ok(locator) => (Some(locator.clone()), ExportStatus::Succeeded, Some(locator)),
            Err(e) => {
                // Export failures become a status event, never a phase
                // failure.
                warn!(error = %e, "artifact export failed");
                (None, ExportStatus::Failed, Some(e.to_string()))
            }
        };
        self.emit(
            DebatePhase::ArtifactReady,
            EventPayload::ArtifactReady { locator },
        )
        .await;
        self.emit(
            DebatePhase::ArtifactReady,
            EventPayload::PdfGenerationStatus { status, detail },
        )
        .await;
        Ok(())
    }

    /// The closing phase never leaves a debate without a terminal ruling:
    /// an LLM failure here falls back to canned text.
    async fn run_closed(&mut self) -> Result<(), PhaseError> {
        let prompt = prompts::ruling(&self.topic, self.state.convergence());
        let req = self.request(prompt, &self.config.moderator_model, 0.3);

        let ruling = match self.router.generate(&req).await {
            Ok(text) => match parse_ruling(&text) {
                Ok(ruling) => ruling,
                Err(e) => {
                    warn!(error = %e, "ruling output unparseable; using fallback");
                    fallback_ruling()
                }
            },
            Err(e) => {
                warn!(error = %e, "closing call failed; using fallback ruling");
                fallback_ruling()
            }
        };
        self.emit(DebatePhase::Closed, EventPayload::ModeratorRuling(ruling))
            .await;
        Ok(())
    }
}

fn fallback_ruling() -> ModeratorRuling {
    ModeratorRuling {
        ruling: FALLBACK_RULING.to_string(),
        rationale: FALLBACK_RULING_RATIONALE.to_string(),
        fallback: true,
    }
}

fn parse_value(text: &str) -> Result<Value, PhaseError> {
    serde_json::from_str(text).map_err(|e| PhaseError::Parse(e.to_string()))
}

fn parse_research(knight_id: &str, text: &str) -> Result<ResearchResult, PhaseError> {
    let value = parse_value(text)?;
    Ok(ResearchResult {
        knight_id: knight_id.to_string(),
        summary: coerce_string(&value["summary"]),
        findings: coerce_string_list(&value["findings"]),
        citations: coerce_string_list(&value["citations"]),
    })
}

fn parse_opening(knight_id: &str, text: &str) -> Result<PositionCard, PhaseError> {
    let value = parse_value(text)?;
    Ok(PositionCard {
        knight_id: knight_id.to_string(),
        headline: coerce_string(&value["headline"]),
        body: coerce_string(&value["body"]),
        citations: coerce_string_list(&value["citations"]),
        confidence: coerce_confidence(&value["confidence"]).unwrap_or(0.5),
    })
}

fn parse_claims(text: &str) -> Result<Vec<String>, PhaseError> {
    let value = parse_value(text)?;
    let mut claims = coerce_string_list(&value["claims"]);
    claims.truncate(3);
    if claims.is_empty() {
        return Err(PhaseError::Parse("no claims in output".to_string()));
    }
    Ok(claims)
}

fn parse_challenge(text: &str) -> Result<String, PhaseError> {
    let value = parse_value(text)?;
    let challenge = coerce_string(&value["challenge"]);
    if challenge.is_empty() {
        return Err(PhaseError::Parse("empty challenge".to_string()));
    }
    Ok(challenge)
}

fn parse_rebuttal(text: &str) -> Result<(String, Option<f64>), PhaseError> {
    let value = parse_value(text)?;
    let response = coerce_string(&value["response"]);
    if response.is_empty() {
        return Err(PhaseError::Parse("empty rebuttal".to_string()));
    }
    Ok((response, coerce_confidence(&value["updated_confidence"])))
}

fn parse_red_team(text: &str) -> Result<RedTeamCritique, PhaseError> {
    let value = parse_value(text)?;
    Ok(RedTeamCritique {
        severity: CritiqueSeverity::parse_lenient(&coerce_string(&value["severity"])),
        summary: coerce_string(&value["summary"]),
        flaws: coerce_string_list(&value["flaws"]),
    })
}

fn parse_convergence(text: &str) -> Result<Convergence, PhaseError> {
    let value = parse_value(text)?;
    let recommendation = coerce_string(&value["recommendation"]);
    if recommendation.is_empty() {
        return Err(PhaseError::Parse("empty recommendation".to_string()));
    }
    Ok(Convergence {
        recommendation,
        rationale: coerce_string(&value["rationale"]),
        analysis: coerce_string(&value["analysis"]),
        critical_risks: coerce_string_list(&value["critical_risks"]),
        known_unknowns: coerce_string_list(&value["known_unknowns"]),
        dissent: coerce_string_list(&value["dissent"]),
        confidence: coerce_confidence(&value["confidence"]).unwrap_or(0.5),
    })
}

fn parse_translator(text: &str) -> Result<TranslatorOutput, PhaseError> {
    let value = parse_value(text)?;
    Ok(TranslatorOutput {
        executive_summary: coerce_string(&value["executive_summary"]),
        talking_points: coerce_string_list(&value["talking_points"]),
    })
}

fn parse_ruling(text: &str) -> Result<ModeratorRuling, PhaseError> {
    let value = parse_value(text)?;
    let ruling = coerce_string(&value["ruling"]);
    if ruling.is_empty() {
        return Err(PhaseError::Parse("empty ruling".to_string()));
    }
    Ok(ModeratorRuling {
        ruling,
        rationale: coerce_string(&value["rationale"]),
        fallback: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryExporter;
    use crate::events::ledger::MemoryLedger;
    use crate::llm::keys::{ApiKeyResolver, MemoryCredentialStore};
    use crate::llm::provider::ModelCatalog;
    use crate::llm::router::{LlmRouter, RouterServices};
    use crate::session::Knight;
    use std::collections::HashMap as StdHashMap;

    fn engine() -> DebateEngine {
        engine_with(EngineConfig::default())
    }

    fn engine_with(config: EngineConfig) -> DebateEngine {
        let router = LlmRouter::new(
            ModelCatalog::with_defaults(),
            ApiKeyResolver::new(MemoryCredentialStore::new()),
            StdHashMap::new(),
            Arc::new(RouterServices::new()),
        );
        DebateEngine::new(
            Arc::new(router),
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryExporter::new()),
            config,
        )
    }

    fn session() -> Session {
        Session::new(
            "ext-1",
            "acct-1",
            "Should we enter market X?",
            vec![Knight::new("k1", "champion", "argue for entry", "gpt-4o")],
        )
    }

    #[test]
    fn test_run_rejects_empty_panel() {
        let mut s = session();
        s.knights.clear();
        let err = engine().run(&s, &[]).unwrap_err();
        assert!(matches!(
            err,
            DebateError::Validation(SessionError::NoKnights)
        ));
    }

    #[test]
    fn test_run_rejects_blank_topic() {
        let mut s = session();
        s.topic = "   \t ".to_string();
        let err = engine().run(&s, &[]).unwrap_err();
        assert!(matches!(
            err,
            DebateError::Validation(SessionError::EmptyTopic)
        ));
    }

    #[test]
    fn test_run_rejects_idle_in_order() {
        let config = EngineConfig {
            phase_order: vec![DebatePhase::Idle, DebatePhase::Closed],
            ..EngineConfig::default()
        };
        let err = engine_with(config).run(&session(), &[]).unwrap_err();
        assert!(matches!(err, DebateError::InvalidPhaseOrder(_)));
    }

    #[test]
    fn test_run_rejects_duplicate_phase() {
        let config = EngineConfig {
            phase_order: vec![DebatePhase::Research, DebatePhase::Research],
            ..EngineConfig::default()
        };
        let err = engine_with(config).run(&session(), &[]).unwrap_err();
        assert!(matches!(err, DebateError::InvalidPhaseOrder(_)));
    }

    #[test]
    fn test_parse_opening_normalizes_percent_confidence() {
        let card = parse_opening("k1", r#"{"headline": "go", "body": "b", "citations": [], "confidence": 85}"#)
            .unwrap();
        assert!((card.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_parse_claims_caps_at_three() {
        let claims =
            parse_claims(r#"{"claims": ["a", "b", "c", "d", "e"]}"#).unwrap();
        assert_eq!(claims.len(), 3);
    }

    #[test]
    fn test_parse_rebuttal_optional_confidence() {
        let (response, updated) =
            parse_rebuttal(r#"{"response": "holds", "updated_confidence": null}"#).unwrap();
        assert_eq!(response, "holds");
        assert!(updated.is_none());
    }

    #[test]
    fn test_run_is_debuggable() {
        // unwrap_err on Result<DebateRun, _> needs this to format.
        let run = engine().run(&session(), &[]).unwrap();
        let rendered = format!("{run:?}");
        assert!(rendered.contains("DebateRun"));
        assert!(rendered.contains("phase_cursor"));
    }

    #[test]
    fn test_fallback_ruling_marked() {
        let ruling = fallback_ruling();
        assert!(ruling.fallback);
        assert!(!ruling.ruling.is_empty());
    }
}
