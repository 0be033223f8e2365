//! Orchestrator: drives the ten fixed pipeline stages in order,
//! owning retry + tier-escalation policy, checkpointing after
//! every stage boundary, and the per-job event stream.
//!
//! ## Persistence ownership
//!
//! | Layer                     | What it persists                                    |
//! |---------------------------|------------------------------------------------------|
//! | `checkpoint::CheckpointManager` | Which stages are done, their context, running cost/tokens |
//! | `memory::MemoryStore`     | Structural/semantic/evolutionary records, cost ledger |
//!
//! This mirrors the split between `orchestrator/state.rs` (phase
//! completion) and `factory/db.rs` (durable application state), collapsed
//! here into one subsystem because the Checkpoint Manager already is a
//! SQLite-backed completion log — a second pipe-delimited one alongside it
//! would just be a duplicate source of truth. Job registry and event
//! broadcast (the equivalent lives inline in
//! `swarm/executor.rs`'s `ExecutionEvent` + `tokio::select!` race) are kept
//! in this one file for the same reason: there's nothing left to split out
//! once the phase-log role is gone.

use crate::agents::{
    Agent, AgentError, BriefInterpreterAgent, CharacterArchitectAgent, CoherenceValidatorAgent,
    EditorialReviewerAgent, LanguageStylizerAgent, OutputProcessorAgent, ProgressReporter, SegmentPlannerAgent,
    SequentialGeneratorAgent, StructureDesignerAgent, WorldArchitectAgent,
};
use crate::checkpoint::CheckpointManager;
use crate::errors::{StageError, StageErrorKind};
use crate::memory::MemoryStore;
use crate::narraforge_config::NarraforgeConfig;
use crate::router::{
    ModelClient, ModelRouter, ModelTier, PricingTable, RateLimitConfig, RateLimiter, RouterError, TierModelMap,
};
use chrono::Utc;
use narraforge_common::payloads::OutputManifest;
use narraforge_common::{
    ContextEntry, ContextKey, ContextValue, JobId, JobRecord, JobStatus, OrchestratorEvent,
    PipelineContext, ProductionBrief, StageNumber, TokenUsage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Cooperative cancellation flag, checked before each stage, before each
/// model call (inside `ModelRouter::complete`'s caller, i.e. here, not
/// mid-call), and before each checkpoint write.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One job's live state: its event channel, replay history, cancellation
/// flag, and the `JobRecord` snapshot `status()` returns.
struct JobHandle {
    events_tx: broadcast::Sender<OrchestratorEvent>,
    history: Mutex<Vec<OrchestratorEvent>>,
    cancellation: CancellationToken,
    record: Mutex<JobRecord>,
}

impl JobHandle {
    fn new(record: JobRecord) -> Self {
        let (events_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { events_tx, history: Mutex::new(Vec::new()), cancellation: CancellationToken::new(), record: Mutex::new(record) }
    }

    fn emit(&self, event: OrchestratorEvent) {
        self.history.lock().unwrap().push(event.clone());
        let _ = self.events_tx.send(event);
    }

    fn subscribe(&self) -> (Vec<OrchestratorEvent>, broadcast::Receiver<OrchestratorEvent>) {
        (self.history.lock().unwrap().clone(), self.events_tx.subscribe())
    }
}

/// Turns a stage's incremental `ProgressReporter` calls into
/// `OrchestratorEvent::StageProgress` events on the job's channel. Only the
/// Sequential Generator currently calls through this, once per completed
/// segment.
struct StageProgressReporter<'a> {
    handle: &'a JobHandle,
    job_id: JobId,
    stage: StageNumber,
}

impl ProgressReporter for StageProgressReporter<'_> {
    fn report(&self, percent: f32, message: &str) {
        self.handle.emit(OrchestratorEvent::StageProgress {
            job_id: self.job_id,
            stage: self.stage,
            percent,
            message: message.to_string(),
            at: Utc::now(),
        });
    }
}

/// The outcome of a completed `produce`/`resume` call.
#[derive(Debug, Clone)]
pub struct ProduceOutcome {
    pub job_id: JobId,
    pub manifest: OutputManifest,
}

/// Builds the ten agents in execution order for one job, applying the
/// job's genre-specific coherence threshold and the configured text-health
/// tables. A fresh set is built per job because several
/// agents close over job-specific configuration rather than being stateless.
fn build_agents(brief: &ProductionBrief, config: &NarraforgeConfig) -> Vec<Box<dyn Agent>> {
    let genre_key = brief.genre.config_key();
    let banned_phrases = config.banned_phrases().clone();
    let repetition_budgets = config.repetition_budgets().clone();
    vec![
        Box::new(BriefInterpreterAgent::new(brief.clone())),
        Box::new(WorldArchitectAgent),
        Box::new(CharacterArchitectAgent),
        Box::new(StructureDesignerAgent),
        Box::new(SegmentPlannerAgent),
        Box::new(SequentialGeneratorAgent::new(banned_phrases.clone(), repetition_budgets.clone())),
        Box::new(CoherenceValidatorAgent::new(config.coherence_threshold_for(&genre_key))),
        Box::new(LanguageStylizerAgent),
        Box::new(EditorialReviewerAgent::new(banned_phrases, repetition_budgets)),
        Box::new(OutputProcessorAgent),
    ]
}

/// Quality-sensitive stages surface a non-empty
/// `validate()` result as `QualityError`; the remaining stages' `validate()`
/// checks are structural, so the same result there is a `ValidationError`.
fn issue_kind_for_stage(stage: StageNumber) -> StageErrorKind {
    match stage {
        StageNumber::CoherenceValidator
        | StageNumber::LanguageStylizer
        | StageNumber::SequentialGenerator
        | StageNumber::EditorialReviewer => StageErrorKind::QualityError,
        _ => StageErrorKind::ValidationError,
    }
}

/// Maps an `AgentError` onto the seven stage failure kinds.
fn classify_agent_error(err: &AgentError) -> StageErrorKind {
    match err {
        // A stage asking for context an earlier stage never wrote is an
        // orchestrator bug, not something a retry or tier bump fixes.
        AgentError::MissingContext(_) => StageErrorKind::PermanentProviderError,
        AgentError::Schema(_) => StageErrorKind::SchemaError,
        AgentError::Memory(_) => StageErrorKind::PermanentProviderError,
        AgentError::Other(_) => StageErrorKind::PermanentProviderError,
        AgentError::Router(router_err) => match router_err {
            RouterError::CostExceeded { .. } => StageErrorKind::CostExceeded,
            RouterError::Permanent { .. } => StageErrorKind::PermanentProviderError,
            RouterError::NoProviderAvailable(_)
            | RouterError::RateLimiterDeadlineExceeded(_)
            | RouterError::MalformedResponse(_) => StageErrorKind::TransportError,
        },
    }
}

/// Approximate word count for a stage's output, where that's a meaningful
/// number (the prose-bearing stages); `None` for structural payloads.
fn word_count_of(value: &ContextValue) -> Option<u32> {
    match value {
        ContextValue::Segments(s) => Some(s.segments.iter().map(|seg| seg.word_count() as u32).sum()),
        ContextValue::StylizedSegments(s) => Some(s.segments.iter().map(|seg| seg.word_count() as u32).sum()),
        ContextValue::EditorialReport(r) => Some(r.final_segments.iter().map(|seg| seg.word_count() as u32).sum()),
        ContextValue::OutputManifest(m) => Some(m.narrative_text.split_whitespace().count() as u32),
        _ => None,
    }
}

/// The ten-stage pipeline orchestrator. Owns the configuration, the shared
/// rate limiter and provider list a fresh per-job `ModelRouter` is built
/// from, the Triple Memory store, and the Checkpoint Manager; exposes
/// `produce`/`resume`/`status`/`cancel`/`subscribe` to the CLI.
pub struct Orchestrator {
    config: NarraforgeConfig,
    providers: Vec<Arc<dyn ModelClient>>,
    tier_models: TierModelMap,
    rate_limiter: Arc<RateLimiter>,
    pricing: PricingTable,
    memory: Arc<Mutex<MemoryStore>>,
    checkpoints: CheckpointManager,
    jobs: Mutex<HashMap<String, Arc<JobHandle>>>,
}

impl Orchestrator {
    pub fn new(config: NarraforgeConfig, memory: Arc<Mutex<MemoryStore>>, checkpoints: CheckpointManager) -> Self {
        let tier_models =
            TierModelMap { mini: config.model_for_tier(false).to_string(), advanced: config.model_for_tier(true).to_string() };
        let rate_limiter = Arc::new(RateLimiter::new(Duration::from_millis(config.backoff_cap_ms())));
        let mini_limit = config.rate_limit_for(&tier_models.mini);
        let advanced_limit = config.rate_limit_for(&tier_models.advanced);
        rate_limiter.configure(
            &tier_models.mini,
            RateLimitConfig { requests_per_minute: mini_limit.requests_per_minute, tokens_per_minute: mini_limit.tokens_per_minute },
        );
        rate_limiter.configure(
            &tier_models.advanced,
            RateLimitConfig {
                requests_per_minute: advanced_limit.requests_per_minute,
                tokens_per_minute: advanced_limit.tokens_per_minute,
            },
        );
        Self {
            config,
            providers: Vec::new(),
            tier_models,
            rate_limiter,
            pricing: PricingTable::default(),
            memory,
            checkpoints,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Register a model provider at the back of the fallback chain used by
    /// every job's router.
    pub fn register_provider(&mut self, client: Arc<dyn ModelClient>) {
        self.providers.push(client);
    }

    fn build_router(&self, genre_key: &str, seed_spent: f64) -> ModelRouter {
        let router = ModelRouter::new(
            self.tier_models.clone(),
            self.rate_limiter.clone(),
            self.pricing,
            Duration::from_millis(self.config.backoff_base_ms()),
            Duration::from_millis(self.config.backoff_cap_ms()),
            self.config.cost_budget_for(genre_key),
        );
        router.seed_spent(seed_spent);
        let mut router = router;
        for provider in &self.providers {
            router.register_provider(provider.clone());
        }
        router
    }

    fn set_status(&self, handle: &JobHandle, status: JobStatus) {
        let mut record = handle.record.lock().unwrap();
        record.status = status;
        if status.is_terminal() {
            record.completed_at = Some(Utc::now());
        }
    }

    /// Submit a new production brief and run it to completion.
    pub async fn produce(&self, brief: ProductionBrief) -> Result<ProduceOutcome, StageError> {
        self.produce_with_id(JobId::new(), brief).await
    }

    /// Same as `produce`, but the caller assigns the job id up front. Lets a
    /// caller (e.g. the CLI) `subscribe`/`cancel` a job it just submitted
    /// without racing `produce`'s internal id assignment.
    pub async fn produce_with_id(&self, job_id: JobId, brief: ProductionBrief) -> Result<ProduceOutcome, StageError> {
        let record = JobRecord::new(job_id, brief.clone());
        let handle = Arc::new(JobHandle::new(record));
        self.jobs.lock().unwrap().insert(job_id.to_string(), handle.clone());
        handle.emit(OrchestratorEvent::JobStarted { job_id, at: Utc::now() });
        self.set_status(&handle, JobStatus::Running);

        let manifest =
            self.run_pipeline(&job_id.to_string(), &handle, &brief, PipelineContext::new(), 0.0).await?;
        Ok(ProduceOutcome { job_id, manifest })
    }

    /// Resume a job from its last checkpoint. The caller
    /// supplies the original brief — NarraForge does not persist the brief
    /// itself, only the interpreted Pipeline Context, so the caller (the
    /// CLI, which keeps the brief alongside the job's working directory)
    /// must pass it back in.
    pub async fn resume(&self, job_id: JobId, brief: ProductionBrief) -> Result<ProduceOutcome, StageError> {
        let job_id_str = job_id.to_string();
        let resume_state = self.checkpoints.load_latest(&job_id_str).map_err(|err| {
            StageError::new(StageNumber::BriefInterpreter, StageErrorKind::PermanentProviderError, 0, err.to_string())
        })?;

        let mut record = JobRecord::new(job_id, brief.clone());
        record.completed_stages = resume_state.context.completed_stages();
        record.cumulative_cost = resume_state.cumulative_cost;
        record.cumulative_tokens = resume_state.cumulative_tokens;
        let handle = Arc::new(JobHandle::new(record));
        self.jobs.lock().unwrap().insert(job_id_str.clone(), handle.clone());
        handle.emit(OrchestratorEvent::JobStarted { job_id, at: Utc::now() });
        self.set_status(&handle, JobStatus::Running);

        let manifest = self
            .run_pipeline(&job_id_str, &handle, &brief, resume_state.context, resume_state.cumulative_cost)
            .await?;
        Ok(ProduceOutcome { job_id, manifest })
    }

    /// Current status snapshot for a job, if it's still tracked in this
    /// process.
    pub fn status(&self, job_id: &JobId) -> Option<JobRecord> {
        let jobs = self.jobs.lock().unwrap();
        jobs.get(&job_id.to_string()).map(|handle| handle.record.lock().unwrap().clone())
    }

    /// Request cooperative cancellation. Takes
    /// effect at the next checked boundary — before a stage starts, before
    /// a model call, or before a checkpoint write — never mid-stage.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let jobs = self.jobs.lock().unwrap();
        match jobs.get(&job_id.to_string()) {
            Some(handle) => {
                handle.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    /// Subscribe to a job's event stream. Returns the events already
    /// emitted (so a late subscriber sees the full history) plus a live
    /// receiver for everything from here on.
    pub fn subscribe(&self, job_id: &JobId) -> Option<(Vec<OrchestratorEvent>, broadcast::Receiver<OrchestratorEvent>)> {
        let jobs = self.jobs.lock().unwrap();
        jobs.get(&job_id.to_string()).map(|handle| handle.subscribe())
    }

    /// Drives the stage loop from `context` (empty for a fresh job, the
    /// reconstituted state for a resumed one) through to the Output
    /// Processor, checkpointing after every stage and retrying with tier
    /// escalation on failure.
    async fn run_pipeline(
        &self,
        job_id: &str,
        handle: &Arc<JobHandle>,
        brief: &ProductionBrief,
        mut context: PipelineContext,
        seed_cost: f64,
    ) -> Result<OutputManifest, StageError> {
        let genre_key = brief.genre.config_key();
        let router = self.build_router(&genre_key, seed_cost);
        let agents = build_agents(brief, &self.config);
        let max_attempts = self.config.max_retries_per_stage().max(1);

        for agent in &agents {
            let stage = agent.stage();
            if context.contains(ContextKey::for_stage(stage)) {
                continue;
            }

            if handle.cancellation.is_cancelled() {
                return self.fail_cancelled(job_id, handle, stage);
            }

            let mut tier = if stage.requires_advanced_tier() { ModelTier::Advanced } else { agent.preferred_model_tier() };
            let mut attempt = 0u32;
            let cost_before_stage = router.cumulative_cost();

            let (mut value, tokens) = loop {
                attempt += 1;
                if handle.cancellation.is_cancelled() {
                    return self.fail_cancelled(job_id, handle, stage);
                }
                handle.emit(OrchestratorEvent::StageStarted { job_id: parse_job_id(job_id), stage, attempt, at: Utc::now() });

                // The memory lock is held only long enough to read what this
                // stage needs (`prepare`) or, for the deterministic stage, to
                // run synchronously; it is always released before any
                // `.await`, so a stage's model call never blocks the rest of
                // the fleet's memory access for its duration.
                let outcome = if agent.calls_model() {
                    let prepared = {
                        let memory = self.memory.lock().unwrap();
                        agent.prepare(&context, &memory)
                    };
                    match prepared {
                        Ok(prepared) => {
                            let reporter =
                                StageProgressReporter { handle: handle.as_ref(), job_id: parse_job_id(job_id), stage };
                            agent.generate(&context, &prepared, &router, tier, &reporter).await
                        }
                        Err(err) => Err(err),
                    }
                } else {
                    let memory = self.memory.lock().unwrap();
                    agent.run_deterministic(&context, &memory).map(|value| (value, TokenUsage::default()))
                };

                match outcome {
                    Ok((value, tokens)) => {
                        let issues = agent.validate(&value, &context);
                        if issues.is_empty() {
                            break (value, tokens);
                        }
                        let reason = issues.iter().map(|i| i.description.clone()).collect::<Vec<_>>().join("; ");
                        warn!(stage = %stage, attempt, %reason, "stage validation failed");
                        handle.emit(OrchestratorEvent::StageFailed {
                            job_id: parse_job_id(job_id),
                            stage,
                            attempt,
                            reason: reason.clone(),
                            at: Utc::now(),
                        });
                        if attempt >= max_attempts {
                            let kind = issue_kind_for_stage(stage);
                            return self.fail_job(job_id, handle, stage, StageError::new(stage, kind, attempt, reason));
                        }
                        tier = tier.step_up();
                    }
                    Err(err) => {
                        let kind = classify_agent_error(&err);
                        let reason = err.to_string();
                        warn!(stage = %stage, attempt, kind = ?kind, %reason, "stage call failed");
                        if !kind.is_retryable() {
                            return self.fail_job(job_id, handle, stage, StageError::new(stage, kind, attempt, reason));
                        }
                        handle.emit(OrchestratorEvent::StageFailed {
                            job_id: parse_job_id(job_id),
                            stage,
                            attempt,
                            reason: reason.clone(),
                            at: Utc::now(),
                        });
                        if attempt >= max_attempts {
                            return self.fail_job(job_id, handle, stage, StageError::new(stage, kind, attempt, reason));
                        }
                        if matches!(kind, StageErrorKind::SchemaError) {
                            tier = tier.step_up();
                        }
                    }
                }
            };

            if handle.cancellation.is_cancelled() {
                return self.fail_cancelled(job_id, handle, stage);
            }

            // Persisting this stage's memory entities and recording its
            // checkpoint row happen inside one SQLite transaction: a crash
            // between the two would otherwise let a resumed job see a
            // character or world row with no checkpoint ever pointing past
            // it, or vice versa. `save_atomically` commits both together or
            // rolls both back.
            let word_count = word_count_of(&value);
            let stage_cost_before_commit = router.cumulative_cost();
            let committed_context = self.checkpoints.save_atomically(job_id, stage, |store| {
                agent.persist_to_memory(&mut value, store, job_id).map_err(|err| match err {
                    AgentError::Memory(memory_err) => memory_err,
                    other => crate::errors::MemoryError::Other(anyhow::anyhow!(other.to_string())),
                })?;

                let mut context_after = context.clone();
                let entry =
                    ContextEntry { written_at: Utc::now(), written_by_stage: stage, tokens, word_count, value: value.clone() };
                context_after
                    .insert(ContextKey::for_stage(stage), entry)
                    .map_err(|err| crate::errors::MemoryError::Other(anyhow::anyhow!(err.to_string())))?;

                let cumulative_tokens = context_after.total_tokens();
                Ok((context_after, stage_cost_before_commit, cumulative_tokens))
            });
            context = match committed_context {
                Ok(ctx) => ctx,
                Err(err) => {
                    return self.fail_job(
                        job_id,
                        handle,
                        stage,
                        StageError::new(stage, StageErrorKind::PermanentProviderError, attempt, err.to_string()),
                    );
                }
            };

            let stage_cost = router.cumulative_cost() - cost_before_stage;
            handle.emit(OrchestratorEvent::StageComplete {
                job_id: parse_job_id(job_id),
                stage,
                tokens,
                cost: stage_cost,
                at: Utc::now(),
            });
            {
                let mut record = handle.record.lock().unwrap();
                record.completed_stages.push(stage);
                record.current_stage = Some(stage);
                record.cumulative_cost = router.cumulative_cost();
                record.cumulative_tokens += tokens;
            }

            if handle.cancellation.is_cancelled() {
                return self.fail_cancelled(job_id, handle, stage);
            }
        }

        let manifest = match context.require(ContextKey::OutputManifest) {
            Ok(entry) => match &entry.value {
                ContextValue::OutputManifest(manifest) => manifest.clone(),
                _ => {
                    let err = StageError::new(
                        StageNumber::OutputProcessor,
                        StageErrorKind::PermanentProviderError,
                        1,
                        "output_manifest entry has wrong payload shape",
                    );
                    return self.fail_job(job_id, handle, StageNumber::OutputProcessor, err);
                }
            },
            Err(err) => {
                let stage_err =
                    StageError::new(StageNumber::OutputProcessor, StageErrorKind::PermanentProviderError, 1, err.to_string());
                return self.fail_job(job_id, handle, StageNumber::OutputProcessor, stage_err);
            }
        };

        info!(job_id, "job complete");
        handle.emit(OrchestratorEvent::JobComplete { job_id: parse_job_id(job_id), at: Utc::now() });
        self.set_status(handle, JobStatus::Completed);
        Ok(manifest)
    }

    fn fail_job(
        &self,
        job_id: &str,
        handle: &Arc<JobHandle>,
        stage: StageNumber,
        err: StageError,
    ) -> Result<OutputManifest, StageError> {
        handle.emit(OrchestratorEvent::JobFailed {
            job_id: parse_job_id(job_id),
            stage,
            reason: err.to_string(),
            at: Utc::now(),
        });
        {
            let mut record = handle.record.lock().unwrap();
            record.failed_stages.push(stage);
        }
        self.set_status(handle, JobStatus::Failed);
        Err(err)
    }

    fn fail_cancelled(&self, job_id: &str, handle: &Arc<JobHandle>, stage: StageNumber) -> Result<OutputManifest, StageError> {
        handle.emit(OrchestratorEvent::JobCancelled { job_id: parse_job_id(job_id), at: Utc::now() });
        self.set_status(handle, JobStatus::Cancelled);
        Err(StageError::new(stage, StageErrorKind::CancellationRequested, 0, "job cancelled"))
    }
}

fn parse_job_id(job_id: &str) -> JobId {
    job_id.parse::<uuid::Uuid>().map(JobId).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::client::mock::{MockModelClient, ScriptedOutcome};
    use crate::router::ModelResponse;
    use narraforge_common::{Genre, ProductionType};
    use tempfile::tempdir;

    fn test_config(working_dir: &std::path::Path) -> NarraforgeConfig {
        NarraforgeConfig::new(working_dir).expect("config loads")
    }

    fn sample_brief() -> ProductionBrief {
        let mut brief = ProductionBrief::new(ProductionType::ShortStory, Genre::Fantasy, "a quiet harbor town");
        brief.target_word_count = Some(120);
        brief
    }

    fn scripted_json(body: &str) -> ScriptedOutcome {
        ScriptedOutcome::Ok(ModelResponse { text: body.to_string(), prompt_tokens: 50, completion_tokens: 50 })
    }

    fn orchestrator_with(scripts: Vec<ScriptedOutcome>) -> (Orchestrator, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let memory = Arc::new(Mutex::new(MemoryStore::new_in_memory().unwrap()));
        let checkpoints = CheckpointManager::new(memory.clone(), Duration::from_secs(3600));
        let mut orchestrator = Orchestrator::new(config, memory, checkpoints);
        orchestrator.register_provider(Arc::new(MockModelClient::new("mock", scripts)));
        (orchestrator, dir)
    }

    #[test]
    fn cancel_on_unknown_job_returns_false() {
        let (orchestrator, _dir) = orchestrator_with(vec![]);
        assert!(!orchestrator.cancel(&JobId::new()));
    }

    #[test]
    fn status_on_unknown_job_is_none() {
        let (orchestrator, _dir) = orchestrator_with(vec![]);
        assert!(orchestrator.status(&JobId::new()).is_none());
    }

    #[test]
    fn build_agents_returns_ten_agents_in_stage_order() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let agents = build_agents(&sample_brief(), &config);
        assert_eq!(agents.len(), 10);
        for (i, agent) in agents.iter().enumerate() {
            assert_eq!(agent.stage().as_u8(), (i + 1) as u8);
        }
    }

    #[test]
    fn issue_kind_maps_quality_sensitive_stages_to_quality_error() {
        assert_eq!(issue_kind_for_stage(StageNumber::CoherenceValidator), StageErrorKind::QualityError);
        assert_eq!(issue_kind_for_stage(StageNumber::LanguageStylizer), StageErrorKind::QualityError);
        assert_eq!(issue_kind_for_stage(StageNumber::SequentialGenerator), StageErrorKind::QualityError);
        assert_eq!(issue_kind_for_stage(StageNumber::EditorialReviewer), StageErrorKind::QualityError);
        assert_eq!(issue_kind_for_stage(StageNumber::WorldArchitect), StageErrorKind::ValidationError);
    }

    #[test]
    fn classify_cost_exceeded_is_terminal() {
        let err = AgentError::Router(RouterError::CostExceeded { budget: 1.0, spent: 1.0, estimate: 0.1 });
        assert_eq!(classify_agent_error(&err), StageErrorKind::CostExceeded);
        assert!(!classify_agent_error(&err).is_retryable());
    }

    #[test]
    fn classify_no_provider_available_is_retryable_transport() {
        let err = AgentError::Router(RouterError::NoProviderAvailable(ModelTier::Mini));
        let kind = classify_agent_error(&err);
        assert_eq!(kind, StageErrorKind::TransportError);
        assert!(kind.is_retryable());
    }

    #[tokio::test]
    async fn produce_checkpoints_each_early_stage_then_fails_on_persistent_schema_error() {
        // Stages 1-4 get well-formed scripted responses; the script is then
        // exhausted, so stage 5 onward gets the mock's fallback `{}` body,
        // an unparseable SegmentPlan every attempt. This exercises
        // checkpointing/progress across several real stage boundaries
        // without depending on the Character Architect's store-generated
        // character ids, which only a live run could predict.
        let brief_json = r#"{"production_type":"short_story","genre":"fantasy","target_word_count":120,"target_chapter_count":1,"tone":"wistful","thematic_focus":["memory"],"world_scale":"intimate"}"#;
        let world_json = r#"{"rules_of_reality":["tides remember names"],"boundaries":["none"],"anomalies":[],"core_conflict":"a fisherman confronts the sea","existential_theme":"memory outlives the body"}"#;
        let characters_json = r#"{"characters":[{"name":"Mira","internal_trajectory":"grief to acceptance","contradictions":["fears water, lives by it"],"cognitive_limits":["denial"],"evolution_capacity":0.6}]}"#;
        let structure_json = r#"{"beats":[{"chapter":1,"summary":"Mira loses her boat","link_to_next":null}]}"#;

        let (orchestrator, _dir) = orchestrator_with(vec![
            scripted_json(brief_json),
            scripted_json(world_json),
            scripted_json(characters_json),
            scripted_json(structure_json),
        ]);

        let err = orchestrator.produce(sample_brief()).await.unwrap_err();
        assert_eq!(err.stage, StageNumber::SegmentPlanner);
        assert_eq!(err.kind, StageErrorKind::SchemaError);

        let record = orchestrator.status(&orchestrator_job_id(&orchestrator)).expect("job tracked");
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(
            record.completed_stages,
            vec![
                StageNumber::BriefInterpreter,
                StageNumber::WorldArchitect,
                StageNumber::CharacterArchitect,
                StageNumber::StructureDesigner,
            ]
        );
    }

    /// The single job this test orchestrator ever runs — used to fetch its
    /// status without threading the id back out of `produce`'s `Err` arm.
    fn orchestrator_job_id(orchestrator: &Orchestrator) -> JobId {
        let jobs = orchestrator.jobs.lock().unwrap();
        let job_id_str = jobs.keys().next().expect("one job registered").clone();
        parse_job_id(&job_id_str)
    }

    #[tokio::test]
    async fn cancel_before_start_stops_job_immediately() {
        let (orchestrator, _dir) = orchestrator_with(vec![]);
        let job_id = JobId::new();
        // Simulate a job already registered and immediately cancelled, as
        // would happen if `cancel` races `produce`'s first stage.
        let record = JobRecord::new(job_id, sample_brief());
        let handle = Arc::new(JobHandle::new(record));
        orchestrator.jobs.lock().unwrap().insert(job_id.to_string(), handle.clone());
        handle.cancellation.cancel();
        let err = orchestrator
            .run_pipeline(&job_id.to_string(), &handle, &sample_brief(), PipelineContext::new(), 0.0)
            .await
            .unwrap_err();
        assert_eq!(err.kind, StageErrorKind::CancellationRequested);
        assert_eq!(orchestrator.status(&job_id).unwrap().status, JobStatus::Cancelled);
    }
}
