//! Agent Framework: the base contract every pipeline stage
//! implements, plus the ten concrete stage agents.
//!
//! Modeled on `phase.rs` (`Phase` trait: one implementation
//! per named step, uniform input/output contract) generalized from "a
//! development phase driven by a subprocess" to "a narrative-production
//! stage driven by a model completion."

pub mod brief_interpreter;
pub mod character_architect;
pub mod coherence_validator;
pub mod editorial_reviewer;
pub mod language_stylizer;
pub mod output_processor;
pub mod segment_planner;
pub mod sequential_generator;
pub mod structure_designer;
pub mod world_architect;

use crate::memory::MemoryStore;
use crate::router::{ModelRouter, ModelTier, RouterError};
use async_trait::async_trait;
use narraforge_common::{ContextKey, ContextValue, PipelineContext, StageNumber, TokenUsage};
use thiserror::Error;

pub use brief_interpreter::BriefInterpreterAgent;
pub use character_architect::CharacterArchitectAgent;
pub use coherence_validator::CoherenceValidatorAgent;
pub use editorial_reviewer::EditorialReviewerAgent;
pub use language_stylizer::LanguageStylizerAgent;
pub use output_processor::OutputProcessorAgent;
pub use segment_planner::SegmentPlannerAgent;
pub use sequential_generator::SequentialGeneratorAgent;
pub use structure_designer::StructureDesignerAgent;
pub use world_architect::WorldArchitectAgent;

/// One semantic-validation finding. A non-empty
/// list is a `ValidationError` at the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIssue {
    pub description: String,
}

impl AgentIssue {
    pub fn new(description: impl Into<String>) -> Self {
        Self { description: description.into() }
    }
}

/// What an agent needs Triple Memory for, assembled synchronously up front
/// so no stage holds a memory-store borrow across a model call. The default
/// shape is a single composed prompt; the Sequential Generator's override
/// produces one prompt per planned segment, each already carrying its
/// resolved world/character summaries.
pub enum PreparedPrompt {
    Single(String),
    Segments(Vec<sequential_generator::SegmentPrompt>),
}

/// Lets a stage report incremental progress while it runs, independent of
/// the coarse stage-start/stage-complete events every stage emits. Only the
/// Sequential Generator currently reports through this — one tick per
/// completed segment.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, percent: f32, message: &str);
}

/// Failures an agent's `build_user_prompt`/`parse` steps can raise. These
/// map directly onto `StageErrorKind::SchemaError` /
/// `StageErrorKind::ValidationError` at the orchestrator boundary.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("required context key {0:?} missing")]
    MissingContext(ContextKey),
    #[error("could not parse model output as structured payload: {0}")]
    Schema(String),
    #[error("memory store error: {0}")]
    Memory(#[from] crate::errors::MemoryError),
    #[error("model router error: {0}")]
    Router(#[from] RouterError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Every pipeline stage implements this contract. The
/// orchestrator never downcasts to a concrete stage type — it drives the
/// pipeline entirely through this trait plus `StageNumber::ALL`.
#[async_trait]
pub trait Agent: Send + Sync {
    fn stage(&self) -> StageNumber;

    /// Keys that must already exist in context before this agent runs.
    fn required_keys(&self) -> Vec<ContextKey>;

    /// Default tier; the router may still be asked for a higher tier on
    /// retry. Stages 6 and 8 are pinned to `Advanced` at
    /// registration time regardless of what they return here.
    fn preferred_model_tier(&self) -> ModelTier;

    /// Stage-specific static system instructions, including the mandatory
    /// output schema description.
    fn system_prompt(&self) -> String;

    /// Compose the per-call user input from context summaries and Triple
    /// Memory. Never includes full prior prose — only bounded summaries.
    fn build_user_prompt(&self, context: &PipelineContext, memory: &MemoryStore) -> Result<String, AgentError>;

    /// Strict parse of the model's raw text into this stage's payload.
    /// Failure here is a retryable `SchemaError`.
    fn parse(&self, raw_model_output: &str, context: &PipelineContext) -> Result<ContextValue, AgentError>;

    /// Semantic validation of the parsed payload against context/memory.
    /// A non-empty result is a retryable `ValidationError`.
    fn validate(&self, value: &ContextValue, context: &PipelineContext) -> Vec<AgentIssue>;

    /// A conservative `max_tokens` budget for this stage's model call.
    fn max_tokens(&self) -> u32 {
        4096
    }

    fn temperature(&self) -> f32 {
        0.7
    }

    /// False only for the Output Processor (stage 10), which performs a
    /// deterministic transformation with no model call.
    fn calls_model(&self) -> bool {
        true
    }

    /// Used instead of the system/user-prompt/parse path when
    /// `calls_model()` is false.
    fn run_deterministic(&self, _context: &PipelineContext, _memory: &MemoryStore) -> Result<ContextValue, AgentError> {
        unreachable!("run_deterministic called on a model-calling agent")
    }

    /// Reads everything this stage needs from Triple Memory, synchronously,
    /// before any model call starts. The orchestrator holds the memory lock
    /// only for this call, never across `generate`'s `.await` points. The
    /// default wraps `build_user_prompt`; the Sequential Generator overrides
    /// it to resolve one prompt per planned segment up front.
    fn prepare(&self, context: &PipelineContext, memory: &MemoryStore) -> Result<PreparedPrompt, AgentError> {
        Ok(PreparedPrompt::Single(self.build_user_prompt(context, memory)?))
    }

    /// Produce one attempt's payload for a `calls_model` stage by driving
    /// the router against the already-`prepare`d prompt, returning the
    /// parsed value plus the tokens spent. The default drives a single
    /// completion; the Sequential Generator overrides this to fan out one
    /// concurrent call per planned segment, collected back into a single
    /// ordered payload so the orchestrator still sees one call per attempt.
    async fn generate(
        &self,
        context: &PipelineContext,
        prepared: &PreparedPrompt,
        router: &ModelRouter,
        tier: ModelTier,
        _progress: &dyn ProgressReporter,
    ) -> Result<(ContextValue, TokenUsage), AgentError> {
        let PreparedPrompt::Single(user_prompt) = prepared else {
            return Err(AgentError::Schema("expected a single composed prompt for this stage".into()));
        };
        let (response, record) = router
            .complete(tier, &self.system_prompt(), user_prompt, self.max_tokens(), self.temperature())
            .await?;
        let value = self.parse(&response.text, context)?;
        let tokens = TokenUsage::new(record.prompt_tokens, record.completion_tokens);
        Ok((value, tokens))
    }

    /// Persist this stage's structural/semantic memory writes, if any
    ///, mutating `value` in place so generated identifiers
    /// (e.g. a world's memory-store id) land in the Pipeline Context entry
    /// that gets checkpointed. Called after a successful `validate`,
    /// before the checkpoint is written. Most stages have nothing to
    /// persist beyond the Pipeline Context entry itself.
    fn persist_to_memory(&self, _value: &mut ContextValue, _memory: &MemoryStore, _job_id: &str) -> Result<(), AgentError> {
        Ok(())
    }
}

fn require<'a>(context: &'a PipelineContext, key: ContextKey) -> Result<&'a narraforge_common::ContextEntry, AgentError> {
    context.get(key).ok_or(AgentError::MissingContext(key))
}

pub(crate) use require;
