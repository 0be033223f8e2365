//! Typed error hierarchy for the NarraForge orchestration core.
//!
//! One enum per subsystem:
//! - `StageError` — a single stage's failure, wrapping a `StageErrorKind`
//! - `MemoryError` — Triple Memory store failures
//! - `CheckpointError` — Checkpoint Manager failures
//! - `ConfigError` — configuration loading failures
//!
//! Model Router / Model Client failures have their own two-layer split
//! instead of living here: `router::client::ClientCallError` (the three
//! classes a provider call can fail with) and `router::RouterError` (what
//! the router surfaces after exhausting the fallback chain) — both are
//! closer to the code that raises them than a shared subsystem enum would
//! be.

use narraforge_common::StageNumber;
use thiserror::Error;

/// The seven failure kinds a stage can report. Distinguishing
/// these lets the orchestrator decide retry vs. tier-upgrade vs. abort
/// without string-matching error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageErrorKind {
    TransportError,
    SchemaError,
    QualityError,
    ValidationError,
    CostExceeded,
    CancellationRequested,
    PermanentProviderError,
}

impl StageErrorKind {
    /// Whether the orchestrator should retry this stage. CostExceeded, CancellationRequested, and
    /// PermanentProviderError are never retried.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            Self::CostExceeded | Self::CancellationRequested | Self::PermanentProviderError
        )
    }
}

/// A single stage's failure, carrying enough context for the orchestrator's
/// retry/escalation policy.
#[derive(Debug, Error)]
#[error("stage {stage} failed after {attempts} attempt(s): {kind:?}: {last_cause}")]
pub struct StageError {
    pub stage: StageNumber,
    pub kind: StageErrorKind,
    pub attempts: u32,
    pub last_cause: String,
}

impl StageError {
    pub fn new(stage: StageNumber, kind: StageErrorKind, attempts: u32, last_cause: impl Into<String>) -> Self {
        Self { stage, kind, attempts, last_cause: last_cause.into() }
    }
}

/// Errors from the Triple Memory store.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("entity {id} not found in {store} memory")]
    NotFound { store: &'static str, id: String },

    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("link target {target} does not exist")]
    DanglingLink { target: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for MemoryError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

/// Errors from the Checkpoint Manager.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no checkpoint found for job {job_id} at stage {stage}")]
    NotFound { job_id: String, stage: StageNumber },

    #[error("checkpoint for job {job_id} stage {stage} is corrupt: {reason}")]
    Corrupt { job_id: String, stage: StageNumber, reason: String },

    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for CheckpointError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

/// Errors from loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file at {path}: {source}")]
    ParseFailed {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown genre override key '{0}'")]
    UnknownGenreKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
