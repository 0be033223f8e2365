//! Checkpoint Manager: persists `(Pipeline Context, counters, last
//! completed stage, timestamp)` after every stage boundary and drives
//! resume.
//!
//! Modeled on `orchestrator/state.rs`
//! (`StateManager::get_last_completed_phase`) for the resume query shape,
//! generalized from a pipe-delimited append log to SQLite rows addressable
//! by `(job_id, stage)`.

use crate::errors::CheckpointError;
use crate::memory::MemoryStore;
use narraforge_common::{ContextError, PipelineContext, StageNumber, TokenUsage};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// What the orchestrator learns when it asks to resume a job: the
/// reconstituted context and the counters as of the last completed stage.
#[derive(Debug, Clone)]
pub struct ResumeState {
    pub context: PipelineContext,
    pub cumulative_cost: f64,
    pub cumulative_tokens: TokenUsage,
    pub last_completed_stage: Option<StageNumber>,
}

pub struct CheckpointManager {
    store: Arc<Mutex<MemoryStore>>,
    retention: Duration,
}

impl CheckpointManager {
    pub fn new(store: Arc<Mutex<MemoryStore>>, retention: Duration) -> Self {
        Self { store, retention }
    }

    /// Persists a stage's memory-entity writes and its checkpoint row in one
    /// SQLite transaction. `build` runs with exclusive access to the memory
    /// store and returns the updated Pipeline Context plus the counters to
    /// checkpoint; everything it writes commits together with the
    /// checkpoint row, or neither does. A no-op on the checkpoint side if
    /// `(job_id, stage)` was already written.
    pub fn save_atomically(
        &self,
        job_id: &str,
        stage: StageNumber,
        build: impl FnOnce(&MemoryStore) -> Result<(PipelineContext, f64, TokenUsage), crate::errors::MemoryError>,
    ) -> Result<PipelineContext, CheckpointError> {
        let store = self.store.lock().unwrap();
        store
            .atomically(|inner| {
                let (context, cumulative_cost, cumulative_tokens) = build(inner)?;
                let context_json = serde_json::to_string(&context).map_err(|err| {
                    crate::errors::MemoryError::Other(anyhow::anyhow!("failed to serialize context: {err}"))
                })?;
                inner.write_checkpoint(
                    job_id,
                    stage.as_u8(),
                    &context_json,
                    cumulative_cost,
                    cumulative_tokens.prompt_tokens,
                    cumulative_tokens.completion_tokens,
                )?;
                Ok(context)
            })
            .map_err(CheckpointError::from)
    }

    /// Load the latest checkpoint for `job_id` and reconstruct the state
    /// the orchestrator resumes from: the first incomplete stage restarts
    /// from scratch.
    pub fn load_latest(&self, job_id: &str) -> Result<ResumeState, CheckpointError> {
        let store = self.store.lock().unwrap();
        match store.latest_checkpoint(job_id)? {
            None => Ok(ResumeState {
                context: PipelineContext::new(),
                cumulative_cost: 0.0,
                cumulative_tokens: TokenUsage::default(),
                last_completed_stage: None,
            }),
            Some(row) => {
                let context: PipelineContext = serde_json::from_str(&row.context_json).map_err(|err| {
                    CheckpointError::Corrupt {
                        job_id: job_id.to_string(),
                        stage: StageNumber::from_u8(row.stage).unwrap_or(StageNumber::BriefInterpreter),
                        reason: err.to_string(),
                    }
                })?;
                Ok(ResumeState {
                    context,
                    cumulative_cost: row.cumulative_cost,
                    cumulative_tokens: TokenUsage::new(row.cumulative_prompt_tokens, row.cumulative_completion_tokens),
                    last_completed_stage: StageNumber::from_u8(row.stage),
                })
            }
        }
    }

    /// Explicit checkpoint lookup for a specific stage (used by tests and
    /// by operator tooling inspecting a failed job).
    pub fn load_stage(&self, job_id: &str, stage: StageNumber) -> Result<Option<PipelineContext>, CheckpointError> {
        let store = self.store.lock().unwrap();
        match store.read_checkpoint(job_id, stage.as_u8())? {
            None => Ok(None),
            Some(row) => {
                let context: PipelineContext = serde_json::from_str(&row.context_json).map_err(|err| {
                    CheckpointError::Corrupt { job_id: job_id.to_string(), stage, reason: err.to_string() }
                })?;
                Ok(Some(context))
            }
        }
    }

    /// On job completion, checkpoints are retained for `retention`
    /// — swept at the next job's start, not deleted
    /// immediately, so a completed job's progress remains inspectable for
    /// a window.
    pub fn sweep_retention(&self) -> Result<Vec<String>, CheckpointError> {
        let store = self.store.lock().unwrap();
        let stale = store.jobs_with_stale_checkpoints(self.retention.as_secs() as i64)?;
        for job_id in &stale {
            store.delete_checkpoints(job_id)?;
        }
        Ok(stale)
    }

    pub fn delete(&self, job_id: &str) -> Result<(), CheckpointError> {
        let store = self.store.lock().unwrap();
        store.delete_checkpoints(job_id)?;
        Ok(())
    }
}

impl From<ContextError> for CheckpointError {
    fn from(err: ContextError) -> Self {
        CheckpointError::Other(anyhow::anyhow!(err.to_string()))
    }
}

impl From<crate::errors::MemoryError> for CheckpointError {
    fn from(err: crate::errors::MemoryError) -> Self {
        match err {
            crate::errors::MemoryError::Database(source) => CheckpointError::Database(source),
            other => CheckpointError::Other(anyhow::anyhow!(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use narraforge_common::{ContextEntry, ContextKey, ContextValue};
    use narraforge_common::payloads::{BriefInterpretation, WorldScale};
    use chrono::Utc;

    fn sample_entry() -> ContextEntry {
        ContextEntry {
            written_at: Utc::now(),
            written_by_stage: StageNumber::BriefInterpreter,
            tokens: TokenUsage::new(10, 5),
            word_count: Some(100),
            value: ContextValue::BriefInterpretation(BriefInterpretation {
                production_type: "short_story".into(),
                genre: "fantasy".into(),
                target_word_count: 6000,
                target_chapter_count: 1,
                tone: "wistful".into(),
                thematic_focus: vec!["memory".into()],
                world_scale: WorldScale::Intimate,
            }),
        }
    }

    fn manager() -> CheckpointManager {
        CheckpointManager::new(Arc::new(Mutex::new(MemoryStore::new_in_memory().unwrap())), Duration::from_secs(3600))
    }

    #[test]
    fn load_latest_on_fresh_job_returns_empty_context() {
        let manager = manager();
        let resume = manager.load_latest("job-1").unwrap();
        assert!(resume.last_completed_stage.is_none());
        assert_eq!(resume.cumulative_cost, 0.0);
    }

    #[test]
    fn save_atomically_then_load_latest_round_trips_context_and_counters() {
        let manager = manager();
        manager
            .save_atomically("job-1", StageNumber::BriefInterpreter, |_store| {
                let mut context = PipelineContext::new();
                context.insert(ContextKey::BriefInterpretation, sample_entry()).unwrap();
                Ok((context, 0.05, TokenUsage::new(10, 5)))
            })
            .unwrap();
        let resume = manager.load_latest("job-1").unwrap();
        assert_eq!(resume.last_completed_stage, Some(StageNumber::BriefInterpreter));
        assert_eq!(resume.cumulative_cost, 0.05);
        assert!(resume.context.contains(ContextKey::BriefInterpretation));
    }

    #[test]
    fn resume_never_rewrites_an_earlier_checkpoint() {
        let manager = manager();
        manager
            .save_atomically("job-1", StageNumber::BriefInterpreter, |_store| {
                let mut context = PipelineContext::new();
                context.insert(ContextKey::BriefInterpretation, sample_entry()).unwrap();
                Ok((context, 0.05, TokenUsage::new(10, 5)))
            })
            .unwrap();
        // A second save attempt at the same stage must not alter the first.
        manager
            .save_atomically("job-1", StageNumber::BriefInterpreter, |_store| {
                Ok((PipelineContext::new(), 99.0, TokenUsage::new(1, 1)))
            })
            .unwrap();
        let resume = manager.load_latest("job-1").unwrap();
        assert_eq!(resume.cumulative_cost, 0.05);
    }

    #[test]
    fn a_failed_build_rolls_back_without_writing_a_checkpoint() {
        let manager = manager();
        let err = manager
            .save_atomically("job-1", StageNumber::BriefInterpreter, |_store| {
                Err::<(PipelineContext, f64, TokenUsage), _>(crate::errors::MemoryError::NotFound {
                    store: "structural",
                    id: "missing-world".into(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Other(_)));
        assert!(manager.load_latest("job-1").unwrap().last_completed_stage.is_none());
    }

    #[test]
    fn delete_removes_all_checkpoints_for_job() {
        let manager = manager();
        manager
            .save_atomically("job-1", StageNumber::BriefInterpreter, |_store| {
                Ok((PipelineContext::new(), 0.01, TokenUsage::new(1, 1)))
            })
            .unwrap();
        manager.delete("job-1").unwrap();
        assert!(manager.load_latest("job-1").unwrap().last_completed_stage.is_none());
    }
}
