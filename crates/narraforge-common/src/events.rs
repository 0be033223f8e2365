//! Orchestrator event stream. One job broadcasts a sequence of these over a
//! `tokio::sync::broadcast` channel; late subscribers replay the persisted
//! tail from the checkpoint log before joining the live stream.

use crate::job::JobId;
use crate::stage::StageNumber;
use crate::tokens::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One state transition of a job, emitted by the orchestrator as it drives
/// a production run through its ten stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrchestratorEvent {
    JobStarted {
        job_id: JobId,
        at: DateTime<Utc>,
    },
    StageStarted {
        job_id: JobId,
        stage: StageNumber,
        attempt: u32,
        at: DateTime<Utc>,
    },
    /// Emitted by stages that can report incremental progress (notably the
    /// Sequential Generator, segment by segment). `percent` is in `[0.0,
    /// 100.0]`.
    StageProgress {
        job_id: JobId,
        stage: StageNumber,
        percent: f32,
        message: String,
        at: DateTime<Utc>,
    },
    StageComplete {
        job_id: JobId,
        stage: StageNumber,
        tokens: TokenUsage,
        cost: f64,
        at: DateTime<Utc>,
    },
    StageFailed {
        job_id: JobId,
        stage: StageNumber,
        attempt: u32,
        reason: String,
        at: DateTime<Utc>,
    },
    JobComplete {
        job_id: JobId,
        at: DateTime<Utc>,
    },
    JobFailed {
        job_id: JobId,
        stage: StageNumber,
        reason: String,
        at: DateTime<Utc>,
    },
    JobCancelled {
        job_id: JobId,
        at: DateTime<Utc>,
    },
}

impl OrchestratorEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::JobStarted { job_id, .. }
            | Self::StageStarted { job_id, .. }
            | Self::StageProgress { job_id, .. }
            | Self::StageComplete { job_id, .. }
            | Self::StageFailed { job_id, .. }
            | Self::JobComplete { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobCancelled { job_id, .. } => *job_id,
        }
    }

    /// True for the three events that end a job's lifecycle — no further
    /// events follow on this job's channel after one of these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::JobComplete { .. } | Self::JobFailed { .. } | Self::JobCancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_is_extracted_from_every_variant() {
        let id = JobId::new();
        let events = vec![
            OrchestratorEvent::JobStarted { job_id: id, at: Utc::now() },
            OrchestratorEvent::StageStarted {
                job_id: id,
                stage: StageNumber::BriefInterpreter,
                attempt: 1,
                at: Utc::now(),
            },
            OrchestratorEvent::JobComplete { job_id: id, at: Utc::now() },
        ];
        for event in events {
            assert_eq!(event.job_id(), id);
        }
    }

    #[test]
    fn only_completion_variants_are_terminal() {
        let id = JobId::new();
        assert!(!OrchestratorEvent::JobStarted { job_id: id, at: Utc::now() }.is_terminal());
        assert!(OrchestratorEvent::JobComplete { job_id: id, at: Utc::now() }.is_terminal());
        assert!(OrchestratorEvent::JobCancelled { job_id: id, at: Utc::now() }.is_terminal());
        assert!(
            OrchestratorEvent::JobFailed {
                job_id: id,
                stage: StageNumber::OutputProcessor,
                reason: "boom".into(),
                at: Utc::now(),
            }
            .is_terminal()
        );
    }
}
