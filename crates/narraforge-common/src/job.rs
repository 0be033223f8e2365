//! Job Record: the orchestrator's public snapshot of one production run.

use crate::brief::ProductionBrief;
use crate::stage::StageNumber;
use crate::tokens::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Final status of a job. Same five-state shape used for
/// `PipelineStatus` in its factory board (queued/running/completed/failed/
/// cancelled), carried over because NarraForge's Job Record needs exactly
/// the same lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("invalid job status: {other}")),
        }
    }

    /// A failed job may only be resumed manually unless its failure kind was
    /// CostExceeded or PermanentProviderError — the status alone
    /// doesn't carry that, callers check the stage error kind separately.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot of one production run, returned by `Orchestrator::status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub brief: ProductionBrief,
    pub current_stage: Option<StageNumber>,
    pub completed_stages: Vec<StageNumber>,
    pub failed_stages: Vec<StageNumber>,
    pub cumulative_cost: f64,
    pub cumulative_tokens: TokenUsage,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
}

impl JobRecord {
    pub fn new(id: JobId, brief: ProductionBrief) -> Self {
        Self {
            id,
            brief,
            current_stage: None,
            completed_stages: Vec::new(),
            failed_stages: Vec::new(),
            cumulative_cost: 0.0,
            cumulative_tokens: TokenUsage::default(),
            started_at: Utc::now(),
            completed_at: None,
            status: JobStatus::Queued,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips_through_strings() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let parsed = JobStatus::from_str(status.as_str()).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn job_status_rejects_unknown_strings() {
        assert!(JobStatus::from_str("bogus").is_err());
    }

    #[test]
    fn only_completed_failed_cancelled_are_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn new_job_record_starts_queued_with_no_progress() {
        use crate::brief::{Genre, ProductionBrief, ProductionType};
        let brief = ProductionBrief::new(ProductionType::ShortStory, Genre::Fantasy, "x");
        let record = JobRecord::new(JobId::new(), brief);
        assert_eq!(record.status, JobStatus::Queued);
        assert!(record.completed_stages.is_empty());
        assert_eq!(record.cumulative_cost, 0.0);
    }
}
