//! Shared domain types for the NarraForge production core.
//!
//! Kept in a separate crate so a surrounding transport service (HTTP/WebSocket
//! API, job queue worker, etc.) can depend on the job-execution vocabulary
//! without pulling in the orchestrator, the model router, or the SQLite
//! storage layer.

pub mod brief;
pub mod context;
pub mod events;
pub mod job;
pub mod payloads;
pub mod stage;
pub mod tokens;

pub use brief::{Genre, ProductionBrief, ProductionType};
pub use context::{ContextEntry, ContextError, ContextKey, ContextValue, PipelineContext};
pub use events::OrchestratorEvent;
pub use job::{JobId, JobRecord, JobStatus};
pub use payloads::{
    BriefInterpretation, CausalLink, CharacterRecord, Characters, CoherenceIssue,
    CoherenceReport, EditorialChange, EditorialReport, IssueSeverity, OutputManifest, Segment,
    SegmentDescriptor, SegmentPlan, Segments, Structure, StructureBeat, StylizedSegments,
    WorldBible, WorldScale,
};
pub use stage::StageNumber;
pub use tokens::TokenUsage;
