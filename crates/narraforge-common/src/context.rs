//! Pipeline Context: the append-only record of every stage's output for one
//! job. Keys are added, never removed or overwritten, within a successful
//! job.

use crate::payloads::{
    BriefInterpretation, Characters, CoherenceReport, EditorialReport, OutputManifest, Segments,
    SegmentPlan, Structure, StylizedSegments, WorldBible,
};
use crate::stage::StageNumber;
use crate::tokens::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the ten well-known context keys, each owned by exactly one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextKey {
    BriefInterpretation,
    WorldBible,
    Characters,
    Structure,
    SegmentPlan,
    Segments,
    CoherenceReport,
    StylizedSegments,
    EditorialReport,
    OutputManifest,
}

impl ContextKey {
    /// The stage that owns (writes) this key.
    pub fn owning_stage(self) -> StageNumber {
        match self {
            Self::BriefInterpretation => StageNumber::BriefInterpreter,
            Self::WorldBible => StageNumber::WorldArchitect,
            Self::Characters => StageNumber::CharacterArchitect,
            Self::Structure => StageNumber::StructureDesigner,
            Self::SegmentPlan => StageNumber::SegmentPlanner,
            Self::Segments => StageNumber::SequentialGenerator,
            Self::CoherenceReport => StageNumber::CoherenceValidator,
            Self::StylizedSegments => StageNumber::LanguageStylizer,
            Self::EditorialReport => StageNumber::EditorialReviewer,
            Self::OutputManifest => StageNumber::OutputProcessor,
        }
    }

    pub fn for_stage(stage: StageNumber) -> Self {
        match stage {
            StageNumber::BriefInterpreter => Self::BriefInterpretation,
            StageNumber::WorldArchitect => Self::WorldBible,
            StageNumber::CharacterArchitect => Self::Characters,
            StageNumber::StructureDesigner => Self::Structure,
            StageNumber::SegmentPlanner => Self::SegmentPlan,
            StageNumber::SequentialGenerator => Self::Segments,
            StageNumber::CoherenceValidator => Self::CoherenceReport,
            StageNumber::LanguageStylizer => Self::StylizedSegments,
            StageNumber::EditorialReviewer => Self::EditorialReport,
            StageNumber::OutputProcessor => Self::OutputManifest,
        }
    }
}

/// The typed payload stored under a context key, plus provenance — every
/// write is timestamped, sized, and attributed to the stage that produced
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub written_at: DateTime<Utc>,
    pub written_by_stage: StageNumber,
    pub tokens: TokenUsage,
    pub word_count: Option<u32>,
    pub value: ContextValue,
}

/// The closed set of payload shapes a context entry can hold. An explicit
/// enum, not an open map — callers always know the exact shape a key
/// resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContextValue {
    BriefInterpretation(BriefInterpretation),
    WorldBible(WorldBible),
    Characters(Characters),
    Structure(Structure),
    SegmentPlan(SegmentPlan),
    Segments(Segments),
    CoherenceReport(CoherenceReport),
    StylizedSegments(StylizedSegments),
    EditorialReport(EditorialReport),
    OutputManifest(OutputManifest),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("context key {0:?} was already written and cannot be overwritten")]
    AlreadyWritten(ContextKey),
    #[error("context key {0:?} has not been written yet")]
    Missing(ContextKey),
}

/// A mapping from well-known keys to stage outputs, grown append-only by
/// the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineContext {
    entries: std::collections::BTreeMap<u8, ContextEntry>,
}

fn key_slot(key: ContextKey) -> u8 {
    key.owning_stage().as_u8()
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value for `key`. Fails if the key was already written —
    /// Pipeline Context is monotonic.
    pub fn insert(&mut self, key: ContextKey, entry: ContextEntry) -> Result<(), ContextError> {
        let slot = key_slot(key);
        if self.entries.contains_key(&slot) {
            return Err(ContextError::AlreadyWritten(key));
        }
        self.entries.insert(slot, entry);
        Ok(())
    }

    pub fn get(&self, key: ContextKey) -> Option<&ContextEntry> {
        self.entries.get(&key_slot(key))
    }

    pub fn require(&self, key: ContextKey) -> Result<&ContextEntry, ContextError> {
        self.get(key).ok_or(ContextError::Missing(key))
    }

    pub fn contains(&self, key: ContextKey) -> bool {
        self.entries.contains_key(&key_slot(key))
    }

    /// The stages whose well-known key has already been written.
    pub fn completed_stages(&self) -> Vec<StageNumber> {
        StageNumber::ALL
            .into_iter()
            .filter(|s| self.contains(ContextKey::for_stage(*s)))
            .collect()
    }

    pub fn total_tokens(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for entry in self.entries.values() {
            total += entry.tokens;
        }
        total
    }
}
