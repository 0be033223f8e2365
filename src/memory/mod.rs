//! Triple Memory: structural, semantic, and evolutionary stores over one
//! SQLite backend, plus bounded-summary helpers for prompt inclusion.

pub mod store;
pub mod summarise;

pub use store::{
    Character, CheckpointRow, Event, MemoryStore, NewCharacter, NewEvent, NewTimelineEntry,
    NewWorld, Relationship, TimelineEntry, World, WorldExport,
};
pub use summarise::DEFAULT_SUMMARY_WORD_LIMIT;
