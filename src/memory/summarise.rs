//! Bounded-text summaries of structural entities for prompt inclusion.
//!
//! Modeled on the `compaction/` module — generalized from
//! "compact a growing session transcript" to "produce a bounded summary of
//! a structural entity."

use super::store::{Character, MemoryStore, World};
use crate::errors::MemoryError;

/// Default bound (in words) for a single entity summary.
pub const DEFAULT_SUMMARY_WORD_LIMIT: usize = 200;

fn truncate_to_words(text: &str, limit: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= limit {
        text.to_string()
    } else {
        format!("{}...", words[..limit].join(" "))
    }
}

impl MemoryStore {
    /// A bounded (<= `limit`-word) prose summary of a world, suitable for
    /// prompt inclusion. Never re-sends the full world-bible text.
    pub fn summarise_world(&self, world_id: &str, limit: usize) -> Result<String, MemoryError> {
        let world = self.get_world(world_id)?.ok_or_else(|| MemoryError::NotFound {
            store: "structural",
            id: world_id.to_string(),
        })?;
        Ok(truncate_to_words(&summarise_world_text(&world), limit))
    }

    /// A bounded summary of a character, for stage 6/8 prompt inclusion.
    pub fn summarise_character(&self, character_id: &str, limit: usize) -> Result<String, MemoryError> {
        let character = self.get_character(character_id)?.ok_or_else(|| MemoryError::NotFound {
            store: "structural",
            id: character_id.to_string(),
        })?;
        Ok(truncate_to_words(&summarise_character_text(&character), limit))
    }

    /// Summaries for every character belonging to a world, in insertion
    /// order — the typical input shape for the Sequential Generator and
    /// Language Stylizer.
    pub fn summarise_world_cast(&self, world_id: &str, limit: usize) -> Result<Vec<String>, MemoryError> {
        self.list_characters(world_id)?
            .into_iter()
            .map(|c| Ok(truncate_to_words(&summarise_character_text(&c), limit)))
            .collect()
    }
}

fn summarise_world_text(world: &World) -> String {
    format!(
        "Core conflict: {}. Existential theme: {}. Rules: {}. Boundaries: {}.",
        world.core_conflict,
        world.existential_theme,
        world.rules_of_reality.join("; "),
        world.boundaries.join("; "),
    )
}

fn summarise_character_text(character: &Character) -> String {
    format!(
        "{}: {}. Contradictions: {}. Cognitive limits: {}. Evolution capacity {:.2}.",
        character.name,
        character.internal_trajectory,
        character.contradictions.join("; "),
        character.cognitive_limits.join("; "),
        character.evolution_capacity,
    )
}
