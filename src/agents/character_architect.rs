//! Stage 3: Character Architect. Produces characters-as-processes records
//! and persists them to Structural Memory.

use super::{Agent, AgentError, AgentIssue};
use crate::memory::{MemoryStore, NewCharacter};
use crate::router::ModelTier;
use crate::util::extract_json_object;
use async_trait::async_trait;
use narraforge_common::payloads::{CharacterRecord, Characters};
use narraforge_common::{ContextKey, ContextValue, PipelineContext, StageNumber};

#[derive(Default)]
pub struct CharacterArchitectAgent;

#[async_trait]
impl Agent for CharacterArchitectAgent {
    fn stage(&self) -> StageNumber {
        StageNumber::CharacterArchitect
    }

    fn required_keys(&self) -> Vec<ContextKey> {
        vec![ContextKey::BriefInterpretation, ContextKey::WorldBible]
    }

    fn preferred_model_tier(&self) -> ModelTier {
        ModelTier::Mini
    }

    fn system_prompt(&self) -> String {
        "You are the Character Architect. Return a single JSON object with key `characters`: an \
         array of objects, each with name, internal_trajectory, contradictions (array of \
         strings, at least one), cognitive_limits (array of strings, at least one), and \
         evolution_capacity (number in [0,1]). Output nothing but the JSON object; character \
         ids are assigned by the caller."
            .to_string()
    }

    fn build_user_prompt(&self, context: &PipelineContext, _memory: &MemoryStore) -> Result<String, AgentError> {
        let world_entry = super::require(context, ContextKey::WorldBible)?;
        let ContextValue::WorldBible(world) = &world_entry.value else {
            return Err(AgentError::Schema("world_bible entry has wrong payload shape".into()));
        };
        Ok(format!(
            "Core conflict: {}\nExistential theme: {}\nBoundaries: {}",
            world.core_conflict,
            world.existential_theme,
            world.boundaries.join(", "),
        ))
    }

    fn parse(&self, raw_model_output: &str, context: &PipelineContext) -> Result<ContextValue, AgentError> {
        let json = extract_json_object(raw_model_output)
            .ok_or_else(|| AgentError::Schema("no JSON object found in character architect output".into()))?;
        #[derive(serde::Deserialize)]
        struct RawCharacter {
            name: String,
            internal_trajectory: String,
            contradictions: Vec<String>,
            cognitive_limits: Vec<String>,
            evolution_capacity: f64,
        }
        #[derive(serde::Deserialize)]
        struct RawCharacters {
            characters: Vec<RawCharacter>,
        }
        let raw: RawCharacters = serde_json::from_str(&json).map_err(|err| AgentError::Schema(err.to_string()))?;
        let world_entry = super::require(context, ContextKey::WorldBible)?;
        let ContextValue::WorldBible(world) = &world_entry.value else {
            return Err(AgentError::Schema("world_bible entry has wrong payload shape".into()));
        };
        let characters = raw
            .characters
            .into_iter()
            .map(|c| CharacterRecord {
                character_id: String::new(),
                name: c.name,
                internal_trajectory: c.internal_trajectory,
                contradictions: c.contradictions,
                cognitive_limits: c.cognitive_limits,
                evolution_capacity: c.evolution_capacity,
            })
            .collect();
        Ok(ContextValue::Characters(Characters { world_id: world.world_id.clone(), characters }))
    }

    fn validate(&self, value: &ContextValue, _context: &PipelineContext) -> Vec<AgentIssue> {
        let mut issues = Vec::new();
        if let ContextValue::Characters(characters) = value {
            if characters.characters.is_empty() {
                issues.push(AgentIssue::new("at least one character is required"));
            }
            for character in &characters.characters {
                if !character.has_required_traits() {
                    issues.push(AgentIssue::new(format!(
                        "character '{}' is missing a contradiction/cognitive limit or has evolution_capacity out of [0,1]",
                        character.name
                    )));
                }
            }
        } else {
            issues.push(AgentIssue::new("unexpected payload shape for characters"));
        }
        issues
    }

    fn persist_to_memory(&self, value: &mut ContextValue, memory: &MemoryStore, _job_id: &str) -> Result<(), AgentError> {
        if let ContextValue::Characters(characters) = value {
            for character in &mut characters.characters {
                let id = memory.put_character(NewCharacter {
                    world_id: characters.world_id.clone(),
                    name: character.name.clone(),
                    internal_trajectory: character.internal_trajectory.clone(),
                    contradictions: character.contradictions.clone(),
                    cognitive_limits: character.cognitive_limits.clone(),
                    evolution_capacity: character.evolution_capacity,
                })?;
                character.character_id = id;
            }
        }
        Ok(())
    }
}
