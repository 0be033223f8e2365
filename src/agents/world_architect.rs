//! Stage 2: World Architect. Produces the world-bible record and persists
//! it to Structural Memory.

use super::{Agent, AgentError, AgentIssue};
use crate::memory::{MemoryStore, NewWorld};
use crate::router::ModelTier;
use crate::util::extract_json_object;
use async_trait::async_trait;
use narraforge_common::payloads::WorldBible;
use narraforge_common::{ContextKey, ContextValue, PipelineContext, StageNumber};

#[derive(Default)]
pub struct WorldArchitectAgent;

#[async_trait]
impl Agent for WorldArchitectAgent {
    fn stage(&self) -> StageNumber {
        StageNumber::WorldArchitect
    }

    fn required_keys(&self) -> Vec<ContextKey> {
        vec![ContextKey::BriefInterpretation]
    }

    fn preferred_model_tier(&self) -> ModelTier {
        ModelTier::Mini
    }

    fn system_prompt(&self) -> String {
        "You are the World Architect. Given normalised production parameters, return a single \
         JSON object with keys: rules_of_reality (array of strings), boundaries (array of \
         strings), anomalies (array of strings), core_conflict (string), existential_theme \
         (string). Output nothing but the JSON object; world_id is assigned by the caller."
            .to_string()
    }

    fn build_user_prompt(&self, context: &PipelineContext, _memory: &MemoryStore) -> Result<String, AgentError> {
        let entry = super::require(context, ContextKey::BriefInterpretation)?;
        let ContextValue::BriefInterpretation(interp) = &entry.value else {
            return Err(AgentError::Schema("brief_interpretation entry has wrong payload shape".into()));
        };
        Ok(format!(
            "Genre: {}\nTone: {}\nThematic focus: {}\nWorld scale: {:?}",
            interp.genre,
            interp.tone,
            interp.thematic_focus.join(", "),
            interp.world_scale,
        ))
    }

    fn parse(&self, raw_model_output: &str, _context: &PipelineContext) -> Result<ContextValue, AgentError> {
        let json = extract_json_object(raw_model_output)
            .ok_or_else(|| AgentError::Schema("no JSON object found in world architect output".into()))?;
        #[derive(serde::Deserialize)]
        struct RawWorld {
            rules_of_reality: Vec<String>,
            boundaries: Vec<String>,
            anomalies: Vec<String>,
            core_conflict: String,
            existential_theme: String,
        }
        let raw: RawWorld = serde_json::from_str(&json).map_err(|err| AgentError::Schema(err.to_string()))?;
        Ok(ContextValue::WorldBible(WorldBible {
            world_id: String::new(),
            rules_of_reality: raw.rules_of_reality,
            boundaries: raw.boundaries,
            anomalies: raw.anomalies,
            core_conflict: raw.core_conflict,
            existential_theme: raw.existential_theme,
        }))
    }

    fn validate(&self, value: &ContextValue, _context: &PipelineContext) -> Vec<AgentIssue> {
        let mut issues = Vec::new();
        if let ContextValue::WorldBible(world) = value {
            if world.rules_of_reality.is_empty() {
                issues.push(AgentIssue::new("rules_of_reality must not be empty"));
            }
            if world.core_conflict.trim().is_empty() {
                issues.push(AgentIssue::new("core_conflict must not be empty"));
            }
            if world.existential_theme.trim().is_empty() {
                issues.push(AgentIssue::new("existential_theme must not be empty"));
            }
        } else {
            issues.push(AgentIssue::new("unexpected payload shape for world_bible"));
        }
        issues
    }

    fn persist_to_memory(&self, value: &mut ContextValue, memory: &MemoryStore, job_id: &str) -> Result<(), AgentError> {
        if let ContextValue::WorldBible(world) = value {
            let id = memory.put_world(
                job_id,
                NewWorld {
                    rules_of_reality: world.rules_of_reality.clone(),
                    boundaries: world.boundaries.clone(),
                    anomalies: world.anomalies.clone(),
                    core_conflict: world.core_conflict.clone(),
                    existential_theme: world.existential_theme.clone(),
                },
            )?;
            world.world_id = id;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use narraforge_common::payloads::{BriefInterpretation, WorldScale};
    use narraforge_common::{ContextEntry, TokenUsage};
    use chrono::Utc;

    fn context_with_brief() -> PipelineContext {
        let mut ctx = PipelineContext::new();
        ctx.insert(
            ContextKey::BriefInterpretation,
            ContextEntry {
                written_at: Utc::now(),
                written_by_stage: StageNumber::BriefInterpreter,
                tokens: TokenUsage::new(1, 1),
                word_count: None,
                value: ContextValue::BriefInterpretation(BriefInterpretation {
                    production_type: "short_story".into(),
                    genre: "fantasy".into(),
                    target_word_count: 6000,
                    target_chapter_count: 1,
                    tone: "wistful".into(),
                    thematic_focus: vec!["memory".into()],
                    world_scale: WorldScale::Intimate,
                }),
            },
        )
        .unwrap();
        ctx
    }

    #[test]
    fn build_user_prompt_requires_brief_interpretation() {
        let agent = WorldArchitectAgent;
        let err = agent.build_user_prompt(&PipelineContext::new(), &MemoryStore::new_in_memory().unwrap()).unwrap_err();
        assert!(matches!(err, AgentError::MissingContext(ContextKey::BriefInterpretation)));
    }

    #[test]
    fn parses_and_persists_world() {
        let agent = WorldArchitectAgent;
        let raw = r#"{"rules_of_reality":["magic requires sacrifice"],"boundaries":["the Veil"],"anomalies":[],"core_conflict":"order vs chaos","existential_theme":"the cost of knowledge"}"#;
        let ctx = context_with_brief();
        let value = agent.parse(raw, &ctx).unwrap();
        assert!(agent.validate(&value, &ctx).is_empty());
        let memory = MemoryStore::new_in_memory().unwrap();
        let mut value = value;
        agent.persist_to_memory(&mut value, &memory, "job-1").unwrap();
        assert_eq!(memory.list_worlds("job-1").unwrap().len(), 1);
        if let ContextValue::WorldBible(world) = &value {
            assert!(!world.world_id.is_empty());
        }
    }

    #[test]
    fn validate_flags_empty_core_conflict() {
        let agent = WorldArchitectAgent;
        let world = WorldBible {
            world_id: String::new(),
            rules_of_reality: vec!["a".into()],
            boundaries: vec![],
            anomalies: vec![],
            core_conflict: "".into(),
            existential_theme: "theme".into(),
        };
        let issues = agent.validate(&ContextValue::WorldBible(world), &PipelineContext::new());
        assert!(!issues.is_empty());
    }
}
