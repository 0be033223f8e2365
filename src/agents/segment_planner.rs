//! Stage 5: Segment Planner. Breaks the beat skeleton into concrete prose
//! segments with per-segment word budgets and POV assignments — the unit
//! the Sequential Generator fans out over.

use super::{Agent, AgentError, AgentIssue};
use crate::memory::MemoryStore;
use crate::router::ModelTier;
use crate::util::extract_json_object;
use async_trait::async_trait;
use narraforge_common::payloads::{SegmentDescriptor, SegmentPlan};
use narraforge_common::{ContextKey, ContextValue, PipelineContext, StageNumber};
use std::collections::HashSet;

#[derive(Default)]
pub struct SegmentPlannerAgent;

#[async_trait]
impl Agent for SegmentPlannerAgent {
    fn stage(&self) -> StageNumber {
        StageNumber::SegmentPlanner
    }

    fn required_keys(&self) -> Vec<ContextKey> {
        vec![ContextKey::BriefInterpretation, ContextKey::Structure, ContextKey::Characters]
    }

    fn preferred_model_tier(&self) -> ModelTier {
        ModelTier::Mini
    }

    fn system_prompt(&self) -> String {
        "You are the Segment Planner. Return a single JSON object with key `segments`: an array \
         of objects, each with index (integer, starting at 0, strictly increasing), goal \
         (string), conflict (string), pov_character_id (string, must be one of the supplied \
         character ids), target_word_count (positive integer), and expected_emotional_beat \
         (string). Segment target word counts should sum to approximately the production's total \
         target word count. Output nothing but the JSON object."
            .to_string()
    }

    fn build_user_prompt(&self, context: &PipelineContext, _memory: &MemoryStore) -> Result<String, AgentError> {
        let brief_entry = super::require(context, ContextKey::BriefInterpretation)?;
        let ContextValue::BriefInterpretation(brief) = &brief_entry.value else {
            return Err(AgentError::Schema("brief_interpretation entry has wrong payload shape".into()));
        };
        let structure_entry = super::require(context, ContextKey::Structure)?;
        let ContextValue::Structure(structure) = &structure_entry.value else {
            return Err(AgentError::Schema("structure entry has wrong payload shape".into()));
        };
        let characters_entry = super::require(context, ContextKey::Characters)?;
        let ContextValue::Characters(characters) = &characters_entry.value else {
            return Err(AgentError::Schema("characters entry has wrong payload shape".into()));
        };
        let beats: Vec<String> = structure
            .beats
            .iter()
            .map(|b| format!("chapter {}: {}", b.chapter, b.summary))
            .collect();
        let cast: Vec<String> = characters
            .characters
            .iter()
            .map(|c| format!("{} ({})", c.name, c.character_id))
            .collect();
        Ok(format!(
            "Total target word count: {}\nBeats:\n{}\nCast (name and id): {}",
            brief.target_word_count,
            beats.join("\n"),
            cast.join(", "),
        ))
    }

    fn parse(&self, raw_model_output: &str, _context: &PipelineContext) -> Result<ContextValue, AgentError> {
        let json = extract_json_object(raw_model_output)
            .ok_or_else(|| AgentError::Schema("no JSON object found in segment planner output".into()))?;
        #[derive(serde::Deserialize)]
        struct RawPlan {
            segments: Vec<SegmentDescriptor>,
        }
        let raw: RawPlan = serde_json::from_str(&json).map_err(|err| AgentError::Schema(err.to_string()))?;
        Ok(ContextValue::SegmentPlan(SegmentPlan { segments: raw.segments }))
    }

    fn validate(&self, value: &ContextValue, context: &PipelineContext) -> Vec<AgentIssue> {
        let mut issues = Vec::new();
        let ContextValue::SegmentPlan(plan) = value else {
            issues.push(AgentIssue::new("unexpected payload shape for segment_plan"));
            return issues;
        };
        if plan.segments.is_empty() {
            issues.push(AgentIssue::new("at least one segment is required"));
            return issues;
        }
        let known_characters: Option<HashSet<&str>> = context.get(ContextKey::Characters).and_then(|entry| {
            if let ContextValue::Characters(characters) = &entry.value {
                Some(characters.characters.iter().map(|c| c.character_id.as_str()).collect())
            } else {
                None
            }
        });
        for (i, segment) in plan.segments.iter().enumerate() {
            if segment.index as usize != i {
                issues.push(AgentIssue::new(format!("segment at position {i} has out-of-order index {}", segment.index)));
            }
            if segment.target_word_count == 0 {
                issues.push(AgentIssue::new(format!("segment {} has zero target_word_count", segment.index)));
            }
            if segment.goal.trim().is_empty() || segment.conflict.trim().is_empty() {
                issues.push(AgentIssue::new(format!("segment {} is missing goal or conflict", segment.index)));
            }
            if let Some(known) = &known_characters {
                if !known.contains(segment.pov_character_id.as_str()) {
                    issues.push(AgentIssue::new(format!(
                        "segment {} assigns an unknown pov_character_id {}",
                        segment.index, segment.pov_character_id
                    )));
                }
            }
        }
        if let Some(brief_entry) = context.get(ContextKey::BriefInterpretation) {
            if let ContextValue::BriefInterpretation(brief) = &brief_entry.value {
                let total = plan.total_target_word_count() as f64;
                let target = brief.target_word_count as f64;
                if target > 0.0 && !(0.3..=2.0).contains(&(total / target)) {
                    issues.push(AgentIssue::new(format!(
                        "planned segments sum to {total} words, far from the production target of {target}"
                    )));
                }
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use narraforge_common::payloads::{
        BriefInterpretation, CharacterRecord, Characters, Structure, StructureBeat, WorldScale,
    };
    use narraforge_common::{ContextEntry, TokenUsage};
    use chrono::Utc;

    fn context_fixture() -> PipelineContext {
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
                    target_word_count: 1200,
                    target_chapter_count: 2,
                    tone: "wistful".into(),
                    thematic_focus: vec!["memory".into()],
                    world_scale: WorldScale::Intimate,
                }),
            },
        )
        .unwrap();
        ctx.insert(
            ContextKey::Structure,
            ContextEntry {
                written_at: Utc::now(),
                written_by_stage: StageNumber::StructureDesigner,
                tokens: TokenUsage::new(1, 1),
                word_count: None,
                value: ContextValue::Structure(Structure {
                    beats: vec![StructureBeat { chapter: 1, summary: "setup".into(), link_to_next: None }],
                }),
            },
        )
        .unwrap();
        ctx.insert(
            ContextKey::Characters,
            ContextEntry {
                written_at: Utc::now(),
                written_by_stage: StageNumber::CharacterArchitect,
                tokens: TokenUsage::new(1, 1),
                word_count: None,
                value: ContextValue::Characters(Characters {
                    world_id: "world-1".into(),
                    characters: vec![CharacterRecord {
                        character_id: "c1".into(),
                        name: "Aris".into(),
                        internal_trajectory: "grows".into(),
                        contradictions: vec!["a".into()],
                        cognitive_limits: vec!["b".into()],
                        evolution_capacity: 0.5,
                    }],
                }),
            },
        )
        .unwrap();
        ctx
    }

    #[test]
    fn parses_and_validates_well_formed_plan() {
        let agent = SegmentPlannerAgent;
        let raw = r#"{"segments":[{"index":0,"goal":"g","conflict":"c","pov_character_id":"c1","target_word_count":1200,"expected_emotional_beat":"hope"}]}"#;
        let ctx = context_fixture();
        let value = agent.parse(raw, &ctx).unwrap();
        assert!(agent.validate(&value, &ctx).is_empty());
    }

    #[test]
    fn validate_flags_unknown_pov_character() {
        let agent = SegmentPlannerAgent;
        let raw = r#"{"segments":[{"index":0,"goal":"g","conflict":"c","pov_character_id":"ghost","target_word_count":1200,"expected_emotional_beat":"hope"}]}"#;
        let ctx = context_fixture();
        let value = agent.parse(raw, &ctx).unwrap();
        assert!(!agent.validate(&value, &ctx).is_empty());
    }

    #[test]
    fn validate_flags_grossly_mismatched_word_budget() {
        let agent = SegmentPlannerAgent;
        let raw = r#"{"segments":[{"index":0,"goal":"g","conflict":"c","pov_character_id":"c1","target_word_count":10,"expected_emotional_beat":"hope"}]}"#;
        let ctx = context_fixture();
        let value = agent.parse(raw, &ctx).unwrap();
        assert!(!agent.validate(&value, &ctx).is_empty());
    }
}
