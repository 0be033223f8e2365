//! Stage 4: Structure Designer. Produces the act/chapter beat skeleton.
//! Causal links are constrained to `therefore`/`but` by
//! `CausalLink` itself — an `and_then` response fails to deserialize and
//! surfaces as a retryable schema error before `validate` ever runs.

use super::{Agent, AgentError, AgentIssue};
use crate::memory::MemoryStore;
use crate::router::ModelTier;
use crate::util::extract_json_object;
use async_trait::async_trait;
use narraforge_common::payloads::{CausalLink, Structure, StructureBeat};
use narraforge_common::{ContextKey, ContextValue, PipelineContext, StageNumber};

#[derive(Default)]
pub struct StructureDesignerAgent;

#[async_trait]
impl Agent for StructureDesignerAgent {
    fn stage(&self) -> StageNumber {
        StageNumber::StructureDesigner
    }

    fn required_keys(&self) -> Vec<ContextKey> {
        vec![ContextKey::BriefInterpretation, ContextKey::Characters]
    }

    fn preferred_model_tier(&self) -> ModelTier {
        ModelTier::Mini
    }

    fn system_prompt(&self) -> String {
        "You are the Structure Designer. Return a single JSON object with key `beats`: an array \
         of objects, each with chapter (integer, starting at 1), summary (string), and \
         link_to_next (one of \"therefore\", \"but\", or null for the final beat). Every beat \
         but the last must be linked to the one after it by consequence (therefore) or \
         complication (but) — never by mere sequence. Output nothing but the JSON object."
            .to_string()
    }

    fn build_user_prompt(&self, context: &PipelineContext, _memory: &MemoryStore) -> Result<String, AgentError> {
        let brief_entry = super::require(context, ContextKey::BriefInterpretation)?;
        let ContextValue::BriefInterpretation(brief) = &brief_entry.value else {
            return Err(AgentError::Schema("brief_interpretation entry has wrong payload shape".into()));
        };
        let characters_entry = super::require(context, ContextKey::Characters)?;
        let ContextValue::Characters(characters) = &characters_entry.value else {
            return Err(AgentError::Schema("characters entry has wrong payload shape".into()));
        };
        let names: Vec<&str> = characters.characters.iter().map(|c| c.name.as_str()).collect();
        Ok(format!(
            "Target chapter count: {}\nThematic focus: {}\nCast: {}",
            brief.target_chapter_count,
            brief.thematic_focus.join(", "),
            names.join(", "),
        ))
    }

    fn parse(&self, raw_model_output: &str, _context: &PipelineContext) -> Result<ContextValue, AgentError> {
        let json = extract_json_object(raw_model_output)
            .ok_or_else(|| AgentError::Schema("no JSON object found in structure designer output".into()))?;
        #[derive(serde::Deserialize)]
        struct RawBeat {
            chapter: u32,
            summary: String,
            link_to_next: Option<CausalLink>,
        }
        #[derive(serde::Deserialize)]
        struct RawStructure {
            beats: Vec<RawBeat>,
        }
        let raw: RawStructure = serde_json::from_str(&json).map_err(|err| AgentError::Schema(err.to_string()))?;
        let beats = raw
            .beats
            .into_iter()
            .map(|b| StructureBeat { chapter: b.chapter, summary: b.summary, link_to_next: b.link_to_next })
            .collect();
        Ok(ContextValue::Structure(Structure { beats }))
    }

    fn validate(&self, value: &ContextValue, _context: &PipelineContext) -> Vec<AgentIssue> {
        let mut issues = Vec::new();
        if let ContextValue::Structure(structure) = value {
            if structure.beats.is_empty() {
                issues.push(AgentIssue::new("at least one structural beat is required"));
            }
            for (i, beat) in structure.beats.iter().enumerate() {
                if beat.summary.trim().is_empty() {
                    issues.push(AgentIssue::new(format!("beat for chapter {} has an empty summary", beat.chapter)));
                }
                let is_last = i + 1 == structure.beats.len();
                if !is_last && beat.link_to_next.is_none() {
                    issues.push(AgentIssue::new(format!(
                        "beat for chapter {} must be linked to the next beat by consequence or complication",
                        beat.chapter
                    )));
                }
            }
        } else {
            issues.push(AgentIssue::new("unexpected payload shape for structure"));
        }
        issues
    }
}
