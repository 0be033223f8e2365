//! Stage 1: Brief Interpreter. Normalises the Production Brief into the
//! parameters every later stage reads.

use super::{Agent, AgentError, AgentIssue};
use crate::memory::MemoryStore;
use crate::router::ModelTier;
use crate::util::extract_json_object;
use async_trait::async_trait;
use narraforge_common::payloads::{BriefInterpretation, WorldScale};
use narraforge_common::{ContextKey, ContextValue, PipelineContext, ProductionBrief, StageNumber};

pub struct BriefInterpreterAgent {
    pub brief: ProductionBrief,
}

impl BriefInterpreterAgent {
    pub fn new(brief: ProductionBrief) -> Self {
        Self { brief }
    }
}

#[async_trait]
impl Agent for BriefInterpreterAgent {
    fn stage(&self) -> StageNumber {
        StageNumber::BriefInterpreter
    }

    fn required_keys(&self) -> Vec<ContextKey> {
        Vec::new()
    }

    fn preferred_model_tier(&self) -> ModelTier {
        ModelTier::Mini
    }

    fn system_prompt(&self) -> String {
        "You are the Brief Interpreter for a narrative production pipeline. Given a production \
         brief, return a single JSON object with keys: production_type, genre, \
         target_word_count (integer), target_chapter_count (integer), tone, thematic_focus \
         (array of strings), world_scale (one of intimate, regional, global, cosmic). Output \
         must be deterministic for identical briefs modulo model non-determinism, and nothing \
         but the JSON object."
            .to_string()
    }

    fn build_user_prompt(&self, _context: &PipelineContext, _memory: &MemoryStore) -> Result<String, AgentError> {
        Ok(format!(
            "Production type: {:?}\nGenre: {:?}\nInspiration: {}\nTarget word count: {:?}\nStyle hints: {}",
            self.brief.production_type,
            self.brief.genre,
            self.brief.inspiration,
            self.brief.target_word_count,
            self.brief.style_hints.join(", "),
        ))
    }

    fn parse(&self, raw_model_output: &str, _context: &PipelineContext) -> Result<ContextValue, AgentError> {
        let json = extract_json_object(raw_model_output)
            .ok_or_else(|| AgentError::Schema("no JSON object found in brief interpretation output".into()))?;
        let payload: BriefInterpretation =
            serde_json::from_str(&json).map_err(|err| AgentError::Schema(err.to_string()))?;
        Ok(ContextValue::BriefInterpretation(payload))
    }

    fn validate(&self, value: &ContextValue, _context: &PipelineContext) -> Vec<AgentIssue> {
        let mut issues = Vec::new();
        if let ContextValue::BriefInterpretation(payload) = value {
            if payload.target_word_count == 0 {
                issues.push(AgentIssue::new("target_word_count must be positive"));
            }
            if payload.target_chapter_count == 0 {
                issues.push(AgentIssue::new("target_chapter_count must be positive"));
            }
            if payload.thematic_focus.is_empty() {
                issues.push(AgentIssue::new("thematic_focus must not be empty"));
            }
        } else {
            issues.push(AgentIssue::new("unexpected payload shape for brief_interpretation"));
        }
        issues
    }
}

/// Reasonable default when the model has not yet run (used by tests and by
/// the Brief Interpreter's own fallback when `world_scale` cannot be
/// inferred from the brief's explicit style hints).
pub fn default_world_scale() -> WorldScale {
    WorldScale::Regional
}

#[cfg(test)]
mod tests {
    use super::*;
    use narraforge_common::{Genre, ProductionType};

    fn agent() -> BriefInterpreterAgent {
        BriefInterpreterAgent::new(ProductionBrief::new(ProductionType::ShortStory, Genre::Fantasy, "a young alchemist"))
    }

    #[test]
    fn parses_well_formed_json_response() {
        let raw = r#"{"production_type":"short_story","genre":"fantasy","target_word_count":6000,"target_chapter_count":1,"tone":"wistful","thematic_focus":["memory"],"world_scale":"intimate"}"#;
        let value = agent().parse(raw, &PipelineContext::new()).unwrap();
        match value {
            ContextValue::BriefInterpretation(payload) => assert_eq!(payload.target_word_count, 6000),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_output_with_no_json() {
        let err = agent().parse("sorry, I cannot help with that", &PipelineContext::new()).unwrap_err();
        assert!(matches!(err, AgentError::Schema(_)));
    }

    #[test]
    fn validate_flags_zero_word_count() {
        let payload = BriefInterpretation {
            production_type: "short_story".into(),
            genre: "fantasy".into(),
            target_word_count: 0,
            target_chapter_count: 1,
            tone: "wistful".into(),
            thematic_focus: vec!["memory".into()],
            world_scale: WorldScale::Intimate,
        };
        let issues = agent().validate(&ContextValue::BriefInterpretation(payload), &PipelineContext::new());
        assert!(!issues.is_empty());
    }

    #[test]
    fn requires_no_prior_context_keys() {
        assert!(agent().required_keys().is_empty());
    }
}
