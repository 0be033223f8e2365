//! Stage 8: Language Stylizer. Applies the production's prose style to the
//! generated segments while retaining at least 95% of each segment's word
//! count. Pinned to the Advanced tier.

use super::{Agent, AgentError, AgentIssue};
use crate::memory::MemoryStore;
use crate::router::ModelTier;
use crate::util::extract_json_object;
use crate::validators::check_truncation;
use async_trait::async_trait;
use narraforge_common::payloads::{Segment, StylizedSegments};
use narraforge_common::{ContextKey, ContextValue, PipelineContext, StageNumber};
use std::collections::HashMap;

#[derive(Default)]
pub struct LanguageStylizerAgent;

#[async_trait]
impl Agent for LanguageStylizerAgent {
    fn stage(&self) -> StageNumber {
        StageNumber::LanguageStylizer
    }

    fn required_keys(&self) -> Vec<ContextKey> {
        vec![ContextKey::Segments, ContextKey::BriefInterpretation, ContextKey::WorldBible]
    }

    fn preferred_model_tier(&self) -> ModelTier {
        ModelTier::Advanced
    }

    fn max_tokens(&self) -> u32 {
        // At least 3x the input token budget.
        12288
    }

    fn system_prompt(&self) -> String {
        "You are the Language Stylizer. Given the production's tone and a set of already- \
         generated prose segments, rewrite each segment's language to match the production's \
         tone and thematic focus without changing plot events, without cutting content, and \
         retaining at least 95% of each segment's original word count. Return a single JSON \
         object with key `segments`: an array of objects, each with index and text, one per \
         input segment, in the same order. Output nothing but the JSON object."
            .to_string()
    }

    fn build_user_prompt(&self, context: &PipelineContext, _memory: &MemoryStore) -> Result<String, AgentError> {
        let brief_entry = super::require(context, ContextKey::BriefInterpretation)?;
        let ContextValue::BriefInterpretation(brief) = &brief_entry.value else {
            return Err(AgentError::Schema("brief_interpretation entry has wrong payload shape".into()));
        };
        let segments_entry = super::require(context, ContextKey::Segments)?;
        let ContextValue::Segments(segments) = &segments_entry.value else {
            return Err(AgentError::Schema("segments entry has wrong payload shape".into()));
        };
        let rendered: Vec<String> =
            segments.segments.iter().map(|s| format!("[{}] {}", s.index, s.text)).collect();
        Ok(format!(
            "Tone: {}\nThematic focus: {}\nSegments:\n{}",
            brief.tone,
            brief.thematic_focus.join(", "),
            rendered.join("\n\n"),
        ))
    }

    fn parse(&self, raw_model_output: &str, _context: &PipelineContext) -> Result<ContextValue, AgentError> {
        let json = extract_json_object(raw_model_output)
            .ok_or_else(|| AgentError::Schema("no JSON object found in language stylizer output".into()))?;
        #[derive(serde::Deserialize)]
        struct RawStylizedSegment {
            index: u32,
            text: String,
        }
        #[derive(serde::Deserialize)]
        struct RawStylized {
            segments: Vec<RawStylizedSegment>,
        }
        let raw: RawStylized = serde_json::from_str(&json).map_err(|err| AgentError::Schema(err.to_string()))?;
        let segments = raw
            .segments
            .into_iter()
            .map(|s| Segment { index: s.index, text: s.text, quality_self_score: None })
            .collect();
        Ok(ContextValue::StylizedSegments(StylizedSegments { segments }))
    }

    fn validate(&self, value: &ContextValue, context: &PipelineContext) -> Vec<AgentIssue> {
        let mut issues = Vec::new();
        let ContextValue::StylizedSegments(stylized) = value else {
            issues.push(AgentIssue::new("unexpected payload shape for stylized_segments"));
            return issues;
        };
        if stylized.segments.is_empty() {
            issues.push(AgentIssue::new("at least one stylized segment is required"));
        }
        let original_lengths: HashMap<u32, usize> = match context.get(ContextKey::Segments) {
            Some(entry) => match &entry.value {
                ContextValue::Segments(segments) => {
                    segments.segments.iter().map(|s| (s.index, s.word_count())).collect()
                }
                _ => HashMap::new(),
            },
            None => HashMap::new(),
        };
        if stylized.segments.len() != original_lengths.len() {
            issues.push(AgentIssue::new(format!(
                "stylized output has {} segments, expected {}",
                stylized.segments.len(),
                original_lengths.len()
            )));
        }
        for segment in &stylized.segments {
            let Some(&original_word_count) = original_lengths.get(&segment.index) else {
                issues.push(AgentIssue::new(format!("stylized segment {} has no matching original segment", segment.index)));
                continue;
            };
            for finding in check_truncation(&segment.text, original_word_count) {
                issues.push(AgentIssue::new(format!("segment {}: {}", segment.index, finding.detail)));
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use narraforge_common::payloads::{BriefInterpretation, Segments, WorldBible, WorldScale};
    use narraforge_common::{ContextEntry, TokenUsage};
    use chrono::Utc;

    fn context_fixture(original_text: &str) -> PipelineContext {
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
                    target_word_count: 100,
                    target_chapter_count: 1,
                    tone: "wistful".into(),
                    thematic_focus: vec!["memory".into()],
                    world_scale: WorldScale::Intimate,
                }),
            },
        )
        .unwrap();
        ctx.insert(
            ContextKey::WorldBible,
            ContextEntry {
                written_at: Utc::now(),
                written_by_stage: StageNumber::WorldArchitect,
                tokens: TokenUsage::new(1, 1),
                word_count: None,
                value: ContextValue::WorldBible(WorldBible {
                    world_id: "world-1".into(),
                    rules_of_reality: vec!["r".into()],
                    boundaries: vec![],
                    anomalies: vec![],
                    core_conflict: "c".into(),
                    existential_theme: "t".into(),
                }),
            },
        )
        .unwrap();
        ctx.insert(
            ContextKey::Segments,
            ContextEntry {
                written_at: Utc::now(),
                written_by_stage: StageNumber::SequentialGenerator,
                tokens: TokenUsage::new(1, 1),
                word_count: None,
                value: ContextValue::Segments(Segments {
                    segments: vec![Segment { index: 0, text: original_text.to_string(), quality_self_score: Some(0.8) }],
                }),
            },
        )
        .unwrap();
        ctx
    }

    #[test]
    fn parses_stylized_segments() {
        let raw = r#"{"segments":[{"index":0,"text":"She walked gently onward."}]}"#;
        let value = LanguageStylizerAgent.parse(raw, &PipelineContext::new()).unwrap();
        match value {
            ContextValue::StylizedSegments(segments) => assert_eq!(segments.segments.len(), 1),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn validate_passes_when_word_count_retained() {
        let original = "word ".repeat(100) + "end.";
        let ctx = context_fixture(&original);
        let stylized_text = "word ".repeat(98) + "end.";
        let value = ContextValue::StylizedSegments(StylizedSegments {
            segments: vec![Segment { index: 0, text: stylized_text, quality_self_score: None }],
        });
        assert!(LanguageStylizerAgent.validate(&value, &ctx).is_empty());
    }

    #[test]
    fn validate_flags_segment_cut_below_ninety_five_percent() {
        let original = "word ".repeat(100) + "end.";
        let ctx = context_fixture(&original);
        let stylized_text = "word ".repeat(50) + "end.";
        let value = ContextValue::StylizedSegments(StylizedSegments {
            segments: vec![Segment { index: 0, text: stylized_text, quality_self_score: None }],
        });
        assert!(!LanguageStylizerAgent.validate(&value, &ctx).is_empty());
    }

    #[test]
    fn preferred_tier_is_advanced() {
        assert!(matches!(LanguageStylizerAgent.preferred_model_tier(), ModelTier::Advanced));
    }
}
