//! Stage 6: Sequential Generator. Turns the segment plan into prose, one
//! model call per planned segment, fanned out over a bounded concurrent
//! worker pool and reassembled
//! in plan order. Pinned to the Advanced tier.
//!
//! Modeled on `swarm::executor::SwarmExecutor`'s concurrent
//! task-racing pattern, generalized from "one subprocess's stdout +
//! callback + timeout race" to "N concurrent segment-generation model
//! calls, collected into an ordered slice by segment index."

use super::{Agent, AgentError, AgentIssue, PreparedPrompt, ProgressReporter};
use crate::memory::MemoryStore;
use crate::narraforge_config::PhrasePolicy;
use crate::router::{ModelRouter, ModelTier};
use crate::util::extract_json_object;
use crate::validators::{check_cliche, check_repetition, check_truncation};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use narraforge_common::payloads::{Segment, SegmentDescriptor, Segments};
use narraforge_common::{ContextKey, ContextValue, PipelineContext, StageNumber, TokenUsage};
use std::collections::HashMap;

/// One planned segment with its world/character summaries already resolved
/// against Triple Memory, so the concurrent fan-out in `generate` never
/// needs to touch the memory store itself.
#[derive(Debug, Clone)]
pub struct SegmentPrompt {
    pub descriptor: SegmentDescriptor,
    pub user_prompt: String,
}

/// Upper bound on concurrently in-flight segment-generation calls. A real
/// deployment would derive this from the router's configured
/// requests-per-minute; a fixed bound keeps this module free of a direct
/// rate-limiter dependency while still bounding how many segments generate
/// concurrently.
const MAX_CONCURRENT_SEGMENTS: usize = 4;

pub struct SequentialGeneratorAgent {
    banned_phrases: HashMap<String, PhrasePolicy>,
    repetition_budgets: HashMap<String, u32>,
}

impl SequentialGeneratorAgent {
    pub fn new(banned_phrases: HashMap<String, PhrasePolicy>, repetition_budgets: HashMap<String, u32>) -> Self {
        Self { banned_phrases, repetition_budgets }
    }

    fn segment_system_prompt(&self) -> String {
        "You are the Sequential Generator. Given one planned segment's goal, conflict, point-of- \
         view character, target word count, and expected emotional beat, write the segment's \
         prose. Return a single JSON object with keys text (string, the prose) and \
         quality_self_score (number in [0,1], your own estimate of how well the prose serves the \
         segment's goal). Output nothing but the JSON object."
            .to_string()
    }

    fn segment_user_prompt(
        &self,
        descriptor: &SegmentDescriptor,
        world_summary: &str,
        character_summary: &str,
    ) -> String {
        format!(
            "World: {world_summary}\nPOV character: {character_summary}\nGoal: {}\nConflict: {}\nExpected emotional beat: {}\nTarget word count: {}",
            descriptor.goal, descriptor.conflict, descriptor.expected_emotional_beat, descriptor.target_word_count,
        )
    }

    fn parse_segment(&self, raw_model_output: &str, index: u32) -> Result<Segment, AgentError> {
        let json = extract_json_object(raw_model_output)
            .ok_or_else(|| AgentError::Schema(format!("no JSON object found in generated segment {index}")))?;
        #[derive(serde::Deserialize)]
        struct RawSegment {
            text: String,
            quality_self_score: f64,
        }
        let raw: RawSegment = serde_json::from_str(&json).map_err(|err| AgentError::Schema(err.to_string()))?;
        Ok(Segment { index, text: raw.text, quality_self_score: Some(raw.quality_self_score) })
    }

    /// Live enforcement for a freshly generated segment: a
    /// truncation, cliché, or repetition violation fails the whole attempt
    /// so the orchestrator retries the stage rather than shipping a half
    /// generated or cliché-laden segment.
    fn check_segment_health(&self, segment: &Segment, target_word_count: u32) -> Result<(), AgentError> {
        let truncation = check_truncation(&segment.text, target_word_count as usize);
        if !truncation.is_empty() {
            return Err(AgentError::Schema(format!(
                "segment {} appears truncated: {}",
                segment.index,
                truncation[0].detail
            )));
        }
        let cliches = check_cliche(&segment.text, &self.banned_phrases);
        if !cliches.is_empty() {
            return Err(AgentError::Schema(format!(
                "segment {} uses banned phrase \"{}\"",
                segment.index, cliches[0].phrase
            )));
        }
        let repetitions = check_repetition(&segment.text, &self.repetition_budgets);
        if !repetitions.is_empty() {
            return Err(AgentError::Schema(format!(
                "segment {} overuses \"{}\" ({:.1} per 1000 words, budget {})",
                segment.index, repetitions[0].word, repetitions[0].rate_per_1000, repetitions[0].budget_per_1000
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Agent for SequentialGeneratorAgent {
    fn stage(&self) -> StageNumber {
        StageNumber::SequentialGenerator
    }

    fn required_keys(&self) -> Vec<ContextKey> {
        vec![ContextKey::SegmentPlan, ContextKey::WorldBible, ContextKey::Characters]
    }

    fn preferred_model_tier(&self) -> ModelTier {
        ModelTier::Advanced
    }

    fn max_tokens(&self) -> u32 {
        8192
    }

    /// Describes the batched single-call contract every other agent uses;
    /// `generate` overrides the runtime path with per-segment calls, but
    /// this remains the agent's documented and independently testable
    /// fallback shape.
    fn system_prompt(&self) -> String {
        "You are the Sequential Generator. Return a single JSON object with key `segments`: an \
         array of objects, each with index, text, and quality_self_score, one per planned \
         segment in order. Output nothing but the JSON object."
            .to_string()
    }

    fn build_user_prompt(&self, context: &PipelineContext, _memory: &MemoryStore) -> Result<String, AgentError> {
        let plan_entry = super::require(context, ContextKey::SegmentPlan)?;
        let ContextValue::SegmentPlan(plan) = &plan_entry.value else {
            return Err(AgentError::Schema("segment_plan entry has wrong payload shape".into()));
        };
        let descriptions: Vec<String> = plan
            .segments
            .iter()
            .map(|s| format!("{}: {} ({} words)", s.index, s.goal, s.target_word_count))
            .collect();
        Ok(format!("Planned segments:\n{}", descriptions.join("\n")))
    }

    fn parse(&self, raw_model_output: &str, _context: &PipelineContext) -> Result<ContextValue, AgentError> {
        let json = extract_json_object(raw_model_output)
            .ok_or_else(|| AgentError::Schema("no JSON object found in sequential generator output".into()))?;
        #[derive(serde::Deserialize)]
        struct RawSegments {
            segments: Vec<Segment>,
        }
        let raw: RawSegments = serde_json::from_str(&json).map_err(|err| AgentError::Schema(err.to_string()))?;
        Ok(ContextValue::Segments(Segments { segments: raw.segments }))
    }

    fn validate(&self, value: &ContextValue, context: &PipelineContext) -> Vec<AgentIssue> {
        let mut issues = Vec::new();
        let ContextValue::Segments(segments) = value else {
            issues.push(AgentIssue::new("unexpected payload shape for segments"));
            return issues;
        };
        if segments.segments.is_empty() {
            issues.push(AgentIssue::new("at least one generated segment is required"));
        }
        let plan_lengths: Option<HashMap<u32, u32>> = context.get(ContextKey::SegmentPlan).and_then(|entry| {
            if let ContextValue::SegmentPlan(plan) = &entry.value {
                Some(plan.segments.iter().map(|s| (s.index, s.target_word_count)).collect())
            } else {
                None
            }
        });
        for segment in &segments.segments {
            if segment.text.trim().is_empty() {
                issues.push(AgentIssue::new(format!("segment {} has empty text", segment.index)));
            }
            if let Some(lengths) = &plan_lengths {
                if let Some(&target) = lengths.get(&segment.index) {
                    if check_truncation(&segment.text, target as usize).iter().count() > 0 {
                        issues.push(AgentIssue::new(format!("segment {} looks truncated relative to its plan", segment.index)));
                    }
                }
            }
        }
        issues
    }

    /// Resolves the world summary once and every distinct POV character's
    /// summary once, then composes one fully-formed prompt per segment.
    /// Everything Triple Memory has to offer this stage is read here,
    /// synchronously, before `generate` ever awaits a model call.
    fn prepare(&self, context: &PipelineContext, memory: &MemoryStore) -> Result<PreparedPrompt, AgentError> {
        let plan_entry = super::require(context, ContextKey::SegmentPlan)?;
        let ContextValue::SegmentPlan(plan) = &plan_entry.value else {
            return Err(AgentError::Schema("segment_plan entry has wrong payload shape".into()));
        };
        let world_entry = super::require(context, ContextKey::WorldBible)?;
        let ContextValue::WorldBible(world) = &world_entry.value else {
            return Err(AgentError::Schema("world_bible entry has wrong payload shape".into()));
        };
        let world_summary = memory.summarise_world(&world.world_id, crate::memory::DEFAULT_SUMMARY_WORD_LIMIT)?;

        let mut character_summaries: HashMap<String, String> = HashMap::new();
        for descriptor in &plan.segments {
            if character_summaries.contains_key(&descriptor.pov_character_id) {
                continue;
            }
            let summary = memory
                .summarise_character(&descriptor.pov_character_id, crate::memory::DEFAULT_SUMMARY_WORD_LIMIT)
                .unwrap_or_else(|_| descriptor.pov_character_id.clone());
            character_summaries.insert(descriptor.pov_character_id.clone(), summary);
        }

        let segments = plan
            .segments
            .iter()
            .cloned()
            .map(|descriptor| {
                let character_summary = &character_summaries[&descriptor.pov_character_id];
                let user_prompt = self.segment_user_prompt(&descriptor, &world_summary, character_summary);
                SegmentPrompt { descriptor, user_prompt }
            })
            .collect();
        Ok(PreparedPrompt::Segments(segments))
    }

    async fn generate(
        &self,
        _context: &PipelineContext,
        prepared: &PreparedPrompt,
        router: &ModelRouter,
        tier: ModelTier,
        progress: &dyn ProgressReporter,
    ) -> Result<(ContextValue, TokenUsage), AgentError> {
        let PreparedPrompt::Segments(segment_prompts) = prepared else {
            return Err(AgentError::Schema("expected per-segment prompts for the sequential generator".into()));
        };
        let system_prompt = self.segment_system_prompt();
        let max_tokens = self.max_tokens();
        let temperature = self.temperature();
        let total = segment_prompts.len();

        let mut stream = stream::iter(segment_prompts.iter().cloned().map(|segment_prompt| {
            let system_prompt = system_prompt.clone();
            async move {
                let (response, record) = router
                    .complete(tier, &system_prompt, &segment_prompt.user_prompt, max_tokens, temperature)
                    .await?;
                let segment = self.parse_segment(&response.text, segment_prompt.descriptor.index)?;
                self.check_segment_health(&segment, segment_prompt.descriptor.target_word_count)?;
                Ok::<(Segment, TokenUsage), AgentError>((
                    segment,
                    TokenUsage::new(record.prompt_tokens, record.completion_tokens),
                ))
            }
        }))
        .buffer_unordered(MAX_CONCURRENT_SEGMENTS);

        let mut segments = Vec::with_capacity(total);
        let mut total_tokens = TokenUsage::default();
        let mut completed = 0usize;
        while let Some(result) = stream.next().await {
            let (segment, tokens) = result?;
            completed += 1;
            progress.report(
                (completed as f32 / total as f32) * 100.0,
                &format!("generated segment {completed}/{total}"),
            );
            total_tokens += tokens;
            segments.push(segment);
        }
        segments.sort_by_key(|s| s.index);
        Ok((ContextValue::Segments(Segments { segments }), total_tokens))
    }
}
