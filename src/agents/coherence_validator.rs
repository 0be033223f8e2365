//! Stage 7: Coherence Validator. Scores the generated segments across four
//! dimensions and folds in issue penalties via the additive-penalty rule.
//! A composite below the configured threshold is surfaced as a validation
//! issue, which drives the orchestrator's standard retry-with-tier-escalation
//! path without any stage-specific logic at the orchestrator.

use super::{Agent, AgentError, AgentIssue};
use crate::memory::MemoryStore;
use crate::router::ModelTier;
use crate::util::extract_json_object;
use crate::validators::{build_coherence_report, passes_threshold};
use async_trait::async_trait;
use narraforge_common::payloads::CoherenceIssue;
use narraforge_common::{ContextKey, ContextValue, PipelineContext, StageNumber};

pub struct CoherenceValidatorAgent {
    min_coherence_score: f64,
}

impl CoherenceValidatorAgent {
    pub fn new(min_coherence_score: f64) -> Self {
        Self { min_coherence_score }
    }
}

#[async_trait]
impl Agent for CoherenceValidatorAgent {
    fn stage(&self) -> StageNumber {
        StageNumber::CoherenceValidator
    }

    fn required_keys(&self) -> Vec<ContextKey> {
        vec![ContextKey::Segments, ContextKey::Structure, ContextKey::Characters, ContextKey::WorldBible]
    }

    fn preferred_model_tier(&self) -> ModelTier {
        ModelTier::Mini
    }

    fn system_prompt(&self) -> String {
        "You are the Coherence Validator. Score the supplied prose on four dimensions in [0,1]: \
         logical (do events follow from cause to effect), psychological (do characters behave \
         consistently with their established contradictions and cognitive limits), temporal (is \
         the sequence of events internally consistent), and world_rule (does the prose respect \
         the world's established rules and boundaries). Return a single JSON object with keys \
         logical, psychological, temporal, world_rule (each a number in [0,1]), and issues (an \
         array of objects, each with severity one of \"critical\", \"major\", \"minor\", \
         \"warning\", segment_index (integer or null), and description). Output nothing but the \
         JSON object."
            .to_string()
    }

    fn build_user_prompt(&self, context: &PipelineContext, _memory: &MemoryStore) -> Result<String, AgentError> {
        let world_entry = super::require(context, ContextKey::WorldBible)?;
        let ContextValue::WorldBible(world) = &world_entry.value else {
            return Err(AgentError::Schema("world_bible entry has wrong payload shape".into()));
        };
        let structure_entry = super::require(context, ContextKey::Structure)?;
        let ContextValue::Structure(structure) = &structure_entry.value else {
            return Err(AgentError::Schema("structure entry has wrong payload shape".into()));
        };
        let segments_entry = super::require(context, ContextKey::Segments)?;
        let ContextValue::Segments(segments) = &segments_entry.value else {
            return Err(AgentError::Schema("segments entry has wrong payload shape".into()));
        };
        let beats: Vec<String> = structure.beats.iter().map(|b| format!("ch.{}: {}", b.chapter, b.summary)).collect();
        let prose: Vec<String> = segments.segments.iter().map(|s| format!("[{}] {}", s.index, s.text)).collect();
        Ok(format!(
            "Rules of reality: {}\nBoundaries: {}\nBeats:\n{}\nProse:\n{}",
            world.rules_of_reality.join("; "),
            world.boundaries.join("; "),
            beats.join("\n"),
            prose.join("\n\n"),
        ))
    }

    fn parse(&self, raw_model_output: &str, _context: &PipelineContext) -> Result<ContextValue, AgentError> {
        let json = extract_json_object(raw_model_output)
            .ok_or_else(|| AgentError::Schema("no JSON object found in coherence validator output".into()))?;
        #[derive(serde::Deserialize)]
        struct RawScores {
            logical: f64,
            psychological: f64,
            temporal: f64,
            world_rule: f64,
            issues: Vec<CoherenceIssue>,
        }
        let raw: RawScores = serde_json::from_str(&json).map_err(|err| AgentError::Schema(err.to_string()))?;
        let report = build_coherence_report(raw.logical, raw.psychological, raw.temporal, raw.world_rule, raw.issues);
        Ok(ContextValue::CoherenceReport(report))
    }

    fn validate(&self, value: &ContextValue, _context: &PipelineContext) -> Vec<AgentIssue> {
        let mut issues = Vec::new();
        let ContextValue::CoherenceReport(report) = value else {
            issues.push(AgentIssue::new("unexpected payload shape for coherence_report"));
            return issues;
        };
        for (name, score) in [
            ("logical", report.logical),
            ("psychological", report.psychological),
            ("temporal", report.temporal),
            ("world_rule", report.world_rule),
        ] {
            if !(0.0..=1.0).contains(&score) {
                issues.push(AgentIssue::new(format!("{name} sub-score {score} is out of [0,1]")));
            }
        }
        if !passes_threshold(report, self.min_coherence_score) {
            issues.push(AgentIssue::new(format!(
                "composite coherence score {:.3} is below the required threshold {:.3}",
                report.composite, self.min_coherence_score
            )));
        }
        issues
    }
}
