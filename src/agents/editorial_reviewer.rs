//! Stage 9: Editorial Reviewer. Produces the final cut of the stylized
//! prose plus a change log, then sweeps the result for banned phrases and
//! overused connective words — any surviving violation is a validation
//! issue, sending the stage back for another pass rather than shipping
//! prose that still trips text health.

use super::{Agent, AgentError, AgentIssue};
use crate::memory::MemoryStore;
use crate::narraforge_config::PhrasePolicy;
use crate::router::ModelTier;
use crate::util::extract_json_object;
use crate::validators::{check_cliche, check_repetition};
use async_trait::async_trait;
use narraforge_common::payloads::{EditorialChange, EditorialReport, Segment};
use narraforge_common::{ContextKey, ContextValue, PipelineContext, StageNumber};
use std::collections::HashMap;

pub struct EditorialReviewerAgent {
    banned_phrases: HashMap<String, PhrasePolicy>,
    repetition_budgets: HashMap<String, u32>,
}

impl EditorialReviewerAgent {
    pub fn new(banned_phrases: HashMap<String, PhrasePolicy>, repetition_budgets: HashMap<String, u32>) -> Self {
        Self { banned_phrases, repetition_budgets }
    }
}

#[async_trait]
impl Agent for EditorialReviewerAgent {
    fn stage(&self) -> StageNumber {
        StageNumber::EditorialReviewer
    }

    fn required_keys(&self) -> Vec<ContextKey> {
        vec![ContextKey::StylizedSegments]
    }

    fn preferred_model_tier(&self) -> ModelTier {
        ModelTier::Mini
    }

    fn system_prompt(&self) -> String {
        "You are the Editorial Reviewer, the final pass before publication. Tighten prose, cut \
         redundancy, and fix continuity slips in the supplied stylized segments without changing \
         plot events. Return a single JSON object with keys `segments` (array of objects with \
         index and text, the final cut, one per input segment) and `changes` (array of objects \
         with segment_index, description, and rationale, one per edit you made; an empty array \
         if no edits were needed). Output nothing but the JSON object."
            .to_string()
    }

    fn build_user_prompt(&self, context: &PipelineContext, _memory: &MemoryStore) -> Result<String, AgentError> {
        let entry = super::require(context, ContextKey::StylizedSegments)?;
        let ContextValue::StylizedSegments(stylized) = &entry.value else {
            return Err(AgentError::Schema("stylized_segments entry has wrong payload shape".into()));
        };
        let rendered: Vec<String> =
            stylized.segments.iter().map(|s| format!("[{}] {}", s.index, s.text)).collect();
        Ok(format!("Segments:\n{}", rendered.join("\n\n")))
    }

    fn parse(&self, raw_model_output: &str, _context: &PipelineContext) -> Result<ContextValue, AgentError> {
        let json = extract_json_object(raw_model_output)
            .ok_or_else(|| AgentError::Schema("no JSON object found in editorial reviewer output".into()))?;
        #[derive(serde::Deserialize)]
        struct RawFinalSegment {
            index: u32,
            text: String,
        }
        #[derive(serde::Deserialize)]
        struct RawReport {
            segments: Vec<RawFinalSegment>,
            changes: Vec<EditorialChange>,
        }
        let raw: RawReport = serde_json::from_str(&json).map_err(|err| AgentError::Schema(err.to_string()))?;
        let final_segments = raw
            .segments
            .into_iter()
            .map(|s| Segment { index: s.index, text: s.text, quality_self_score: None })
            .collect();
        Ok(ContextValue::EditorialReport(EditorialReport { final_segments, changes: raw.changes }))
    }

    fn validate(&self, value: &ContextValue, _context: &PipelineContext) -> Vec<AgentIssue> {
        let mut issues = Vec::new();
        let ContextValue::EditorialReport(report) = value else {
            issues.push(AgentIssue::new("unexpected payload shape for editorial_report"));
            return issues;
        };
        if report.final_segments.is_empty() {
            issues.push(AgentIssue::new("final cut must contain at least one segment"));
        }
        for segment in &report.final_segments {
            if segment.text.trim().is_empty() {
                issues.push(AgentIssue::new(format!("final segment {} is empty", segment.index)));
                continue;
            }
            for violation in check_cliche(&segment.text, &self.banned_phrases) {
                issues.push(AgentIssue::new(format!(
                    "final segment {} still uses banned phrase \"{}\"",
                    segment.index, violation.phrase
                )));
            }
            for violation in check_repetition(&segment.text, &self.repetition_budgets) {
                issues.push(AgentIssue::new(format!(
                    "final segment {} overuses \"{}\" ({:.1} per 1000 words, budget {})",
                    segment.index, violation.word, violation.rate_per_1000, violation.budget_per_1000
                )));
            }
        }
        issues
    }
}
