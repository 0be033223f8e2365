//! Stage 10: Output Processor. The only stage that makes no model call —
//! a deterministic transform from the editorial report into the final
//! manifest: cleaned narrative text, an audiobook-oriented rendering with
//! markdown stripped, and the metadata and expansion JSON blobs the
//! output directory is populated with.

use super::{Agent, AgentError, AgentIssue};
use crate::memory::MemoryStore;
use crate::router::ModelTier;
use crate::validators::clean_encoding;
use async_trait::async_trait;
use chrono::Utc;
use narraforge_common::payloads::OutputManifest;
use narraforge_common::{ContextKey, ContextValue, PipelineContext, StageNumber};
use sha2::{Digest, Sha256};

#[derive(Default)]
pub struct OutputProcessorAgent;

fn strip_markdown_emphasis(text: &str) -> String {
    text.chars().filter(|c| *c != '*' && *c != '_').collect()
}

/// A hex-encoded SHA256 of the final cleaned narrative, truncated to 16
/// characters. Recorded in `metadata.json` as a content-addressed audit
/// marker: two runs producing byte-identical narrative text (e.g. a
/// `resume` that re-derives the same manifest) carry the same hash without
/// either caller having to diff the full text.
fn narrative_content_hash(narrative_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(narrative_text.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

#[async_trait]
impl Agent for OutputProcessorAgent {
    fn stage(&self) -> StageNumber {
        StageNumber::OutputProcessor
    }

    fn required_keys(&self) -> Vec<ContextKey> {
        vec![ContextKey::EditorialReport]
    }

    fn preferred_model_tier(&self) -> ModelTier {
        ModelTier::Mini
    }

    fn calls_model(&self) -> bool {
        false
    }

    fn system_prompt(&self) -> String {
        unreachable!("the output processor never calls a model")
    }

    fn build_user_prompt(&self, _context: &PipelineContext, _memory: &MemoryStore) -> Result<String, AgentError> {
        unreachable!("the output processor never calls a model")
    }

    fn parse(&self, _raw_model_output: &str, _context: &PipelineContext) -> Result<ContextValue, AgentError> {
        unreachable!("the output processor never calls a model")
    }

    fn run_deterministic(&self, context: &PipelineContext, memory: &MemoryStore) -> Result<ContextValue, AgentError> {
        let report_entry = super::require(context, ContextKey::EditorialReport)?;
        let ContextValue::EditorialReport(report) = &report_entry.value else {
            return Err(AgentError::Schema("editorial_report entry has wrong payload shape".into()));
        };
        let mut segments = report.final_segments.clone();
        segments.sort_by_key(|s| s.index);

        let raw_narrative = segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join("\n\n");
        let narrative_text = clean_encoding(&raw_narrative);
        let narrative_audiobook_text = strip_markdown_emphasis(&narrative_text);

        let word_count: usize = segments.iter().map(|s| s.word_count()).sum();
        let metadata_json = serde_json::json!({
            "word_count": word_count,
            "segment_count": segments.len(),
            "change_count": report.changes.len(),
            "generated_at": Utc::now().to_rfc3339(),
            "content_hash": narrative_content_hash(&narrative_text),
        });

        let chapters = context.get(ContextKey::Structure).and_then(|entry| {
            if let ContextValue::Structure(structure) = &entry.value {
                Some(
                    structure
                        .beats
                        .iter()
                        .map(|b| serde_json::json!({ "chapter": b.chapter, "summary": b.summary }))
                        .collect::<Vec<_>>(),
                )
            } else {
                None
            }
        });
        let characters = context.get(ContextKey::Characters).and_then(|entry| {
            if let ContextValue::Characters(characters) = &entry.value {
                Some(
                    characters
                        .characters
                        .iter()
                        .map(|c| serde_json::json!({ "name": c.name, "evolution_capacity": c.evolution_capacity }))
                        .collect::<Vec<_>>(),
                )
            } else {
                None
            }
        });
        // The world export is the seed-a-continuation payload: the full
        // structural/semantic/evolutionary graph, re-importable into a
        // fresh memory store with every id intact (see
        // `MemoryStore::import_world`). Absent if stage 2 never ran under
        // this manifest's context (shouldn't happen once all ten stages
        // complete, but `run_deterministic` is also exercised directly in
        // tests against a partial context).
        let world_export = context.get(ContextKey::WorldBible).and_then(|entry| {
            if let ContextValue::WorldBible(world) = &entry.value {
                memory.export_world(&world.world_id).ok()
            } else {
                None
            }
        });
        let expansion_json = serde_json::json!({
            "chapters": chapters.unwrap_or_default(),
            "characters": characters.unwrap_or_default(),
            "editorial_changes": report.changes,
            "world_export": world_export,
        });

        Ok(ContextValue::OutputManifest(OutputManifest {
            narrative_text,
            narrative_audiobook_text,
            metadata_json,
            expansion_json,
        }))
    }

    fn validate(&self, value: &ContextValue, _context: &PipelineContext) -> Vec<AgentIssue> {
        let mut issues = Vec::new();
        if let ContextValue::OutputManifest(manifest) = value {
            if manifest.narrative_text.trim().is_empty() {
                issues.push(AgentIssue::new("narrative_text must not be empty"));
            }
            if !manifest.metadata_json.is_object() {
                issues.push(AgentIssue::new("metadata_json must be a JSON object"));
            }
        } else {
            issues.push(AgentIssue::new("unexpected payload shape for output_manifest"));
        }
        issues
    }
}
