//! Explicit per-stage payload types.
//!
//! Every stage has its own struct, validated at the agent boundary — callers
//! of the Pipeline Context never see an open map.

use serde::{Deserialize, Serialize};

/// World scale inferred by the Brief Interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldScale {
    Intimate,
    Regional,
    Global,
    Cosmic,
}

/// Stage 1 output: normalised production parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefInterpretation {
    pub production_type: String,
    pub genre: String,
    pub target_word_count: u32,
    pub target_chapter_count: u32,
    pub tone: String,
    pub thematic_focus: Vec<String>,
    pub world_scale: WorldScale,
}

/// Stage 2 output: the world-bible record. Persisted to Structural Memory;
/// the id returned here is the memory store's generated identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldBible {
    pub world_id: String,
    pub rules_of_reality: Vec<String>,
    pub boundaries: Vec<String>,
    pub anomalies: Vec<String>,
    pub core_conflict: String,
    pub existential_theme: String,
}

/// One character record (stage 3). `evolution_capacity` must lie in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub character_id: String,
    pub name: String,
    pub internal_trajectory: String,
    pub contradictions: Vec<String>,
    pub cognitive_limits: Vec<String>,
    pub evolution_capacity: f64,
}

impl CharacterRecord {
    pub fn has_required_traits(&self) -> bool {
        !self.contradictions.is_empty()
            && !self.cognitive_limits.is_empty()
            && (0.0..=1.0).contains(&self.evolution_capacity)
    }
}

/// Stage 3 output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Characters {
    pub world_id: String,
    pub characters: Vec<CharacterRecord>,
}

/// One causal link between adjacent structural beats. `and_then` is
/// rejected at validation time — beats must be linked by consequence
/// (`therefore`) or complication (`but`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalLink {
    Therefore,
    But,
}

/// One beat in the act/chapter skeleton (stage 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureBeat {
    pub chapter: u32,
    pub summary: String,
    pub link_to_next: Option<CausalLink>,
}

/// Stage 4 output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Structure {
    pub beats: Vec<StructureBeat>,
}

/// One planned segment (stage 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub index: u32,
    pub goal: String,
    pub conflict: String,
    pub pov_character_id: String,
    pub target_word_count: u32,
    pub expected_emotional_beat: String,
}

/// Stage 5 output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentPlan {
    pub segments: Vec<SegmentDescriptor>,
}

impl SegmentPlan {
    pub fn total_target_word_count(&self) -> u32 {
        self.segments.iter().map(|s| s.target_word_count).sum()
    }
}

/// One generated or stylised prose segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub index: u32,
    pub text: String,
    /// Self-reported quality score in [0, 1], present for freshly generated
    /// segments (stage 6); carried through unchanged by later stages.
    pub quality_self_score: Option<f64>,
}

impl Segment {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Stage 6 output: ordered prose segments, one per plan entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segments {
    pub segments: Vec<Segment>,
}

/// Severity of one coherence issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    Major,
    Minor,
    Warning,
}

impl IssueSeverity {
    pub fn penalty(self) -> f64 {
        match self {
            Self::Critical => 0.15,
            Self::Major => 0.08,
            Self::Minor => 0.03,
            Self::Warning => 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoherenceIssue {
    pub severity: IssueSeverity,
    pub segment_index: Option<u32>,
    pub description: String,
}

/// Stage 7 output: the four sub-scores, the composite, and the issue list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoherenceReport {
    pub logical: f64,
    pub psychological: f64,
    pub temporal: f64,
    pub world_rule: f64,
    pub composite: f64,
    pub issues: Vec<CoherenceIssue>,
}

/// Stage 8 output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StylizedSegments {
    pub segments: Vec<Segment>,
}

/// One change the Editorial Reviewer made, with its rationale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorialChange {
    pub segment_index: u32,
    pub description: String,
    pub rationale: String,
}

/// Stage 9 output: the cut version plus the editorial report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorialReport {
    pub final_segments: Vec<Segment>,
    pub changes: Vec<EditorialChange>,
}

/// Stage 10 output: the final manifest written to the output directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputManifest {
    pub narrative_text: String,
    pub narrative_audiobook_text: String,
    pub metadata_json: serde_json::Value,
    pub expansion_json: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn character_with_no_contradictions_fails_required_traits() {
        let character = CharacterRecord {
            character_id: "c1".into(),
            name: "Aris".into(),
            internal_trajectory: "grows".into(),
            contradictions: Vec::new(),
            cognitive_limits: vec!["overconfidence".into()],
            evolution_capacity: 0.4,
        };
        assert!(!character.has_required_traits());
    }

    #[test]
    fn character_with_out_of_range_evolution_capacity_fails() {
        let character = CharacterRecord {
            character_id: "c1".into(),
            name: "Aris".into(),
            internal_trajectory: "grows".into(),
            contradictions: vec!["wants peace but craves power".into()],
            cognitive_limits: vec!["overconfidence".into()],
            evolution_capacity: 1.5,
        };
        assert!(!character.has_required_traits());
    }

    #[test]
    fn well_formed_character_passes() {
        let character = CharacterRecord {
            character_id: "c1".into(),
            name: "Aris".into(),
            internal_trajectory: "grows".into(),
            contradictions: vec!["wants peace but craves power".into()],
            cognitive_limits: vec!["overconfidence".into()],
            evolution_capacity: 0.6,
        };
        assert!(character.has_required_traits());
    }

    #[test]
    fn segment_plan_sums_target_word_counts() {
        let plan = SegmentPlan {
            segments: vec![
                SegmentDescriptor {
                    index: 0,
                    goal: "g".into(),
                    conflict: "c".into(),
                    pov_character_id: "c1".into(),
                    target_word_count: 500,
                    expected_emotional_beat: "hope".into(),
                },
                SegmentDescriptor {
                    index: 1,
                    goal: "g".into(),
                    conflict: "c".into(),
                    pov_character_id: "c1".into(),
                    target_word_count: 700,
                    expected_emotional_beat: "dread".into(),
                },
            ],
        };
        assert_eq!(plan.total_target_word_count(), 1200);
    }

    #[test]
    fn issue_severity_penalties_match_spec_table() {
        assert_eq!(IssueSeverity::Critical.penalty(), 0.15);
        assert_eq!(IssueSeverity::Major.penalty(), 0.08);
        assert_eq!(IssueSeverity::Minor.penalty(), 0.03);
        assert_eq!(IssueSeverity::Warning.penalty(), 0.01);
    }

    #[test]
    fn segment_word_count_splits_on_whitespace() {
        let segment = Segment { index: 0, text: "one two three".into(), quality_self_score: None };
        assert_eq!(segment.word_count(), 3);
    }
}
