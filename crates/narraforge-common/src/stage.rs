//! The ten fixed pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the ten fixed steps of the pipeline. Ordered; `StageNumber::ALL`
/// gives the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StageNumber {
    BriefInterpreter = 1,
    WorldArchitect = 2,
    CharacterArchitect = 3,
    StructureDesigner = 4,
    SegmentPlanner = 5,
    SequentialGenerator = 6,
    CoherenceValidator = 7,
    LanguageStylizer = 8,
    EditorialReviewer = 9,
    OutputProcessor = 10,
}

impl StageNumber {
    pub const ALL: [StageNumber; 10] = [
        Self::BriefInterpreter,
        Self::WorldArchitect,
        Self::CharacterArchitect,
        Self::StructureDesigner,
        Self::SegmentPlanner,
        Self::SequentialGenerator,
        Self::CoherenceValidator,
        Self::LanguageStylizer,
        Self::EditorialReviewer,
        Self::OutputProcessor,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(n: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_u8() == n)
    }

    /// The stage that must complete immediately before this one, if any.
    pub fn previous(self) -> Option<Self> {
        Self::from_u8(self.as_u8().saturating_sub(1)).filter(|_| self.as_u8() > 1)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::BriefInterpreter => "brief_interpreter",
            Self::WorldArchitect => "world_architect",
            Self::CharacterArchitect => "character_architect",
            Self::StructureDesigner => "structure_designer",
            Self::SegmentPlanner => "segment_planner",
            Self::SequentialGenerator => "sequential_generator",
            Self::CoherenceValidator => "coherence_validator",
            Self::LanguageStylizer => "language_stylizer",
            Self::EditorialReviewer => "editorial_reviewer",
            Self::OutputProcessor => "output_processor",
        }
    }

    /// True for the two stages pinned to the advanced model tier regardless
    /// of configuration (Sequential Generator, Language Stylizer).
    pub fn requires_advanced_tier(self) -> bool {
        matches!(self, Self::SequentialGenerator | Self::LanguageStylizer)
    }
}

impl fmt::Display for StageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02} {}", self.as_u8(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_in_execution_order() {
        for (i, stage) in StageNumber::ALL.iter().enumerate() {
            assert_eq!(stage.as_u8(), (i + 1) as u8);
        }
    }

    #[test]
    fn previous_is_none_for_stage_one() {
        assert_eq!(StageNumber::BriefInterpreter.previous(), None);
        assert_eq!(StageNumber::WorldArchitect.previous(), Some(StageNumber::BriefInterpreter));
    }

    #[test]
    fn only_six_and_eight_require_advanced_tier() {
        let forced: Vec<_> = StageNumber::ALL
            .into_iter()
            .filter(|s| s.requires_advanced_tier())
            .collect();
        assert_eq!(forced, vec![StageNumber::SequentialGenerator, StageNumber::LanguageStylizer]);
    }

    #[test]
    fn from_u8_round_trips() {
        for stage in StageNumber::ALL {
            assert_eq!(StageNumber::from_u8(stage.as_u8()), Some(stage));
        }
        assert_eq!(StageNumber::from_u8(0), None);
        assert_eq!(StageNumber::from_u8(11), None);
    }
}
