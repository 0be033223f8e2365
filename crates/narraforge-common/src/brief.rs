//! The Production Brief: the immutable input to a NarraForge job.

use serde::{Deserialize, Serialize};

/// The scale of narrative the caller wants produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionType {
    ShortStory,
    Novella,
    Novel,
    EpicSaga,
}

impl ProductionType {
    /// A reasonable default target word count when the brief omits one.
    pub fn default_target_word_count(&self) -> u32 {
        match self {
            Self::ShortStory => 6_000,
            Self::Novella => 30_000,
            Self::Novel => 90_000,
            Self::EpicSaga => 200_000,
        }
    }
}

/// Genre, enumerated with an escape hatch for anything not anticipated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Genre {
    Fantasy,
    SciFi,
    Mystery,
    Romance,
    Horror,
    Literary,
    Historical,
    Thriller,
    Other(String),
}

impl Genre {
    /// The key used to look up a genre-specific coherence threshold override
    /// (see `[genre_overrides]` in configuration).
    pub fn config_key(&self) -> String {
        match self {
            Self::Fantasy => "fantasy".to_string(),
            Self::SciFi => "sci_fi".to_string(),
            Self::Mystery => "mystery".to_string(),
            Self::Romance => "romance".to_string(),
            Self::Horror => "horror".to_string(),
            Self::Literary => "literary".to_string(),
            Self::Historical => "historical".to_string(),
            Self::Thriller => "thriller".to_string(),
            Self::Other(name) => name.to_lowercase(),
        }
    }
}

/// The single input document describing what to write. Immutable for the
/// lifetime of the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionBrief {
    pub production_type: ProductionType,
    pub genre: Genre,
    /// Free text, arbitrary language. Carried through verbatim — NarraForge
    /// does not choose or translate the content language.
    pub inspiration: String,
    pub target_word_count: Option<u32>,
    #[serde(default)]
    pub style_hints: Vec<String>,
}

impl ProductionBrief {
    pub fn new(production_type: ProductionType, genre: Genre, inspiration: impl Into<String>) -> Self {
        Self {
            production_type,
            genre,
            inspiration: inspiration.into(),
            target_word_count: None,
            style_hints: Vec::new(),
        }
    }

    /// The effective target word count: the brief's explicit value, or the
    /// production type's default.
    pub fn effective_target_word_count(&self) -> u32 {
        self.target_word_count
            .unwrap_or_else(|| self.production_type.default_target_word_count())
    }
}
