//! Unified configuration system for NarraForge.
//!
//! Reads from `.narraforge/narraforge.toml` (project-specific settings) with
//! environment variable and CLI-argument overrides layered on top. The shape
//! mirrors the original forge.toml design: a top-level TOML file split into
//! named sections, then wrapped in a resolved `NarraforgeConfig` that bakes
//! in CLI/env precedence so callers never re-derive it.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "my-production-house"
//!
//! [defaults]
//! coherence_threshold = 0.85
//! max_retries_per_stage = 3
//! cost_budget_usd = 25.0
//!
//! [genre_overrides.fantasy]
//! coherence_threshold = 0.80
//!
//! [genre_overrides.literary]
//! coherence_threshold = 0.90
//!
//! [provider]
//! api_base = "https://api.example-model-provider.com/v1"
//! mini_model = "mini-latest"
//! advanced_model = "advanced-latest"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Project-level metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: Option<String>,
}

/// Default settings applied to every job unless a genre override or CLI
/// argument replaces them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_coherence_threshold")]
    pub coherence_threshold: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries_per_stage: u32,
    #[serde(default = "default_cost_budget")]
    pub cost_budget_usd: f64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// How long a completed job's checkpoints are retained before the
    /// next-job-creation sweep clears them.
    #[serde(default = "default_checkpoint_retention_hours")]
    pub checkpoint_retention_hours: u64,
    #[serde(default = "default_output_directory")]
    pub output_directory: String,
    /// Ordered provider identifiers the router falls back through on
    /// unavailability.
    #[serde(default = "default_provider_fallback_order")]
    pub provider_fallback_order: Vec<String>,
}

fn default_coherence_threshold() -> f64 {
    0.85
}

fn default_max_retries() -> u32 {
    3
}

fn default_cost_budget() -> f64 {
    25.0
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    60_000
}

fn default_checkpoint_retention_hours() -> u64 {
    24 * 7
}

fn default_output_directory() -> String {
    "output".to_string()
}

fn default_provider_fallback_order() -> Vec<String> {
    vec!["primary".to_string()]
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            coherence_threshold: default_coherence_threshold(),
            max_retries_per_stage: default_max_retries(),
            cost_budget_usd: default_cost_budget(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            checkpoint_retention_hours: default_checkpoint_retention_hours(),
            output_directory: default_output_directory(),
            provider_fallback_order: default_provider_fallback_order(),
        }
    }
}

/// A single phrase's cliché-detection policy:
/// `never_use` (default) flags every occurrence; an explicit `at_most_k_per_n_words`
/// override allows bounded repetition for that one phrase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhrasePolicy {
    NeverUse,
    AtMostKPerNWords { k: u32, n: u32 },
}

impl Default for PhrasePolicy {
    fn default() -> Self {
        Self::NeverUse
    }
}

/// `[text_health]` — banned-phrase and repetition-budget configuration (spec
/// §4.6, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextHealthConfig {
    #[serde(default)]
    pub banned_phrases: HashMap<String, PhrasePolicy>,
    /// Connective/comparison word → max occurrences per 1000 words.
    #[serde(default)]
    pub repetition_budgets: HashMap<String, u32>,
}

/// Per-model rate ceiling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimit {
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_tpm")]
    pub tokens_per_minute: u32,
}

fn default_rpm() -> u32 {
    60
}

fn default_tpm() -> u32 {
    100_000
}

impl Default for RateLimit {
    fn default() -> Self {
        Self { requests_per_minute: default_rpm(), tokens_per_minute: default_tpm() }
    }
}

/// `[rate_limits]` — per-model token/request ceilings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    #[serde(default)]
    pub per_model: HashMap<String, RateLimit>,
}

impl RateLimitsConfig {
    pub fn for_model(&self, model_id: &str) -> RateLimit {
        self.per_model.get(model_id).copied().unwrap_or_default()
    }
}

/// Per-genre override of the coherence threshold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenreOverride {
    #[serde(default)]
    pub coherence_threshold: Option<f64>,
    #[serde(default)]
    pub cost_budget_usd: Option<f64>,
}

/// Model provider connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Name of the environment variable holding the API key. The key itself
    /// is never stored in the config file.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_mini_model")]
    pub mini_model: String,
    #[serde(default = "default_advanced_model")]
    pub advanced_model: String,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

fn default_api_base() -> String {
    "https://api.anthropic.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "NARRAFORGE_API_KEY".to_string()
}

fn default_mini_model() -> String {
    "claude-haiku".to_string()
}

fn default_advanced_model() -> String {
    "claude-sonnet".to_string()
}

fn default_requests_per_minute() -> u32 {
    60
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            mini_model: default_mini_model(),
            advanced_model: default_advanced_model(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

/// The on-disk configuration file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NarraforgeToml {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub genre_overrides: HashMap<String, GenreOverride>,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub text_health: TextHealthConfig,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
}

impl NarraforgeToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse narraforge.toml")
    }

    /// Load from `<working_dir>/.narraforge/narraforge.toml`, falling back
    /// to defaults if the file does not exist.
    pub fn load_or_default(working_dir: &Path) -> Result<Self> {
        let config_path = working_dir.join(".narraforge").join("narraforge.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize narraforge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Resolve the coherence threshold for `genre_key`, applying its override
    /// if one is configured. `genre_key` is `Genre::config_key()`'s output —
    /// an exact match, never a pattern.
    pub fn coherence_threshold_for(&self, genre_key: &str) -> f64 {
        self.genre_overrides
            .get(genre_key)
            .and_then(|o| o.coherence_threshold)
            .unwrap_or(self.defaults.coherence_threshold)
    }

    pub fn cost_budget_for(&self, genre_key: &str) -> f64 {
        self.genre_overrides
            .get(genre_key)
            .and_then(|o| o.cost_budget_usd)
            .unwrap_or(self.defaults.cost_budget_usd)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !(0.0..=1.0).contains(&self.defaults.coherence_threshold) {
            warnings.push(format!(
                "defaults.coherence_threshold {} is outside [0, 1]",
                self.defaults.coherence_threshold
            ));
        }
        for (genre, ov) in &self.genre_overrides {
            if let Some(t) = ov.coherence_threshold
                && !(0.0..=1.0).contains(&t)
            {
                warnings.push(format!(
                    "genre_overrides.{genre}.coherence_threshold {t} is outside [0, 1]"
                ));
            }
        }
        warnings
    }
}

/// Resolved runtime configuration: the file contents plus CLI/env
/// overrides, with precedence CLI > env > file > built-in default.
#[derive(Debug, Clone)]
pub struct NarraforgeConfig {
    toml: NarraforgeToml,
    cli_cost_budget_usd: Option<f64>,
    cli_coherence_threshold: Option<f64>,
}

impl NarraforgeConfig {
    pub fn new(working_dir: &Path) -> Result<Self> {
        Ok(Self {
            toml: NarraforgeToml::load_or_default(working_dir)?,
            cli_cost_budget_usd: None,
            cli_coherence_threshold: None,
        })
    }

    pub fn with_cli_args(
        working_dir: &Path,
        cost_budget_usd: Option<f64>,
        coherence_threshold: Option<f64>,
    ) -> Result<Self> {
        Ok(Self {
            toml: NarraforgeToml::load_or_default(working_dir)?,
            cli_cost_budget_usd: cost_budget_usd,
            cli_coherence_threshold: coherence_threshold,
        })
    }

    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.toml.provider.api_key_env).with_context(|| {
            format!(
                "model provider API key not set (expected env var {})",
                self.toml.provider.api_key_env
            )
        })
    }

    pub fn api_base(&self) -> &str {
        &self.toml.provider.api_base
    }

    pub fn model_for_tier(&self, advanced: bool) -> &str {
        if advanced {
            &self.toml.provider.advanced_model
        } else {
            &self.toml.provider.mini_model
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.toml.provider.requests_per_minute
    }

    pub fn max_retries_per_stage(&self) -> u32 {
        self.toml.defaults.max_retries_per_stage
    }

    pub fn backoff_base_ms(&self) -> u64 {
        self.toml.defaults.backoff_base_ms
    }

    pub fn backoff_cap_ms(&self) -> u64 {
        self.toml.defaults.backoff_cap_ms
    }

    pub fn coherence_threshold_for(&self, genre_key: &str) -> f64 {
        self.cli_coherence_threshold
            .unwrap_or_else(|| self.toml.coherence_threshold_for(genre_key))
    }

    pub fn cost_budget_for(&self, genre_key: &str) -> f64 {
        self.cli_cost_budget_usd
            .unwrap_or_else(|| self.toml.cost_budget_for(genre_key))
    }

    pub fn toml(&self) -> &NarraforgeToml {
        &self.toml
    }

    pub fn checkpoint_retention(&self) -> Duration {
        Duration::from_secs(self.toml.defaults.checkpoint_retention_hours * 3600)
    }

    pub fn output_directory(&self) -> &str {
        &self.toml.defaults.output_directory
    }

    pub fn provider_fallback_order(&self) -> &[String] {
        &self.toml.defaults.provider_fallback_order
    }

    pub fn rate_limit_for(&self, model_id: &str) -> RateLimit {
        self.toml.rate_limits.for_model(model_id)
    }

    pub fn banned_phrases(&self) -> &HashMap<String, PhrasePolicy> {
        &self.toml.text_health.banned_phrases
    }

    pub fn repetition_budgets(&self) -> &HashMap<String, u32> {
        &self.toml.text_health.repetition_budgets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let toml = NarraforgeToml::default();
        assert_eq!(toml.defaults.coherence_threshold, 0.85);
        assert_eq!(toml.defaults.max_retries_per_stage, 3);
    }

    #[test]
    fn genre_override_replaces_default_threshold() {
        let mut toml = NarraforgeToml::default();
        toml.genre_overrides.insert(
            "fantasy".to_string(),
            GenreOverride { coherence_threshold: Some(0.8), cost_budget_usd: None },
        );
        assert_eq!(toml.coherence_threshold_for("fantasy"), 0.8);
        assert_eq!(toml.coherence_threshold_for("literary"), 0.85);
    }

    #[test]
    fn cli_arg_takes_precedence_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = NarraforgeConfig::with_cli_args(dir.path(), None, Some(0.6)).unwrap();
        assert_eq!(config.coherence_threshold_for("fantasy"), 0.6);
    }

    #[test]
    fn validate_flags_out_of_range_threshold() {
        let mut toml = NarraforgeToml::default();
        toml.defaults.coherence_threshold = 1.5;
        let warnings = toml.validate();
        assert!(!warnings.is_empty());
    }

    #[test]
    fn parse_round_trips_through_toml() {
        let toml = NarraforgeToml::default();
        let serialized = toml::to_string_pretty(&toml).unwrap();
        let parsed = NarraforgeToml::parse(&serialized).unwrap();
        assert_eq!(parsed.defaults.coherence_threshold, toml.defaults.coherence_threshold);
    }

    #[test]
    fn load_or_default_returns_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let toml = NarraforgeToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.defaults.coherence_threshold, 0.85);
    }

    #[test]
    fn rate_limit_for_unknown_model_falls_back_to_default() {
        let toml = NarraforgeToml::default();
        let limit = toml.rate_limits.for_model("unknown-model");
        assert_eq!(limit.requests_per_minute, 60);
    }

    #[test]
    fn banned_phrase_default_policy_is_never_use() {
        let mut toml = NarraforgeToml::default();
        toml.text_health.banned_phrases.insert("heart pounded like a drum".into(), PhrasePolicy::default());
        match toml.text_health.banned_phrases.get("heart pounded like a drum").unwrap() {
            PhrasePolicy::NeverUse => {}
            _ => panic!("expected NeverUse default"),
        }
    }

    #[test]
    fn checkpoint_retention_converts_hours_to_duration() {
        let dir = tempfile::tempdir().unwrap();
        let config = NarraforgeConfig::new(dir.path()).unwrap();
        assert_eq!(config.checkpoint_retention(), Duration::from_secs(7 * 24 * 3600));
    }
}
