//! Telemetry configuration.
//!
//! Every field is optional; `effective_*` accessors apply defaults.
//!
//! ```toml
//! mapping_dir = "mappings"
//! significance_threshold = 0.05
//! only_significant = false
//! perspective = "p1"
//!
//! [combo]
//! max_frames_between_hits = 15
//! minimum_combo_length = 2
//!
//! [games.sfa3]
//! max_frames_between_hits = 12
//!
//! [[patterns.sfa3]]
//! name = "Hadoken"
//! notation = "236A"
//! max_span_frames = 20
//! ```
//!
//! Out-of-range combo timing falls back to
//! [`DEFAULT_MAX_FRAMES_BETWEEN_HITS`] with a warning instead of failing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::combo::{ComboConfig, DEFAULT_MAX_FRAMES_BETWEEN_HITS, MAX_REASONABLE_GAP_FRAMES};
use crate::error::ConfigError;
use crate::frame::Side;
use crate::mapping::DEFAULT_SIGNIFICANCE_THRESHOLD;
use crate::pattern::{PatternMatcher, PatternSpec};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Directory holding `<game_id>.toml` / `<game_id>.json` mappings.
    /// Default: `"mappings"`.
    pub mapping_dir: Option<PathBuf>,
    /// Minimum normalized move for a significant change. Default: 0.05.
    pub significance_threshold: Option<f64>,
    /// Build change-filtered frames from significant changes only.
    /// Default: false.
    pub only_significant: Option<bool>,
    /// Player whose combos are tracked. Default: p1.
    pub perspective: Option<Side>,
    /// Combo defaults for every game.
    pub combo: ComboSection,
    /// Per-game combo overrides, keyed by game id.
    pub games: BTreeMap<String, ComboSection>,
    /// Per-game move patterns, keyed by game id.
    pub patterns: BTreeMap<String, Vec<PatternSpec>>,
}

/// Combo timing as written in the file. Integers are signed so that
/// negative values parse and can fall back instead of rejecting the file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ComboSection {
    /// See [`ComboConfig::max_frames_between_hits`].
    pub max_frames_between_hits: Option<i64>,
    /// See [`ComboConfig::minimum_combo_length`].
    pub minimum_combo_length: Option<i64>,
    /// See [`ComboConfig::attack_recency_frames`].
    pub attack_recency_frames: Option<i64>,
    /// See [`ComboConfig::reversal_window_frames`].
    pub reversal_window_frames: Option<i64>,
    /// See [`ComboConfig::efficient_damage_per_meter`].
    pub efficient_damage_per_meter: Option<f64>,
}

impl ComboSection {
    fn apply(&self, game_id: &str, cfg: &mut ComboConfig) {
        if let Some(v) = self.max_frames_between_hits {
            cfg.max_frames_between_hits = match u32::try_from(v) {
                Ok(gap) if gap > 0 && gap <= MAX_REASONABLE_GAP_FRAMES => gap,
                _ => {
                    tracing::warn!(
                        game = game_id,
                        configured = v,
                        fallback = DEFAULT_MAX_FRAMES_BETWEEN_HITS,
                        "invalid max_frames_between_hits; using default"
                    );
                    DEFAULT_MAX_FRAMES_BETWEEN_HITS
                }
            };
        }
        if let Some(v) = self.minimum_combo_length {
            match usize::try_from(v) {
                Ok(n) if n > 0 => cfg.minimum_combo_length = n,
                _ => tracing::warn!(game = game_id, configured = v, "invalid minimum_combo_length; keeping {}", cfg.minimum_combo_length),
            }
        }
        if let Some(v) = self.attack_recency_frames {
            match u32::try_from(v) {
                Ok(n) => cfg.attack_recency_frames = n,
                Err(_) => tracing::warn!(game = game_id, configured = v, "invalid attack_recency_frames; ignored"),
            }
        }
        if let Some(v) = self.reversal_window_frames {
            match u32::try_from(v) {
                Ok(n) => cfg.reversal_window_frames = n,
                Err(_) => tracing::warn!(game = game_id, configured = v, "invalid reversal_window_frames; ignored"),
            }
        }
        if let Some(v) = self.efficient_damage_per_meter {
            cfg.efficient_damage_per_meter = v;
        }
    }
}

impl TelemetryConfig {
    /// Parse from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let cfg = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), games = cfg.games.len(), "loaded telemetry config");
        Ok(cfg)
    }

    /// Mapping directory, defaulting to `mappings`.
    pub fn effective_mapping_dir(&self) -> PathBuf {
        self.mapping_dir.clone().unwrap_or_else(|| PathBuf::from("mappings"))
    }

    /// Significance threshold, defaulting to 0.05. Negative or non-finite
    /// values fall back with a warning.
    pub fn effective_significance_threshold(&self) -> f64 {
        match self.significance_threshold {
            Some(t) if t.is_finite() && t >= 0.0 => t,
            Some(t) => {
                tracing::warn!(configured = t, "invalid significance_threshold; using default");
                DEFAULT_SIGNIFICANCE_THRESHOLD
            }
            None => DEFAULT_SIGNIFICANCE_THRESHOLD,
        }
    }

    /// Whether change filtering uses significant changes only. Default: false.
    pub fn effective_only_significant(&self) -> bool {
        self.only_significant.unwrap_or(false)
    }

    /// Tracked player, defaulting to P1.
    pub fn effective_perspective(&self) -> Side {
        self.perspective.unwrap_or_default()
    }

    /// Combo settings for `game_id`: defaults, then `[combo]`, then
    /// `[games.<game_id>]`.
    pub fn combo_config_for(&self, game_id: &str) -> ComboConfig {
        let mut cfg = ComboConfig::default();
        self.combo.apply(game_id, &mut cfg);
        if let Some(game) = self.games.get(game_id) {
            game.apply(game_id, &mut cfg);
        }
        cfg.sanitized()
    }

    /// Move patterns for `game_id`; empty when none are configured.
    pub fn patterns_for(&self, game_id: &str) -> PatternMatcher {
        self.patterns
            .get(game_id)
            .map(|specs| PatternMatcher::from_specs(specs))
            .unwrap_or_default()
    }
}
