use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Environment variable that overrides `memory.root` when set and non-empty.
pub const MEMORY_ROOT_ENV: &str = "LORE_MEMORY_ROOT";

// ── Memory config ────────────────────────────────────────────────────────────

/// Settings for the long-term memory store and its retrieval ranking.
///
/// | Field                           | Effect                                              |
/// |---------------------------------|-----------------------------------------------------|
/// | `inject_top_k`                  | Maximum memories returned by a search               |
/// | `episode_recent_days`           | Window of the linear recency bonus (0 disables it)  |
/// | `episode_recent_boost`          | Bonus for a fresh episode, decays with age          |
/// | `episode_stale_penalty`         | Penalty an old episode approaches                   |
/// | `episode_decay_half_life_days`  | Time constant of the episode decay curve            |
/// | `episode_retention_days`        | Daily episode files older than this are deleted     |
/// | `topic_diversity_penalty`       | Score removed from entries of an over-represented topic |
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Memory directory, relative to the project root unless absolute.
    pub root: String,
    pub inject_top_k: usize,
    pub episode_recent_days: u32,
    pub episode_recent_boost: f64,
    pub episode_stale_penalty: f64,
    pub episode_decay_half_life_days: f64,
    pub episode_retention_days: u32,
    pub topic_diversity_penalty: f64,
    /// Snippets longer than this many characters are truncated.
    pub snippet_max_chars: usize,
    /// When `false`, `maybe_auto_extract` does nothing.
    pub enable_auto_extract: bool,
    /// Case-insensitive substrings that mark a user message as an episode.
    pub episode_trigger_keywords: Vec<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            root: "./memory".to_string(),
            inject_top_k: 3,
            episode_recent_days: 7,
            episode_recent_boost: 2.0,
            episode_stale_penalty: 2.0,
            episode_decay_half_life_days: 3.0,
            episode_retention_days: 30,
            topic_diversity_penalty: 1.0,
            snippet_max_chars: 240,
            enable_auto_extract: true,
            episode_trigger_keywords: default_episode_trigger_keywords(),
        }
    }
}

fn default_episode_trigger_keywords() -> Vec<String> {
    [
        "进展",
        "刚完成",
        "决定",
        "会议",
        "计划",
        "progress",
        "just finished",
        "decided",
        "meeting",
        "plan",
    ]
    .iter()
    .map(|kw| kw.to_string())
    .collect()
}

impl MemoryConfig {
    /// Resolve the memory root against `project_root`.  Absolute roots are
    /// returned unchanged.
    pub fn resolve_root(&self, project_root: impl AsRef<Path>) -> PathBuf {
        let root = Path::new(self.root.trim());
        if root.is_absolute() {
            root.to_path_buf()
        } else {
            project_root.as_ref().join(root)
        }
    }
}

// ── Telemetry config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Fallback filter directive used when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// ── App config ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub memory: MemoryConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var(MEMORY_ROOT_ENV) {
            if !value.trim().is_empty() {
                config.memory.root = value;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let memory = &self.memory;
        if memory.root.trim().is_empty() {
            bail!("memory.root must not be empty");
        }
        if !memory.episode_decay_half_life_days.is_finite()
            || memory.episode_decay_half_life_days < 0.0
        {
            bail!(
                "memory.episode_decay_half_life_days must be a non-negative number, got {}",
                memory.episode_decay_half_life_days
            );
        }
        for (name, value) in [
            ("episode_recent_boost", memory.episode_recent_boost),
            ("episode_stale_penalty", memory.episode_stale_penalty),
            ("topic_diversity_penalty", memory.topic_diversity_penalty),
        ] {
            if !is_non_negative(value) {
                bail!("memory.{name} must be a non-negative number, got {value}");
            }
        }
        Ok(())
    }
}

fn is_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn retrieval_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.memory.root, "./memory");
        assert_eq!(cfg.memory.inject_top_k, 3);
        assert_eq!(cfg.memory.episode_recent_days, 7);
        assert_eq!(cfg.memory.episode_recent_boost, 2.0);
        assert_eq!(cfg.memory.episode_stale_penalty, 2.0);
        assert_eq!(cfg.memory.episode_decay_half_life_days, 3.0);
        assert_eq!(cfg.memory.topic_diversity_penalty, 1.0);
        assert_eq!(cfg.memory.snippet_max_chars, 240);
        assert!(cfg.memory.enable_auto_extract);
        assert_eq!(cfg.telemetry.log_level, "info");
    }

    #[test]
    fn default_trigger_keywords_cover_both_languages() {
        let keywords = MemoryConfig::default().episode_trigger_keywords;
        assert!(keywords.contains(&"会议".to_string()));
        assert!(keywords.contains(&"just finished".to_string()));
    }

    // ── load_from ──────────────────────────────────────────────────────────

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.memory.inject_top_k, 3);
        assert_eq!(cfg.telemetry.log_level, "info");
    }

    #[test]
    fn load_from_partial_toml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(
            &path,
            r#"
[memory]
inject_top_k = 5
episode_trigger_keywords = ["standup"]
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.memory.inject_top_k, 5);
        assert_eq!(cfg.memory.episode_trigger_keywords, vec!["standup"]);
        // Everything else should be default
        assert_eq!(cfg.memory.episode_retention_days, 30);
        assert_eq!(cfg.telemetry.log_level, "info");
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn empty_root_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.memory.root = "   ".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("memory.root"));
    }

    #[test]
    fn negative_half_life_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.memory.episode_decay_half_life_days = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn nan_weights_are_rejected() {
        let mut cfg = AppConfig::default();
        cfg.memory.topic_diversity_penalty = f64::NAN;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("topic_diversity_penalty"));

        let mut cfg = AppConfig::default();
        cfg.memory.episode_stale_penalty = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.memory.episode_recent_boost = f64::INFINITY;
        assert!(cfg.validate().is_err());
    }

    // ── save_to + roundtrip ────────────────────────────────────────────────

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.memory.root = "/var/lib/lore".to_string();
        cfg.memory.episode_retention_days = 3;
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.memory.episode_retention_days, 3);
        assert_eq!(
            loaded.memory.episode_trigger_keywords,
            cfg.memory.episode_trigger_keywords
        );
    }

    #[test]
    fn resolve_root_joins_relative_and_keeps_absolute() {
        let mut memory = MemoryConfig::default();
        memory.root = "store".to_string();
        assert_eq!(
            memory.resolve_root("/project"),
            PathBuf::from("/project").join("store")
        );

        let absolute = std::env::temp_dir().join("lore-abs");
        memory.root = absolute.display().to_string();
        assert_eq!(memory.resolve_root("/project"), absolute);
    }
}
