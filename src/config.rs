//! Configuration file parser for ~/.config/matchday/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::scrape::{FetchPolicy, HarvestOptions, RetryPolicy};
use crate::standings::RankRules;
use crate::storage::CachePolicy;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid base_url: {0}")]
    BaseUrl(#[from] url::ParseError),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the upstream site. Warm-up requests go here and relative
    /// round links resolve against it.
    pub base_url: String,

    /// SQLite file backing the cache. Defaults to the config directory.
    pub database_path: Option<PathBuf>,

    pub fetch: FetchSettings,
    pub harvest: HarvestSettings,
    pub cache: CacheSettings,

    /// League id → league description
    pub leagues: BTreeMap<String, LeagueConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub request_timeout_secs: u64,
    /// Wall-clock budget for one fetch including all retries
    pub retry_budget_secs: u64,
    pub min_body_bytes: usize,
    pub max_body_bytes: usize,
    pub challenge_markers: Vec<String>,
    pub warm_up: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 16_000,
            jitter_ms: 750,
            request_timeout_secs: 20,
            retry_budget_secs: 120,
            min_body_bytes: 512,
            max_body_bytes: 5 * 1024 * 1024,
            challenge_markers: vec![
                "One moment, please".to_string(),
                "cf-browser-verification".to_string(),
                "challenge-platform".to_string(),
                "Just a moment...".to_string(),
            ],
            warm_up: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestSettings {
    pub concurrency: usize,
    pub deadline_secs: u64,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            deadline_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub rounds_ttl_hours: u64,
    pub round_matches_ttl_hours: u64,
    pub standings_ttl_hours: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            rounds_ttl_hours: 168,
            round_matches_ttl_hours: 24,
            standings_ttl_hours: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LeagueConfig {
    pub name: String,
    /// Path (or absolute URL) of the league's landing results page
    pub landing_path: String,
    /// Teams that always appear in the table, even before their first result
    pub roster: Vec<String>,
    pub leader_count: usize,
    pub relegation_count: usize,
    pub relegation_min_teams: usize,
}

impl Default for LeagueConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            landing_path: String::new(),
            roster: Vec::new(),
            leader_count: 1,
            relegation_count: 0,
            relegation_min_teams: 3,
        }
    }
}

impl LeagueConfig {
    pub fn rank_rules(&self) -> RankRules {
        RankRules {
            leader_count: self.leader_count,
            relegation_count: self.relegation_count,
            relegation_min_teams: self.relegation_min_teams,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut leagues = BTreeMap::new();
        leagues.insert(
            "liga_a".to_string(),
            LeagueConfig {
                name: "Liga -A-".to_string(),
                landing_path: "/index.php/ct-menu-item-7/razpored-liga-a".to_string(),
                leader_count: 1,
                relegation_count: 2,
                ..LeagueConfig::default()
            },
        );
        leagues.insert(
            "liga_b".to_string(),
            LeagueConfig {
                name: "Liga -B-".to_string(),
                landing_path: "/index.php/2017-08-11-13-54-06/razpored-liga-b".to_string(),
                leader_count: 2,
                relegation_count: 0,
                ..LeagueConfig::default()
            },
        );

        Self {
            base_url: "https://www.lmn-radgona.si".to_string(),
            database_path: None,
            fetch: FetchSettings::default(),
            harvest: HarvestSettings::default(),
            cache: CacheSettings::default(),
            leagues,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "base_url",
        "database_path",
        "fetch",
        "harvest",
        "cache",
        "leagues",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown top-level keys → accepted, logged as warning
    ///
    /// A `[leagues]` table in the file replaces the built-in league list.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.source_root()?;
        tracing::info!(
            base_url = %config.base_url,
            leagues = config.leagues.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// `base_url` parsed as a URL.
    pub fn source_root(&self) -> Result<Url, ConfigError> {
        Ok(Url::parse(&self.base_url)?)
    }

    pub fn cache_policy(&self) -> CachePolicy {
        let hours = |h: u64| Duration::from_secs(h.saturating_mul(3600));
        CachePolicy {
            rounds: hours(self.cache.rounds_ttl_hours),
            round_matches: hours(self.cache.round_matches_ttl_hours),
            standings: hours(self.cache.standings_ttl_hours),
        }
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        let f = &self.fetch;
        FetchPolicy {
            retry: RetryPolicy {
                max_attempts: f.max_attempts.max(1),
                base_delay: Duration::from_millis(f.base_delay_ms),
                max_delay: Duration::from_millis(f.max_delay_ms.max(f.base_delay_ms)),
                jitter: Duration::from_millis(f.jitter_ms),
                budget: Duration::from_secs(f.retry_budget_secs.max(1)),
            },
            request_timeout: Duration::from_secs(f.request_timeout_secs.max(1)),
            min_body_bytes: f.min_body_bytes,
            max_body_bytes: f.max_body_bytes,
            challenge_markers: f.challenge_markers.clone(),
            warm_up: f.warm_up,
        }
    }

    /// Harvest worker count is clamped to 1..=16.
    pub fn harvest_options(&self) -> HarvestOptions {
        HarvestOptions {
            concurrency: self.harvest.concurrency.clamp(1, 16),
            deadline: Duration::from_secs(self.harvest.deadline_secs.max(1)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
