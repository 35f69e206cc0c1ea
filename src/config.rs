//! Application-level configuration loading: gameplay rules, scheduler and the word bank.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "CODECTIONS_BACK_CONFIG_PATH";

const DEFAULT_SHARD: &str = "main";
const DEFAULT_WINDOW_SECS: u32 = 60;
const DEFAULT_MAX_POINTS: u32 = 1000;
const DEFAULT_MAX_MISTAKES: u32 = 4;
const DEFAULT_TICK_MS: u64 = 1000;
const DEFAULT_BUS_CAPACITY: usize = 256;
const DEFAULT_FEED_LIMIT: usize = 50;

/// Scoring and countdown rules applied to every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameRules {
    /// Countdown granted to each attempt, in seconds.
    pub window_secs: u32,
    /// Points for a category solved instantly.
    pub max_points: u32,
    /// Wrong guesses allowed before the attempt ends.
    pub max_mistakes: u32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            max_points: DEFAULT_MAX_POINTS,
            max_mistakes: DEFAULT_MAX_MISTAKES,
        }
    }
}

/// Background promotion of due sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Run the scheduler task at all.
    pub enabled: bool,
    /// Interval between due-session checks.
    pub tick: Duration,
    /// Complete active sessions this long after they started.
    pub auto_end_after: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            auto_end_after: None,
        }
    }
}

/// A word available to grids, with an identifier unique across the whole bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordEntry {
    /// Identifier unique across the bank.
    pub id: u32,
    /// Displayed word.
    pub text: String,
}

/// Category name to words mapping used to assemble grids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordBank {
    categories: IndexMap<String, Vec<WordEntry>>,
}

impl WordBank {
    /// Build a bank, numbering words in iteration order.
    pub fn from_map(raw: IndexMap<String, Vec<String>>) -> Self {
        let mut next_id = 0u32;
        let categories = raw
            .into_iter()
            .map(|(category, words)| {
                let entries = words
                    .into_iter()
                    .map(|text| {
                        next_id += 1;
                        WordEntry { id: next_id, text }
                    })
                    .collect();
                (category, entries)
            })
            .collect();
        Self { categories }
    }

    /// Words of `category`; unknown categories have none.
    pub fn words(&self, category: &str) -> &[WordEntry] {
        self.categories
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Category names in configuration order.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Partition key this process serves.
    pub shard: String,
    /// Gameplay rules applied to every attempt.
    pub rules: GameRules,
    /// Background promotion settings.
    pub scheduler: SchedulerConfig,
    /// Buffered events per table on the change feed.
    pub bus_capacity: usize,
    /// Maximum entries kept in an admin submission feed.
    pub feed_limit: usize,
    /// Words grids are drawn from.
    pub word_bank: WordBank,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        shard = %app_config.shard,
                        categories = app_config.word_bank.categories().count(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            shard: DEFAULT_SHARD.to_owned(),
            rules: GameRules::default(),
            scheduler: SchedulerConfig::default(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
            feed_limit: DEFAULT_FEED_LIMIT,
            word_bank: WordBank::from_map(default_word_bank()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    shard: Option<String>,
    rules: RawRules,
    scheduler: RawScheduler,
    bus_capacity: Option<usize>,
    feed_limit: Option<usize>,
    word_bank: Option<IndexMap<String, Vec<String>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRules {
    window_secs: Option<u32>,
    max_points: Option<u32>,
    max_mistakes: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawScheduler {
    enabled: Option<bool>,
    tick_ms: Option<u64>,
    auto_end_after_secs: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = GameRules::default();
        let rules = GameRules {
            window_secs: value
                .rules
                .window_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.window_secs),
            max_points: value.rules.max_points.unwrap_or(defaults.max_points),
            max_mistakes: value
                .rules
                .max_mistakes
                .filter(|mistakes| *mistakes > 0)
                .unwrap_or(defaults.max_mistakes),
        };

        let scheduler = SchedulerConfig {
            enabled: value.scheduler.enabled.unwrap_or(true),
            tick: Duration::from_millis(
                value
                    .scheduler
                    .tick_ms
                    .filter(|ms| *ms > 0)
                    .unwrap_or(DEFAULT_TICK_MS),
            ),
            auto_end_after: value.scheduler.auto_end_after_secs.map(Duration::from_secs),
        };

        Self {
            shard: value
                .shard
                .filter(|shard| !shard.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SHARD.to_owned()),
            rules,
            scheduler,
            bus_capacity: value.bus_capacity.unwrap_or(DEFAULT_BUS_CAPACITY),
            feed_limit: value.feed_limit.unwrap_or(DEFAULT_FEED_LIMIT),
            word_bank: WordBank::from_map(value.word_bank.unwrap_or_else(default_word_bank)),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in word bank shipped with the binary.
fn default_word_bank() -> IndexMap<String, Vec<String>> {
    let entries: [(&str, &[&str]); 8] = [
        (
            "Programming Languages",
            &["Python", "JavaScript", "Ruby", "Java", "Rust", "Haskell"],
        ),
        (
            "Frontend Frameworks",
            &["React", "Vue", "Angular", "Svelte", "Solid", "Ember"],
        ),
        (
            "Databases",
            &["MongoDB", "PostgreSQL", "MySQL", "SQLite", "Redis", "Cassandra"],
        ),
        (
            "Version Control",
            &["Git", "SVN", "Mercurial", "Perforce", "Fossil", "Darcs"],
        ),
        (
            "Operating Systems",
            &["Linux", "FreeBSD", "Windows", "macOS", "Plan 9", "Haiku"],
        ),
        (
            "Text Editors",
            &["Vim", "Emacs", "Nano", "Helix", "Kakoune", "Sublime"],
        ),
        (
            "Build Tools",
            &["Cargo", "Maven", "Gradle", "Make", "Bazel", "Meson"],
        ),
        (
            "Cloud Providers",
            &["AWS", "Azure", "GCP", "Hetzner", "Vultr", "Linode"],
        ),
    ];

    entries
        .into_iter()
        .map(|(category, words)| {
            (
                category.to_owned(),
                words.iter().map(|word| (*word).to_owned()).collect(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn default_bank_ids_are_unique() {
        let bank = AppConfig::default().word_bank;
        let ids: Vec<u32> = bank
            .categories()
            .flat_map(|category| bank.words(category).iter().map(|word| word.id))
            .collect();
        let unique: HashSet<u32> = ids.iter().copied().collect();
        assert_eq!(ids.len(), unique.len());
        assert!(bank.categories().all(|category| bank.words(category).len() >= 4));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"shard": "annex", "rules": {"window_secs": 90}}"#).unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.shard, "annex");
        assert_eq!(config.rules.window_secs, 90);
        assert_eq!(config.rules.max_points, DEFAULT_MAX_POINTS);
        assert!(config.scheduler.enabled);
        assert_eq!(config.word_bank.words("Databases").len(), 6);
    }

    #[test]
    fn unknown_category_has_no_words() {
        assert!(AppConfig::default().word_bank.words("Poetry").is_empty());
    }
}
