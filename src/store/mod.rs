//! Settings store: user configuration plus accumulated usage counters.
//! The pipeline reads settings per rewrite call and only ever writes the
//! token counters. Defaults are substituted for anything unset, so a
//! fresh store is immediately usable.

pub mod sqlite;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub use sqlite::SqliteStore;

/// Proficiency level the rewrite service targets when picking words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Proficiency {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl Proficiency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proficiency::Beginner => "beginner",
            Proficiency::Intermediate => "intermediate",
            Proficiency::Advanced => "advanced",
        }
    }
}

impl std::fmt::Display for Proficiency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage reported by a single rewrite call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Accumulated usage counters. Updates add, never overwrite.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenStats {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub last_updated: i64,
}

impl TokenStats {
    pub fn accumulate(&mut self, usage: &TokenUsage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
        self.last_updated = now_unix();
    }
}

/// User configuration. Every field has a construction-time default; the
/// density percentage is clamped on the way in rather than validated late.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub api_key: String,
    pub target_language: String,
    pub proficiency: Proficiency,
    pub density_percent: u8,
    pub enabled: bool,
    pub token_stats: TokenStats,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            target_language: String::new(),
            proficiency: Proficiency::Beginner,
            density_percent: 50,
            enabled: true,
            token_stats: TokenStats::default(),
        }
    }
}

impl Settings {
    pub fn clamp_density(value: u8) -> u8 {
        value.min(100)
    }
}

/// One typed settings mutation.
#[derive(Debug, Clone)]
pub enum SettingUpdate {
    ApiKey(String),
    TargetLanguage(String),
    Proficiency(Proficiency),
    DensityPercent(u8),
    Enabled(bool),
}

impl SettingUpdate {
    fn apply(&self, settings: &mut Settings) {
        match self {
            SettingUpdate::ApiKey(v) => settings.api_key = v.clone(),
            SettingUpdate::TargetLanguage(v) => settings.target_language = v.clone(),
            SettingUpdate::Proficiency(v) => settings.proficiency = *v,
            SettingUpdate::DensityPercent(v) => {
                settings.density_percent = Settings::clamp_density(*v)
            }
            SettingUpdate::Enabled(v) => settings.enabled = *v,
        }
    }
}

/// Storage boundary. Reads are whole-snapshot; the only pipeline-side
/// write is the accumulating token-counter update.
pub trait SettingsStore: Send + Sync {
    fn get_settings(&self) -> Settings;
    fn update_setting(&self, update: SettingUpdate);
    /// Add `usage` to the stored counters and return the new totals.
    fn update_token_stats(&self, usage: &TokenUsage) -> TokenStats;
}

/// In-memory store for tests and the demo binary.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Settings>,
}

impl MemoryStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }
}

impl SettingsStore for MemoryStore {
    fn get_settings(&self) -> Settings {
        self.inner.read().clone()
    }

    fn update_setting(&self, update: SettingUpdate) {
        update.apply(&mut self.inner.write());
    }

    fn update_token_stats(&self, usage: &TokenUsage) -> TokenStats {
        let mut settings = self.inner.write();
        settings.token_stats.accumulate(usage);
        settings.token_stats
    }
}

/// Current time as Unix timestamp (seconds).
pub(crate) fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fresh_install() {
        let s = Settings::default();
        assert!(s.api_key.is_empty());
        assert_eq!(s.proficiency, Proficiency::Beginner);
        assert_eq!(s.density_percent, 50);
        assert!(s.enabled);
        assert_eq!(s.token_stats.total_tokens, 0);
    }

    #[test]
    fn density_clamps_to_100() {
        let store = MemoryStore::default();
        store.update_setting(SettingUpdate::DensityPercent(250));
        assert_eq!(store.get_settings().density_percent, 100);
    }

    #[test]
    fn token_stats_accumulate_rather_than_overwrite() {
        let store = MemoryStore::default();
        let usage = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        store.update_token_stats(&usage);
        let totals = store.update_token_stats(&usage);
        assert_eq!(totals.prompt_tokens, 20);
        assert_eq!(totals.completion_tokens, 10);
        assert_eq!(totals.total_tokens, 30);
        assert!(totals.last_updated > 0);
    }

    #[test]
    fn typed_updates_apply_in_place() {
        let store = MemoryStore::default();
        store.update_setting(SettingUpdate::TargetLanguage("spanish".into()));
        store.update_setting(SettingUpdate::Proficiency(Proficiency::Advanced));
        store.update_setting(SettingUpdate::Enabled(false));
        let s = store.get_settings();
        assert_eq!(s.target_language, "spanish");
        assert_eq!(s.proficiency, Proficiency::Advanced);
        assert!(!s.enabled);
    }
}
