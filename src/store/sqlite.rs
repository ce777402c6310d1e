//! SQLite-backed settings store.
//! A single key-value table holds JSON-encoded values; any key missing
//! from the table falls back to the construction-time default, so partial
//! writes and first runs behave identically.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use super::{SettingUpdate, Settings, SettingsStore, TokenStats, TokenUsage};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the settings database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, String> {
        let conn = Connection::open(db_path)
            .map_err(|e| format!("failed to open settings DB: {e}"))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| format!("PRAGMA failed: {e}"))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .map_err(|e| format!("create settings table failed: {e}"))?;

        info!(path = %db_path.display(), "settings store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read_key<T: DeserializeOwned>(conn: &Connection, key: &str) -> Option<T> {
        let raw: String = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or_else(|e| {
                warn!(key, error = %e, "settings read failed");
                None
            })?;
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "settings value unparseable, using default");
                None
            }
        }
    }

    fn write_key<T: Serialize>(conn: &Connection, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(r) => r,
            Err(e) => {
                warn!(key, error = %e, "settings value unserializable, dropped");
                return;
            }
        };
        if let Err(e) = conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, raw],
        ) {
            warn!(key, error = %e, "settings write failed");
        }
    }

    fn load(conn: &Connection) -> Settings {
        let defaults = Settings::default();
        Settings {
            api_key: Self::read_key(conn, "api_key").unwrap_or(defaults.api_key),
            target_language: Self::read_key(conn, "target_language")
                .unwrap_or(defaults.target_language),
            proficiency: Self::read_key(conn, "proficiency").unwrap_or(defaults.proficiency),
            density_percent: Self::read_key(conn, "density_percent")
                .map(Settings::clamp_density)
                .unwrap_or(defaults.density_percent),
            enabled: Self::read_key(conn, "enabled").unwrap_or(defaults.enabled),
            token_stats: Self::read_key(conn, "token_stats").unwrap_or(defaults.token_stats),
        }
    }
}

impl SettingsStore for SqliteStore {
    fn get_settings(&self) -> Settings {
        Self::load(&self.conn.lock())
    }

    fn update_setting(&self, update: SettingUpdate) {
        let conn = self.conn.lock();
        match &update {
            SettingUpdate::ApiKey(v) => Self::write_key(&conn, "api_key", v),
            SettingUpdate::TargetLanguage(v) => Self::write_key(&conn, "target_language", v),
            SettingUpdate::Proficiency(v) => Self::write_key(&conn, "proficiency", v),
            SettingUpdate::DensityPercent(v) => {
                Self::write_key(&conn, "density_percent", &Settings::clamp_density(*v))
            }
            SettingUpdate::Enabled(v) => Self::write_key(&conn, "enabled", v),
        }
    }

    fn update_token_stats(&self, usage: &TokenUsage) -> TokenStats {
        // Read-modify-write under one lock so concurrent rewrites can't
        // lose counts.
        let conn = self.conn.lock();
        let mut stats: TokenStats = Self::read_key(&conn, "token_stats").unwrap_or_default();
        stats.accumulate(usage);
        Self::write_key(&conn, "token_stats", &stats);
        stats
    }
}
