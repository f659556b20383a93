//! Settings Persistence
//!
//! Persistent client settings with:
//! - Atomic file writes (temp file + rename)
//! - Schema validation with defaults
//! - Tolerant normalization - bad values are corrected, not fatal
//!
//! Storage location: `{config_dir}/aerovision/settings.json`

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::transport::DEFAULT_BASE_URL;

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

// =============================================================================
// Settings Schema
// =============================================================================

/// Client settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Base URL of the detection server API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Job status poll cadence in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Background health probe cadence in seconds
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// Default sampling stride for video jobs
    #[serde(default = "default_frame_skip")]
    pub default_frame_skip: u32,

    /// Directory downloads are saved into (current dir when unset)
    #[serde(default)]
    pub download_dir: Option<String>,

    /// Sidecar server process settings
    #[serde(default)]
    pub sidecar: SidecarSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_frame_skip() -> u32 {
    1
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            base_url: default_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            health_interval_secs: default_health_interval_secs(),
            default_frame_skip: default_frame_skip(),
            download_dir: None,
            sidecar: SidecarSettings::default(),
        }
    }
}

impl ClientSettings {
    /// Normalizes and clamps settings so persisted state is always valid.
    ///
    /// Intentionally tolerant: corrects bad values instead of failing, so a
    /// corrupted or hand-edited config cannot brick the client.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        let trimmed = self.base_url.trim().trim_end_matches('/');
        self.base_url = if trimmed.is_empty() {
            default_base_url()
        } else {
            trimmed.to_string()
        };

        self.poll_interval_ms = self.poll_interval_ms.clamp(100, 60_000);
        self.health_interval_secs = self.health_interval_secs.clamp(5, 3_600);
        self.default_frame_skip = self.default_frame_skip.clamp(1, 1_000);
    }
}

/// Sidecar server process settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSettings {
    /// Program to run
    #[serde(default = "default_sidecar_program")]
    pub program: String,

    /// Program arguments
    #[serde(default = "default_sidecar_args")]
    pub args: Vec<String>,

    /// Working directory for the server process
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Spawn the server automatically before the first command
    #[serde(default)]
    pub auto_start: bool,
}

fn default_sidecar_program() -> String {
    "python".to_string()
}

fn default_sidecar_args() -> Vec<String> {
    vec!["backend/server.py".to_string()]
}

impl Default for SidecarSettings {
    fn default() -> Self {
        Self {
            program: default_sidecar_program(),
            args: default_sidecar_args(),
            working_dir: None,
            auto_start: false,
        }
    }
}

// =============================================================================
// Settings Manager
// =============================================================================

/// Loads and saves settings with an advisory file lock
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Creates a manager storing settings under the given directory
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings_path: config_dir.into().join(SETTINGS_FILE),
        }
    }

    /// Default settings directory: `{config_dir}/aerovision`
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aerovision")
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> &PathBuf {
        &self.settings_path
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(
        &self,
        exclusive: bool,
        op: impl FnOnce() -> CoreResult<T>,
    ) -> CoreResult<T> {
        // Ensure parent directory exists so the lock file can be created.
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)
                .map_err(|e| CoreError::Internal(format!("Failed to lock settings: {}", e)))?;
        } else {
            fs2::FileExt::lock_shared(&lock_file)
                .map_err(|e| CoreError::Internal(format!("Failed to lock settings: {}", e)))?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Load settings from disk, returning defaults if the file doesn't exist
    /// or cannot be parsed.
    pub fn load(&self) -> ClientSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(ClientSettings::default());
            }

            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings: ClientSettings = serde_json::from_str(&content)?;
            settings.normalize();
            Ok(settings)
        });

        match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                ClientSettings::default()
            }
        }
    }

    /// Save settings to disk using atomic write (temp file + rename)
    pub fn save(&self, settings: &ClientSettings) -> CoreResult<ClientSettings> {
        self.with_lock(true, || {
            // Normalize before persisting.
            let mut normalized = settings.clone();
            normalized.normalize();

            let content = serde_json::to_string_pretty(&normalized)?;

            // Atomic write: write to temp file, then rename.
            // Note: std::fs::rename does not overwrite on Windows.
            let temp_path = self.settings_path.with_extension("json.tmp");
            if temp_path.exists() {
                let _ = fs::remove_file(&temp_path);
            }

            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;

            if cfg!(windows) {
                // Windows: rename does not overwrite, so use a backup-then-swap.
                let backup_path = self.settings_path.with_extension("json.bak");
                if backup_path.exists() {
                    let _ = fs::remove_file(&backup_path);
                }

                if self.settings_path.exists() {
                    fs::rename(&self.settings_path, &backup_path)?;
                }

                match fs::rename(&temp_path, &self.settings_path) {
                    Ok(()) => {
                        if backup_path.exists() {
                            let _ = fs::remove_file(&backup_path);
                        }
                    }
                    Err(e) => {
                        // Best-effort restore.
                        if backup_path.exists() {
                            let _ = fs::rename(&backup_path, &self.settings_path);
                        }
                        return Err(CoreError::Io(e));
                    }
                }
            } else {
                fs::rename(&temp_path, &self.settings_path)?;
            }

            info!("Settings saved to {:?}", self.settings_path);
            Ok(normalized)
        })
    }

    /// Reset settings to defaults and delete the settings file
    pub fn reset(&self) -> CoreResult<ClientSettings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)?;
                info!("Settings file deleted");
            }
            Ok(ClientSettings::default())
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = ClientSettings::default();
        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.base_url, "http://localhost:5000/api");
        assert_eq!(settings.poll_interval_ms, 1000);
        assert_eq!(settings.health_interval_secs, 30);
        assert_eq!(settings.default_frame_skip, 1);
        assert!(!settings.sidecar.auto_start);
    }

    #[test]
    fn test_normalize_clamps_out_of_range_values() {
        let mut settings = ClientSettings {
            poll_interval_ms: 1,
            health_interval_secs: 100_000,
            default_frame_skip: 0,
            base_url: "  ".to_string(),
            ..Default::default()
        };

        settings.normalize();

        assert_eq!(settings.poll_interval_ms, 100);
        assert_eq!(settings.health_interval_secs, 3_600);
        assert_eq!(settings.default_frame_skip, 1);
        assert_eq!(settings.base_url, "http://localhost:5000/api");
    }

    #[test]
    fn test_normalize_trims_trailing_slash() {
        let mut settings = ClientSettings {
            base_url: "http://10.0.0.5:5000/api/".to_string(),
            ..Default::default()
        };
        settings.normalize();
        assert_eq!(settings.base_url, "http://10.0.0.5:5000/api");
    }

    #[test]
    fn test_settings_roundtrip() {
        let settings = ClientSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: ClientSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings, parsed);
    }

    #[test]
    fn test_partial_file_gets_defaults() {
        let parsed: ClientSettings =
            serde_json::from_str(r#"{"baseUrl":"http://host:5000/api"}"#).unwrap();
        assert_eq!(parsed.base_url, "http://host:5000/api");
        assert_eq!(parsed.poll_interval_ms, 1000);
        assert_eq!(parsed.sidecar.program, "python");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());

        let mut settings = ClientSettings::default();
        settings.base_url = "http://10.0.0.5:5000/api".to_string();
        settings.default_frame_skip = 5;

        manager.save(&settings).unwrap();
        let loaded = manager.load();

        assert_eq!(loaded.base_url, "http://10.0.0.5:5000/api");
        assert_eq!(loaded.default_frame_skip, 5);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());
        assert_eq!(manager.load(), ClientSettings::default());
    }

    #[test]
    fn test_load_corrupted_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());
        fs::write(manager.settings_path(), "not json{{{").unwrap();
        assert_eq!(manager.load(), ClientSettings::default());
    }

    #[test]
    fn test_save_normalizes() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());

        let settings = ClientSettings {
            poll_interval_ms: 5,
            ..Default::default()
        };
        let saved = manager.save(&settings).unwrap();
        assert_eq!(saved.poll_interval_ms, 100);
        assert_eq!(manager.load().poll_interval_ms, 100);
    }

    #[test]
    fn test_reset_deletes_file() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());

        manager.save(&ClientSettings::default()).unwrap();
        assert!(manager.settings_path().exists());

        let reset = manager.reset().unwrap();
        assert_eq!(reset, ClientSettings::default());
        assert!(!manager.settings_path().exists());
    }
}
