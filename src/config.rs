//! Configuration loading and management
//!
//! `Config` holds the daemon's own paths and switches, taken from the
//! environment. `StoredConfig` is the user-facing state (profiles, active
//! profile, app settings) persisted as JSON between runs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::BackendKind;
use crate::profile::HotkeyProfile;

const APP_DIR: &str = "togmic";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// IPC endpoint: a Unix socket path, or a named pipe on Windows
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Persisted profiles and settings
    pub state_file: PathBuf,

    /// Audio backend to drive
    pub audio_backend: BackendKind,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os("TOGMIC_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let audio_backend = match std::env::var("TOGMIC_AUDIO_BACKEND") {
            Ok(value) => parse_backend(&value)?,
            Err(_) => BackendKind::System,
        };

        Ok(Self {
            socket_path: socket_path(&data_dir),
            state_file: data_dir.join("config.json"),
            data_dir,
            audio_backend,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

#[cfg(windows)]
fn default_data_dir() -> Result<PathBuf> {
    let appdata = std::env::var("APPDATA").context("APPDATA is not set")?;
    Ok(PathBuf::from(appdata).join(APP_DIR))
}

#[cfg(not(windows))]
fn default_data_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".local").join("share").join(APP_DIR))
}

#[cfg(windows)]
fn socket_path(_data_dir: &Path) -> PathBuf {
    PathBuf::from(r"\\.\pipe\togmic")
}

#[cfg(not(windows))]
fn socket_path(data_dir: &Path) -> PathBuf {
    data_dir.join("daemon.sock")
}

fn parse_backend(value: &str) -> Result<BackendKind> {
    match value.trim().to_lowercase().as_str() {
        "" | "system" => Ok(BackendKind::System),
        "memory" => Ok(BackendKind::Memory),
        other => anyhow::bail!("unknown TOGMIC_AUDIO_BACKEND '{other}' (expected system or memory)"),
    }
}

/// Behavioral flags read at startup or when settings change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub start_muted: bool,
    pub autostart: bool,
    pub check_updates: bool,
    pub close_to_tray: bool,
    pub start_minimized: bool,
    /// Play a short tone on user-initiated mute changes
    pub sound_feedback: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            start_muted: false,
            autostart: false,
            check_updates: true,
            close_to_tray: true,
            start_minimized: false,
            sound_feedback: true,
        }
    }
}

/// Everything persisted between runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredConfig {
    pub profiles: Vec<HotkeyProfile>,
    pub active_profile_id: Option<String>,
    pub app_settings: AppSettings,
}

impl StoredConfig {
    pub fn profile(&self, id: &str) -> Option<&HotkeyProfile> {
        self.profiles.iter().find(|profile| profile.id == id)
    }

    /// Insert or replace by id. Returns true if it replaced an existing one.
    pub fn upsert_profile(&mut self, profile: HotkeyProfile) -> bool {
        match self.profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => {
                *existing = profile;
                true
            }
            None => {
                self.profiles.push(profile);
                false
            }
        }
    }

    pub fn remove_profile(&mut self, id: &str) -> Option<HotkeyProfile> {
        let index = self.profiles.iter().position(|profile| profile.id == id)?;
        Some(self.profiles.remove(index))
    }
}

/// Errors from the persistence collaborator
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode configuration: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Load/save seam for the persisted configuration
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<StoredConfig, ConfigError>;
    fn save(&self, config: &StoredConfig) -> Result<(), ConfigError>;
}

/// `ConfigStore` backed by a pretty-printed JSON file
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the stored config, falling back to defaults.
    ///
    /// An unparseable file is renamed to `config.json.bak` first so the next
    /// save does not overwrite it.
    pub fn load_or_default(&self) -> StoredConfig {
        match self.load() {
            Ok(config) => config,
            Err(e @ ConfigError::Parse { .. }) => {
                let backup = self.path.with_extension("json.bak");
                match fs::rename(&self.path, &backup) {
                    Ok(()) => warn!(
                        error = %e,
                        backup = %backup.display(),
                        "stored configuration is corrupt, moved aside"
                    ),
                    Err(rename) => warn!(
                        error = %e,
                        rename_error = %rename,
                        "stored configuration is corrupt and could not be moved aside"
                    ),
                }
                StoredConfig::default()
            }
            Err(e) => {
                warn!(error = %e, "failed to load stored configuration, starting from defaults");
                StoredConfig::default()
            }
        }
    }

    fn io_error(&self, source: io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> Result<StoredConfig, ConfigError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored configuration, using defaults");
                return Ok(StoredConfig::default());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        serde_json::from_slice(&content).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, config: &StoredConfig) -> Result<(), ConfigError> {
        let content = serde_json::to_vec_pretty(config).map_err(ConfigError::Encode)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        // replace atomically so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), "configuration saved");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// In-memory store that can be told to fail
    #[derive(Default)]
    pub struct MemoryStore {
        pub saved: Mutex<Option<StoredConfig>>,
        pub fail_saves: std::sync::atomic::AtomicBool,
    }

    impl MemoryStore {
        pub fn saved(&self) -> Option<StoredConfig> {
            self.saved.lock().unwrap().clone()
        }
    }

    impl ConfigStore for MemoryStore {
        fn load(&self) -> Result<StoredConfig, ConfigError> {
            Ok(self.saved().unwrap_or_default())
        }

        fn save(&self, config: &StoredConfig) -> Result<(), ConfigError> {
            if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(ConfigError::Io {
                    path: PathBuf::from("memory"),
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
                });
            }
            *self.saved.lock().unwrap() = Some(config.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{test_profile, DeviceSelector};

    #[test]
    fn test_config_paths_follow_data_dir() {
        let data_dir = PathBuf::from("/tmp/togmic-test");
        let config = Config {
            socket_path: socket_path(&data_dir),
            state_file: data_dir.join("config.json"),
            data_dir: data_dir.clone(),
            audio_backend: BackendKind::System,
        };
        assert!(config.state_file.starts_with(&config.data_dir));
        #[cfg(unix)]
        assert!(config.socket_path.to_string_lossy().contains("togmic"));
    }

    #[test]
    fn test_parse_backend() {
        assert_eq!(parse_backend("Memory").unwrap(), BackendKind::Memory);
        assert_eq!(parse_backend("").unwrap(), BackendKind::System);
        assert!(parse_backend("alsa").is_err());
    }

    #[test]
    fn test_corrupt_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = JsonFileStore::new(&path);

        assert!(matches!(store.load(), Err(ConfigError::Parse { .. })));
        assert_eq!(store.load_or_default(), StoredConfig::default());

        let backup = dir.path().join("config.json.bak");
        assert_eq!(std::fs::read(&backup).unwrap(), b"{ not json");
        assert!(!path.exists());

        store.save(&StoredConfig::default()).unwrap();
        assert_eq!(std::fs::read(&backup).unwrap(), b"{ not json");
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("config.json"));
        let config = store.load().unwrap();
        assert_eq!(config, StoredConfig::default());
        assert!(config.app_settings.sound_feedback);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("config.json"));

        let mut config = StoredConfig::default();
        config.upsert_profile(test_profile("work", "Ctrl+F9", DeviceSelector::AllMics));
        config.active_profile_id = Some("work".to_string());
        config.app_settings.start_muted = true;
        store.save(&config).unwrap();

        assert_eq!(store.load().unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"appSettings": {"startMuted": true}}"#).unwrap();

        let config = JsonFileStore::new(&path).load().unwrap();
        assert!(config.app_settings.start_muted);
        assert!(config.app_settings.close_to_tray);
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            JsonFileStore::new(&path).load(),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_upsert_and_remove_profile() {
        let mut config = StoredConfig::default();
        assert!(!config.upsert_profile(test_profile("a", "F9", DeviceSelector::DefaultMic)));
        assert!(config.upsert_profile(test_profile("a", "F10", DeviceSelector::DefaultMic)));
        assert_eq!(config.profiles.len(), 1);
        assert_eq!(config.profile("a").unwrap().toggle_key, vec!["F10"]);
        assert!(config.remove_profile("a").is_some());
        assert!(config.remove_profile("a").is_none());
    }
}
