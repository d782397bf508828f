//! YAML configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.tally/
//!   config.yaml   (mode 0600)
//!   store/        (default store_dir, holds store.db)
//!   outbox/       (default outbox_dir)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};

/// Scheduler and worker-pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Seconds between scheduled passes over due entities.
    pub interval_secs: u64,
    /// Upper bound on concurrent feed fetches.
    pub max_concurrent_fetches: usize,
    /// A game is due from `kickoff - lookahead` until `kickoff + lookback`.
    pub lookback_hours: i64,
    pub lookahead_hours: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: 900,
            max_concurrent_fetches: 4,
            lookback_hours: 72,
            lookahead_hours: 0,
        }
    }
}

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox_dir: Option<PathBuf>,
    /// Value of `meta.source` on published messages.
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub sync: SyncSettings,
}

fn default_source() -> String {
    "tally".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_dir: None,
            store_dir: None,
            outbox_dir: None,
            source: default_source(),
            sync: SyncSettings::default(),
        }
    }
}

impl Config {
    pub fn feed_dir_at(&self, home: &Path) -> Result<PathBuf, ConfigError> {
        self.feed_dir.clone().ok_or_else(|| ConfigError::NotFound {
            path: config_path_at(home),
        })
    }

    pub fn store_dir_at(&self, home: &Path) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(|| tally_root(home).join("store"))
    }

    pub fn outbox_dir_at(&self, home: &Path) -> PathBuf {
        self.outbox_dir
            .clone()
            .unwrap_or_else(|| tally_root(home).join("outbox"))
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.tally/`
pub fn tally_root(home: &Path) -> PathBuf {
    home.join(".tally")
}

/// `<home>/.tally/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    tally_root(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load `config.yaml`, falling back to defaults when it does not exist.
///
/// Returns `ConfigError::Parse` (with path + line context) if malformed.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Atomically save `config.yaml`: serialize → `.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<(), ConfigError> {
    let root = tally_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        set_dir_permissions(&root)?;
    }
    let path = config_path_at(home);
    let tmp = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

/// Point the config at a feed directory, keeping every other setting.
pub fn init_at(home: &Path, feed_dir: PathBuf) -> Result<Config, ConfigError> {
    let mut config = load_at(home)?;
    config.feed_dir = Some(feed_dir);
    save_at(home, &config)?;
    Ok(config)
}

/// `init_at` convenience wrapper.
pub fn init(feed_dir: PathBuf) -> Result<Config, ConfigError> {
    init_at(&home()?, feed_dir)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
