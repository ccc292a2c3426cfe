//! Runtime configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file
//! (`<config dir>/arbor/config.json` unless a path is given), then `ARBOR_*`
//! environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::history::DEFAULT_HISTORY_DEPTH;
use crate::sync::SyncPolicy;

const APP_NAME: &str = "arbor";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local tree artifact.
    pub data_path: PathBuf,
    /// Display name given to the root of a freshly created tree.
    pub root_name: String,
    pub port: u16,
    /// Undo steps kept per session.
    pub history_depth: usize,
    /// Name of the remote record mirroring the tree.
    pub record_name: String,
    /// Base URL of the PostgREST-style record API. Takes precedence over
    /// `record_db`.
    pub remote_url: Option<String>,
    pub remote_table: String,
    pub remote_api_key: Option<String>,
    /// SQLite record database on a durable volume.
    pub record_db: Option<PathBuf>,
    pub tick_interval_secs: u64,
    pub guard_window_secs: u64,
    pub min_plausible_bytes: usize,
    pub remote_timeout_secs: u64,
    /// Other local files mirrored next to the tree, each under its own record.
    pub extra_artifacts: Vec<ArtifactConfig>,
}

/// A local file mirrored under a remote record name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub record_name: String,
    pub path: PathBuf,
}

impl std::str::FromStr for ArtifactConfig {
    type Err = anyhow::Error;

    /// Parse `record_name=path`.
    fn from_str(s: &str) -> Result<Self> {
        let (name, path) = s
            .split_once('=')
            .with_context(|| format!("Expected record_name=path, got '{}'", s))?;
        let (name, path) = (name.trim(), path.trim());
        if name.is_empty() || path.is_empty() {
            anyhow::bail!("Expected record_name=path, got '{}'", s);
        }
        Ok(Self {
            record_name: name.to_string(),
            path: PathBuf::from(path),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        let policy = SyncPolicy::default();
        Self {
            data_path: default_data_path(),
            root_name: "Home".to_string(),
            port: 3000,
            history_depth: DEFAULT_HISTORY_DEPTH,
            record_name: "database".to_string(),
            remote_url: None,
            remote_table: "bot_files".to_string(),
            remote_api_key: None,
            record_db: None,
            tick_interval_secs: policy.tick_interval.as_secs(),
            guard_window_secs: policy.guard_window.as_secs(),
            min_plausible_bytes: policy.min_plausible_bytes,
            remote_timeout_secs: policy.remote_timeout.as_secs(),
            extra_artifacts: Vec::new(),
        }
    }
}

/// Where the remote copy lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteTarget {
    Http {
        url: String,
        table: String,
        api_key: Option<String>,
    },
    Sqlite(PathBuf),
    Disabled,
}

impl Config {
    /// Load defaults, then `path` (or the default config file if it exists),
    /// then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Override fields from `ARBOR_*` variables, looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("ARBOR_DATA_PATH") {
            self.data_path = PathBuf::from(v);
        }
        if let Some(v) = var("ARBOR_ROOT_NAME") {
            self.root_name = v;
        }
        if let Some(v) = var("ARBOR_PORT") {
            self.port = v.parse().context("ARBOR_PORT must be a port number")?;
        }
        if let Some(v) = var("ARBOR_HISTORY_DEPTH") {
            self.history_depth = v.parse().context("ARBOR_HISTORY_DEPTH must be a number")?;
        }
        if let Some(v) = var("ARBOR_RECORD_NAME") {
            self.record_name = v;
        }
        if let Some(v) = var("ARBOR_REMOTE_URL") {
            self.remote_url = Some(v);
        }
        if let Some(v) = var("ARBOR_REMOTE_TABLE") {
            self.remote_table = v;
        }
        if let Some(v) = var("ARBOR_REMOTE_API_KEY") {
            self.remote_api_key = Some(v);
        }
        if let Some(v) = var("ARBOR_RECORD_DB") {
            self.record_db = Some(PathBuf::from(v));
        }
        if let Some(v) = var("ARBOR_TICK_INTERVAL_SECS") {
            self.tick_interval_secs = v.parse().context("ARBOR_TICK_INTERVAL_SECS must be a number")?;
        }
        if let Some(v) = var("ARBOR_GUARD_WINDOW_SECS") {
            self.guard_window_secs = v.parse().context("ARBOR_GUARD_WINDOW_SECS must be a number")?;
        }
        if let Some(v) = var("ARBOR_MIN_PLAUSIBLE_BYTES") {
            self.min_plausible_bytes = v.parse().context("ARBOR_MIN_PLAUSIBLE_BYTES must be a number")?;
        }
        if let Some(v) = var("ARBOR_REMOTE_TIMEOUT_SECS") {
            self.remote_timeout_secs = v.parse().context("ARBOR_REMOTE_TIMEOUT_SECS must be a number")?;
        }
        if let Some(v) = var("ARBOR_EXTRA_ARTIFACTS") {
            self.extra_artifacts = v
                .split(',')
                .filter(|entry| !entry.trim().is_empty())
                .map(str::parse)
                .collect::<Result<_>>()
                .context("ARBOR_EXTRA_ARTIFACTS must be a comma-separated list of name=path")?;
        }
        Ok(())
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            tick_interval: Duration::from_secs(self.tick_interval_secs.max(1)),
            guard_window: Duration::from_secs(self.guard_window_secs),
            min_plausible_bytes: self.min_plausible_bytes,
            remote_timeout: Duration::from_secs(self.remote_timeout_secs.max(1)),
        }
    }

    pub fn remote_target(&self) -> RemoteTarget {
        match (&self.remote_url, &self.record_db) {
            (Some(url), _) => RemoteTarget::Http {
                url: url.clone(),
                table: self.remote_table.clone(),
                api_key: self.remote_api_key.clone(),
            },
            (None, Some(path)) => RemoteTarget::Sqlite(path.clone()),
            (None, None) => RemoteTarget::Disabled,
        }
    }
}

fn default_data_path() -> PathBuf {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().join("database.json"))
        .unwrap_or_else(|| std::env::temp_dir().join("database.json"))
}

fn default_config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_sync_policy() {
        let config = Config::default();
        assert_eq!(config.sync_policy(), SyncPolicy::default());
        assert_eq!(config.history_depth, 20);
        assert_eq!(config.remote_target(), RemoteTarget::Disabled);
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = [
            ("ARBOR_GUARD_WINDOW_SECS", "12"),
            ("ARBOR_REMOTE_URL", "https://db.example/rest/v1"),
            ("ARBOR_RECORD_DB", "/mnt/durable/records.db"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.sync_policy().guard_window, Duration::from_secs(12));
        assert!(matches!(config.remote_target(), RemoteTarget::Http { .. }));
    }

    #[test]
    fn rejects_malformed_numbers() {
        let mut config = Config::default();
        let result = config.apply_env(|key| (key == "ARBOR_PORT").then(|| "eighty".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn reads_extra_artifacts_from_env() {
        let mut config = Config::default();
        config
            .apply_env(|key| {
                (key == "ARBOR_EXTRA_ARTIFACTS")
                    .then(|| "userdata=/data/userdata.json, media=/data/media.json".to_string())
            })
            .unwrap();

        assert_eq!(
            config.extra_artifacts,
            vec![
                ArtifactConfig {
                    record_name: "userdata".to_string(),
                    path: PathBuf::from("/data/userdata.json"),
                },
                ArtifactConfig {
                    record_name: "media".to_string(),
                    path: PathBuf::from("/data/media.json"),
                },
            ]
        );
    }

    #[test]
    fn rejects_extra_artifact_without_path() {
        let mut config = Config::default();
        let result = config.apply_env(|key| {
            (key == "ARBOR_EXTRA_ARTIFACTS").then(|| "userdata".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "root_name": "Start", "min_plausible_bytes": 4 }"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.root_name, "Start");
        assert_eq!(config.min_plausible_bytes, 4);
        assert_eq!(config.record_name, "database");
        assert!(config.extra_artifacts.is_empty());
    }
}
