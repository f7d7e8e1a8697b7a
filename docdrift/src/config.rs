//! Project configuration stored in `.docdrift/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::diff::{DiffOptions, RenameTieBreak};
use crate::errors::DriftError;
use crate::executor::ExecutorOptions;
use crate::ledger::{DEFAULT_CONFIG_COLLECTION, DEFAULT_RECORDS_COLLECTION, Ledger};
use crate::store::RedisStoreOptions;

pub const CONFIG_DIR: &str = ".docdrift";
pub const CONFIG_FILE: &str = "config.toml";

static ENV_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid"));

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftConfig {
    #[serde(default)]
    pub project: ProjectSettings,
    #[serde(default)]
    pub diff: DiffSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub redis: RedisSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: String,
    #[serde(default = "default_snapshots_dir")]
    pub snapshots_dir: String,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            migrations_dir: default_migrations_dir(),
            snapshots_dir: default_snapshots_dir(),
        }
    }
}

fn default_migrations_dir() -> String {
    "migrations".to_string()
}

fn default_snapshots_dir() -> String {
    ".docdrift/snapshots".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffSettings {
    #[serde(default = "default_rename_threshold")]
    pub rename_threshold: f64,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_managed_fields")]
    pub managed_fields: Vec<String>,
    #[serde(default)]
    pub rename_ties: RenameTieBreak,
}

impl Default for DiffSettings {
    fn default() -> Self {
        Self {
            rename_threshold: default_rename_threshold(),
            max_depth: default_max_depth(),
            managed_fields: default_managed_fields(),
            rename_ties: RenameTieBreak::default(),
        }
    }
}

fn default_rename_threshold() -> f64 {
    0.7
}

fn default_max_depth() -> usize {
    5
}

fn default_managed_fields() -> Vec<String> {
    vec!["_id".to_string(), "__v".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default = "default_records_collection")]
    pub records_collection: String,
    #[serde(default = "default_config_collection")]
    pub config_collection: String,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            records_collection: default_records_collection(),
            config_collection: default_config_collection(),
        }
    }
}

fn default_records_collection() -> String {
    DEFAULT_RECORDS_COLLECTION.to_string()
}

fn default_config_collection() -> String {
    DEFAULT_CONFIG_COLLECTION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub run_manual: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            run_manual: false,
        }
    }
}

fn default_settle_delay_ms() -> u64 {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_transactions")]
    pub transactions: bool,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_prefix(),
            transactions: default_transactions(),
        }
    }
}

fn default_redis_url() -> String {
    "${REDIS_URL}".to_string()
}

fn default_prefix() -> String {
    "docdrift".to_string()
}

fn default_transactions() -> bool {
    true
}

impl DriftConfig {
    /// `<root>/.docdrift/config.toml`
    pub fn path_in(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    pub fn from_toml(text: &str) -> Result<Self, DriftError> {
        let config: DriftConfig = toml::from_str(text).map_err(|err| DriftError::Config {
            message: err.to_string(),
        })?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, DriftError> {
        let text = std::fs::read_to_string(path).map_err(|err| DriftError::io(path, err))?;
        Self::from_toml(&text).map_err(|err| match err {
            DriftError::Config { message } => DriftError::Config {
                message: format!("{}: {message}", path.display()),
            },
            other => other,
        })
    }

    /// Load `path` if it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, DriftError> {
        if path.exists() { Self::load(path) } else { Ok(Self::default()) }
    }

    pub fn save(&self, path: &Path) -> Result<(), DriftError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| DriftError::io(parent, err))?;
        }
        let text = toml::to_string_pretty(self).map_err(|err| DriftError::Config {
            message: err.to_string(),
        })?;
        std::fs::write(path, text).map_err(|err| DriftError::io(path, err))
    }

    fn check(&self) -> Result<(), DriftError> {
        if !(0.0..=1.0).contains(&self.diff.rename_threshold) {
            return Err(DriftError::Config {
                message: format!(
                    "diff.rename_threshold must be between 0 and 1, got {}",
                    self.diff.rename_threshold
                ),
            });
        }
        if self.diff.max_depth == 0 {
            return Err(DriftError::Config {
                message: "diff.max_depth must be at least 1".into(),
            });
        }
        if self.ledger.records_collection.trim().is_empty() {
            return Err(DriftError::Config {
                message: "ledger.records_collection must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            rename_threshold: self.diff.rename_threshold,
            max_depth: self.diff.max_depth,
            managed_fields: self.diff.managed_fields.clone(),
            rename_ties: self.diff.rename_ties,
        }
    }

    pub fn ledger(&self) -> Ledger {
        Ledger::new(&self.ledger.records_collection, &self.ledger.config_collection)
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            settle_delay: Duration::from_millis(self.executor.settle_delay_ms),
            run_manual: self.executor.run_manual,
            dry_run: false,
        }
    }

    pub fn redis_options(&self) -> RedisStoreOptions {
        RedisStoreOptions {
            prefix: self.redis.prefix.clone(),
            transactions: self.redis.transactions,
        }
    }

    /// Redis URL with `${VAR}` references expanded.
    pub fn redis_url(&self) -> Result<String, DriftError> {
        expand_env(&self.redis.url)
    }
}

/// Replace every `${VAR}` in `value` with the variable's value.
pub fn expand_env(value: &str) -> Result<String, DriftError> {
    let mut missing = None;
    let expanded = ENV_VAR.replace_all(value, |caps: &Captures| match std::env::var(&caps[1]) {
        Ok(found) => found,
        Err(_) => {
            missing.get_or_insert_with(|| caps[1].to_string());
            String::new()
        }
    });
    match missing {
        Some(name) => Err(DriftError::Config {
            message: format!("environment variable {name} is not set"),
        }),
        None => Ok(expanded.into_owned()),
    }
}
