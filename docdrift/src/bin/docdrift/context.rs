use anyhow::{Context, Result};
use docdrift::config::{CONFIG_DIR, DriftConfig};
use docdrift::{RedisStore, Snapshot};
use std::path::{Path, PathBuf};

/// Project context for docdrift operations
pub struct ProjectContext {
    /// Root directory of the project (where .docdrift lives)
    pub project_root: PathBuf,
    /// Path to .docdrift directory
    pub docdrift_dir: PathBuf,
    /// Path to config file
    pub config_path: PathBuf,
    /// Path to snapshots directory
    pub snapshots_dir: PathBuf,
    /// Path to migrations directory
    pub migrations_dir: PathBuf,
    /// Loaded configuration, defaults when no file exists
    pub config: DriftConfig,
}

impl ProjectContext {
    /// Find and load project context from current directory or ancestors
    pub fn find() -> Result<Self> {
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::find_from(&current_dir)
    }

    /// Find project context starting from the given directory.
    ///
    /// Falls back to `start` itself when no ancestor has a `.docdrift` directory.
    pub fn find_from(start: &Path) -> Result<Self> {
        let project_root = start
            .ancestors()
            .find(|dir| dir.join(CONFIG_DIR).is_dir())
            .unwrap_or(start)
            .to_path_buf();
        Self::from_root(project_root)
    }

    /// Create context from a known project root
    pub fn from_root(project_root: PathBuf) -> Result<Self> {
        let docdrift_dir = project_root.join(CONFIG_DIR);
        let config_path = DriftConfig::path_in(&project_root);
        let config = DriftConfig::load_or_default(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?;

        let snapshots_dir = project_root.join(&config.project.snapshots_dir);
        let migrations_dir = project_root.join(&config.project.migrations_dir);

        Ok(Self {
            project_root,
            docdrift_dir,
            config_path,
            snapshots_dir,
            migrations_dir,
            config,
        })
    }

    /// Check if docdrift is initialized in this project
    pub fn is_initialized(&self) -> bool {
        self.docdrift_dir.exists() && self.config_path.exists()
    }

    /// Resolve a snapshot path given on the command line, defaulting to
    /// `<snapshots_dir>/<default_name>.json`.
    pub fn snapshot_path(&self, given: Option<&Path>, default_name: &str) -> PathBuf {
        match given {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.project_root.join(path),
            None => self.snapshots_dir.join(format!("{default_name}.json")),
        }
    }

    pub fn load_snapshot(&self, path: &Path) -> Result<Snapshot> {
        docdrift::snapshot::load_snapshot(path).with_context(|| format!("Failed to load snapshot {}", path.display()))
    }

    /// Get the Redis URL, expanding environment variables
    pub fn redis_url(&self) -> Result<String> {
        self.config
            .redis_url()
            .context("Redis URL is not configured")
    }

    /// Connect to the configured Redis deployment
    pub async fn connect(&self) -> Result<RedisStore> {
        let url = self.redis_url()?;
        RedisStore::connect(&url, self.config.redis_options())
            .await
            .context("Failed to connect to Redis")
    }
}
