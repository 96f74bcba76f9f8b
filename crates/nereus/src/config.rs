//! Workspace configuration.
//!
//! Read from `.nereus/config.yaml` under the workspace root. Every field has a
//! default, so a missing file and an empty file both mean "use the defaults".

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Name of the workspace-local state directory
pub const NEREUS_DIR_NAME: &str = ".nereus";

/// Name of the configuration file inside [`NEREUS_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Default pass ceiling
pub const DEFAULT_MAX_PASSES: u32 = 32;

/// Default number of nodes per commit transaction
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Analysis configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Upper bound on passes before the run stops with a warning
    pub max_passes: u32,

    /// Run work items of a pass on a rayon pool
    pub parallel: bool,

    /// Worker threads for the pool (`None` = rayon default)
    pub threads: Option<usize>,

    /// Nodes written per transaction when committing a pass
    pub batch_size: usize,

    /// Database file, relative to the workspace root unless absolute
    pub database: PathBuf,

    /// Child names the resource collector never descends into
    pub exclude: Vec<String>,

    /// Units skipped for the whole run
    pub disabled_units: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            parallel: true,
            threads: None,
            batch_size: DEFAULT_BATCH_SIZE,
            database: PathBuf::from(NEREUS_DIR_NAME).join("graph.db"),
            exclude: [".git", "target", "node_modules", NEREUS_DIR_NAME]
                .into_iter()
                .map(String::from)
                .collect(),
            disabled_units: Vec::new(),
        }
    }
}

impl Config {
    /// Path of the configuration file for a workspace.
    #[must_use]
    pub fn path_in(workspace_root: &Path) -> PathBuf {
        workspace_root.join(NEREUS_DIR_NAME).join(CONFIG_FILE_NAME)
    }

    /// Load the workspace configuration, falling back to defaults when the
    /// file does not exist.
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let path = Self::path_in(workspace_root);
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load and validate a configuration file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse and validate YAML. Empty input yields the defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as YAML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::Config(format!("YAML error: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_passes == 0 {
            return Err(Error::Config("max_passes must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.threads == Some(0) {
            return Err(Error::Config(
                "threads must be at least 1 (omit it for the default)".to_string(),
            ));
        }
        if self.database.as_os_str().is_empty() {
            return Err(Error::Config("database path must not be empty".to_string()));
        }
        Ok(())
    }

    /// Absolute database path for a workspace.
    #[must_use]
    pub fn database_path(&self, workspace_root: &Path) -> PathBuf {
        if self.database.is_absolute() {
            self.database.clone()
        } else {
            workspace_root.join(&self.database)
        }
    }

    /// Whether the collector skips a child with this name.
    #[must_use]
    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|e| e == name)
    }

    /// Whether a unit is disabled for the run.
    #[must_use]
    pub fn is_unit_disabled(&self, unit: &str) -> bool {
        self.disabled_units.iter().any(|u| u == unit)
    }
}
