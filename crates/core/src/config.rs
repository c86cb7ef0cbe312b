//! TOML-based configuration for the resolution engine.
//!
//! The content store directory can be overridden at runtime with the
//! `TFVCRESOLVE_CONTENT_DIR` environment variable, applied by
//! [`EngineConfig::apply_env_overrides`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::conflict::{AutoContentMerger, ContentMerger, NameMerger, NamePolicy, PolicyNameMerger};
use crate::errors::ConfigError;
use crate::store::ContentStore;
use crate::workspace::WorkingFolder;

/// Environment variable that overrides `store.base_dir`.
pub const CONTENT_DIR_ENV: &str = "TFVCRESOLVE_CONTENT_DIR";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,

    /// Content store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Non-interactive merge behaviour.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Working-folder mappings of the local workspace.
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// General engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Log level (default "info").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Team project name passed to server queries.
    #[serde(default)]
    pub project: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            project: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Content store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Parent of the per-run content directory. The system temp directory
    /// when unset.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Settings for the non-interactive mergers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Side kept on rename/rename conflicts.
    #[serde(default)]
    pub name_policy: NamePolicy,

    /// Write conflicted auto-merges with markers instead of leaving the
    /// conflict unresolved.
    #[serde(default)]
    pub write_conflict_markers: bool,
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Workspace mappings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub folders: Vec<WorkingFolder>,
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl EngineConfig {
    /// Load from a TOML file. Environment overrides are not applied.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Apply `TFVCRESOLVE_CONTENT_DIR` if set.
    pub fn apply_env_overrides(&mut self) {
        match std::env::var(CONTENT_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => {
                debug!(env_name = CONTENT_DIR_ENV, dir = %dir, "content dir overridden");
                self.store.base_dir = Some(PathBuf::from(dir));
            }
            Ok(_) => warn!(env_name = CONTENT_DIR_ENV, "env var is set but empty"),
            Err(_) => {}
        }
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.engine.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "engine.log_level".into(),
                detail: format!("must be one of {}", LOG_LEVELS.join(", ")),
            });
        }
        if self.engine.project.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "engine.project".into(),
                detail: "project name must not contain '/'".into(),
            });
        }
        if let Some(dir) = &self.store.base_dir {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "store.base_dir".into(),
                    detail: "base dir must not be empty".into(),
                });
            }
        }
        for (idx, folder) in self.workspace.folders.iter().enumerate() {
            if folder.local_path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("workspace.folders[{idx}].local_path"),
                    detail: "local path must not be empty".into(),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load, apply overrides, and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// A content store rooted where this config says.
    pub fn content_store(&self) -> ContentStore {
        ContentStore::new(self.store.base_dir.clone())
    }

    pub fn name_merger(&self) -> Box<dyn NameMerger> {
        Box::new(PolicyNameMerger::new(self.merge.name_policy))
    }

    pub fn content_merger(&self) -> Box<dyn ContentMerger> {
        Box::new(AutoContentMerger::new(self.merge.write_conflict_markers))
    }
}
