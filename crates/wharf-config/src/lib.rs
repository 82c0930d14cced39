//! Run settings for wharf.
//!
//! Settings decide what a run is allowed to do. With every flag off (the
//! default) a run only introspects and records the DDL it would have issued,
//! which is how "plan" works. Turning flags on lets the same run execute
//! statements for real.
//!
//! Settings live in `.config/wharf.styx`, found by searching the current
//! directory and its parents:
//!
//! ```styx
//! env_prefix DEV__
//! execute_safe_ddl true
//! exclude_object_types (masking_policy)
//! max_workers 16
//! ```

use facet::Facet;
use std::path::{Path, PathBuf};

/// Warehouse edition. Some object kinds need a minimum edition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Facet)]
#[repr(u8)]
pub enum Edition {
    Standard,
    #[default]
    Enterprise,
    BusinessCritical,
}

/// Settings consumed read-only by the engine for one run.
#[derive(Debug, Clone, Default, Facet)]
pub struct Settings {
    /// Prefix prepended to databases and account-level objects, so that
    /// several environments can share one account (`DEV__`, `CI_1234__`).
    #[facet(default)]
    pub env_prefix: Option<String>,

    /// Run CREATE and additive ALTER statements.
    #[facet(default)]
    pub execute_safe_ddl: bool,

    /// Run DROP and destructive ALTER statements.
    #[facet(default)]
    pub execute_unsafe_ddl: bool,

    /// Allow tables to be re-created when they cannot be altered in place.
    #[facet(default)]
    pub execute_replace_table: bool,

    #[facet(default)]
    pub execute_masking_policy: bool,

    #[facet(default)]
    pub execute_row_access_policy: bool,

    #[facet(default)]
    pub execute_aggregation_policy: bool,

    #[facet(default)]
    pub execute_projection_policy: bool,

    #[facet(default)]
    pub execute_network_policy: bool,

    #[facet(default)]
    pub execute_resource_monitor: bool,

    #[facet(default)]
    pub execute_account_parameter: bool,

    /// Only resolve these object kinds (empty means all).
    #[facet(default)]
    pub include_object_types: Vec<String>,

    /// Never resolve these object kinds.
    #[facet(default)]
    pub exclude_object_types: Vec<String>,

    /// Size of the worker pool. Defaults to four workers per core.
    #[facet(default)]
    pub max_workers: Option<usize>,

    /// Re-apply user passwords even when no difference was detected.
    #[facet(default)]
    pub refresh_user_passwords: bool,

    /// Re-apply future grants even when no difference was detected.
    #[facet(default)]
    pub refresh_future_grants: bool,

    /// Skip resolvers that have nothing declared instead of dropping
    /// everything they find.
    #[facet(default)]
    pub ignore_empty_kinds: bool,

    #[facet(default)]
    pub edition: Edition,

    /// Statements run once when the engine starts (`USE ROLE ...`).
    #[facet(default)]
    pub session_statements: Vec<String>,
}

impl Settings {
    /// Settings for a run that executes everything it decides.
    pub fn apply_all() -> Self {
        Self {
            execute_safe_ddl: true,
            execute_unsafe_ddl: true,
            execute_replace_table: true,
            execute_masking_policy: true,
            execute_row_access_policy: true,
            execute_aggregation_policy: true,
            execute_projection_policy: true,
            execute_network_policy: true,
            execute_resource_monitor: true,
            execute_account_parameter: true,
            ..Self::default()
        }
    }

    /// Worker pool size, falling back to four workers per available core.
    pub fn worker_count(&self) -> usize {
        self.max_workers.filter(|n| *n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get() * 4)
                .unwrap_or(8)
        })
    }

    /// The environment prefix, upper-cased, or empty.
    pub fn env_prefix(&self) -> String {
        self.env_prefix
            .as_deref()
            .map(str::to_uppercase)
            .unwrap_or_default()
    }
}

/// Load settings from `.config/wharf.styx`, searching up the directory tree.
pub fn load() -> Result<(Settings, PathBuf), ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io(e.to_string()))?;
    load_from(&cwd)
}

/// Load settings starting from a specific directory.
pub fn load_from(start: &Path) -> Result<(Settings, PathBuf), ConfigError> {
    let config_path = find_config_file(start)?;
    let content =
        std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io(e.to_string()))?;

    let settings = parse(&content)?;
    Ok((settings, config_path))
}

/// Parse settings from Styx source.
pub fn parse(source: &str) -> Result<Settings, ConfigError> {
    facet_styx::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Find `.config/wharf.styx` by searching up the directory tree.
fn find_config_file(start: &Path) -> Result<PathBuf, ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".config/wharf.styx");
        if config_path.exists() {
            return Ok(config_path);
        }

        if !current.pop() {
            return Err(ConfigError::NotFound);
        }
    }
}

/// Errors that can occur when loading settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no .config/wharf.styx found in current directory or any parent")]
    NotFound,

    #[error("failed to read .config/wharf.styx: {0}")]
    Io(String),

    #[error("failed to parse .config/wharf.styx: {0}")]
    Parse(String),
}
