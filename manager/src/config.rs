//! Runtime settings for the manager, built from command-line arguments in
//! `main.rs` or from [`ManagerConfig::new`] in tests.

use clap::ValueEnum;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Whether granting op also whitelists the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OpWhitelistPolicy {
    Never,
    /// Only when the instance enforces its whitelist.
    WhenEnabled,
    Always,
}

impl OpWhitelistPolicy {
    pub fn applies(self, whitelist_enabled: bool) -> bool {
        match self {
            OpWhitelistPolicy::Never => false,
            OpWhitelistPolicy::WhenEnabled => whitelist_enabled,
            OpWhitelistPolicy::Always => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root holding `jars/`, `servers/` and `audit.log`
    pub storage_dir: PathBuf,
    /// Host name shown in instance addresses
    pub hostname: String,
    /// Java command for current releases
    pub java: String,
    /// Java command for 1.16 and older releases
    pub java_legacy: String,
    /// Heap ceiling used when a record leaves it empty
    pub default_max_mem: String,
    /// Connect timeout for the liveness probe
    pub probe_timeout: Duration,
    /// Bound on a single control-endpoint exchange
    pub command_timeout: Duration,
    /// Bound on waiting for an instance to go down after `stop`
    pub stop_timeout: Duration,
    pub op_whitelist_policy: OpWhitelistPolicy,
}

impl ManagerConfig {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            hostname: "localhost".to_string(),
            java: "java".to_string(),
            java_legacy: "java8".to_string(),
            default_max_mem: "6G".to_string(),
            probe_timeout: Duration::from_millis(500),
            command_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(120),
            op_whitelist_policy: OpWhitelistPolicy::WhenEnabled,
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }
}
