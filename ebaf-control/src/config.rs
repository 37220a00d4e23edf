use std::{path::PathBuf, time::Duration};

use ebaf_common::ADDRESS_TABLE_CAPACITY;

use crate::error::ConfigError;

pub const DEFAULT_RESOLVE_INTERVAL: Duration = Duration::from_secs(600);
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_WHITELIST_PATHS: [&str; 2] = [
    "spotify-whitelist.txt",
    "/usr/local/share/ebaf/spotify-whitelist.txt",
];
pub const DEFAULT_BLACKLIST_PATHS: [&str; 2] = [
    "spotify-blacklist.txt",
    "/usr/local/share/ebaf/spotify-blacklist.txt",
];
pub const DEFAULT_DOMAIN_STATS_FILE: &str = "/tmp/ebaf-domain-stats.dat";
pub const DEFAULT_STATS_FILE: &str = "/tmp/ebaf-stats.dat";

/// Control-plane settings, assembled by the CLI and checked with
/// [`AgentConfig::validate`] before anything touches the kernel.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub resolve_interval: Duration,
    pub status_interval: Duration,
    pub whitelist_paths: Vec<PathBuf>,
    pub blacklist_paths: Vec<PathBuf>,
    pub domain_stats_file: PathBuf,
    pub stats_file: PathBuf,
    /// Re-run the whitelist refresh on every cycle, not only at startup.
    pub refresh_whitelist_each_cycle: bool,
    /// Address Table size for in-process tables.
    pub address_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            resolve_interval: DEFAULT_RESOLVE_INTERVAL,
            status_interval: DEFAULT_STATUS_INTERVAL,
            whitelist_paths: DEFAULT_WHITELIST_PATHS.iter().map(PathBuf::from).collect(),
            blacklist_paths: DEFAULT_BLACKLIST_PATHS.iter().map(PathBuf::from).collect(),
            domain_stats_file: PathBuf::from(DEFAULT_DOMAIN_STATS_FILE),
            stats_file: PathBuf::from(DEFAULT_STATS_FILE),
            refresh_whitelist_each_cycle: true,
            address_capacity: ADDRESS_TABLE_CAPACITY as usize,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolve_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "resolve interval must be greater than zero".into(),
            ));
        }
        if self.status_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "status interval must be greater than zero".into(),
            ));
        }
        if self.whitelist_paths.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one whitelist path is required".into(),
            ));
        }
        if self.blacklist_paths.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one blacklist path is required".into(),
            ));
        }
        if self.address_capacity == 0 {
            return Err(ConfigError::Invalid(
                "address table capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
