use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("domain registry is not initialized")]
    NotInitialized,
    #[error("domain registry is full ({capacity} entries)")]
    Capacity { capacity: usize },
    #[error("invalid domain name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error(transparent)]
    Table(#[from] TableError),
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("map {0} not found in eBPF object")]
    MissingMap(&'static str),
    #[error("map {map} has unexpected type: {source}")]
    WrongType {
        map: &'static str,
        #[source]
        source: aya::maps::MapError,
    },
    #[error("map {map} is full")]
    Full { map: &'static str },
    #[error("{op} on map {map} failed: {source}")]
    Syscall {
        map: &'static str,
        op: &'static str,
        #[source]
        source: aya::maps::MapError,
    },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("lookup of {name} failed: {source}")]
    Lookup {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} has no IPv4 addresses")]
    NoAddresses(String),
}

#[derive(Debug, Error)]
pub enum ListError {
    #[error("no readable list found (tried {})", display_paths(.candidates))]
    NotFound { candidates: Vec<PathBuf> },
    #[error("failed to read line {line} of {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        line: usize,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum WhitelistError {
    #[error(transparent)]
    Source(#[from] ListError),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Failures that end the background loop. Per-domain resolution failures
/// never get here.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Whitelist(#[from] WhitelistError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Invalid(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_lists_every_candidate() {
        let err = ListError::NotFound {
            candidates: vec![PathBuf::from("a.txt"), PathBuf::from("/opt/b.txt")],
        };
        assert_eq!(
            err.to_string(),
            "no readable list found (tried a.txt, /opt/b.txt)"
        );
    }

    #[test]
    fn full_table_names_the_map() {
        let err = TableError::Full {
            map: "whitelist_ip_map",
        };
        assert_eq!(err.to_string(), "map whitelist_ip_map is full");
    }

    #[test]
    fn capacity_error_names_the_bound() {
        let err = RegistryError::Capacity { capacity: 3 };
        assert!(err.to_string().contains('3'));
    }
}
