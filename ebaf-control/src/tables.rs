//! Control-plane view of the classifier's maps.
//!
//! The registry and whitelist only see these traits; [`crate::kernel`]
//! implements them over the loaded eBPF maps and [`crate::memory`] over
//! in-process tables for dry runs and tests.

use std::net::Ipv4Addr;

use ebaf_common::Ipv4Key;

use crate::error::TableError;

pub(crate) fn key_of(addr: Ipv4Addr) -> Ipv4Key {
    Ipv4Key::from_octets(addr.octets())
}

pub(crate) fn addr_of(key: Ipv4Key) -> Ipv4Addr {
    Ipv4Addr::from(key.octets())
}

/// Blacklist map: IPv4 -> hit counter.
pub trait AddressTable: Send + Sync {
    /// Insert `addr` with a zero counter unless it is already present.
    /// Returns `true` when a new entry was created. An existing counter is
    /// never reset.
    fn insert_if_absent(&self, addr: Ipv4Addr) -> Result<bool, TableError>;

    /// Current hit counter, `None` if `addr` is not in the table.
    fn hits(&self, addr: Ipv4Addr) -> Result<Option<u64>, TableError>;

    /// Every entry currently in the table, in map iteration order.
    fn entries(&self) -> Result<Vec<(Ipv4Addr, u64)>, TableError>;
}

/// Whitelist map: IPv4 -> presence marker.
pub trait ExceptionTable: Send + Sync {
    fn insert(&self, addr: Ipv4Addr) -> Result<(), TableError>;

    fn contains(&self, addr: Ipv4Addr) -> Result<bool, TableError>;
}

/// `TOTAL` / `BLOCKED` packet counters.
pub trait StatsTable: Send + Sync {
    fn read(&self) -> Result<GlobalStats, TableError>;

    /// Zero both slots.
    fn reset(&self) -> Result<(), TableError>;
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GlobalStats {
    pub total: u64,
    pub blocked: u64,
}

impl std::fmt::Display for GlobalStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Total packets: {}, Blocked packets: {}",
            self.total, self.blocked
        )
    }
}
