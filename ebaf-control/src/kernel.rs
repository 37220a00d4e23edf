//! Table ports backed by the maps of the loaded XDP object.
//!
//! aya map writes need `&mut`, so each map sits behind its own mutex; the
//! control plane is the only userspace writer and the kernel side never waits
//! on it.

use std::{net::Ipv4Addr, path::Path, sync::Mutex};

use aya::{
    Ebpf,
    maps::{Array, HashMap, Map, MapData, MapError},
};
use ebaf_common::{
    EXCEPTION_MARKER, Ipv4Key, MAP_ADDRESS_TABLE, MAP_EXCEPTION_TABLE, MAP_STATS, STAT_BLOCKED,
    STAT_TOTAL,
};
use tracing::debug;

use crate::{
    error::TableError,
    tables::{AddressTable, ExceptionTable, GlobalStats, StatsTable, addr_of, key_of},
};

const BPF_ANY: u64 = 0;
const BPF_NOEXIST: u64 = 1;

/// The three map handles the control plane needs, taken out of a loaded
/// object. Failing to find any of them is fatal for startup.
pub struct KernelTables {
    pub addresses: KernelAddressTable,
    pub exceptions: KernelExceptionTable,
    pub stats: KernelStatsTable,
}

impl KernelTables {
    pub fn take(bpf: &mut Ebpf) -> Result<Self, TableError> {
        Ok(Self {
            addresses: KernelAddressTable::new(take_map(bpf, MAP_ADDRESS_TABLE)?)?,
            exceptions: KernelExceptionTable::new(take_map(bpf, MAP_EXCEPTION_TABLE)?)?,
            stats: KernelStatsTable::new(take_map(bpf, MAP_STATS)?)?,
        })
    }
}

fn take_map(bpf: &mut Ebpf, name: &'static str) -> Result<Map, TableError> {
    bpf.take_map(name).ok_or(TableError::MissingMap(name))
}

/// A plain hash map at `max_entries` rejects new keys with `E2BIG`.
fn insert_error(map: &'static str, source: MapError) -> TableError {
    match source {
        MapError::SyscallError(err) if err.io_error.raw_os_error() == Some(libc::E2BIG) => {
            TableError::Full { map }
        }
        source => TableError::Syscall {
            map,
            op: "insert",
            source,
        },
    }
}

pub struct KernelAddressTable {
    map: Mutex<HashMap<MapData, Ipv4Key, u64>>,
}

impl KernelAddressTable {
    fn new(map: Map) -> Result<Self, TableError> {
        let map = HashMap::try_from(map).map_err(|source| TableError::WrongType {
            map: MAP_ADDRESS_TABLE,
            source,
        })?;
        Ok(Self {
            map: Mutex::new(map),
        })
    }

    /// Open the Address Table pinned by a running agent.
    pub fn from_pin<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        let map_data = MapData::from_pin(path).map_err(|source| TableError::Syscall {
            map: MAP_ADDRESS_TABLE,
            op: "open pin",
            source,
        })?;
        Self::new(Map::from_map_data(map_data).map_err(|source| {
            TableError::WrongType {
                map: MAP_ADDRESS_TABLE,
                source,
            }
        })?)
    }
}

impl AddressTable for KernelAddressTable {
    fn insert_if_absent(&self, addr: Ipv4Addr) -> Result<bool, TableError> {
        let mut map = self.map.lock().expect("address table mutex poisoned");
        match map.insert(key_of(addr), 0u64, BPF_NOEXIST) {
            Ok(()) => Ok(true),
            Err(MapError::SyscallError(err))
                if err.io_error.raw_os_error() == Some(libc::EEXIST) =>
            {
                Ok(false)
            }
            Err(source) => Err(insert_error(MAP_ADDRESS_TABLE, source)),
        }
    }

    fn hits(&self, addr: Ipv4Addr) -> Result<Option<u64>, TableError> {
        let map = self.map.lock().expect("address table mutex poisoned");
        match map.get(&key_of(addr), 0) {
            Ok(hits) => Ok(Some(hits)),
            Err(MapError::KeyNotFound) => Ok(None),
            Err(source) => Err(TableError::Syscall {
                map: MAP_ADDRESS_TABLE,
                op: "lookup",
                source,
            }),
        }
    }

    fn entries(&self) -> Result<Vec<(Ipv4Addr, u64)>, TableError> {
        let map = self.map.lock().expect("address table mutex poisoned");
        let mut entries = Vec::new();
        for item in map.iter() {
            match item {
                Ok((key, hits)) => entries.push((addr_of(key), hits)),
                // LRU eviction can remove a key between get_next_key and lookup
                Err(MapError::KeyNotFound) => continue,
                Err(source) => {
                    return Err(TableError::Syscall {
                        map: MAP_ADDRESS_TABLE,
                        op: "iterate",
                        source,
                    });
                }
            }
        }
        debug!(count = entries.len(), "address table walked");
        Ok(entries)
    }
}

pub struct KernelExceptionTable {
    map: Mutex<HashMap<MapData, Ipv4Key, u8>>,
}

impl KernelExceptionTable {
    fn new(map: Map) -> Result<Self, TableError> {
        let map = HashMap::try_from(map).map_err(|source| TableError::WrongType {
            map: MAP_EXCEPTION_TABLE,
            source,
        })?;
        Ok(Self {
            map: Mutex::new(map),
        })
    }
}

impl ExceptionTable for KernelExceptionTable {
    fn insert(&self, addr: Ipv4Addr) -> Result<(), TableError> {
        let mut map = self.map.lock().expect("exception table mutex poisoned");
        map.insert(key_of(addr), EXCEPTION_MARKER, BPF_ANY)
            .map_err(|source| insert_error(MAP_EXCEPTION_TABLE, source))
    }

    fn contains(&self, addr: Ipv4Addr) -> Result<bool, TableError> {
        let map = self.map.lock().expect("exception table mutex poisoned");
        match map.get(&key_of(addr), 0) {
            Ok(_) => Ok(true),
            Err(MapError::KeyNotFound) => Ok(false),
            Err(source) => Err(TableError::Syscall {
                map: MAP_EXCEPTION_TABLE,
                op: "lookup",
                source,
            }),
        }
    }
}

pub struct KernelStatsTable {
    map: Mutex<Array<MapData, u64>>,
}

impl KernelStatsTable {
    fn new(map: Map) -> Result<Self, TableError> {
        let map = Array::try_from(map).map_err(|source| TableError::WrongType {
            map: MAP_STATS,
            source,
        })?;
        Ok(Self {
            map: Mutex::new(map),
        })
    }
}

impl StatsTable for KernelStatsTable {
    fn read(&self) -> Result<GlobalStats, TableError> {
        let map = self.map.lock().expect("stats table mutex poisoned");
        let read_slot = |slot: u32| {
            map.get(&slot, 0).map_err(|source| TableError::Syscall {
                map: MAP_STATS,
                op: "lookup",
                source,
            })
        };
        Ok(GlobalStats {
            total: read_slot(STAT_TOTAL)?,
            blocked: read_slot(STAT_BLOCKED)?,
        })
    }

    fn reset(&self) -> Result<(), TableError> {
        let mut map = self.map.lock().expect("stats table mutex poisoned");
        for slot in [STAT_TOTAL, STAT_BLOCKED] {
            map.set(slot, 0u64, 0).map_err(|source| TableError::Syscall {
                map: MAP_STATS,
                op: "update",
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use aya::sys::SyscallError;

    use super::*;

    fn update_failure(errno: i32) -> MapError {
        MapError::SyscallError(SyscallError {
            call: "bpf_map_update_elem",
            io_error: io::Error::from_raw_os_error(errno),
        })
    }

    #[test]
    fn e2big_means_the_table_is_full() {
        let err = insert_error(MAP_EXCEPTION_TABLE, update_failure(libc::E2BIG));
        assert!(matches!(
            err,
            TableError::Full {
                map: MAP_EXCEPTION_TABLE
            }
        ));
    }

    #[test]
    fn other_errnos_stay_syscall_errors() {
        let err = insert_error(MAP_EXCEPTION_TABLE, update_failure(libc::EPERM));
        assert!(matches!(err, TableError::Syscall { op: "insert", .. }));
    }
}
