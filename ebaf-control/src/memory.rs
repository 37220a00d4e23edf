//! In-process stand-ins for the kernel maps.
//!
//! Used by `ebaf dry-run` and by tests. The Address Table keeps the kernel's
//! LRU behaviour: at capacity, an insert evicts the entry that was least
//! recently inserted or hit by the classifier. The Exception Table is a plain
//! hash like its kernel counterpart and refuses new keys once full.

use std::{
    collections::{HashMap, HashSet},
    net::Ipv4Addr,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use ebaf_common::{
    ADDRESS_TABLE_CAPACITY, EXCEPTION_TABLE_CAPACITY, FilterTables, Ipv4Key, MAP_EXCEPTION_TABLE,
    STAT_BLOCKED, STAT_TOTAL, Verdict, classify_frame,
};

use crate::{
    error::TableError,
    tables::{AddressTable, ExceptionTable, GlobalStats, StatsTable, addr_of, key_of},
};

pub struct MemoryTables {
    addresses: Mutex<LruTable>,
    exceptions: Mutex<HashSet<Ipv4Key>>,
    exception_capacity: usize,
    stats: [AtomicU64; 2],
}

struct LruTable {
    capacity: usize,
    clock: u64,
    entries: HashMap<Ipv4Key, Slot>,
}

struct Slot {
    hits: u64,
    last_used: u64,
}

impl LruTable {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl MemoryTables {
    pub fn new(address_capacity: usize) -> Self {
        Self {
            addresses: Mutex::new(LruTable {
                capacity: address_capacity.max(1),
                clock: 0,
                entries: HashMap::new(),
            }),
            exceptions: Mutex::new(HashSet::new()),
            exception_capacity: EXCEPTION_TABLE_CAPACITY as usize,
            stats: [AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    pub fn with_exception_capacity(mut self, capacity: usize) -> Self {
        self.exception_capacity = capacity;
        self
    }

    /// Run one frame through the same decision the XDP program makes.
    pub fn classify(&self, frame: &[u8]) -> Verdict {
        classify_frame(self, frame)
    }

    pub fn address_count(&self) -> usize {
        self.addresses
            .lock()
            .expect("address table mutex poisoned")
            .entries
            .len()
    }
}

impl Default for MemoryTables {
    fn default() -> Self {
        Self::new(ADDRESS_TABLE_CAPACITY as usize)
    }
}

impl FilterTables for MemoryTables {
    fn is_excepted(&self, key: &Ipv4Key) -> bool {
        self.exceptions
            .lock()
            .expect("exception table mutex poisoned")
            .contains(key)
    }

    fn record_hit(&self, key: &Ipv4Key) -> bool {
        let mut table = self.addresses.lock().expect("address table mutex poisoned");
        let now = table.tick();
        match table.entries.get_mut(key) {
            Some(slot) => {
                slot.hits = slot.hits.wrapping_add(1);
                slot.last_used = now;
                true
            }
            None => false,
        }
    }

    fn bump_stat(&self, slot: u32) {
        if let Some(counter) = self.stats.get(slot as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl AddressTable for MemoryTables {
    fn insert_if_absent(&self, addr: Ipv4Addr) -> Result<bool, TableError> {
        let mut table = self.addresses.lock().expect("address table mutex poisoned");
        let key = key_of(addr);
        if table.entries.contains_key(&key) {
            return Ok(false);
        }
        if table.entries.len() >= table.capacity {
            table.evict_oldest();
        }
        let now = table.tick();
        table.entries.insert(
            key,
            Slot {
                hits: 0,
                last_used: now,
            },
        );
        Ok(true)
    }

    fn hits(&self, addr: Ipv4Addr) -> Result<Option<u64>, TableError> {
        let table = self.addresses.lock().expect("address table mutex poisoned");
        Ok(table.entries.get(&key_of(addr)).map(|slot| slot.hits))
    }

    fn entries(&self) -> Result<Vec<(Ipv4Addr, u64)>, TableError> {
        let table = self.addresses.lock().expect("address table mutex poisoned");
        Ok(table
            .entries
            .iter()
            .map(|(key, slot)| (addr_of(*key), slot.hits))
            .collect())
    }
}

impl ExceptionTable for MemoryTables {
    fn insert(&self, addr: Ipv4Addr) -> Result<(), TableError> {
        let mut exceptions = self
            .exceptions
            .lock()
            .expect("exception table mutex poisoned");
        let key = key_of(addr);
        if !exceptions.contains(&key) && exceptions.len() >= self.exception_capacity {
            return Err(TableError::Full {
                map: MAP_EXCEPTION_TABLE,
            });
        }
        exceptions.insert(key);
        Ok(())
    }

    fn contains(&self, addr: Ipv4Addr) -> Result<bool, TableError> {
        Ok(self
            .exceptions
            .lock()
            .expect("exception table mutex poisoned")
            .contains(&key_of(addr)))
    }
}

impl StatsTable for MemoryTables {
    fn read(&self) -> Result<GlobalStats, TableError> {
        Ok(GlobalStats {
            total: self.stats[STAT_TOTAL as usize].load(Ordering::Relaxed),
            blocked: self.stats[STAT_BLOCKED as usize].load(Ordering::Relaxed),
        })
    }

    fn reset(&self) -> Result<(), TableError> {
        for counter in &self.stats {
            counter.store(0, Ordering::Relaxed);
        }
        Ok(())
    }
}
