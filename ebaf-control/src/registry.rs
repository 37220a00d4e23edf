//! Domain Registry: blacklisted names, the IPv4 addresses they resolved to,
//! and the drops attributed to them.
//!
//! A single mutex guards the entry list. Lookups against DNS happen with the
//! lock released; only merging their results takes it again, so `add` and
//! `snapshot` never wait on a slow resolver.

use std::{net::Ipv4Addr, sync::Mutex};

use tracing::{debug, info, warn};

use crate::{
    error::RegistryError, resolve::Resolver, snapshot::DropSnapshot, tables::AddressTable,
};

pub const MAX_DOMAINS: usize = 10_000;
pub const DOMAIN_MAX_LEN: usize = 256;
const INITIAL_ADDR_CAPACITY: usize = 4;

#[derive(Debug)]
struct DomainEntry {
    name: String,
    addrs: Vec<Ipv4Addr>,
    drops: u64,
}

impl DomainEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            addrs: Vec::new(),
            drops: 0,
        }
    }

    /// Returns `false` if `addr` was already known.
    fn add_addr(&mut self, addr: Ipv4Addr) -> bool {
        if self.addrs.contains(&addr) {
            return false;
        }
        if self.addrs.len() == self.addrs.capacity() {
            let grow = self.addrs.capacity().max(INITIAL_ADDR_CAPACITY);
            self.addrs.reserve_exact(grow);
        }
        self.addrs.push(addr);
        true
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
}

/// Outcome of one [`DomainRegistry::resolve_all`] pass.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ResolveReport {
    pub resolved: usize,
    pub failed: usize,
    /// Addresses that were not in the Address Table before this pass.
    pub inserted: usize,
}

pub struct DomainRegistry {
    entries: Mutex<Option<Vec<DomainEntry>>>,
    capacity: usize,
}

impl Default for DomainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_DOMAINS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(None),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Idempotent. Entries added before a second call are kept.
    pub fn init(&self) {
        let mut entries = self.entries.lock().expect("domain registry mutex poisoned");
        if entries.is_none() {
            *entries = Some(Vec::with_capacity(self.capacity));
        }
    }

    pub fn add(&self, name: &str) -> Result<AddOutcome, RegistryError> {
        validate_name(name)?;
        let mut guard = self.entries.lock().expect("domain registry mutex poisoned");
        let entries = guard.as_mut().ok_or(RegistryError::NotInitialized)?;

        if entries.iter().any(|entry| entry.name == name) {
            return Ok(AddOutcome::AlreadyPresent);
        }
        if entries.len() >= self.capacity {
            return Err(RegistryError::Capacity {
                capacity: self.capacity,
            });
        }
        entries.push(DomainEntry::new(name));
        debug!(domain = name, "domain registered");
        Ok(AddOutcome::Added)
    }

    /// Resolve every registered name and push the results into `table`.
    ///
    /// A name that fails to resolve keeps the addresses it had. Table
    /// failures abort the pass.
    pub fn resolve_all(
        &self,
        resolver: &dyn Resolver,
        table: &dyn AddressTable,
    ) -> Result<ResolveReport, RegistryError> {
        let names = self.names()?;
        let mut report = ResolveReport::default();

        for name in &names {
            let addrs = match resolver.resolve_ipv4(name) {
                Ok(addrs) => addrs,
                Err(err) => {
                    warn!(domain = %name, error = %err, "resolution failed, keeping previous addresses");
                    report.failed += 1;
                    continue;
                }
            };

            let learned = self.merge_addrs(name, &addrs);
            for addr in &addrs {
                if table.insert_if_absent(*addr)? {
                    report.inserted += 1;
                }
            }
            debug!(domain = %name, addrs = addrs.len(), learned, "domain resolved");
            report.resolved += 1;
        }

        info!(
            resolved = report.resolved,
            failed = report.failed,
            inserted = report.inserted,
            "resolution pass finished"
        );
        Ok(report)
    }

    /// Recompute every entry's drop count from the Address Table counters of
    /// its addresses. Returns the sum over all entries.
    pub fn aggregate_drop_counts(&self, table: &dyn AddressTable) -> Result<u64, RegistryError> {
        let mut guard = self.entries.lock().expect("domain registry mutex poisoned");
        let entries = guard.as_mut().ok_or(RegistryError::NotInitialized)?;

        let mut total = 0u64;
        for entry in entries.iter_mut() {
            let mut drops = 0u64;
            for addr in &entry.addrs {
                drops = drops.saturating_add(table.hits(*addr)?.unwrap_or(0));
            }
            entry.drops = drops;
            total = total.saturating_add(drops);
        }
        Ok(total)
    }

    /// Domains with at least one drop, in registration order.
    pub fn snapshot(&self) -> DropSnapshot {
        let guard = self.entries.lock().expect("domain registry mutex poisoned");
        let rows = guard
            .iter()
            .flatten()
            .filter(|entry| entry.drops > 0)
            .map(|entry| (entry.name.clone(), entry.drops))
            .collect();
        DropSnapshot::new(rows)
    }

    pub fn drops(&self, name: &str) -> Option<u64> {
        let guard = self.entries.lock().expect("domain registry mutex poisoned");
        guard
            .as_ref()?
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.drops)
    }

    pub fn addrs(&self, name: &str) -> Option<Vec<Ipv4Addr>> {
        let guard = self.entries.lock().expect("domain registry mutex poisoned");
        guard
            .as_ref()?
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.addrs.clone())
    }

    pub fn len(&self) -> usize {
        let guard = self.entries.lock().expect("domain registry mutex poisoned");
        guard.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Safe to call more than once; `init` makes the
    /// registry usable again.
    pub fn cleanup(&self) {
        let mut guard = self.entries.lock().expect("domain registry mutex poisoned");
        if let Some(entries) = guard.take() {
            debug!(count = entries.len(), "domain registry released");
        }
    }

    fn names(&self) -> Result<Vec<String>, RegistryError> {
        let guard = self.entries.lock().expect("domain registry mutex poisoned");
        let entries = guard.as_ref().ok_or(RegistryError::NotInitialized)?;
        Ok(entries.iter().map(|entry| entry.name.clone()).collect())
    }

    fn merge_addrs(&self, name: &str, addrs: &[Ipv4Addr]) -> usize {
        let mut guard = self.entries.lock().expect("domain registry mutex poisoned");
        let Some(entry) = guard
            .as_mut()
            .and_then(|entries| entries.iter_mut().find(|entry| entry.name == name))
        else {
            return 0;
        };
        addrs.iter().filter(|addr| entry.add_addr(**addr)).count()
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.len() > DOMAIN_MAX_LEN {
        "name is longer than 256 bytes"
    } else {
        return Ok(());
    };
    Err(RegistryError::InvalidName {
        name: name.to_string(),
        reason,
    })
}
