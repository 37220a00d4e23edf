//! Everything the control plane shares between the foreground loop and the
//! scheduler thread, owned in one place and passed around behind an `Arc`.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    config::AgentConfig,
    error::{ListError, RegistryError, WhitelistError},
    kernel::KernelTables,
    lists,
    memory::MemoryTables,
    registry::{AddOutcome, DomainRegistry},
    resolve::Resolver,
    tables::{AddressTable, ExceptionTable, StatsTable},
    whitelist::{RefreshReport, WhitelistMatcher},
};

/// Handles to the classifier's three tables.
#[derive(Clone)]
pub struct TableHandles {
    pub addresses: Arc<dyn AddressTable>,
    pub exceptions: Arc<dyn ExceptionTable>,
    pub stats: Arc<dyn StatsTable>,
}

impl TableHandles {
    pub fn from_kernel(tables: KernelTables) -> Self {
        Self {
            addresses: Arc::new(tables.addresses),
            exceptions: Arc::new(tables.exceptions),
            stats: Arc::new(tables.stats),
        }
    }

    /// One in-process table set serving all three roles.
    pub fn from_memory(tables: Arc<MemoryTables>) -> Self {
        Self {
            addresses: tables.clone(),
            exceptions: tables.clone(),
            stats: tables,
        }
    }
}

pub struct FirewallContext {
    pub registry: DomainRegistry,
    pub whitelist: WhitelistMatcher,
    pub tables: TableHandles,
    pub resolver: Arc<dyn Resolver>,
    pub config: AgentConfig,
    seed: Vec<String>,
}

impl FirewallContext {
    /// `seed` is the built-in blacklist, used when no blacklist file is
    /// readable.
    pub fn new(
        config: AgentConfig,
        tables: TableHandles,
        resolver: Arc<dyn Resolver>,
        seed: &str,
    ) -> Self {
        Self {
            registry: DomainRegistry::new(),
            whitelist: WhitelistMatcher::new(),
            tables,
            resolver,
            config,
            seed: lists::parse_str(seed),
        }
    }

    /// Blacklist domains: the first readable blacklist file, otherwise the
    /// built-in seed.
    pub fn blacklist_domains(&self) -> Vec<String> {
        match lists::load_first(&self.config.blacklist_paths) {
            Ok(source) => source.entries,
            Err(ListError::NotFound { .. }) => self.seed.clone(),
            Err(err) => {
                warn!(error = %err, "blacklist unreadable, using built-in list");
                self.seed.clone()
            }
        }
    }

    /// Initialise the registry and fill it from [`Self::blacklist_domains`].
    /// Invalid names are skipped; a full registry stops the fill. Returns the
    /// number of names added.
    pub fn populate_registry(&self) -> Result<usize, RegistryError> {
        self.registry.init();
        let domains = self.blacklist_domains();
        let mut added = 0usize;
        for domain in &domains {
            match self.registry.add(domain) {
                Ok(AddOutcome::Added) => added += 1,
                Ok(AddOutcome::AlreadyPresent) => {}
                Err(RegistryError::InvalidName { name, reason }) => {
                    warn!(domain = %name, reason, "skipping blacklist entry");
                }
                Err(err @ RegistryError::Capacity { .. }) => {
                    warn!(error = %err, "blacklist truncated");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        info!(
            domains = added,
            capacity = self.registry.capacity(),
            "domain registry populated"
        );
        Ok(added)
    }

    /// Load whitelist patterns. A missing source leaves the whitelist empty
    /// and is only logged.
    pub fn load_whitelist(&self) -> Result<usize, WhitelistError> {
        match self.whitelist.load_patterns(&self.config.whitelist_paths) {
            Ok(count) => Ok(count),
            Err(WhitelistError::Source(ListError::NotFound { candidates })) => {
                warn!(
                    tried = candidates.len(),
                    "no whitelist found, continuing without exceptions"
                );
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    pub fn refresh_exceptions(&self) -> Result<RefreshReport, WhitelistError> {
        let blacklist = self.blacklist_domains();
        self.whitelist.refresh_exceptions(
            &blacklist,
            self.resolver.as_ref(),
            self.tables.exceptions.as_ref(),
        )
    }

    /// Registry teardown. Call only after the scheduler is joined.
    pub fn teardown(&self) {
        self.registry.cleanup();
    }
}
