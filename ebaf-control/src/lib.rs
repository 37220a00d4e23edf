//! Userspace control plane for the ebaf XDP blocker.
//!
//! Keeps the classifier's Address Table in step with a domain blacklist and
//! its Exception Table in step with a whitelist of glob patterns.

pub mod config;
pub mod context;
pub mod error;
pub mod glob;
pub mod kernel;
pub mod lists;
pub mod memory;
pub mod registry;
pub mod resolve;
pub mod scheduler;
pub mod snapshot;
pub mod tables;
pub mod whitelist;

pub use config::AgentConfig;
pub use context::{FirewallContext, TableHandles};
pub use error::{
    ConfigError, CycleError, ListError, RegistryError, ResolveError, TableError, WhitelistError,
};
pub use kernel::{KernelAddressTable, KernelTables};
pub use memory::MemoryTables;
pub use registry::{AddOutcome, DomainRegistry, ResolveReport};
pub use resolve::{Resolver, StaticResolver, SystemResolver};
pub use scheduler::{CycleReport, SchedulerHandle};
pub use snapshot::{DropSnapshot, FileSink, MemorySink, SnapshotSink, write_stats_file};
pub use tables::{AddressTable, ExceptionTable, GlobalStats, StatsTable};
pub use whitelist::{RefreshReport, WhitelistMatcher};
