use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs},
};

use crate::error::ResolveError;

/// Forward lookup of a domain name to its IPv4 addresses.
///
/// Implementations block; the scheduler calls them one domain at a time from
/// its own thread.
pub trait Resolver: Send + Sync {
    fn resolve_ipv4(&self, name: &str) -> Result<Vec<Ipv4Addr>, ResolveError>;
}

/// Resolver backed by the system's `getaddrinfo`. IPv6 results are
/// discarded; an IPv4 literal resolves to itself.
#[derive(Debug, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve_ipv4(&self, name: &str) -> Result<Vec<Ipv4Addr>, ResolveError> {
        if let Ok(addr) = name.parse::<Ipv4Addr>() {
            return Ok(vec![addr]);
        }

        let addrs = (name, 0u16)
            .to_socket_addrs()
            .map_err(|source| ResolveError::Lookup {
                name: name.to_string(),
                source,
            })?;

        let mut ips = Vec::new();
        for addr in addrs {
            if let SocketAddr::V4(v4) = addr {
                let ip = *v4.ip();
                if !ips.contains(&ip) {
                    ips.push(ip);
                }
            }
        }

        if ips.is_empty() {
            return Err(ResolveError::NoAddresses(name.to_string()));
        }
        Ok(ips)
    }
}

/// Fixed name -> address table. Used by tests and for offline dry runs.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    records: HashMap<String, Vec<Ipv4Addr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, addrs: &[Ipv4Addr]) -> Self {
        self.insert(name, addrs);
        self
    }

    pub fn insert(&mut self, name: &str, addrs: &[Ipv4Addr]) {
        self.records.insert(name.to_string(), addrs.to_vec());
    }
}

impl Resolver for StaticResolver {
    fn resolve_ipv4(&self, name: &str) -> Result<Vec<Ipv4Addr>, ResolveError> {
        if let Some(addrs) = self.records.get(name) {
            if addrs.is_empty() {
                return Err(ResolveError::NoAddresses(name.to_string()));
            }
            return Ok(addrs.clone());
        }
        match name.parse::<IpAddr>() {
            Ok(IpAddr::V4(addr)) => Ok(vec![addr]),
            _ => Err(ResolveError::Lookup {
                name: name.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such record"),
            }),
        }
    }
}
