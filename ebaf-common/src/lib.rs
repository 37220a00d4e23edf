#![no_std]

// Map layouts shared between the XDP classifier and the userspace control plane.
// Keep this crate `no_std` friendly so it can be used from eBPF code.

pub mod verdict;

pub use verdict::{FilterTables, Verdict, classify_addrs, classify_frame, parse_ipv4_addrs};

pub const MAP_ADDRESS_TABLE: &str = "blacklist_ip_map";
pub const MAP_EXCEPTION_TABLE: &str = "whitelist_ip_map";
pub const MAP_STATS: &str = "stats_map";
pub const XDP_PROGRAM: &str = "xdp_blocker";

pub const ADDRESS_TABLE_CAPACITY: u32 = 10_000;
pub const EXCEPTION_TABLE_CAPACITY: u32 = 10_000;

pub const STAT_TOTAL: u32 = 0;
pub const STAT_BLOCKED: u32 = 1;
pub const STAT_SLOTS: u32 = 2;

/// Value stored for every Exception Table key. Only presence matters.
pub const EXCEPTION_MARKER: u8 = 1;

pub const ETH_HDR_LEN: usize = 14;
pub const ETH_PROTO_OFFSET: usize = 12;
pub const ETH_P_IPV4: u16 = 0x0800;
pub const IPV4_HDR_LEN: usize = 20;
pub const IPV4_SRC_OFFSET: usize = 12;
pub const IPV4_DST_OFFSET: usize = 16;

/// IPv4 address exactly as it sits in the packet (network byte order).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Ipv4Key {
    pub addr: u32,
}

impl Ipv4Key {
    pub const fn from_octets(octets: [u8; 4]) -> Self {
        Self {
            addr: u32::from_ne_bytes(octets),
        }
    }

    pub const fn octets(self) -> [u8; 4] {
        self.addr.to_ne_bytes()
    }
}

// With the `user` feature the key gets an `aya::Pod` impl so the control plane
// can use it with aya's typed map APIs. The eBPF side never enables it.
#[cfg(feature = "user")]
mod user_impls {
    extern crate aya;

    use super::Ipv4Key;
    use aya::Pod;

    unsafe impl Pod for Ipv4Key {}
}
