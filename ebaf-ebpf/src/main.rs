#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU64, Ordering};

use aya_ebpf::bindings::xdp_action;
use aya_ebpf::macros::{map, xdp};
use aya_ebpf::maps::{Array, HashMap, LruHashMap};
use aya_ebpf::programs::XdpContext;
use ebaf_common::{
    ADDRESS_TABLE_CAPACITY, ETH_HDR_LEN, ETH_P_IPV4, ETH_PROTO_OFFSET, EXCEPTION_TABLE_CAPACITY,
    FilterTables, IPV4_DST_OFFSET, IPV4_HDR_LEN, IPV4_SRC_OFFSET, Ipv4Key, STAT_SLOTS, STAT_TOTAL,
    Verdict, classify_addrs,
};

// Names must match `ebaf_common::MAP_*`.
#[map(name = "blacklist_ip_map")]
static BLACKLIST_IP_MAP: LruHashMap<Ipv4Key, u64> =
    LruHashMap::<Ipv4Key, u64>::with_max_entries(ADDRESS_TABLE_CAPACITY, 0);

#[map(name = "whitelist_ip_map")]
static WHITELIST_IP_MAP: HashMap<Ipv4Key, u8> =
    HashMap::<Ipv4Key, u8>::with_max_entries(EXCEPTION_TABLE_CAPACITY, 0);

#[map(name = "stats_map")]
static STATS_MAP: Array<u64> = Array::<u64>::with_max_entries(STAT_SLOTS, 0);

#[xdp]
pub fn xdp_blocker(ctx: XdpContext) -> u32 {
    match classify(ctx.data() as *const u8, ctx.data_end() as *const u8) {
        Verdict::Drop => xdp_action::XDP_DROP,
        Verdict::Admit => xdp_action::XDP_PASS,
    }
}

struct KernelTables;

impl FilterTables for KernelTables {
    #[inline(always)]
    fn is_excepted(&self, key: &Ipv4Key) -> bool {
        WHITELIST_IP_MAP.get_ptr(key).is_some()
    }

    #[inline(always)]
    fn record_hit(&self, key: &Ipv4Key) -> bool {
        match BLACKLIST_IP_MAP.get_ptr_mut(key) {
            Some(ptr) => {
                atomic_inc(ptr);
                true
            }
            None => false,
        }
    }

    #[inline(always)]
    fn bump_stat(&self, slot: u32) {
        if let Some(ptr) = STATS_MAP.get_ptr_mut(slot) {
            atomic_inc(ptr);
        }
    }
}

#[inline(always)]
fn atomic_inc(ptr: *mut u64) {
    // map values are 8-byte aligned and live as long as the map
    unsafe { AtomicU64::from_ptr(ptr) }.fetch_add(1, Ordering::Relaxed);
}

fn classify(data: *const u8, data_end: *const u8) -> Verdict {
    let tables = KernelTables;
    tables.bump_stat(STAT_TOTAL);
    match parse_ipv4(data, data_end) {
        Some((dst, src)) => classify_addrs(&tables, dst, src),
        None => Verdict::Admit,
    }
}

fn parse_ipv4(data: *const u8, data_end: *const u8) -> Option<(Ipv4Key, Ipv4Key)> {
    if unsafe { data.add(ETH_HDR_LEN) } > data_end {
        return None;
    }

    let h_proto = unsafe {
        let p = data.add(ETH_PROTO_OFFSET) as *const u16;
        u16::from_be(core::ptr::read_unaligned(p))
    };
    if h_proto != ETH_P_IPV4 {
        return None;
    }

    if unsafe { data.add(ETH_HDR_LEN + IPV4_HDR_LEN) } > data_end {
        return None;
    }

    let ip_start = unsafe { data.add(ETH_HDR_LEN) };
    // keys stay in network byte order, same as the control plane writes them
    let src = unsafe { core::ptr::read_unaligned(ip_start.add(IPV4_SRC_OFFSET) as *const u32) };
    let dst = unsafe { core::ptr::read_unaligned(ip_start.add(IPV4_DST_OFFSET) as *const u32) };

    Some((Ipv4Key { addr: dst }, Ipv4Key { addr: src }))
}

#[unsafe(link_section = "license")]
#[unsafe(no_mangle)]
static LICENSE: [u8; 4] = *b"GPL\0";

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
