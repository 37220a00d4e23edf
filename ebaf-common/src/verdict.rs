//! Admit/drop decision shared by the XDP program and the userspace
//! reference classifier.
//!
//! The kernel side parses frames with raw pointer bounds checks and calls
//! [`classify_addrs`] directly. [`classify_frame`] is the slice-based
//! equivalent used by dry runs and tests.

use crate::{
    ETH_HDR_LEN, ETH_P_IPV4, ETH_PROTO_OFFSET, IPV4_DST_OFFSET, IPV4_HDR_LEN, IPV4_SRC_OFFSET,
    Ipv4Key, STAT_BLOCKED, STAT_TOTAL,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    Admit,
    Drop,
}

/// Table operations the classifier performs. Everything takes `&self`:
/// implementations update counters atomically since many CPUs classify at once.
pub trait FilterTables {
    fn is_excepted(&self, key: &Ipv4Key) -> bool;

    /// Increment the hit counter for `key`. Returns `false` when `key` is not
    /// in the Address Table.
    fn record_hit(&self, key: &Ipv4Key) -> bool;

    fn bump_stat(&self, slot: u32);
}

/// Exceptions first, then the Address Table, destination before source.
#[inline(always)]
pub fn classify_addrs<T: FilterTables>(tables: &T, dst: Ipv4Key, src: Ipv4Key) -> Verdict {
    if tables.is_excepted(&dst) || tables.is_excepted(&src) {
        return Verdict::Admit;
    }
    if tables.record_hit(&dst) || tables.record_hit(&src) {
        tables.bump_stat(STAT_BLOCKED);
        return Verdict::Drop;
    }
    Verdict::Admit
}

/// Returns `(dst, src)` for an Ethernet + IPv4 frame, `None` for anything
/// shorter than both headers or not IPv4.
pub fn parse_ipv4_addrs(frame: &[u8]) -> Option<(Ipv4Key, Ipv4Key)> {
    if frame.len() < ETH_HDR_LEN {
        return None;
    }
    let ether_type = u16::from_be_bytes([frame[ETH_PROTO_OFFSET], frame[ETH_PROTO_OFFSET + 1]]);
    if ether_type != ETH_P_IPV4 {
        return None;
    }
    let ip = frame.get(ETH_HDR_LEN..ETH_HDR_LEN + IPV4_HDR_LEN)?;
    let src: [u8; 4] = ip[IPV4_SRC_OFFSET..IPV4_SRC_OFFSET + 4].try_into().ok()?;
    let dst: [u8; 4] = ip[IPV4_DST_OFFSET..IPV4_DST_OFFSET + 4].try_into().ok()?;
    Some((Ipv4Key::from_octets(dst), Ipv4Key::from_octets(src)))
}

pub fn classify_frame<T: FilterTables>(tables: &T, frame: &[u8]) -> Verdict {
    tables.bump_stat(STAT_TOTAL);
    match parse_ipv4_addrs(frame) {
        Some((dst, src)) => classify_addrs(tables, dst, src),
        None => Verdict::Admit,
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use core::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::vec::Vec;

    #[derive(Default)]
    struct FakeTables {
        blocked: RefCell<HashMap<Ipv4Key, u64>>,
        excepted: HashSet<Ipv4Key>,
        stats: RefCell<[u64; 2]>,
    }

    impl FilterTables for FakeTables {
        fn is_excepted(&self, key: &Ipv4Key) -> bool {
            self.excepted.contains(key)
        }

        fn record_hit(&self, key: &Ipv4Key) -> bool {
            match self.blocked.borrow_mut().get_mut(key) {
                Some(hits) => {
                    *hits += 1;
                    true
                }
                None => false,
            }
        }

        fn bump_stat(&self, slot: u32) {
            self.stats.borrow_mut()[slot as usize] += 1;
        }
    }

    fn frame(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut f = std::vec![0u8; ETH_HDR_LEN + IPV4_HDR_LEN];
        f[12] = 0x08;
        f[13] = 0x00;
        f[ETH_HDR_LEN] = 0x45;
        f[ETH_HDR_LEN + 12..ETH_HDR_LEN + 16].copy_from_slice(&src);
        f[ETH_HDR_LEN + 16..ETH_HDR_LEN + 20].copy_from_slice(&dst);
        f
    }

    fn key(o: [u8; 4]) -> Ipv4Key {
        Ipv4Key::from_octets(o)
    }

    #[test]
    fn short_frames_are_admitted() {
        let tables = FakeTables::default();
        tables.blocked.borrow_mut().insert(key([0, 0, 0, 0]), 0);
        let full = frame([0, 0, 0, 0], [0, 0, 0, 0]);
        for len in 0..full.len() {
            assert_eq!(classify_frame(&tables, &full[..len]), Verdict::Admit, "len {len}");
        }
        assert_eq!(tables.blocked.borrow()[&key([0, 0, 0, 0])], 0);
        assert_eq!(tables.stats.borrow()[STAT_TOTAL as usize], full.len() as u64);
        assert_eq!(tables.stats.borrow()[STAT_BLOCKED as usize], 0);
    }

    #[test]
    fn non_ipv4_is_admitted() {
        let tables = FakeTables::default();
        tables.blocked.borrow_mut().insert(key([10, 0, 0, 5]), 0);
        let mut f = frame([1, 1, 1, 1], [10, 0, 0, 5]);
        f[12] = 0x86;
        f[13] = 0xdd;
        assert_eq!(classify_frame(&tables, &f), Verdict::Admit);
    }

    #[test]
    fn blocked_destination_is_dropped_once() {
        let tables = FakeTables::default();
        tables.blocked.borrow_mut().insert(key([10, 0, 0, 5]), 0);
        tables.blocked.borrow_mut().insert(key([192, 168, 1, 2]), 0);
        let f = frame([192, 168, 1, 2], [10, 0, 0, 5]);
        assert_eq!(classify_frame(&tables, &f), Verdict::Drop);
        assert_eq!(tables.blocked.borrow()[&key([10, 0, 0, 5])], 1);
        // destination wins the tie, the source counter stays untouched
        assert_eq!(tables.blocked.borrow()[&key([192, 168, 1, 2])], 0);
        assert_eq!(tables.stats.borrow()[STAT_BLOCKED as usize], 1);
    }

    #[test]
    fn blocked_source_is_dropped() {
        let tables = FakeTables::default();
        tables.blocked.borrow_mut().insert(key([10, 0, 0, 5]), 0);
        let f = frame([10, 0, 0, 5], [8, 8, 8, 8]);
        assert_eq!(classify_frame(&tables, &f), Verdict::Drop);
        assert_eq!(tables.blocked.borrow()[&key([10, 0, 0, 5])], 1);
    }

    #[test]
    fn exception_overrides_address_table() {
        let mut tables = FakeTables::default();
        tables.blocked.borrow_mut().insert(key([10, 0, 0, 5]), 0);
        tables.excepted.insert(key([10, 0, 0, 5]));
        assert_eq!(
            classify_frame(&tables, &frame([1, 2, 3, 4], [10, 0, 0, 5])),
            Verdict::Admit
        );
        assert_eq!(
            classify_frame(&tables, &frame([10, 0, 0, 5], [1, 2, 3, 4])),
            Verdict::Admit
        );
        assert_eq!(tables.blocked.borrow()[&key([10, 0, 0, 5])], 0);
        assert_eq!(tables.stats.borrow()[STAT_BLOCKED as usize], 0);
    }

    #[test]
    fn excepted_source_protects_blocked_destination() {
        let mut tables = FakeTables::default();
        tables.blocked.borrow_mut().insert(key([10, 0, 0, 5]), 0);
        tables.excepted.insert(key([172, 16, 0, 1]));
        let f = frame([172, 16, 0, 1], [10, 0, 0, 5]);
        assert_eq!(classify_frame(&tables, &f), Verdict::Admit);
    }

    #[test]
    fn unknown_addresses_are_admitted() {
        let tables = FakeTables::default();
        assert_eq!(
            classify_frame(&tables, &frame([1, 1, 1, 1], [2, 2, 2, 2])),
            Verdict::Admit
        );
        assert_eq!(tables.stats.borrow()[STAT_TOTAL as usize], 1);
    }

    #[test]
    fn parse_returns_destination_first() {
        let f = frame([1, 2, 3, 4], [5, 6, 7, 8]);
        let (dst, src) = parse_ipv4_addrs(&f).expect("ipv4 frame");
        assert_eq!(dst.octets(), [5, 6, 7, 8]);
        assert_eq!(src.octets(), [1, 2, 3, 4]);
    }
}
