//! Whitelist Matcher: glob patterns whose domains must never be blocked.
//!
//! Matching domains are resolved into the Exception Table, which the
//! classifier consults before the Address Table.

use std::{net::Ipv4Addr, path::Path, sync::Mutex};

use tracing::{debug, info, warn};

use crate::{
    error::{TableError, WhitelistError},
    glob::{glob_match, has_wildcard},
    lists,
    resolve::Resolver,
    tables::ExceptionTable,
};

pub const MAX_PATTERNS: usize = 1_000;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RefreshReport {
    /// Blacklist domains that matched a pattern and resolved.
    pub matched_domains: usize,
    /// Wildcard-free patterns that resolved.
    pub literal_patterns: usize,
    /// Exception Table inserts, counting an address once per source.
    pub protected: usize,
    /// Addresses turned away by a full Exception Table.
    pub rejected: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct WhitelistMatcher {
    patterns: Mutex<Vec<String>>,
}

impl WhitelistMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pattern list with the first readable candidate. On error
    /// the current list is left as it was.
    pub fn load_patterns<P: AsRef<Path>>(&self, candidates: &[P]) -> Result<usize, WhitelistError> {
        let source = lists::load_first(candidates)?;
        let count = self.set_patterns(source.entries);
        info!(path = %source.path.display(), patterns = count, "whitelist loaded");
        Ok(count)
    }

    pub fn load_from_str(&self, text: &str) -> usize {
        self.set_patterns(lists::parse_str(text))
    }

    fn set_patterns(&self, mut patterns: Vec<String>) -> usize {
        if patterns.len() > MAX_PATTERNS {
            warn!(
                read = patterns.len(),
                kept = MAX_PATTERNS,
                "whitelist truncated"
            );
            patterns.truncate(MAX_PATTERNS);
        }
        let count = patterns.len();
        *self.patterns.lock().expect("whitelist mutex poisoned") = patterns;
        count
    }

    pub fn matches(&self, domain: &str) -> bool {
        self.patterns
            .lock()
            .expect("whitelist mutex poisoned")
            .iter()
            .any(|pattern| glob_match(pattern, domain))
    }

    pub fn len(&self) -> usize {
        self.patterns.lock().expect("whitelist mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Protect whitelisted addresses.
    ///
    /// Every domain in `blacklist` that matches a pattern is resolved into
    /// `exceptions`, then every literal pattern is resolved as well. Entries
    /// are only ever added. Lookups run with the pattern lock released.
    pub fn refresh_exceptions(
        &self,
        blacklist: &[String],
        resolver: &dyn Resolver,
        exceptions: &dyn ExceptionTable,
    ) -> Result<RefreshReport, WhitelistError> {
        let patterns = self
            .patterns
            .lock()
            .expect("whitelist mutex poisoned")
            .clone();
        let mut report = RefreshReport::default();
        if patterns.is_empty() {
            return Ok(report);
        }

        for domain in blacklist {
            if !patterns.iter().any(|pattern| glob_match(pattern, domain)) {
                continue;
            }
            match resolver.resolve_ipv4(domain) {
                Ok(addrs) => {
                    protect(exceptions, &addrs, &mut report)?;
                    report.matched_domains += 1;
                    debug!(domain = %domain, addrs = addrs.len(), "whitelisted blacklist entry");
                }
                Err(err) => {
                    warn!(domain = %domain, error = %err, "whitelisted domain did not resolve");
                    report.failed += 1;
                }
            }
        }

        for pattern in patterns.iter().filter(|pattern| !has_wildcard(pattern)) {
            match resolver.resolve_ipv4(pattern) {
                Ok(addrs) => {
                    protect(exceptions, &addrs, &mut report)?;
                    report.literal_patterns += 1;
                }
                Err(err) => {
                    warn!(domain = %pattern, error = %err, "whitelist pattern did not resolve");
                    report.failed += 1;
                }
            }
        }

        if report.rejected > 0 {
            warn!(
                rejected = report.rejected,
                "exception table full, some whitelisted addresses stay unprotected"
            );
        }
        info!(
            matched_domains = report.matched_domains,
            literal_patterns = report.literal_patterns,
            protected = report.protected,
            rejected = report.rejected,
            failed = report.failed,
            "exceptions refreshed"
        );
        Ok(report)
    }
}

/// A full table only costs the addresses it turns away; any other table
/// failure is returned.
fn protect(
    exceptions: &dyn ExceptionTable,
    addrs: &[Ipv4Addr],
    report: &mut RefreshReport,
) -> Result<(), WhitelistError> {
    for addr in addrs {
        match exceptions.insert(*addr) {
            Ok(()) => report.protected += 1,
            Err(TableError::Full { .. }) => {
                debug!(addr = %addr, "exception table full");
                report.rejected += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use super::*;
    use crate::{error::ListError, memory::MemoryTables, resolve::StaticResolver};

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn matches_follow_globs() {
        let matcher = WhitelistMatcher::new();
        matcher.load_from_str("*.example.com\n");
        assert!(matcher.matches("ads.example.com"));
        assert!(!matcher.matches("ads.example.org"));

        matcher.load_from_str("*.example.org\n");
        assert!(!matcher.matches("ads.example.com"));
    }

    #[test]
    fn no_patterns_match_nothing() {
        let matcher = WhitelistMatcher::new();
        assert!(!matcher.matches("anything.test"));
    }

    #[test]
    fn pattern_count_is_bounded() {
        let matcher = WhitelistMatcher::new();
        let text: String = (0..MAX_PATTERNS + 5)
            .map(|i| format!("d{i}.test\n"))
            .collect();
        assert_eq!(matcher.load_from_str(&text), MAX_PATTERNS);
        assert!(matcher.matches("d0.test"));
        assert!(!matcher.matches(&format!("d{}.test", MAX_PATTERNS)));
    }

    #[test]
    fn load_patterns_reads_first_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.txt");
        writeln!(
            File::create(&path).unwrap(),
            "# spotify\n*.scdn.co   # cdn\nspotify.com"
        )
        .unwrap();

        let matcher = WhitelistMatcher::new();
        assert_eq!(matcher.load_patterns(&[&path]).unwrap(), 2);
        assert!(matcher.matches("i.scdn.co"));
        assert!(matcher.matches("spotify.com"));
    }

    #[test]
    fn missing_source_keeps_current_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = WhitelistMatcher::new();
        matcher.load_from_str("keep.test");

        let err = matcher
            .load_patterns(&[dir.path().join("absent.txt")])
            .unwrap_err();
        assert!(matches!(
            err,
            WhitelistError::Source(ListError::NotFound { .. })
        ));
        assert!(matcher.matches("keep.test"));
    }

    #[test]
    fn refresh_protects_matching_blacklist_domains() {
        let matcher = WhitelistMatcher::new();
        matcher.load_from_str("*.good.test");
        let resolver = StaticResolver::new()
            .with("cdn.good.test", &[ip(1)])
            .with("ads.bad.test", &[ip(2)]);
        let tables = MemoryTables::default();
        let blacklist = vec!["cdn.good.test".to_string(), "ads.bad.test".to_string()];

        let report = matcher
            .refresh_exceptions(&blacklist, &resolver, &tables)
            .unwrap();
        assert_eq!(report.matched_domains, 1);
        assert!(tables.contains(ip(1)).unwrap());
        assert!(!tables.contains(ip(2)).unwrap());
    }

    #[test]
    fn refresh_resolves_literal_patterns() {
        let matcher = WhitelistMatcher::new();
        matcher.load_from_str("spotify.com\n*.scdn.co\n");
        let resolver = StaticResolver::new().with("spotify.com", &[ip(3), ip(4)]);
        let tables = MemoryTables::default();

        let report = matcher.refresh_exceptions(&[], &resolver, &tables).unwrap();
        assert_eq!(report.literal_patterns, 1);
        assert_eq!(report.protected, 2);
        assert!(tables.contains(ip(3)).unwrap());
        assert!(tables.contains(ip(4)).unwrap());
    }

    #[test]
    fn refresh_is_additive() {
        let matcher = WhitelistMatcher::new();
        matcher.load_from_str("a.test");
        let tables = MemoryTables::default();
        matcher
            .refresh_exceptions(&[], &StaticResolver::new().with("a.test", &[ip(5)]), &tables)
            .unwrap();

        let report = matcher
            .refresh_exceptions(&[], &StaticResolver::new(), &tables)
            .unwrap();
        assert_eq!(report.failed, 1);
        assert!(tables.contains(ip(5)).unwrap());
    }

    #[test]
    fn full_exception_table_does_not_stop_the_refresh() {
        let matcher = WhitelistMatcher::new();
        matcher.load_from_str("*.good.test
ok1.test
ok2.test
");
        let resolver = StaticResolver::new()
            .with("cdn.good.test", &[ip(1)])
            .with("ok1.test", &[ip(2)])
            .with("ok2.test", &[ip(1)]);
        let tables = MemoryTables::default().with_exception_capacity(1);
        let blacklist = vec!["cdn.good.test".to_string()];

        let report = matcher
            .refresh_exceptions(&blacklist, &resolver, &tables)
            .unwrap();
        assert_eq!(report.matched_domains, 1);
        assert_eq!(report.literal_patterns, 2);
        assert_eq!(report.protected, 2);
        assert_eq!(report.rejected, 1);
        assert!(tables.contains(ip(1)).unwrap());
        assert!(!tables.contains(ip(2)).unwrap());
    }
}
