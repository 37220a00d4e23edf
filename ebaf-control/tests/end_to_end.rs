use std::{fs, net::Ipv4Addr, sync::Arc};

use ebaf_common::Verdict;
use ebaf_control::{
    AgentConfig, DomainRegistry, FileSink, FirewallContext, MemorySink, MemoryTables,
    RegistryError, StaticResolver, StatsTable, TableHandles, registry::MAX_DOMAINS,
    scheduler::run_cycle,
};

const BLOCKED: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
const CLIENT: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);

fn frame(src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    let mut frame = vec![0u8; 14 + 20];
    frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    frame[14] = 0x45;
    frame[14 + 12..14 + 16].copy_from_slice(&src.octets());
    frame[14 + 16..14 + 20].copy_from_slice(&dst.octets());
    frame
}

struct Fixture {
    ctx: FirewallContext,
    tables: Arc<MemoryTables>,
    _dir: tempfile::TempDir,
}

fn fixture(whitelist: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let whitelist_path = dir.path().join("whitelist.txt");
    fs::write(&whitelist_path, whitelist).unwrap();

    let config = AgentConfig {
        blacklist_paths: vec![dir.path().join("no-blacklist.txt")],
        whitelist_paths: vec![whitelist_path],
        domain_stats_file: dir.path().join("domains.dat"),
        stats_file: dir.path().join("stats.dat"),
        ..AgentConfig::default()
    };
    let tables = Arc::new(MemoryTables::default());
    let resolver = StaticResolver::new().with("blocked.test", &[BLOCKED]);
    let ctx = FirewallContext::new(
        config,
        TableHandles::from_memory(tables.clone()),
        Arc::new(resolver),
        "blocked.test\n",
    );
    ctx.populate_registry().unwrap();
    ctx.load_whitelist().unwrap();

    Fixture {
        ctx,
        tables,
        _dir: dir,
    }
}

#[test]
fn blacklisted_domain_is_dropped_and_reported() {
    let Fixture { ctx, tables, _dir } = fixture("");
    let sink = FileSink::new(ctx.config.domain_stats_file.clone());

    run_cycle(&ctx, &sink, true).unwrap();
    assert_eq!(tables.classify(&frame(CLIENT, BLOCKED)), Verdict::Drop);
    assert_eq!(tables.classify(&frame(CLIENT, Ipv4Addr::new(10, 0, 0, 6))), Verdict::Admit);

    run_cycle(&ctx, &sink, true).unwrap();
    assert_eq!(
        fs::read_to_string(&ctx.config.domain_stats_file).unwrap(),
        "blocked.test:1\n"
    );

    let stats = ctx.tables.stats.read().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.blocked, 1);
}

#[test]
fn whitelisted_domain_is_admitted_after_refresh() {
    let Fixture { ctx, tables, _dir } = fixture("blocked.test\n");
    let sink = MemorySink::new();

    run_cycle(&ctx, &sink, false).unwrap();
    assert_eq!(tables.classify(&frame(CLIENT, BLOCKED)), Verdict::Drop);

    ctx.refresh_exceptions().unwrap();
    assert_eq!(tables.classify(&frame(CLIENT, BLOCKED)), Verdict::Admit);
    assert_eq!(tables.classify(&frame(BLOCKED, CLIENT)), Verdict::Admit);
}

#[test]
fn glob_whitelist_covers_blacklist_entries() {
    let Fixture { ctx, tables, _dir } = fixture("*.test\n");
    run_cycle(&ctx, &MemorySink::new(), true).unwrap();
    assert_eq!(tables.classify(&frame(CLIENT, BLOCKED)), Verdict::Admit);
    assert!(ctx.registry.snapshot().is_empty());
}

#[test]
fn short_frames_are_admitted() {
    let Fixture { ctx, tables, _dir } = fixture("");
    run_cycle(&ctx, &MemorySink::new(), true).unwrap();
    let full = frame(CLIENT, BLOCKED);
    assert_eq!(tables.classify(&full[..14 + 19]), Verdict::Admit);
    assert_eq!(tables.classify(&full[..10]), Verdict::Admit);
}

#[test]
fn registry_capacity_bound() {
    let registry = DomainRegistry::new();
    registry.init();
    for i in 0..MAX_DOMAINS {
        registry.add(&format!("d{i}.test")).unwrap();
    }
    assert!(matches!(
        registry.add("one-too-many.test"),
        Err(RegistryError::Capacity { .. })
    ));
    assert_eq!(registry.len(), MAX_DOMAINS);
}
