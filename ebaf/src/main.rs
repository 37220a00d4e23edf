use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Args, Parser, Subcommand};
use ebaf_control::{
    AddressTable, AgentConfig, FileSink, FirewallContext, MemorySink, MemoryTables,
    SystemResolver, TableHandles,
    config::{
        DEFAULT_BLACKLIST_PATHS, DEFAULT_DOMAIN_STATS_FILE, DEFAULT_STATS_FILE,
        DEFAULT_WHITELIST_PATHS,
    },
    scheduler,
};
use tokio::task;
use tracing::{error, info};

mod loader;
mod logging;
mod shutdown;
mod status;

use loader::XdpMode;
use logging::{LogFormat, LogLevel};

/// Built-in blacklist, used when no blacklist file is readable.
const SEED_LIST: &str = include_str!("../lists/blacklist.txt");

#[derive(Parser)]
#[command(name = "ebaf")]
#[command(about = "XDP domain blocker and its control plane", long_about = None)]
struct Cli {
    #[arg(long, value_enum, env = "EBAF_LOG_LEVEL", default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,
    #[arg(long, value_enum, env = "EBAF_LOG_FORMAT", default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach the classifier to an interface and keep it current until signalled
    Run(RunCommand),
    /// Run one control-plane cycle against in-process tables
    DryRun(DryRunCommand),
    /// Print the Address Table of a running agent as JSON
    Dump(DumpCommand),
}

#[derive(Args)]
struct RunCommand {
    /// Network interface to attach the XDP program to
    #[arg(long, value_name = "IFACE", env = "EBAF_IFACE")]
    iface: String,
    /// XDP attach mode; `auto` tries skb, then driver, then the default
    #[arg(long, value_enum, env = "EBAF_XDP_MODE", default_value_t = XdpMode::Auto)]
    xdp_mode: XdpMode,
    /// Directory the maps are pinned under
    #[arg(long, value_name = "DIR", env = "EBAF_PIN_DIR", default_value = loader::DEFAULT_PIN_DIR)]
    pin_dir: PathBuf,
    /// Seconds between global stat lines on stdout
    #[arg(long, env = "EBAF_STATUS_INTERVAL_SECS", default_value_t = 1)]
    status_interval_secs: u64,
    #[command(flatten)]
    agent: AgentArgs,
}

#[derive(Args)]
struct DryRunCommand {
    #[command(flatten)]
    agent: AgentArgs,
}

#[derive(Args)]
struct DumpCommand {
    #[arg(long, value_name = "DIR", env = "EBAF_PIN_DIR", default_value = loader::DEFAULT_PIN_DIR)]
    pin_dir: PathBuf,
}

#[derive(Args)]
struct AgentArgs {
    /// Seconds between resolution cycles
    #[arg(long, env = "EBAF_INTERVAL_SECS", default_value_t = 600)]
    interval_secs: u64,
    /// Whitelist candidate paths; the first readable one is used
    #[arg(long = "whitelist", value_name = "PATH", default_values = DEFAULT_WHITELIST_PATHS)]
    whitelist_paths: Vec<PathBuf>,
    /// Blacklist candidate paths; the first readable one replaces the built-in list
    #[arg(long = "blacklist", value_name = "PATH", default_values = DEFAULT_BLACKLIST_PATHS)]
    blacklist_paths: Vec<PathBuf>,
    /// Per-domain drop counts, rewritten every cycle
    #[arg(long, value_name = "PATH", env = "EBAF_DOMAIN_STATS_FILE", default_value = DEFAULT_DOMAIN_STATS_FILE)]
    domain_stats_file: PathBuf,
    /// Global counters, rewritten with every status line
    #[arg(long, value_name = "PATH", env = "EBAF_STATS_FILE", default_value = DEFAULT_STATS_FILE)]
    stats_file: PathBuf,
    /// Refresh whitelist exceptions only at startup
    #[arg(long = "no-whitelist-refresh-each-cycle", action = ArgAction::SetTrue)]
    no_whitelist_refresh_each_cycle: bool,
}

impl AgentArgs {
    fn into_config(self, status_interval: Duration) -> Result<AgentConfig> {
        let config = AgentConfig {
            resolve_interval: Duration::from_secs(self.interval_secs),
            status_interval,
            whitelist_paths: self.whitelist_paths,
            blacklist_paths: self.blacklist_paths,
            domain_stats_file: self.domain_stats_file,
            stats_file: self.stats_file,
            refresh_whitelist_each_cycle: !self.no_whitelist_refresh_each_cycle,
            ..AgentConfig::default()
        };
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("ebaf error: {err:?}");
        exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level, cli.log_format)?;

    match cli.command {
        Commands::Run(cmd) => run_agent(cmd).await,
        Commands::DryRun(cmd) => dry_run(cmd),
        Commands::Dump(cmd) => {
            let value = loader::dump_address_table(&cmd.pin_dir)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
    }
}

/// Registry fill, whitelist load and the startup exceptions refresh.
fn start_control_plane(ctx: &FirewallContext) -> Result<()> {
    let domains = ctx
        .populate_registry()
        .context("failed to populate domain registry")?;
    let patterns = ctx.load_whitelist().context("failed to load whitelist")?;
    let refresh = ctx
        .refresh_exceptions()
        .context("initial exceptions refresh failed")?;
    info!(
        domains,
        patterns,
        protected = refresh.protected,
        "control plane ready"
    );
    Ok(())
}

async fn run_agent(cmd: RunCommand) -> Result<()> {
    let config = cmd
        .agent
        .into_config(Duration::from_secs(cmd.status_interval_secs))?;
    let opts = loader::AttachOptions {
        iface: cmd.iface,
        xdp_mode: cmd.xdp_mode,
        pin_dir: cmd.pin_dir,
    };

    let (firewall, tables) = loader::load_and_attach(&opts)?;
    let ctx = Arc::new(FirewallContext::new(
        config,
        TableHandles::from_kernel(tables),
        Arc::new(SystemResolver),
        SEED_LIST,
    ));

    let result = serve(&ctx).await;

    ctx.teardown();
    let iface = firewall.iface().to_string();
    firewall
        .detach()
        .with_context(|| format!("failed to detach from {iface}"))?;
    result
}

async fn serve(ctx: &Arc<FirewallContext>) -> Result<()> {
    start_control_plane(ctx)?;

    let token = shutdown::create_shutdown_token();
    let sink = Arc::new(FileSink::new(ctx.config.domain_stats_file.clone()));
    let handle = scheduler::spawn(ctx.clone(), sink, token.clone())
        .context("failed to start scheduler thread")?;

    let status = status::run_status_loop(
        ctx.tables.stats.clone(),
        ctx.config.stats_file.clone(),
        ctx.config.status_interval,
        token.clone(),
    )
    .await;
    if let Err(err) = &status {
        error!(error = %err, "status loop failed");
    }

    info!("shutting down");
    let stopped = task::spawn_blocking(move || handle.shutdown())
        .await
        .map_err(|err| anyhow!("scheduler join task failed: {err}"))?;
    stopped.context("scheduler stopped with an error")?;
    status
}

fn dry_run(cmd: DryRunCommand) -> Result<()> {
    let config = cmd.agent.into_config(Duration::from_secs(1))?;
    let tables = Arc::new(MemoryTables::new(config.address_capacity));
    let ctx = FirewallContext::new(
        config,
        TableHandles::from_memory(tables.clone()),
        Arc::new(SystemResolver),
        SEED_LIST,
    );

    start_control_plane(&ctx)?;
    let sink = MemorySink::new();
    let report = scheduler::run_cycle(&ctx, &sink, false).context("resolution cycle failed")?;
    info!(
        resolved = report.resolve.resolved,
        failed = report.resolve.failed,
        inserted = report.resolve.inserted,
        "dry run cycle finished"
    );

    let blocked = loader::entries_to_json(tables.entries()?);
    println!("{}", serde_json::to_string_pretty(&blocked)?);
    if let Some(snapshot) = sink.last() {
        snapshot
            .write_to(std::io::stdout().lock())
            .context("failed to print snapshot")?;
    }

    ctx.teardown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_match_agent_defaults() {
        let cli = Cli::try_parse_from(["ebaf", "run", "--iface", "eth0"]).unwrap();
        let Commands::Run(cmd) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(cmd.xdp_mode, XdpMode::Auto);
        let config = cmd.agent.into_config(Duration::from_secs(1)).unwrap();
        let defaults = AgentConfig::default();
        assert_eq!(config.resolve_interval, defaults.resolve_interval);
        assert_eq!(config.whitelist_paths, defaults.whitelist_paths);
        assert_eq!(config.blacklist_paths, defaults.blacklist_paths);
        assert!(config.refresh_whitelist_each_cycle);
    }

    #[test]
    fn repeated_list_flags_replace_defaults() {
        let cli = Cli::try_parse_from([
            "ebaf",
            "dry-run",
            "--whitelist",
            "a.txt",
            "--whitelist",
            "b.txt",
            "--no-whitelist-refresh-each-cycle",
        ])
        .unwrap();
        let Commands::DryRun(cmd) = cli.command else {
            panic!("expected dry-run");
        };
        let config = cmd.agent.into_config(Duration::from_secs(1)).unwrap();
        assert_eq!(
            config.whitelist_paths,
            vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]
        );
        assert!(!config.refresh_whitelist_each_cycle);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let cli = Cli::try_parse_from(["ebaf", "dry-run", "--interval-secs", "0"]).unwrap();
        let Commands::DryRun(cmd) = cli.command else {
            panic!("expected dry-run");
        };
        assert!(cmd.agent.into_config(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn seed_list_is_not_empty() {
        assert!(!ebaf_control::lists::parse_str(SEED_LIST).is_empty());
    }
}
