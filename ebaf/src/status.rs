use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ebaf_control::{GlobalStats, StatsTable, write_stats_file};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Print and publish global counters every `interval` until `token` is
/// cancelled. A stats read failure ends the loop with an error.
pub async fn run_status_loop(
    stats: Arc<dyn StatsTable>,
    stats_file: PathBuf,
    interval: Duration,
    token: CancellationToken,
) -> Result<()> {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let current = stats.read().context("failed to read stats counters")?;
                println!("{}", status_line(Utc::now(), current));
                if let Err(err) = write_stats_file(&stats_file, current) {
                    warn!(path = %stats_file.display(), error = %err, "failed to write stats file");
                }
            }
        }
    }
    Ok(())
}

fn status_line(now: DateTime<Utc>, stats: GlobalStats) -> String {
    format!("[{}] {stats}", now.format("%Y-%m-%dT%H:%M:%SZ"))
}
