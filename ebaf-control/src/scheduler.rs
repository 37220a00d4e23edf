//! Resolution Scheduler: the background thread that keeps the tables in
//! step with DNS and publishes per-domain drop counts.

use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    context::FirewallContext,
    error::CycleError,
    registry::ResolveReport,
    snapshot::SnapshotSink,
    whitelist::RefreshReport,
};

const SLEEP_STEP: Duration = Duration::from_secs(1);

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CycleReport {
    pub resolve: ResolveReport,
    pub refresh: Option<RefreshReport>,
    pub total_drops: u64,
    pub published_domains: usize,
}

/// One pass: resolve, optionally refresh exceptions, aggregate, publish.
///
/// A failing sink is logged and does not fail the cycle; table failures do.
pub fn run_cycle(
    ctx: &FirewallContext,
    sink: &dyn SnapshotSink,
    refresh_exceptions: bool,
) -> Result<CycleReport, CycleError> {
    let resolve = ctx
        .registry
        .resolve_all(ctx.resolver.as_ref(), ctx.tables.addresses.as_ref())?;

    let refresh = if refresh_exceptions {
        Some(ctx.refresh_exceptions()?)
    } else {
        None
    };

    let total_drops = ctx
        .registry
        .aggregate_drop_counts(ctx.tables.addresses.as_ref())?;

    let snapshot = ctx.registry.snapshot();
    if let Err(err) = sink.publish(&snapshot) {
        warn!(error = %err, "failed to publish domain snapshot");
    }

    Ok(CycleReport {
        resolve,
        refresh,
        total_drops,
        published_domains: snapshot.len(),
    })
}

pub struct SchedulerHandle {
    token: CancellationToken,
    thread: Option<JoinHandle<Result<(), CycleError>>>,
}

impl SchedulerHandle {
    /// Cancel and wait for the thread. Returns the error that stopped the
    /// loop, if any.
    pub fn shutdown(mut self) -> Result<(), CycleError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), CycleError> {
        self.token.cancel();
        match self.thread.take() {
            Some(thread) => match thread.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            },
            None => Ok(()),
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(err) = self.stop() {
                error!(error = %err, "scheduler stopped with an error");
            }
        }
    }
}

/// Start the loop. The first cycle runs immediately; the exceptions refresh
/// that follows startup is the caller's job.
pub fn spawn(
    ctx: Arc<FirewallContext>,
    sink: Arc<dyn SnapshotSink>,
    token: CancellationToken,
) -> io::Result<SchedulerHandle> {
    let loop_token = token.clone();
    let thread = thread::Builder::new()
        .name("ebaf-scheduler".into())
        .spawn(move || {
            let result = run_loop(&ctx, sink.as_ref(), &loop_token);
            if let Err(err) = &result {
                error!(error = %err, "scheduler loop failed");
                loop_token.cancel();
            }
            result
        })?;

    Ok(SchedulerHandle {
        token,
        thread: Some(thread),
    })
}

fn run_loop(
    ctx: &FirewallContext,
    sink: &dyn SnapshotSink,
    token: &CancellationToken,
) -> Result<(), CycleError> {
    let interval = ctx.config.resolve_interval;
    let refresh = ctx.config.refresh_whitelist_each_cycle;
    info!(interval_secs = interval.as_secs(), "scheduler started");

    let mut first = true;
    while !token.is_cancelled() {
        let started = Instant::now();
        let report = run_cycle(ctx, sink, refresh)?;
        if first {
            if report.resolve.resolved == 0 {
                warn!("no blacklisted domain resolved, nothing is blocked yet");
            }
            info!(
                blocked_addresses = report.resolve.inserted,
                "initial address table loaded"
            );
            first = false;
        }
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            total_drops = report.total_drops,
            domains = report.published_domains,
            "cycle finished"
        );

        if !sleep_unless_cancelled(token, interval) {
            break;
        }
    }

    info!("scheduler stopped");
    Ok(())
}

/// Sleeps in steps of at most one second. Returns `false` if cancelled.
fn sleep_unless_cancelled(token: &CancellationToken, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SLEEP_STEP.min(deadline - now));
    }
}
