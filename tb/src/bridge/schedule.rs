//! Periodic loops: reconciliation and liveness probes
//!
//! Both loops run until the shutdown flag flips to `true` (or its sender is
//! dropped). A failing tick is logged; the schedule continues.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::core::Bridge;
use crate::dispatch::DispatchGateway;

fn ticker(period: Duration) -> time::Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Returns true once shutdown has been requested
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) -> bool {
    match shutdown.changed().await {
        Ok(()) => *shutdown.borrow(),
        Err(_) => true,
    }
}

/// Reconcile every `period`, off the async worker threads
pub async fn run_sync_loop(bridge: Bridge, period: Duration, mut shutdown: watch::Receiver<bool>) {
    info!(period_ms = period.as_millis() as u64, "Sync loop started");
    let mut interval = ticker(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = bridge.request_reconcile().await {
                    warn!(error = %e, "Reconciliation task failed");
                }
            }
            stop = shutdown_requested(&mut shutdown) => {
                if stop {
                    break;
                }
            }
        }
    }
    info!("Sync loop stopped");
}

/// One liveness tick; returns whether a probe was queued
pub fn liveness_tick(gateway: &DispatchGateway) -> bool {
    if !gateway.is_ready() {
        trace!("Dispatch sink not ready, skipping liveness probe");
        return false;
    }
    match gateway.request_liveness_probe() {
        Ok(()) => {
            debug!("Liveness probe requested");
            true
        }
        Err(e) => {
            warn!(error = %e, "Failed to request liveness probe");
            false
        }
    }
}

/// Ask the transport to probe every client each `period`
pub async fn run_liveness_loop(gateway: DispatchGateway, period: Duration, mut shutdown: watch::Receiver<bool>) {
    info!(period_ms = period.as_millis() as u64, "Liveness loop started");
    let mut interval = ticker(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                liveness_tick(&gateway);
            }
            stop = shutdown_requested(&mut shutdown) => {
                if stop {
                    break;
                }
            }
        }
    }
    info!("Liveness loop stopped");
}
