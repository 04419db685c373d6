//! Supervised sweep loops.
//!
//! Three tokio tasks at different cadences:
//! - expiry (default 5 s): cached deadlines, durable message sweep, expired
//!   session keys. This one is correctness-critical.
//! - incidents (default 1 h): purge old resolved incidents.
//! - logs (default 24 h): purge old system log entries.
//!
//! Each loop runs a pass on its first tick, then sleeps until the next tick,
//! a wake request (expiry only) or shutdown. A failing pass is logged and the
//! loop carries on; the next tick is the retry.

use std::sync::Arc;
use std::time::Duration;

use cinder_store::models::now;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SweepConfig;
use crate::scheduler::DestructionScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Expiry,
    Incidents,
    Logs,
}

impl Job {
    fn name(self) -> &'static str {
        match self {
            Job::Expiry => "expiry",
            Job::Incidents => "incident-retention",
            Job::Logs => "log-retention",
        }
    }
}

/// Handle over the running loops.
pub struct Sweepers {
    wake: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Sweepers {
    /// Run an expiry pass now instead of at the next tick.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Signal every loop and wait for all of them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "sweep loop ended abnormally");
            }
        }
        info!("sweep loops stopped");
    }
}

/// Spawn the three loops. Intervals must be non-zero (see
/// [`SweepConfig::validate`]).
pub fn spawn_sweepers(scheduler: Arc<DestructionScheduler>, config: &SweepConfig) -> Sweepers {
    let wake = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handles = vec![
        spawn_loop(
            Job::Expiry,
            config.expiry_interval(),
            scheduler.clone(),
            Some(wake.clone()),
            shutdown_rx.clone(),
        ),
        spawn_loop(
            Job::Incidents,
            config.incident_interval(),
            scheduler.clone(),
            None,
            shutdown_rx.clone(),
        ),
        spawn_loop(Job::Logs, config.log_interval(), scheduler, None, shutdown_rx),
    ];

    Sweepers {
        wake,
        shutdown_tx,
        handles,
    }
}

fn spawn_loop(
    job: Job,
    period: Duration,
    scheduler: Arc<DestructionScheduler>,
    wake: Option<Arc<Notify>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(job = job.name(), interval_secs = period.as_secs(), "sweep loop started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = woken(wake.as_deref()) => {
                    debug!(job = job.name(), "sweep loop woken early");
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(job = job.name(), "sweep loop shutting down");
                        return;
                    }
                    continue;
                }
            }

            if *shutdown_rx.borrow() {
                return;
            }
            run_pass(job, &scheduler).await;
        }
    })
}

async fn woken(wake: Option<&Notify>) {
    match wake {
        Some(wake) => wake.notified().await,
        None => std::future::pending().await,
    }
}

async fn run_pass(job: Job, scheduler: &DestructionScheduler) {
    let now = now();
    match job {
        Job::Expiry => {
            let fired = scheduler.fire_due(now).await;
            if fired > 0 {
                debug!(fired, "cached deadlines fired");
            }
            if let Err(e) = scheduler.sweep_expired(now).await {
                warn!(error = %e, "expired message sweep failed, retrying next tick");
            }
            if let Err(e) = scheduler.sweep_expired_keys(now).await {
                warn!(error = %e, "expired session key sweep failed, retrying next tick");
            }
        }
        Job::Incidents => {
            if let Err(e) = scheduler.purge_resolved_incidents(now).await {
                warn!(error = %e, "incident retention pass failed");
            }
        }
        Job::Logs => {
            if let Err(e) = scheduler.purge_system_logs(now).await {
                warn!(error = %e, "log retention pass failed");
            }
        }
    }
}
