//! In-process interval scheduler for the reconciliation sweeps.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::sweeps::SweepReport;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const HOUR: Duration = Duration::from_secs(60 * 60);

type SweepRunner = Arc<dyn Fn() -> BoxFuture<'static, Result<SweepReport>> + Send + Sync>;

/// Cadence for each sweep. Defaults follow the reconciliation schedule:
/// hourly usage sync, everything else daily.
#[derive(Debug, Clone)]
pub struct SweepSchedule {
    pub billing_every: Duration,
    pub grace_every: Duration,
    pub payment_retry_every: Duration,
    pub trial_every: Duration,
    pub usage_sync_every: Duration,
}

impl Default for SweepSchedule {
    fn default() -> Self {
        Self {
            billing_every: DAY,
            grace_every: DAY,
            payment_retry_every: DAY,
            trial_every: DAY,
            usage_sync_every: HOUR,
        }
    }
}

struct ScheduledSweep {
    name: &'static str,
    every: Duration,
    runner: SweepRunner,
}

/// Owns one interval loop per registered sweep.
///
/// A cron stand-in for deployments without an external scheduler. Each sweep
/// runs once at startup and then on its interval, so a restarted process
/// catches up immediately instead of waiting out a full period. Deployments
/// with real cron should skip this and call each sweep's `run()` from their
/// trigger instead.
///
/// ```rust,ignore
/// let schedule = SweepSchedule::default();
/// let billing = Arc::new(BillingSweep::new(store.clone(), client.clone(), config.clone()));
/// let grace = Arc::new(GraceSweep::new(store.clone(), config.clone()));
///
/// let handle = SweepScheduler::new()
///     .register("billing", schedule.billing_every, move || {
///         let sweep = Arc::clone(&billing);
///         async move { sweep.run().await }
///     })
///     .register("grace", schedule.grace_every, move || {
///         let sweep = Arc::clone(&grace);
///         async move { sweep.run().await }
///     })
///     .start();
///
/// // ... on shutdown:
/// handle.shutdown().await;
/// ```
#[derive(Default)]
pub struct SweepScheduler {
    sweeps: Vec<ScheduledSweep>,
}

impl SweepScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self { sweeps: Vec::new() }
    }

    /// Register a sweep under its log name.
    #[must_use]
    pub fn register<F, Fut>(mut self, name: &'static str, every: Duration, sweep: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SweepReport>> + Send + 'static,
    {
        self.sweeps.push(ScheduledSweep {
            name,
            every,
            runner: Arc::new(move || Box::pin(sweep())),
        });
        self
    }

    /// Spawn one interval loop per registered sweep.
    pub fn start(self) -> SweepSchedulerHandle {
        let mut tasks = Vec::new();
        let mut shutdown_txs = Vec::new();

        for sweep in self.sweeps {
            let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
            let task = tokio::spawn(async move {
                tracing::info!(
                    target: "seatwise::sweeps",
                    sweep = sweep.name,
                    every_secs = sweep.every.as_secs(),
                    "sweep loop started"
                );
                let mut interval = tokio::time::interval(sweep.every);
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = interval.tick() => {
                            if let Err(err) = (sweep.runner)().await {
                                // Per-record failures are already inside the
                                // report; this is the scan itself failing.
                                tracing::error!(
                                    target: "seatwise::sweeps",
                                    sweep = sweep.name,
                                    error = %err,
                                    "sweep run failed"
                                );
                            }
                        }
                    }
                }
                tracing::info!(
                    target: "seatwise::sweeps",
                    sweep = sweep.name,
                    "sweep loop stopped"
                );
            });
            tasks.push(task);
            shutdown_txs.push(shutdown_tx);
        }

        SweepSchedulerHandle { tasks, shutdown_txs }
    }
}

/// Handle to the running interval loops.
pub struct SweepSchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
    shutdown_txs: Vec<mpsc::Sender<()>>,
}

impl SweepSchedulerHandle {
    /// Signal every loop and wait for each to finish its current run.
    pub async fn shutdown(self) {
        for tx in self.shutdown_txs {
            let _ = tx.send(()).await;
        }
        for task in self.tasks {
            let _ = task.await;
        }
        tracing::info!(target: "seatwise::sweeps", "sweep scheduler shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn default_schedule_is_daily_except_usage_sync() {
        let schedule = SweepSchedule::default();
        assert_eq!(schedule.billing_every, DAY);
        assert_eq!(schedule.grace_every, DAY);
        assert_eq!(schedule.payment_retry_every, DAY);
        assert_eq!(schedule.trial_every, DAY);
        assert_eq!(schedule.usage_sync_every, HOUR);
    }

    #[tokio::test]
    async fn runs_on_interval_until_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let handle = SweepScheduler::new()
            .register("counting", Duration::from_millis(10), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(SweepReport::default())
                }
            })
            .start();

        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.shutdown().await;
        let after_shutdown = runs.load(Ordering::SeqCst);

        // First tick fires immediately, the rest on the interval
        assert!(after_shutdown >= 2, "expected at least 2 runs, got {after_shutdown}");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_shutdown);
    }

    #[tokio::test]
    async fn sweep_error_does_not_stop_the_loop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let handle = SweepScheduler::new()
            .register("failing", Duration::from_millis(10), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(crate::error::BillingError::store_unavailable(
                        "scan", "down",
                    ))
                }
            })
            .start();

        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.shutdown().await;

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }
}
