//! The trial-expiration sweep: warn companies whose trial is almost over.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::clock::{BillingClock, SystemClock};
use crate::error::Result;
use crate::history::{BillingEvent, BillingHistoryEntry, HistoryRecorder};
use crate::store::BillingStore;
use crate::sweeps::SweepReport;

/// How far ahead of the trial deadline the sweep starts notifying.
const NOTICE_WINDOW_DAYS: i64 = 1;

/// Trial-ending notifications, delegated to the surrounding product.
#[allow(async_fn_in_trait)]
pub trait TrialNotifier: Send + Sync {
    /// Tell the company its trial ends at `ends_at`.
    ///
    /// Called on every sweep pass while the deadline is inside the notice
    /// window, so deduplication is the notifier's concern.
    async fn notify_trial_ending(&self, company_id: &str, ends_at: DateTime<Utc>) -> Result<()>;
}

/// Notifies every trialing subscription whose deadline is within a day.
///
/// Notify-only: the subscription itself changes state through the gateway's
/// own trial-to-active conversion, not here.
pub struct TrialSweep<S, N>
where
    S: BillingStore + Clone,
    N: TrialNotifier,
{
    store: S,
    notifier: N,
    recorder: HistoryRecorder<S>,
    clock: Arc<dyn BillingClock>,
}

impl<S, N> TrialSweep<S, N>
where
    S: BillingStore + Clone,
    N: TrialNotifier,
{
    #[must_use]
    pub fn new(store: S, notifier: N) -> Self {
        Self::with_clock(store, notifier, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(store: S, notifier: N, clock: Arc<dyn BillingClock>) -> Self {
        Self {
            recorder: HistoryRecorder::new(store.clone()),
            store,
            notifier,
            clock,
        }
    }

    /// One pass over every trial inside the notice window.
    pub async fn run(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let cutoff = now + Duration::days(NOTICE_WINDOW_DAYS);
        let ending = self.store.subscriptions_in_trial_ending_by(cutoff).await?;
        let mut report = SweepReport::sized(ending.len());

        for subscription in ending {
            // The scan only selects records carrying a deadline
            let Some(ends_at) = subscription.trial_ends_at else {
                continue;
            };
            match self
                .notifier
                .notify_trial_ending(&subscription.company_id, ends_at)
                .await
            {
                Ok(()) => {
                    self.recorder
                        .record(
                            BillingHistoryEntry::new(
                                &subscription.company_id,
                                BillingEvent::TrialEndingSoon,
                                format!("Trial ends on {}", ends_at.format("%Y-%m-%d")),
                                now,
                            )
                            .with_subscription(&subscription.id),
                        )
                        .await;
                    report.success();
                }
                Err(err) => {
                    tracing::error!(
                        target: "seatwise::sweeps",
                        sweep = "trial",
                        subscription_id = %subscription.id,
                        company_id = %subscription.company_id,
                        error = %err,
                        "trial notification failed"
                    );
                    report.failure(subscription.id.clone(), err);
                }
            }
        }

        tracing::info!(
            target: "seatwise::sweeps",
            sweep = "trial",
            scanned = report.scanned,
            succeeded = report.succeeded,
            failed = report.failed,
            "trial sweep complete"
        );
        Ok(report)
    }
}
