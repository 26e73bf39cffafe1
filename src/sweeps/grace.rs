//! The grace-period sweep: suspend accounts whose grace deadline passed.

use std::sync::Arc;

use crate::clock::{BillingClock, SystemClock};
use crate::config::BillingConfig;
use crate::error::Result;
use crate::store::BillingStore;
use crate::subscription::SubscriptionLifecycle;
use crate::sweeps::SweepReport;

/// Suspends every past-due subscription whose grace period has expired.
///
/// Store-only: suspension is a local decision, the gateway keeps retrying
/// the underlying invoice on its own schedule.
pub struct GraceSweep<S: BillingStore + Clone> {
    store: S,
    lifecycle: SubscriptionLifecycle<S>,
    clock: Arc<dyn BillingClock>,
}

impl<S: BillingStore + Clone> GraceSweep<S> {
    #[must_use]
    pub fn new(store: S, config: BillingConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(store: S, config: BillingConfig, clock: Arc<dyn BillingClock>) -> Self {
        Self {
            lifecycle: SubscriptionLifecycle::with_clock(store.clone(), config, Arc::clone(&clock)),
            store,
            clock,
        }
    }

    /// One pass over every expired grace period.
    pub async fn run(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let expired = self.store.subscriptions_with_expired_grace(now).await?;
        let mut report = SweepReport::sized(expired.len());

        for subscription in expired {
            match self.lifecycle.suspend_account(&subscription.id).await {
                Ok(_) => report.success(),
                Err(err) => {
                    tracing::error!(
                        target: "seatwise::sweeps",
                        sweep = "grace",
                        subscription_id = %subscription.id,
                        company_id = %subscription.company_id,
                        error = %err,
                        "suspension failed for subscription"
                    );
                    report.failure(subscription.id.clone(), err);
                }
            }
        }

        tracing::info!(
            target: "seatwise::sweeps",
            sweep = "grace",
            scanned = report.scanned,
            succeeded = report.succeeded,
            failed = report.failed,
            "grace sweep complete"
        );
        Ok(report)
    }
}
