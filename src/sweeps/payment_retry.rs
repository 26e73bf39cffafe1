//! The payment retry sweep: reopen failed payments whose retry date arrived.

use std::sync::Arc;

use crate::clock::{BillingClock, SystemClock};
use crate::config::BillingConfig;
use crate::error::Result;
use crate::payment::{GatewayPaymentIntentClient, PaymentProcessor};
use crate::store::BillingStore;
use crate::sweeps::SweepReport;

/// Retries every failed payment that is due and still has attempts left.
///
/// The sweep only schedules the attempt; the gateway decides how it ends
/// and reports back through webhook events.
pub struct PaymentRetrySweep<S, C>
where
    S: BillingStore + Clone,
    C: GatewayPaymentIntentClient,
{
    payments: PaymentProcessor<S, C>,
}

impl<S, C> PaymentRetrySweep<S, C>
where
    S: BillingStore + Clone,
    C: GatewayPaymentIntentClient,
{
    #[must_use]
    pub fn new(store: S, client: C, config: BillingConfig) -> Self {
        Self::with_clock(store, client, config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        store: S,
        client: C,
        config: BillingConfig,
        clock: Arc<dyn BillingClock>,
    ) -> Self {
        Self {
            payments: PaymentProcessor::with_clock(store, client, config, clock),
        }
    }

    /// One pass over every due retry.
    pub async fn run(&self) -> Result<SweepReport> {
        let due = self.payments.due_for_retry().await?;
        let mut report = SweepReport::sized(due.len());

        for payment in due {
            match self.payments.retry_payment(&payment.id).await {
                Ok(_) => report.success(),
                Err(err) => {
                    tracing::error!(
                        target: "seatwise::sweeps",
                        sweep = "payment_retry",
                        payment_id = %payment.id,
                        company_id = %payment.company_id,
                        error = %err,
                        "retry failed for payment"
                    );
                    report.failure(payment.id.clone(), err);
                }
            }
        }

        tracing::info!(
            target: "seatwise::sweeps",
            sweep = "payment_retry",
            scanned = report.scanned,
            succeeded = report.succeeded,
            failed = report.failed,
            "payment retry sweep complete"
        );
        Ok(report)
    }
}
