//! The billing sweep: invoice elapsed periods and roll them forward.

use std::sync::Arc;

use crate::clock::{BillingClock, SystemClock};
use crate::config::BillingConfig;
use crate::error::Result;
use crate::gateway::ProvisioningClient;
use crate::invoice::{GatewayInvoiceClient, InvoiceGenerator};
use crate::store::{BillingStore, Subscription};
use crate::subscription::{SubscriptionLifecycle, SubscriptionManager};
use crate::sweeps::SweepReport;

/// Bills every active or trialing subscription whose payment date has
/// arrived.
///
/// Per record, in order: reconcile the seat count with the gateway, invoice
/// the elapsed period, then roll the period forward. The roll goes last so a
/// crash mid-record leaves the due date in place; the next run repeats the
/// record and the deterministic invoice number turns the repeat into a
/// lookup instead of a second invoice.
pub struct BillingSweep<S, G>
where
    S: BillingStore + Clone,
    G: ProvisioningClient + GatewayInvoiceClient + Clone,
{
    store: S,
    subscriptions: SubscriptionManager<S, G>,
    invoices: InvoiceGenerator<S, G>,
    lifecycle: SubscriptionLifecycle<S>,
    clock: Arc<dyn BillingClock>,
}

impl<S, G> BillingSweep<S, G>
where
    S: BillingStore + Clone,
    G: ProvisioningClient + GatewayInvoiceClient + Clone,
{
    #[must_use]
    pub fn new(store: S, client: G, config: BillingConfig) -> Self {
        Self::with_clock(store, client, config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        store: S,
        client: G,
        config: BillingConfig,
        clock: Arc<dyn BillingClock>,
    ) -> Self {
        Self {
            subscriptions: SubscriptionManager::with_clock(
                store.clone(),
                client.clone(),
                config.clone(),
                Arc::clone(&clock),
            ),
            invoices: InvoiceGenerator::with_clock(
                store.clone(),
                client,
                config.clone(),
                Arc::clone(&clock),
            ),
            lifecycle: SubscriptionLifecycle::with_clock(store.clone(), config, Arc::clone(&clock)),
            store,
            clock,
        }
    }

    /// One pass over every due subscription.
    pub async fn run(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let due = self.store.subscriptions_due_for_billing(now).await?;
        let mut report = SweepReport::sized(due.len());

        for subscription in due {
            match self.bill_one(&subscription).await {
                Ok(()) => report.success(),
                Err(err) => {
                    tracing::error!(
                        target: "seatwise::sweeps",
                        sweep = "billing",
                        subscription_id = %subscription.id,
                        company_id = %subscription.company_id,
                        error = %err,
                        "billing pass failed for subscription"
                    );
                    report.failure(subscription.id.clone(), err);
                }
            }
        }

        tracing::info!(
            target: "seatwise::sweeps",
            sweep = "billing",
            scanned = report.scanned,
            succeeded = report.succeeded,
            failed = report.failed,
            "billing sweep complete"
        );
        Ok(report)
    }

    async fn bill_one(&self, subscription: &Subscription) -> Result<()> {
        // Seats first so the invoice bills the true count
        self.subscriptions
            .update_seat_quantity(&subscription.id)
            .await?;
        self.invoices.invoice_elapsed_period(subscription).await?;
        self.lifecycle.roll_period(&subscription.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryBillingStore;
    use crate::subscription::GatewaySubscriptionData;
    use crate::testing::{
        CompanyBuilder, FixedClock, MockGateway, SubscriptionBuilder, UserBuilder,
    };
    use chrono::{DateTime, TimeZone, Utc};

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    async fn seed_company(store: &InMemoryBillingStore, company_id: &str, seats: usize) {
        store
            .add_company(
                CompanyBuilder::new(company_id)
                    .with_gateway_customer(format!("cus_{company_id}"))
                    .build(),
            )
            .await;
        for n in 0..seats {
            store
                .add_user(
                    UserBuilder::new(company_id)
                        .with_id(format!("{company_id}_user_{n}"))
                        .build(),
                )
                .await;
        }
    }

    fn gateway_sub(id: &str, customer: &str, quantity: u32) -> GatewaySubscriptionData {
        GatewaySubscriptionData {
            id: id.to_string(),
            customer_id: customer.to_string(),
            status: "active".to_string(),
            current_period_start: utc(2024, 6, 1),
            current_period_end: utc(2024, 7, 1),
            cancel_at_period_end: false,
            canceled_at: None,
            trial_end: None,
            quantity,
        }
    }

    fn sweep(
        store: &InMemoryBillingStore,
        gateway: &MockGateway,
        now: DateTime<Utc>,
    ) -> BillingSweep<InMemoryBillingStore, MockGateway> {
        BillingSweep::with_clock(
            store.clone(),
            gateway.clone(),
            BillingConfig::default(),
            FixedClock::at(now),
        )
    }

    #[tokio::test]
    async fn bills_the_elapsed_period_and_rolls_forward() {
        let store = InMemoryBillingStore::new();
        seed_company(&store, "co_1", 5).await;
        // Period Jun-Jul billed in arrears: payment date is Aug 1
        store
            .save_subscription(
                &SubscriptionBuilder::new("co_1")
                    .with_id("sub_1")
                    .with_gateway_id("gwsub_1")
                    .build(),
            )
            .await
            .unwrap();
        let gateway = MockGateway::new();
        gateway.seed_subscription(gateway_sub("gwsub_1", "cus_co_1", 5));

        let report = sweep(&store, &gateway, utc(2024, 8, 1)).run().await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.succeeded, 1);
        assert!(report.is_clean());

        let invoices = store.list_company_invoices("co_1").await.unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].invoice_number, "INV-CO1-202406");
        assert_eq!(invoices[0].period_start, utc(2024, 6, 1));
        assert_eq!(invoices[0].period_end, utc(2024, 7, 1));
        assert_eq!(invoices[0].total_cents, 500);

        let sub = store.get_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.current_period_start, utc(2024, 7, 1));
        assert_eq!(sub.current_period_end, utc(2024, 8, 1));
        assert_eq!(sub.next_payment_date, utc(2024, 9, 1));
    }

    #[tokio::test]
    async fn subscription_not_yet_due_is_not_scanned() {
        let store = InMemoryBillingStore::new();
        seed_company(&store, "co_1", 5).await;
        store
            .save_subscription(
                &SubscriptionBuilder::new("co_1")
                    .with_id("sub_1")
                    .with_gateway_id("gwsub_1")
                    .build(),
            )
            .await
            .unwrap();
        let gateway = MockGateway::new();

        // A day before the Aug 1 payment date
        let report = sweep(&store, &gateway, utc(2024, 7, 31)).run().await.unwrap();
        assert_eq!(report.scanned, 0);
        assert!(store.list_company_invoices("co_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_record_does_not_block_the_batch() {
        let store = InMemoryBillingStore::new();
        // Six users against a stored count of five forces a gateway seat call
        seed_company(&store, "co_1", 6).await;
        seed_company(&store, "co_2", 5).await;
        store
            .save_subscription(
                &SubscriptionBuilder::new("co_1")
                    .with_id("sub_1")
                    .with_gateway_id("gwsub_1")
                    .build(),
            )
            .await
            .unwrap();
        store
            .save_subscription(
                &SubscriptionBuilder::new("co_2")
                    .with_id("sub_2")
                    .with_gateway_id("gwsub_2")
                    .build(),
            )
            .await
            .unwrap();
        let gateway = MockGateway::new();
        gateway.seed_subscription(gateway_sub("gwsub_1", "cus_co_1", 5));
        gateway.seed_subscription(gateway_sub("gwsub_2", "cus_co_2", 5));
        gateway.fail_next("set_seat_quantity");

        let report = sweep(&store, &gateway, utc(2024, 8, 1)).run().await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].record_id, "sub_1");

        // The healthy record was still billed and rolled
        let sub = store.get_subscription("sub_2").await.unwrap().unwrap();
        assert_eq!(sub.next_payment_date, utc(2024, 9, 1));
        assert_eq!(store.list_company_invoices("co_2").await.unwrap().len(), 1);

        // The failed record kept its due date for the next pass
        let sub = store.get_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.next_payment_date, utc(2024, 8, 1));
        assert!(store.list_company_invoices("co_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rerun_after_crash_before_roll_does_not_double_bill() {
        let store = InMemoryBillingStore::new();
        seed_company(&store, "co_1", 5).await;
        store
            .save_subscription(
                &SubscriptionBuilder::new("co_1")
                    .with_id("sub_1")
                    .with_gateway_id("gwsub_1")
                    .build(),
            )
            .await
            .unwrap();
        let gateway = MockGateway::new();
        gateway.seed_subscription(gateway_sub("gwsub_1", "cus_co_1", 5));

        let sweep = sweep(&store, &gateway, utc(2024, 8, 1));

        // Invoice lands but the crash happens before the period roll
        let sub = store.get_subscription("sub_1").await.unwrap().unwrap();
        sweep.invoices.invoice_elapsed_period(&sub).await.unwrap();
        assert_eq!(store.list_company_invoices("co_1").await.unwrap().len(), 1);

        // The rerun finds the invoice by number instead of minting another
        let report = sweep.run().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(store.list_company_invoices("co_1").await.unwrap().len(), 1);
        let sub = store.get_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.next_payment_date, utc(2024, 9, 1));
    }
}
