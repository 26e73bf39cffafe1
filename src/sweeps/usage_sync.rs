//! The usage-sync sweep: reconcile seat counts with the active-user roster.

use std::sync::Arc;

use crate::clock::{BillingClock, SystemClock};
use crate::config::BillingConfig;
use crate::error::Result;
use crate::gateway::ProvisioningClient;
use crate::store::BillingStore;
use crate::subscription::SubscriptionManager;
use crate::sweeps::SweepReport;

/// Converges every active or trialing subscription's seat count onto the
/// authoritative active-user count.
///
/// Seat changes recorded between sweeps already adjusted the gateway; this
/// pass catches drift from roster changes that bypassed the usage tracker.
/// Matching counts are a success, not a skip, so the report reads as "all
/// subscriptions converged".
pub struct UsageSyncSweep<S, G>
where
    S: BillingStore + Clone,
    G: ProvisioningClient + Clone,
{
    store: S,
    subscriptions: SubscriptionManager<S, G>,
}

impl<S, G> UsageSyncSweep<S, G>
where
    S: BillingStore + Clone,
    G: ProvisioningClient + Clone,
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
            subscriptions: SubscriptionManager::with_clock(store.clone(), client, config, clock),
            store,
        }
    }

    /// One pass over every live subscription.
    pub async fn run(&self) -> Result<SweepReport> {
        let live = self.store.active_subscriptions().await?;
        let mut report = SweepReport::sized(live.len());

        for subscription in live {
            match self
                .subscriptions
                .update_seat_quantity(&subscription.id)
                .await
            {
                Ok(_) => report.success(),
                Err(err) => {
                    tracing::error!(
                        target: "seatwise::sweeps",
                        sweep = "usage_sync",
                        subscription_id = %subscription.id,
                        company_id = %subscription.company_id,
                        error = %err,
                        "seat reconciliation failed"
                    );
                    report.failure(subscription.id.clone(), err);
                }
            }
        }

        tracing::info!(
            target: "seatwise::sweeps",
            sweep = "usage_sync",
            scanned = report.scanned,
            succeeded = report.succeeded,
            failed = report.failed,
            "usage sync sweep complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryBillingStore;
    use crate::store::SubscriptionStatus;
    use crate::subscription::GatewaySubscriptionData;
    use crate::testing::{
        CompanyBuilder, FixedClock, MockGateway, SubscriptionBuilder, UserBuilder,
    };
    use chrono::{TimeZone, Utc};

    async fn company_with_users(store: &InMemoryBillingStore, company: &str, users: usize) {
        store.add_company(CompanyBuilder::new(company).build()).await;
        for n in 0..users {
            store
                .add_user(
                    UserBuilder::new(company)
                        .with_id(format!("{company}_user_{n}"))
                        .build(),
                )
                .await;
        }
    }

    fn gateway_sub(id: &str, quantity: u32) -> GatewaySubscriptionData {
        GatewaySubscriptionData {
            id: id.to_string(),
            customer_id: "cus_any".to_string(),
            status: "active".to_string(),
            current_period_start: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            current_period_end: Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
            cancel_at_period_end: false,
            canceled_at: None,
            trial_end: None,
            quantity,
        }
    }

    #[tokio::test]
    async fn converges_drifted_seat_counts() {
        let store = InMemoryBillingStore::new();
        // Stored count says 5 but the roster grew to 7
        company_with_users(&store, "co_1", 7).await;
        company_with_users(&store, "co_2", 5).await;
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
        gateway.seed_subscription(gateway_sub("gwsub_1", 5));
        gateway.seed_subscription(gateway_sub("gwsub_2", 5));

        let sweep = UsageSyncSweep::with_clock(
            store.clone(),
            gateway.clone(),
            BillingConfig::default(),
            FixedClock::at(Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap()),
        );
        let report = sweep.run().await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.succeeded, 2);

        let drifted = store.get_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(drifted.current_user_count, 7);
        assert_eq!(gateway.subscription("gwsub_1").unwrap().quantity, 7);

        // The matching one was left alone at the gateway
        assert_eq!(gateway.subscription("gwsub_2").unwrap().quantity, 5);
    }

    #[tokio::test]
    async fn suspended_subscriptions_are_not_scanned() {
        let store = InMemoryBillingStore::new();
        company_with_users(&store, "co_1", 5).await;
        store
            .save_subscription(
                &SubscriptionBuilder::new("co_1")
                    .with_id("sub_1")
                    .with_status(SubscriptionStatus::Suspended)
                    .build(),
            )
            .await
            .unwrap();
        let gateway = MockGateway::new();

        let sweep = UsageSyncSweep::with_clock(
            store.clone(),
            gateway.clone(),
            BillingConfig::default(),
            FixedClock::at(Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap()),
        );
        let report = sweep.run().await.unwrap();
        assert_eq!(report.scanned, 0);
    }
}
