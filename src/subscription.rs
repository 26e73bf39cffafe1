//! Subscription lifecycle management.
//!
//! Split in two layers. [`SubscriptionLifecycle`] owns the store-only state
//! transitions (grace period, suspension, period roll, gateway-driven sync)
//! and is reachable without any gateway client bound, which is what the
//! payment processor and the sweeps need. [`SubscriptionManager`] layers the
//! gateway orchestration on top: creation, seat reconciliation, cancellation
//! and reactivation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::clock::{BillingClock, SystemClock, advance_period, grace_period_end, next_billing_date};
use crate::config::BillingConfig;
use crate::customer::CustomerManager;
use crate::error::{BillingError, Result};
use crate::gateway::ProvisioningClient;
use crate::history::{BillingEvent, BillingHistoryEntry, HistoryRecorder};
use crate::payment_methods::PaymentMethodManager;
use crate::pricing::PriceResolver;
use crate::store::{AccountStatus, BillingStore, Company, Subscription, SubscriptionStatus};

/// Attempts at a compare-and-swap save before giving up with a conflict.
const MAX_SAVE_ATTEMPTS: u32 = 3;

// =============================================================================
// Gateway subscription client
// =============================================================================

/// How the gateway handles mid-period quantity changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProrationBehavior {
    /// Issue a proration invoice immediately.
    AlwaysInvoice,
    /// Accrue proration items onto the next invoice.
    CreateProrations,
    /// No proration.
    None,
}

impl ProrationBehavior {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlwaysInvoice => "always_invoice",
            Self::CreateProrations => "create_prorations",
            Self::None => "none",
        }
    }
}

/// Request to create a gateway subscription.
#[derive(Debug, Clone)]
pub struct CreateGatewaySubscriptionRequest {
    pub customer_id: String,
    pub price_id: String,
    /// Initial seat quantity.
    pub quantity: u32,
    /// Trial length; `None` starts billing immediately.
    pub trial_period_days: Option<u32>,
    /// Company reference carried as gateway metadata.
    pub company_id: String,
}

/// A gateway subscription snapshot, as returned by the gateway API or
/// carried inside `customer.subscription.*` webhook events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySubscriptionData {
    pub id: String,
    pub customer_id: String,
    /// Raw gateway status string; parse with
    /// [`SubscriptionStatus::from_gateway`].
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub quantity: u32,
}

/// Gateway subscription operations.
#[allow(async_fn_in_trait)]
pub trait GatewaySubscriptionClient: Send + Sync {
    /// Create a subscription at the gateway.
    async fn create_subscription(
        &self,
        request: CreateGatewaySubscriptionRequest,
    ) -> Result<GatewaySubscriptionData>;

    /// Set the seat quantity on an existing gateway subscription.
    async fn set_seat_quantity(
        &self,
        subscription_id: &str,
        quantity: u32,
        proration: ProrationBehavior,
    ) -> Result<GatewaySubscriptionData>;

    /// Cancel immediately.
    async fn cancel_subscription(&self, subscription_id: &str) -> Result<GatewaySubscriptionData>;

    /// Flag the subscription to cancel when the current period ends.
    async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<GatewaySubscriptionData>;

    /// Clear a pending cancel-at-period-end flag.
    async fn resume_subscription(&self, subscription_id: &str) -> Result<GatewaySubscriptionData>;
}

// =============================================================================
// Store-only lifecycle core
// =============================================================================

/// Store-only subscription state transitions.
///
/// Every mutation here follows the same discipline: read the current record,
/// treat "already in the target state" as success, apply the change, and save
/// with [`BillingStore::compare_and_save_subscription`]. On a version conflict
/// the mutation is re-applied to a fresh read; after [`MAX_SAVE_ATTEMPTS`]
/// conflicts the operation fails with a `conflict` error. No gateway call is
/// ever made from inside the save loop.
pub struct SubscriptionLifecycle<S: BillingStore + Clone> {
    store: S,
    config: BillingConfig,
    clock: Arc<dyn BillingClock>,
    recorder: HistoryRecorder<S>,
}

impl<S: BillingStore + Clone> Clone for SubscriptionLifecycle<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
            recorder: self.recorder.clone(),
        }
    }
}

impl<S: BillingStore + Clone> SubscriptionLifecycle<S> {
    /// Create a lifecycle core on the system clock.
    #[must_use]
    pub fn new(store: S, config: BillingConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a lifecycle core with an injected clock.
    #[must_use]
    pub fn with_clock(store: S, config: BillingConfig, clock: Arc<dyn BillingClock>) -> Self {
        let recorder = HistoryRecorder::new(store.clone());
        Self {
            store,
            config,
            clock,
            recorder,
        }
    }

    /// The store this lifecycle writes through.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Read-modify-CAS loop shared by every transition.
    ///
    /// `mutate` returns `Ok(false)` when the record is already in the target
    /// state, in which case nothing is saved and the current record is
    /// returned as success.
    pub(crate) async fn update_with<F>(&self, subscription_id: &str, mutate: F) -> Result<Subscription>
    where
        F: Fn(&mut Subscription) -> Result<bool>,
    {
        for attempt in 0..MAX_SAVE_ATTEMPTS {
            let current = self
                .store
                .get_subscription(subscription_id)
                .await?
                .ok_or_else(|| BillingError::not_found("subscription", subscription_id))?;

            let mut updated = current.clone();
            if !mutate(&mut updated)? {
                return Ok(current);
            }

            let expected = current.version;
            updated.version = expected + 1;
            updated.updated_at = self.clock.now();

            if self
                .store
                .compare_and_save_subscription(&updated, expected)
                .await?
            {
                return Ok(updated);
            }

            tracing::debug!(
                target: "seatwise::subscription",
                subscription_id,
                attempt,
                "version conflict on save, re-reading"
            );
        }

        Err(BillingError::ConcurrentModification {
            subscription_id: subscription_id.to_string(),
        })
    }

    async fn mirror_company<F>(&self, company_id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Company),
    {
        if let Some(mut company) = self.store.get_company(company_id).await? {
            apply(&mut company);
            self.store.save_company(&company).await?;
        }
        Ok(())
    }

    /// Put the subscription into its grace period after a payment failure
    /// cascade.
    ///
    /// Sets status to past due and the grace deadline to now plus the
    /// configured grace days. Idempotent: called again while already past
    /// due it refreshes the deadline. The trial deadline is cleared so the
    /// two windows are never active together.
    pub async fn start_grace_period(&self, subscription_id: &str) -> Result<Subscription> {
        let now = self.clock.now();
        let deadline = grace_period_end(now, self.config.grace_period_days);

        let updated = self
            .update_with(subscription_id, |sub| {
                if sub.status.is_terminal() {
                    return Err(BillingError::AlreadyTerminal {
                        entity: "subscription",
                        id: sub.id.clone(),
                        state: sub.status.to_string(),
                    });
                }
                if !sub.status.can_transition_to(SubscriptionStatus::PastDue) {
                    return Err(BillingError::InvalidTransition {
                        entity: "subscription",
                        from: sub.status.to_string(),
                        to: SubscriptionStatus::PastDue.to_string(),
                    });
                }
                sub.status = SubscriptionStatus::PastDue;
                sub.grace_period_ends_at = Some(deadline);
                sub.payment_status = Some(crate::store::PaymentStanding::Failed);
                sub.trial_ends_at = None;
                Ok(true)
            })
            .await?;

        self.mirror_company(&updated.company_id, |company| {
            company.account_status = AccountStatus::PastDue;
            company.billing_status = Some(SubscriptionStatus::PastDue.as_str().to_string());
            company.trial_ends_at = None;
        })
        .await?;

        tracing::warn!(
            target: "seatwise::subscription",
            subscription_id,
            company_id = %updated.company_id,
            grace_ends_at = %deadline,
            "grace period started"
        );
        self.recorder
            .record(
                BillingHistoryEntry::new(
                    &updated.company_id,
                    BillingEvent::GracePeriodStarted,
                    format!("Grace period started, service continues until {deadline}"),
                    now,
                )
                .with_subscription(subscription_id)
                .with_details(json!({ "grace_period_ends_at": deadline })),
            )
            .await;

        Ok(updated)
    }

    /// Suspend the account once the grace period has run out.
    ///
    /// Only legal from past due. Already-suspended subscriptions are left
    /// untouched and returned as success.
    pub async fn suspend_account(&self, subscription_id: &str) -> Result<Subscription> {
        let now = self.clock.now();

        let updated = self
            .update_with(subscription_id, |sub| {
                if sub.status == SubscriptionStatus::Suspended {
                    return Ok(false);
                }
                if !sub.status.can_transition_to(SubscriptionStatus::Suspended) {
                    return Err(BillingError::InvalidTransition {
                        entity: "subscription",
                        from: sub.status.to_string(),
                        to: SubscriptionStatus::Suspended.to_string(),
                    });
                }
                sub.status = SubscriptionStatus::Suspended;
                sub.grace_period_ends_at = None;
                Ok(true)
            })
            .await?;

        if updated.status != SubscriptionStatus::Suspended {
            return Ok(updated);
        }

        self.mirror_company(&updated.company_id, |company| {
            company.account_status = AccountStatus::Suspended;
            company.suspension_reason = Some("grace_period_expired".to_string());
            company.billing_status = Some(SubscriptionStatus::Suspended.as_str().to_string());
        })
        .await?;

        tracing::warn!(
            target: "seatwise::subscription",
            subscription_id,
            company_id = %updated.company_id,
            "account suspended after grace period expiry"
        );
        self.recorder
            .record(
                BillingHistoryEntry::new(
                    &updated.company_id,
                    BillingEvent::AccountSuspended,
                    "Account suspended: grace period expired without payment",
                    now,
                )
                .with_subscription(subscription_id)
                .with_details(json!({ "reason": "grace_period_expired" })),
            )
            .await;

        Ok(updated)
    }

    /// Advance the billing period after the elapsed period was invoiced.
    ///
    /// The new period starts where the old one ended; the next payment date
    /// lands one billing cycle past the new period end, keeping the engine
    /// billing in arrears. This must run after invoice creation, never
    /// before, so a crash leaves at most a redundant invoice attempt.
    pub async fn roll_period(&self, subscription_id: &str) -> Result<Subscription> {
        self.update_with(subscription_id, |sub| {
            let (start, end) = advance_period(sub.current_period_end, sub.billing_interval);
            sub.current_period_start = start;
            sub.current_period_end = end;
            sub.next_payment_date = next_billing_date(end, sub.billing_interval);
            Ok(true)
        })
        .await
    }

    /// Record a failed payment on the subscription without starting grace.
    pub async fn mark_payment_failed(&self, subscription_id: &str) -> Result<Subscription> {
        self.update_with(subscription_id, |sub| {
            if sub.payment_status == Some(crate::store::PaymentStanding::Failed) {
                return Ok(false);
            }
            sub.payment_status = Some(crate::store::PaymentStanding::Failed);
            Ok(true)
        })
        .await
    }

    /// Record a successful payment: clears any grace window and recovers the
    /// subscription to active from past due, suspended or unpaid.
    pub async fn record_payment_success(&self, subscription_id: &str) -> Result<Subscription> {
        let now = self.clock.now();

        let updated = self
            .update_with(subscription_id, |sub| {
                let recovers = matches!(
                    sub.status,
                    SubscriptionStatus::PastDue
                        | SubscriptionStatus::Suspended
                        | SubscriptionStatus::Unpaid
                );
                let already_settled = sub.payment_status
                    == Some(crate::store::PaymentStanding::Paid)
                    && sub.grace_period_ends_at.is_none()
                    && !recovers;
                if already_settled {
                    return Ok(false);
                }
                if recovers {
                    sub.status = SubscriptionStatus::Active;
                }
                sub.payment_status = Some(crate::store::PaymentStanding::Paid);
                sub.last_payment_date = Some(now);
                sub.grace_period_ends_at = None;
                Ok(true)
            })
            .await?;

        if updated.status == SubscriptionStatus::Active {
            self.mirror_company(&updated.company_id, |company| {
                if company.account_status != AccountStatus::Active {
                    company.account_status = AccountStatus::Active;
                    company.suspension_reason = None;
                }
                company.billing_status = Some(SubscriptionStatus::Active.as_str().to_string());
            })
            .await?;
        }

        Ok(updated)
    }

    /// Map a gateway subscription snapshot onto the local record.
    ///
    /// Used by the `customer.subscription.updated` webhook. Period window,
    /// cancel flag and trial deadline are taken as-is; the status only moves
    /// when the change is a legal transition, otherwise the local status
    /// stands and the divergence is logged. Seat counts are never taken from
    /// the gateway, the usage tracker owns those.
    ///
    /// Returns `None` when no local record references this gateway
    /// subscription.
    pub async fn apply_gateway_update(
        &self,
        data: &GatewaySubscriptionData,
    ) -> Result<Option<Subscription>> {
        let Some(existing) = self.store.get_subscription_by_gateway_id(&data.id).await? else {
            tracing::debug!(
                target: "seatwise::subscription",
                gateway_subscription_id = %data.id,
                "gateway update for unknown subscription, ignoring"
            );
            return Ok(None);
        };

        let next_status = SubscriptionStatus::from_gateway(&data.status);
        let updated = self
            .update_with(&existing.id, |sub| {
                if sub.status.can_transition_to(next_status) {
                    sub.status = next_status;
                } else {
                    tracing::warn!(
                        target: "seatwise::subscription",
                        subscription_id = %sub.id,
                        local_status = %sub.status,
                        gateway_status = %data.status,
                        "gateway status does not map to a legal transition, keeping local"
                    );
                }
                sub.current_period_start = data.current_period_start;
                sub.current_period_end = data.current_period_end;
                sub.cancel_at_period_end = data.cancel_at_period_end;
                sub.trial_ends_at = data.trial_end;
                if let Some(canceled_at) = data.canceled_at {
                    sub.canceled_at = Some(canceled_at);
                }
                Ok(true)
            })
            .await?;

        self.mirror_company(&updated.company_id, |company| {
            company.billing_status = Some(updated.status.as_str().to_string());
        })
        .await?;

        Ok(Some(updated))
    }

    /// Finalize a cancellation reported by the gateway.
    ///
    /// Deferred cancellations (`cancel_at_period_end`) complete when the
    /// gateway deletes the subscription at the period boundary and delivers
    /// `customer.subscription.deleted`; this is that landing point. Unknown
    /// gateway IDs are tolerated and return `None`.
    pub async fn finalize_gateway_cancellation(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        let Some(existing) = self
            .store
            .get_subscription_by_gateway_id(gateway_subscription_id)
            .await?
        else {
            return Ok(None);
        };

        let now = self.clock.now();
        let updated = self
            .update_with(&existing.id, |sub| {
                if sub.is_canceled() {
                    return Ok(false);
                }
                sub.status = SubscriptionStatus::Canceled;
                sub.cancel_at_period_end = false;
                sub.canceled_at = Some(now);
                sub.grace_period_ends_at = None;
                Ok(true)
            })
            .await?;

        self.mirror_company(&updated.company_id, |company| {
            company.account_status = AccountStatus::Canceled;
            company.billing_status = Some(SubscriptionStatus::Canceled.as_str().to_string());
        })
        .await?;

        self.recorder
            .record(
                BillingHistoryEntry::new(
                    &updated.company_id,
                    BillingEvent::SubscriptionCanceled,
                    "Subscription cancellation finalized by the gateway",
                    now,
                )
                .with_subscription(&updated.id)
                .with_details(json!({ "gateway_subscription_id": gateway_subscription_id })),
            )
            .await;

        Ok(Some(updated))
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Request to create a subscription for a company.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionRequest {
    pub company_id: String,
    /// Gateway payment method to attach and set as default.
    pub payment_method_id: String,
    /// Actor recorded in billing history.
    pub created_by: String,
    /// Start with the configured trial period instead of billing now.
    pub start_trial: bool,
}

/// Request to cancel a subscription.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionRequest {
    pub subscription_id: String,
    /// Cancel now instead of at the period boundary.
    pub immediate: bool,
    pub canceled_by: String,
}

/// Request to reactivate a subscription.
#[derive(Debug, Clone)]
pub struct ReactivateSubscriptionRequest {
    pub subscription_id: String,
    pub reactivated_by: String,
}

/// Result of a seat-quantity reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SeatSyncOutcome {
    /// Stored count already matched the authoritative count.
    Unchanged { seats: u32 },
    /// Gateway and store were brought up to the authoritative count.
    Updated { previous: u32, current: u32 },
}

/// Subscription management operations against the gateway.
pub struct SubscriptionManager<S, G>
where
    S: BillingStore + Clone,
    G: ProvisioningClient + Clone,
{
    store: S,
    client: G,
    customers: CustomerManager<S, G>,
    prices: PriceResolver<S, G>,
    payment_methods: PaymentMethodManager<S, G>,
    lifecycle: SubscriptionLifecycle<S>,
    config: BillingConfig,
    clock: Arc<dyn BillingClock>,
    recorder: HistoryRecorder<S>,
}

impl<S, G> SubscriptionManager<S, G>
where
    S: BillingStore + Clone,
    G: ProvisioningClient + Clone,
{
    /// Create a subscription manager on the system clock.
    #[must_use]
    pub fn new(store: S, client: G, config: BillingConfig) -> Self {
        Self::with_clock(store, client, config, Arc::new(SystemClock))
    }

    /// Create a subscription manager with an injected clock.
    #[must_use]
    pub fn with_clock(
        store: S,
        client: G,
        config: BillingConfig,
        clock: Arc<dyn BillingClock>,
    ) -> Self {
        Self {
            customers: CustomerManager::new(store.clone(), client.clone()),
            prices: PriceResolver::new(store.clone(), client.clone(), config.clone()),
            payment_methods: PaymentMethodManager::new(store.clone(), client.clone()),
            lifecycle: SubscriptionLifecycle::with_clock(
                store.clone(),
                config.clone(),
                Arc::clone(&clock),
            ),
            recorder: HistoryRecorder::new(store.clone()),
            store,
            client,
            config,
            clock,
        }
    }

    /// The store-only lifecycle core, for callers that need transitions
    /// without gateway bounds.
    #[must_use]
    pub fn lifecycle(&self) -> &SubscriptionLifecycle<S> {
        &self.lifecycle
    }

    /// Get a subscription by ID.
    pub async fn get_subscription(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        self.store.get_subscription(subscription_id).await
    }

    /// Get a company's current subscription.
    pub async fn company_subscription(&self, company_id: &str) -> Result<Option<Subscription>> {
        self.store.subscription_for_company(company_id).await
    }

    /// Create a subscription for a company.
    ///
    /// Ensures a gateway customer exists, attaches the payment method as
    /// default, resolves the seat rate and its gateway price, creates the
    /// gateway subscription sized to the company's current active-user
    /// count, and persists the local record with the next payment date one
    /// billing cycle past the period end.
    pub async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<Subscription> {
        let company_id = &request.company_id;
        // Also validates the company exists
        let customer_id = self.customers.get_or_create_customer(company_id).await?;

        if let Some(existing) = self.store.subscription_for_company(company_id).await? {
            if !existing.status.is_terminal() {
                return Err(BillingError::invalid_argument(format!(
                    "company '{company_id}' already has a live subscription '{}'",
                    existing.id
                )));
            }
        }

        self.payment_methods
            .attach(company_id, &request.payment_method_id)
            .await?;
        self.payment_methods
            .set_default(company_id, &request.payment_method_id)
            .await?;

        let seats = self.store.count_active_users(company_id).await?;
        let rate = self.prices.seat_rate().await?;
        let price_id = self
            .prices
            .ensure_gateway_price(&rate, self.config.billing_interval)
            .await?;

        let trial_days = request
            .start_trial
            .then_some(self.config.trial_period_days)
            .filter(|days| *days > 0);

        let gateway_sub = self
            .client
            .create_subscription(CreateGatewaySubscriptionRequest {
                customer_id: customer_id.clone(),
                price_id,
                quantity: seats,
                trial_period_days: trial_days,
                company_id: company_id.clone(),
            })
            .await?;

        let now = self.clock.now();
        let status = SubscriptionStatus::from_gateway(&gateway_sub.status);
        let subscription = Subscription {
            id: Uuid::new_v4().to_string(),
            company_id: company_id.clone(),
            gateway_subscription_id: gateway_sub.id.clone(),
            gateway_customer_id: customer_id,
            status,
            cancel_at_period_end: false,
            canceled_at: None,
            price_per_user_cents: rate.price_per_user_cents,
            currency: rate.currency.clone(),
            billing_interval: self.config.billing_interval,
            current_period_start: gateway_sub.current_period_start,
            current_period_end: gateway_sub.current_period_end,
            next_payment_date: next_billing_date(
                gateway_sub.current_period_end,
                self.config.billing_interval,
            ),
            current_user_count: seats,
            last_billed_user_count: seats,
            trial_ends_at: gateway_sub.trial_end,
            grace_period_ends_at: None,
            payment_status: None,
            last_payment_date: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.store.save_subscription(&subscription).await?;

        if let Some(mut company) = self.store.get_company(company_id).await? {
            company.account_status = if status == SubscriptionStatus::Trial {
                AccountStatus::Trial
            } else {
                AccountStatus::Active
            };
            company.billing_status = Some(status.as_str().to_string());
            company.trial_ends_at = subscription.trial_ends_at;
            self.store.save_company(&company).await?;
        }

        tracing::info!(
            target: "seatwise::subscription",
            company_id,
            subscription_id = %subscription.id,
            seats,
            status = %status,
            "subscription created"
        );
        self.recorder
            .record(
                BillingHistoryEntry::new(
                    company_id,
                    BillingEvent::SubscriptionCreated,
                    format!("Subscription created with {seats} seats"),
                    now,
                )
                .with_subscription(&subscription.id)
                .with_actor(&request.created_by)
                .with_details(json!({
                    "seats": seats,
                    "price_per_user_cents": rate.price_per_user_cents,
                    "currency": rate.currency,
                    "trial": request.start_trial,
                })),
            )
            .await;

        Ok(subscription)
    }

    /// Reconcile the gateway seat quantity with the authoritative active-user
    /// count.
    ///
    /// Idempotent: no-ops when the stored count already matches. The gateway
    /// is updated with "always invoice" proration behavior first; the local
    /// count is then saved through the CAS loop, and a version conflict
    /// re-applies the count to a fresh read without repeating the gateway
    /// call.
    pub async fn update_seat_quantity(&self, subscription_id: &str) -> Result<SeatSyncOutcome> {
        let sub = self
            .store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| BillingError::not_found("subscription", subscription_id))?;

        if sub.status.is_terminal() {
            return Err(BillingError::AlreadyTerminal {
                entity: "subscription",
                id: sub.id.clone(),
                state: sub.status.to_string(),
            });
        }

        let authoritative = self.store.count_active_users(&sub.company_id).await?;
        if authoritative == sub.current_user_count {
            return Ok(SeatSyncOutcome::Unchanged {
                seats: authoritative,
            });
        }

        self.client
            .set_seat_quantity(
                &sub.gateway_subscription_id,
                authoritative,
                ProrationBehavior::AlwaysInvoice,
            )
            .await?;

        let previous = sub.current_user_count;
        self.lifecycle
            .update_with(subscription_id, |record| {
                if record.current_user_count == authoritative {
                    return Ok(false);
                }
                record.current_user_count = authoritative;
                Ok(true)
            })
            .await?;

        tracing::info!(
            target: "seatwise::subscription",
            subscription_id,
            company_id = %sub.company_id,
            previous,
            current = authoritative,
            "seat quantity reconciled"
        );
        self.recorder
            .record(
                BillingHistoryEntry::new(
                    &sub.company_id,
                    BillingEvent::SubscriptionUpdated,
                    format!("Seat quantity updated from {previous} to {authoritative}"),
                    self.clock.now(),
                )
                .with_subscription(subscription_id)
                .with_details(json!({ "previous": previous, "current": authoritative })),
            )
            .await;

        Ok(SeatSyncOutcome::Updated {
            previous,
            current: authoritative,
        })
    }

    /// Cancel a subscription, immediately or at the period boundary.
    ///
    /// Immediate cancellation terminates at the gateway, marks the local
    /// record canceled and the company account canceled. Deferred
    /// cancellation only sets the flag; the gateway's own period-end
    /// deletion event finalizes it through
    /// [`SubscriptionLifecycle::finalize_gateway_cancellation`]. Canceling
    /// an already-canceled subscription is a no-op success.
    pub async fn cancel_subscription(
        &self,
        request: CancelSubscriptionRequest,
    ) -> Result<Subscription> {
        let sub = self
            .store
            .get_subscription(&request.subscription_id)
            .await?
            .ok_or_else(|| BillingError::not_found("subscription", &request.subscription_id))?;

        if sub.is_canceled() {
            return Ok(sub);
        }

        let now = self.clock.now();
        let updated = if request.immediate {
            self.client
                .cancel_subscription(&sub.gateway_subscription_id)
                .await?;

            let updated = self
                .lifecycle
                .update_with(&request.subscription_id, |record| {
                    if record.is_canceled() {
                        return Ok(false);
                    }
                    record.status = SubscriptionStatus::Canceled;
                    record.cancel_at_period_end = false;
                    record.canceled_at = Some(now);
                    record.grace_period_ends_at = None;
                    Ok(true)
                })
                .await?;

            self.lifecycle
                .mirror_company(&sub.company_id, |company| {
                    company.account_status = AccountStatus::Canceled;
                    company.billing_status =
                        Some(SubscriptionStatus::Canceled.as_str().to_string());
                })
                .await?;
            updated
        } else {
            if sub.will_cancel() {
                return Ok(sub);
            }
            self.client
                .cancel_at_period_end(&sub.gateway_subscription_id)
                .await?;

            self.lifecycle
                .update_with(&request.subscription_id, |record| {
                    if record.cancel_at_period_end {
                        return Ok(false);
                    }
                    record.cancel_at_period_end = true;
                    Ok(true)
                })
                .await?
        };

        tracing::info!(
            target: "seatwise::subscription",
            subscription_id = %request.subscription_id,
            company_id = %sub.company_id,
            immediate = request.immediate,
            "subscription canceled"
        );
        let description = if request.immediate {
            "Subscription canceled immediately"
        } else {
            "Subscription scheduled to cancel at period end"
        };
        self.recorder
            .record(
                BillingHistoryEntry::new(&sub.company_id, BillingEvent::SubscriptionCanceled, description, now)
                    .with_subscription(&request.subscription_id)
                    .with_actor(&request.canceled_by)
                    .with_details(json!({ "immediate": request.immediate })),
            )
            .await;

        Ok(updated)
    }

    /// Reactivate a subscription.
    ///
    /// Clears a pending cancel-at-period-end flag and recovers past due,
    /// suspended or unpaid subscriptions to active. Rejected once the
    /// subscription is canceled, the one terminal state. An active
    /// subscription with nothing to clear is a no-op success.
    pub async fn reactivate_subscription(
        &self,
        request: ReactivateSubscriptionRequest,
    ) -> Result<Subscription> {
        let sub = self
            .store
            .get_subscription(&request.subscription_id)
            .await?
            .ok_or_else(|| BillingError::not_found("subscription", &request.subscription_id))?;

        if sub.is_canceled() {
            return Err(BillingError::AlreadyTerminal {
                entity: "subscription",
                id: sub.id.clone(),
                state: sub.status.to_string(),
            });
        }
        let healthy = matches!(
            sub.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trial
        );
        if healthy && !sub.will_cancel() {
            return Ok(sub);
        }
        if !sub.status.can_transition_to(SubscriptionStatus::Active) {
            return Err(BillingError::InvalidTransition {
                entity: "subscription",
                from: sub.status.to_string(),
                to: SubscriptionStatus::Active.to_string(),
            });
        }

        self.client
            .resume_subscription(&sub.gateway_subscription_id)
            .await?;

        let now = self.clock.now();
        let updated = self
            .lifecycle
            .update_with(&request.subscription_id, |record| {
                let healthy = matches!(
                    record.status,
                    SubscriptionStatus::Active | SubscriptionStatus::Trial
                );
                if healthy && !record.cancel_at_period_end {
                    return Ok(false);
                }
                // Trials keep trialing; everything else recovers to active
                if record.status != SubscriptionStatus::Trial {
                    record.status = SubscriptionStatus::Active;
                }
                record.cancel_at_period_end = false;
                record.grace_period_ends_at = None;
                Ok(true)
            })
            .await?;

        self.lifecycle
            .mirror_company(&sub.company_id, |company| {
                company.account_status = if updated.status == SubscriptionStatus::Trial {
                    AccountStatus::Trial
                } else {
                    AccountStatus::Active
                };
                company.suspension_reason = None;
                company.billing_status = Some(updated.status.as_str().to_string());
            })
            .await?;

        tracing::info!(
            target: "seatwise::subscription",
            subscription_id = %request.subscription_id,
            company_id = %sub.company_id,
            "subscription reactivated"
        );
        self.recorder
            .record(
                BillingHistoryEntry::new(
                    &sub.company_id,
                    BillingEvent::AccountReactivated,
                    "Subscription reactivated",
                    now,
                )
                .with_subscription(&request.subscription_id)
                .with_actor(&request.reactivated_by),
            )
            .await;

        Ok(updated)
    }

    /// See [`SubscriptionLifecycle::start_grace_period`].
    pub async fn start_grace_period(&self, subscription_id: &str) -> Result<Subscription> {
        self.lifecycle.start_grace_period(subscription_id).await
    }

    /// See [`SubscriptionLifecycle::suspend_account`].
    pub async fn suspend_account(&self, subscription_id: &str) -> Result<Subscription> {
        self.lifecycle.suspend_account(subscription_id).await
    }
}
