//! Payment attempt tracking and bounded retries.
//!
//! Each invoice collection runs as a chain of [`Payment`] attempts against
//! one gateway payment intent. The chain is bounded: the attempt that reaches
//! the configured cap is the final one, and its failure starts the
//! subscription's grace period exactly once. Success and failure both arrive
//! asynchronously from the gateway, so every entry point here re-checks the
//! persisted record before acting and treats stale notices as no-ops.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::clock::{BillingClock, SystemClock};
use crate::config::BillingConfig;
use crate::error::{BillingError, Result};
use crate::history::{BillingEvent, BillingHistoryEntry, HistoryRecorder};
use crate::payment_methods::PaymentMethod;
use crate::retry::RetryPolicy;
use crate::store::{BillingStore, Payment, PaymentStatus};
use crate::subscription::SubscriptionLifecycle;

// =============================================================================
// Gateway payment intent client
// =============================================================================

/// A payment intent as reported by the gateway.
#[derive(Debug, Clone)]
pub struct GatewayPaymentIntent {
    pub id: String,
    /// Raw gateway status string ("succeeded", "processing", ...).
    pub status: String,
    pub amount_cents: i64,
    pub currency: String,
    /// The payment method the intent will charge, when the gateway expands it.
    pub payment_method: Option<PaymentMethod>,
}

/// Gateway payment intent operations.
#[allow(async_fn_in_trait)]
pub trait GatewayPaymentIntentClient: Send + Sync {
    /// Retrieve a payment intent with its payment method expanded.
    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<GatewayPaymentIntent>;

    /// Confirm a payment intent, asking the gateway to attempt the charge
    /// again. The result arrives later as a webhook, not in this call.
    async fn confirm_payment_intent(&self, intent_id: &str) -> Result<GatewayPaymentIntent>;
}

/// Map a raw gateway intent status onto the local attempt status.
///
/// Everything that is neither settled nor canceled is in flight.
fn payment_status_from_gateway(status: &str) -> PaymentStatus {
    match status {
        "succeeded" => PaymentStatus::Succeeded,
        "canceled" => PaymentStatus::Canceled,
        _ => PaymentStatus::Pending,
    }
}

/// Whether a confirm call is valid for an intent in this gateway state.
fn intent_is_confirmable(status: &str) -> bool {
    matches!(status, "requires_confirmation" | "requires_payment_method")
}

// =============================================================================
// Processor
// =============================================================================

/// Request to record a payment attempt for an invoice.
#[derive(Debug, Clone)]
pub struct ProcessPaymentRequest {
    pub invoice_id: String,
    pub payment_intent_ref: String,
}

/// A payment failure reported by the gateway or a sweep.
///
/// Carries either the local payment ID or the gateway intent reference;
/// webhooks only know the latter.
#[derive(Debug, Clone, Default)]
pub struct PaymentFailureNotice {
    pub payment_id: Option<String>,
    pub payment_intent_ref: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
}

/// Records payment attempts and drives the bounded retry chain.
pub struct PaymentProcessor<S, C>
where
    S: BillingStore + Clone,
    C: GatewayPaymentIntentClient,
{
    store: S,
    client: C,
    lifecycle: SubscriptionLifecycle<S>,
    schedule: RetryPolicy,
    config: BillingConfig,
    clock: Arc<dyn BillingClock>,
    recorder: HistoryRecorder<S>,
}

impl<S, C> PaymentProcessor<S, C>
where
    S: BillingStore + Clone,
    C: GatewayPaymentIntentClient,
{
    /// Create a payment processor on the system clock.
    #[must_use]
    pub fn new(store: S, client: C, config: BillingConfig) -> Self {
        Self::with_clock(store, client, config, Arc::new(SystemClock))
    }

    /// Create a payment processor with an injected clock.
    #[must_use]
    pub fn with_clock(
        store: S,
        client: C,
        config: BillingConfig,
        clock: Arc<dyn BillingClock>,
    ) -> Self {
        Self {
            lifecycle: SubscriptionLifecycle::with_clock(
                store.clone(),
                config.clone(),
                Arc::clone(&clock),
            ),
            schedule: config.payment_retry_policy(),
            recorder: HistoryRecorder::new(store.clone()),
            store,
            client,
            config,
            clock,
        }
    }

    /// Record a payment attempt for an invoice.
    ///
    /// Retrieves the intent from the gateway and persists a first-attempt
    /// [`Payment`] with a redacted card summary. When a record for the same
    /// intent already exists (webhooks redeliver), its status is synced from
    /// the gateway report instead of minting a duplicate.
    pub async fn process_payment(&self, request: ProcessPaymentRequest) -> Result<Payment> {
        let invoice = self
            .store
            .get_invoice(&request.invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("invoice", &request.invoice_id))?;
        let intent = self
            .client
            .retrieve_payment_intent(&request.payment_intent_ref)
            .await?;
        let reported = payment_status_from_gateway(&intent.status);

        if let Some(mut existing) = self
            .store
            .get_payment_by_intent(&request.payment_intent_ref)
            .await?
        {
            if existing.status != reported && existing.status.can_transition_to(reported) {
                tracing::debug!(
                    target: "seatwise::payment",
                    payment_id = %existing.id,
                    from = %existing.status,
                    to = %reported,
                    "syncing existing payment from gateway report"
                );
                existing.status = reported;
                existing.updated_at = self.clock.now();
                self.store.save_payment(&existing).await?;
            }
            return Ok(existing);
        }

        let now = self.clock.now();
        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            company_id: invoice.company_id.clone(),
            subscription_id: invoice.subscription_id.clone(),
            invoice_id: Some(invoice.id.clone()),
            gateway_payment_intent_id: Some(intent.id.clone()),
            amount_cents: intent.amount_cents,
            currency: intent.currency.clone(),
            status: reported,
            attempt_number: 1,
            max_attempts: self.config.max_payment_retries,
            failure_code: None,
            failure_message: None,
            payment_method: intent.payment_method.as_ref().map(PaymentMethod::summary),
            next_retry_date: None,
            attempted_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        self.store.save_payment(&payment).await?;

        tracing::info!(
            target: "seatwise::payment",
            company_id = %payment.company_id,
            payment_id = %payment.id,
            invoice_id = %invoice.id,
            status = %payment.status,
            amount_cents = payment.amount_cents,
            "payment attempt recorded"
        );
        self.recorder
            .record(
                BillingHistoryEntry::new(
                    &payment.company_id,
                    BillingEvent::PaymentRecorded,
                    format!("Payment attempt recorded ({})", payment.status),
                    now,
                )
                .with_subscription(&payment.subscription_id)
                .with_invoice(&invoice.id)
                .with_payment(&payment.id)
                .with_details(json!({
                    "status": payment.status,
                    "amount_cents": payment.amount_cents,
                })),
            )
            .await;

        Ok(payment)
    }

    /// Record a payment failure and decide what happens next.
    ///
    /// Below the attempt cap the payment gets a retry date one interval out;
    /// at the cap the retry date stays empty and the subscription enters its
    /// grace period. The grace trigger fires exactly once: redelivered
    /// notices hit the terminal-failure short-circuit and change nothing.
    /// The subscription's payment standing is marked failed either way.
    pub async fn handle_payment_failure(&self, notice: PaymentFailureNotice) -> Result<Payment> {
        let mut payment = self.resolve(&notice).await?;

        if matches!(
            payment.status,
            PaymentStatus::Succeeded | PaymentStatus::Canceled
        ) {
            tracing::debug!(
                target: "seatwise::payment",
                payment_id = %payment.id,
                status = %payment.status,
                "ignoring stale failure notice for settled payment"
            );
            return Ok(payment);
        }
        if payment.is_terminally_failed() {
            tracing::debug!(
                target: "seatwise::payment",
                payment_id = %payment.id,
                "final failure already recorded"
            );
            return Ok(payment);
        }

        let now = self.clock.now();
        payment.status = PaymentStatus::Failed;
        payment.failure_code = notice.failure_code.clone();
        payment.failure_message = notice.failure_message.clone();
        payment.next_retry_date = if payment.attempt_number < payment.max_attempts {
            self.schedule.next_attempt_at(now, payment.attempt_number)
        } else {
            None
        };
        payment.updated_at = now;
        self.store.save_payment(&payment).await?;

        let exhausted = payment.next_retry_date.is_none();
        self.lifecycle
            .mark_payment_failed(&payment.subscription_id)
            .await?;
        if exhausted {
            match self
                .lifecycle
                .start_grace_period(&payment.subscription_id)
                .await
            {
                Ok(_) => {}
                Err(
                    err @ (BillingError::AlreadyTerminal { .. }
                    | BillingError::InvalidTransition { .. }),
                ) => {
                    // Stale event against a canceled or suspended subscription
                    tracing::warn!(
                        target: "seatwise::payment",
                        payment_id = %payment.id,
                        subscription_id = %payment.subscription_id,
                        error = %err,
                        "grace period not started"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        tracing::warn!(
            target: "seatwise::payment",
            company_id = %payment.company_id,
            payment_id = %payment.id,
            attempt = payment.attempt_number,
            max_attempts = payment.max_attempts,
            failure_code = payment.failure_code.as_deref().unwrap_or("unknown"),
            exhausted,
            "payment_failed"
        );
        self.recorder
            .record(
                BillingHistoryEntry::new(
                    &payment.company_id,
                    BillingEvent::PaymentFailed,
                    format!(
                        "Payment failed (attempt {} of {})",
                        payment.attempt_number, payment.max_attempts
                    ),
                    now,
                )
                .with_subscription(&payment.subscription_id)
                .with_payment(&payment.id)
                .with_details(json!({
                    "failure_code": payment.failure_code,
                    "failure_message": payment.failure_message,
                    "attempt_number": payment.attempt_number,
                    "next_retry_date": payment.next_retry_date,
                })),
            )
            .await;

        Ok(payment)
    }

    /// Re-open a failed payment for another attempt.
    ///
    /// Guarded by the attempt cap; the chain can never grow past
    /// `max_attempts`. Confirms the gateway intent when it is in a
    /// confirmable state and counts the attempt, but never decides the
    /// outcome itself. The gateway's async result flows back through
    /// [`Self::process_payment`] or [`Self::handle_payment_failure`].
    pub async fn retry_payment(&self, payment_id: &str) -> Result<Payment> {
        let mut payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| BillingError::not_found("payment", payment_id))?;

        match payment.status {
            PaymentStatus::Succeeded => {
                tracing::debug!(
                    target: "seatwise::payment",
                    payment_id = %payment.id,
                    "payment already settled, nothing to retry"
                );
                return Ok(payment);
            }
            PaymentStatus::Pending => {
                // A previous retry is still in flight; the sweep re-entering
                // must not double-count it.
                tracing::debug!(
                    target: "seatwise::payment",
                    payment_id = %payment.id,
                    "retry already in flight"
                );
                return Ok(payment);
            }
            PaymentStatus::Canceled => {
                return Err(BillingError::AlreadyTerminal {
                    entity: "payment",
                    id: payment.id.clone(),
                    state: payment.status.to_string(),
                });
            }
            PaymentStatus::Failed => {}
        }
        if payment.attempt_number >= payment.max_attempts {
            return Err(BillingError::RetryExhausted {
                payment_id: payment.id.clone(),
                attempts: payment.attempt_number,
            });
        }

        if let Some(intent_id) = payment.gateway_payment_intent_id.clone() {
            let intent = self.client.retrieve_payment_intent(&intent_id).await?;
            if intent_is_confirmable(&intent.status) {
                self.client.confirm_payment_intent(&intent_id).await?;
            } else {
                tracing::debug!(
                    target: "seatwise::payment",
                    payment_id = %payment.id,
                    gateway_status = %intent.status,
                    "intent not confirmable, counting the attempt anyway"
                );
            }
        }

        let now = self.clock.now();
        payment.status = PaymentStatus::Pending;
        payment.attempt_number += 1;
        payment.attempted_at = Some(now);
        payment.next_retry_date = None;
        payment.updated_at = now;
        self.store.save_payment(&payment).await?;

        tracing::info!(
            target: "seatwise::payment",
            company_id = %payment.company_id,
            payment_id = %payment.id,
            attempt = payment.attempt_number,
            max_attempts = payment.max_attempts,
            "payment_retry_scheduled"
        );
        self.recorder
            .record(
                BillingHistoryEntry::new(
                    &payment.company_id,
                    BillingEvent::PaymentRetryScheduled,
                    format!(
                        "Payment retry attempt {} of {}",
                        payment.attempt_number, payment.max_attempts
                    ),
                    now,
                )
                .with_subscription(&payment.subscription_id)
                .with_payment(&payment.id),
            )
            .await;

        Ok(payment)
    }

    /// A company's payments, newest first.
    pub async fn payment_history(&self, company_id: &str) -> Result<Vec<Payment>> {
        self.store.list_company_payments(company_id).await
    }

    /// Failed payments whose retry date has come due.
    pub async fn due_for_retry(&self) -> Result<Vec<Payment>> {
        self.store.payments_due_for_retry(self.clock.now()).await
    }

    async fn resolve(&self, notice: &PaymentFailureNotice) -> Result<Payment> {
        if let Some(id) = &notice.payment_id {
            return self
                .store
                .get_payment(id)
                .await?
                .ok_or_else(|| BillingError::not_found("payment", id));
        }
        if let Some(intent) = &notice.payment_intent_ref {
            return self
                .store
                .get_payment_by_intent(intent)
                .await?
                .ok_or_else(|| BillingError::not_found("payment", intent));
        }
        Err(BillingError::invalid_argument(
            "payment failure notice carries neither a payment id nor an intent reference",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryBillingStore;
    use crate::store::{
        Invoice, InvoiceLineItem, InvoiceStatus, LineItemKind, PaymentStanding,
        SubscriptionStatus,
    };
    use crate::testing::{CompanyBuilder, FixedClock, SubscriptionBuilder};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::RwLock;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[derive(Default)]
    struct StubIntentClient {
        intents: RwLock<HashMap<String, GatewayPaymentIntent>>,
        confirms: RwLock<Vec<String>>,
    }

    impl StubIntentClient {
        fn seed(&self, intent: GatewayPaymentIntent) {
            self.intents
                .write()
                .unwrap()
                .insert(intent.id.clone(), intent);
        }

        fn set_status(&self, intent_id: &str, status: &str) {
            if let Some(intent) = self.intents.write().unwrap().get_mut(intent_id) {
                intent.status = status.to_string();
            }
        }
    }

    impl GatewayPaymentIntentClient for &StubIntentClient {
        async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<GatewayPaymentIntent> {
            self.intents
                .read()
                .unwrap()
                .get(intent_id)
                .cloned()
                .ok_or_else(|| BillingError::gateway("retrieve_payment_intent", "no such intent"))
        }

        async fn confirm_payment_intent(&self, intent_id: &str) -> Result<GatewayPaymentIntent> {
            self.confirms.write().unwrap().push(intent_id.to_string());
            self.retrieve_payment_intent(intent_id).await
        }
    }

    fn card_intent(id: &str, status: &str) -> GatewayPaymentIntent {
        GatewayPaymentIntent {
            id: id.to_string(),
            status: status.to_string(),
            amount_cents: 1000,
            currency: "usd".to_string(),
            payment_method: Some(PaymentMethod {
                id: "pm_1".to_string(),
                card_brand: Some("visa".to_string()),
                card_last4: Some("4242".to_string()),
                card_exp_month: Some(12),
                card_exp_year: Some(2030),
                is_default: true,
            }),
        }
    }

    fn open_invoice(id: &str) -> Invoice {
        Invoice {
            id: id.to_string(),
            company_id: "co_1".to_string(),
            subscription_id: "sub_1".to_string(),
            gateway_invoice_id: Some(format!("gwinv_{id}")),
            invoice_number: "INV-CO1-202406".to_string(),
            status: InvoiceStatus::Open,
            currency: "usd".to_string(),
            line_items: vec![InvoiceLineItem {
                description: "Per-seat subscription, 10 seats".to_string(),
                amount_cents: 1000,
                quantity: 10,
                kind: LineItemKind::Base,
            }],
            subtotal_cents: 1000,
            tax_cents: 0,
            total_cents: 1000,
            amount_due_cents: 1000,
            amount_paid_cents: 0,
            period_start: utc(2024, 6, 1),
            period_end: utc(2024, 7, 1),
            due_date: utc(2024, 8, 8),
            paid_at: None,
            payment_intent_ref: Some("pi_1".to_string()),
            pdf_url: None,
            created_at: utc(2024, 8, 1),
        }
    }

    async fn seeded_store() -> InMemoryBillingStore {
        let store = InMemoryBillingStore::new();
        store.add_company(CompanyBuilder::new("co_1").build()).await;
        store
            .save_subscription(&SubscriptionBuilder::new("co_1").with_id("sub_1").build())
            .await
            .unwrap();
        store.save_invoice(&open_invoice("inv_1")).await.unwrap();
        store
    }

    fn processor_at<'a>(
        store: &InMemoryBillingStore,
        client: &'a StubIntentClient,
        now: DateTime<Utc>,
    ) -> PaymentProcessor<InMemoryBillingStore, &'a StubIntentClient> {
        PaymentProcessor::with_clock(
            store.clone(),
            client,
            BillingConfig::default(),
            FixedClock::at(now),
        )
    }

    #[tokio::test]
    async fn process_payment_records_redacted_card() {
        let store = seeded_store().await;
        let client = StubIntentClient::default();
        client.seed(card_intent("pi_1", "succeeded"));
        let processor = processor_at(&store, &client, utc(2024, 8, 1));

        let payment = processor
            .process_payment(ProcessPaymentRequest {
                invoice_id: "inv_1".to_string(),
                payment_intent_ref: "pi_1".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(payment.attempt_number, 1);
        assert_eq!(payment.max_attempts, 3);
        assert_eq!(payment.amount_cents, 1000);
        assert_eq!(payment.attempted_at, Some(utc(2024, 8, 1)));
        let summary = payment.payment_method.unwrap();
        assert_eq!(summary.brand.as_deref(), Some("visa"));
        assert_eq!(summary.last4.as_deref(), Some("4242"));
        assert_eq!(summary.exp_year, Some(2030));
    }

    #[tokio::test]
    async fn process_payment_syncs_existing_record_for_same_intent() {
        let store = seeded_store().await;
        let client = StubIntentClient::default();
        client.seed(card_intent("pi_1", "processing"));
        let processor = processor_at(&store, &client, utc(2024, 8, 1));
        let request = ProcessPaymentRequest {
            invoice_id: "inv_1".to_string(),
            payment_intent_ref: "pi_1".to_string(),
        };

        let first = processor.process_payment(request.clone()).await.unwrap();
        assert_eq!(first.status, PaymentStatus::Pending);

        client.set_status("pi_1", "succeeded");
        let second = processor.process_payment(request).await.unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.status, PaymentStatus::Succeeded);
        assert_eq!(store.list_company_payments("co_1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_below_cap_schedules_retry() {
        let store = seeded_store().await;
        let client = StubIntentClient::default();
        client.seed(card_intent("pi_1", "processing"));
        let processor = processor_at(&store, &client, utc(2024, 8, 1));
        processor
            .process_payment(ProcessPaymentRequest {
                invoice_id: "inv_1".to_string(),
                payment_intent_ref: "pi_1".to_string(),
            })
            .await
            .unwrap();

        let payment = processor
            .handle_payment_failure(PaymentFailureNotice {
                payment_intent_ref: Some("pi_1".to_string()),
                failure_code: Some("card_declined".to_string()),
                failure_message: Some("Your card was declined.".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.failure_code.as_deref(), Some("card_declined"));
        assert_eq!(
            payment.next_retry_date,
            Some(utc(2024, 8, 1) + Duration::hours(24))
        );

        // Standing flips but no grace period below the cap
        let sub = store.get_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.payment_status, Some(PaymentStanding::Failed));
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.grace_period_ends_at, None);
    }

    #[tokio::test]
    async fn final_failure_starts_grace_exactly_once() {
        let store = seeded_store().await;
        let client = StubIntentClient::default();
        client.seed(card_intent("pi_1", "processing"));
        let processor = processor_at(&store, &client, utc(2024, 8, 1));
        let mut payment = processor
            .process_payment(ProcessPaymentRequest {
                invoice_id: "inv_1".to_string(),
                payment_intent_ref: "pi_1".to_string(),
            })
            .await
            .unwrap();

        // Chain already at the cap
        payment.attempt_number = 3;
        store.save_payment(&payment).await.unwrap();

        let notice = PaymentFailureNotice {
            payment_id: Some(payment.id.clone()),
            failure_code: Some("card_declined".to_string()),
            ..Default::default()
        };
        let failed = processor.handle_payment_failure(notice.clone()).await.unwrap();
        assert_eq!(failed.next_retry_date, None);
        assert!(failed.is_terminally_failed());

        let sub = store.get_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        assert_eq!(
            sub.grace_period_ends_at,
            Some(utc(2024, 8, 1) + Duration::days(7))
        );

        // Redelivered notice changes nothing
        let again = processor.handle_payment_failure(notice).await.unwrap();
        assert_eq!(again.updated_at, failed.updated_at);
        let grace_events = store
            .list_company_history("co_1")
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.event == BillingEvent::GracePeriodStarted)
            .count();
        assert_eq!(grace_events, 1);
    }

    #[tokio::test]
    async fn retry_reopens_failed_payment_and_confirms_intent() {
        let store = seeded_store().await;
        let client = StubIntentClient::default();
        client.seed(card_intent("pi_1", "processing"));
        let processor = processor_at(&store, &client, utc(2024, 8, 1));
        processor
            .process_payment(ProcessPaymentRequest {
                invoice_id: "inv_1".to_string(),
                payment_intent_ref: "pi_1".to_string(),
            })
            .await
            .unwrap();
        let failed = processor
            .handle_payment_failure(PaymentFailureNotice {
                payment_intent_ref: Some("pi_1".to_string()),
                failure_code: Some("card_declined".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        client.set_status("pi_1", "requires_confirmation");
        let retried = processor.retry_payment(&failed.id).await.unwrap();

        assert_eq!(retried.status, PaymentStatus::Pending);
        assert_eq!(retried.attempt_number, 2);
        assert_eq!(retried.attempted_at, Some(utc(2024, 8, 1)));
        assert_eq!(retried.next_retry_date, None);
        assert_eq!(client.confirms.read().unwrap().as_slice(), ["pi_1"]);

        // Outcome is not decided here
        assert_eq!(
            store
                .get_payment(&retried.id)
                .await
                .unwrap()
                .unwrap()
                .status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn retry_guards() {
        let store = seeded_store().await;
        let client = StubIntentClient::default();
        client.seed(card_intent("pi_1", "succeeded"));
        let processor = processor_at(&store, &client, utc(2024, 8, 1));
        let mut payment = processor
            .process_payment(ProcessPaymentRequest {
                invoice_id: "inv_1".to_string(),
                payment_intent_ref: "pi_1".to_string(),
            })
            .await
            .unwrap();

        // Settled payment: no-op, no confirm call
        let settled = processor.retry_payment(&payment.id).await.unwrap();
        assert_eq!(settled.attempt_number, 1);
        assert!(client.confirms.read().unwrap().is_empty());

        // Exhausted chain: hard error
        payment.status = PaymentStatus::Failed;
        payment.attempt_number = 3;
        store.save_payment(&payment).await.unwrap();
        let err = processor.retry_payment(&payment.id).await.unwrap_err();
        assert!(matches!(
            err,
            BillingError::RetryExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn due_for_retry_only_returns_ripe_failures() {
        let store = seeded_store().await;
        let client = StubIntentClient::default();
        client.seed(card_intent("pi_1", "processing"));
        let processor = processor_at(&store, &client, utc(2024, 8, 1));
        processor
            .process_payment(ProcessPaymentRequest {
                invoice_id: "inv_1".to_string(),
                payment_intent_ref: "pi_1".to_string(),
            })
            .await
            .unwrap();
        processor
            .handle_payment_failure(PaymentFailureNotice {
                payment_intent_ref: Some("pi_1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        // Retry is a day out, so nothing is ripe yet
        assert!(processor.due_for_retry().await.unwrap().is_empty());

        let later = processor_at(&store, &client, utc(2024, 8, 2));
        let due = later.due_for_retry().await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].gateway_payment_intent_id.as_deref(), Some("pi_1"));
    }

    #[tokio::test]
    async fn failure_notice_without_reference_is_invalid() {
        let store = seeded_store().await;
        let client = StubIntentClient::default();
        let processor = processor_at(&store, &client, utc(2024, 8, 1));

        let err = processor
            .handle_payment_failure(PaymentFailureNotice::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid-argument");
    }
}
