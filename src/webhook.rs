//! Gateway webhook ingestion.
//!
//! Webhook deliveries and the scheduled sweeps drive the same manager calls,
//! so an event arriving before, after, or instead of a sweep run converges on
//! the same state. Signature verification happens upstream in the gateway
//! SDK; this layer receives already-verified events. Deliveries are
//! at-least-once, so every event id passes through a processed-event registry
//! and handlers stay idempotent for the window between handling and marking.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{BillingClock, SystemClock};
use crate::config::BillingConfig;
use crate::error::{BillingError, Result};
use crate::invoice::{GatewayInvoiceClient, InvoiceGenerator};
use crate::payment::{
    GatewayPaymentIntentClient, PaymentFailureNotice, PaymentProcessor, ProcessPaymentRequest,
};
use crate::store::BillingStore;
use crate::subscription::{GatewaySubscriptionData, SubscriptionLifecycle};

/// A verified gateway event, unwrapped from its delivery envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    /// Gateway-assigned event id, stable across redeliveries.
    pub id: String,
    /// Event kind, e.g. `invoice.payment_succeeded`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The event's data object.
    pub payload: Value,
}

impl GatewayEvent {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload,
        }
    }
}

/// What ingesting one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum WebhookOutcome {
    /// The event was handled and its effects persisted.
    Processed,
    /// No handler for this event kind.
    Ignored,
    /// This event id was handled earlier; nothing was done.
    AlreadyProcessed,
}

/// Maps gateway events onto manager calls.
pub struct WebhookIngestor<S, C>
where
    S: BillingStore + Clone,
    C: GatewayInvoiceClient + GatewayPaymentIntentClient + Clone,
{
    store: S,
    invoices: InvoiceGenerator<S, C>,
    payments: PaymentProcessor<S, C>,
    lifecycle: SubscriptionLifecycle<S>,
}

impl<S, C> WebhookIngestor<S, C>
where
    S: BillingStore + Clone,
    C: GatewayInvoiceClient + GatewayPaymentIntentClient + Clone,
{
    /// Create a webhook ingestor on the system clock.
    #[must_use]
    pub fn new(store: S, client: C, config: BillingConfig) -> Self {
        Self::with_clock(store, client, config, Arc::new(SystemClock))
    }

    /// Create a webhook ingestor with an injected clock.
    #[must_use]
    pub fn with_clock(
        store: S,
        client: C,
        config: BillingConfig,
        clock: Arc<dyn BillingClock>,
    ) -> Self {
        Self {
            invoices: InvoiceGenerator::with_clock(
                store.clone(),
                client.clone(),
                config.clone(),
                Arc::clone(&clock),
            ),
            payments: PaymentProcessor::with_clock(
                store.clone(),
                client,
                config.clone(),
                Arc::clone(&clock),
            ),
            lifecycle: SubscriptionLifecycle::with_clock(store.clone(), config, clock),
            store,
        }
    }

    /// Ingest one event.
    ///
    /// Replayed event ids short-circuit without side effects. Events are
    /// marked processed only after their handler succeeds, so a failure
    /// mid-handler leaves the id unmarked and the redelivery retries against
    /// idempotent managers. Ignored events are never marked.
    pub async fn ingest(&self, event: GatewayEvent) -> Result<WebhookOutcome> {
        if self.store.is_event_processed(&event.id).await? {
            tracing::debug!(
                target: "seatwise::webhook",
                event_id = %event.id,
                kind = %event.kind,
                "event already processed, skipping"
            );
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let outcome = self.dispatch(&event).await?;
        if outcome == WebhookOutcome::Processed {
            self.store.mark_event_processed(&event.id).await?;
            tracing::info!(
                target: "seatwise::webhook",
                event_id = %event.id,
                kind = %event.kind,
                "event processed"
            );
        }
        Ok(outcome)
    }

    async fn dispatch(&self, event: &GatewayEvent) -> Result<WebhookOutcome> {
        match event.kind.as_str() {
            "invoice.payment_succeeded" => self.on_invoice_paid(event).await,
            "invoice.payment_failed" => self.on_invoice_failed(event).await,
            "payment_intent.succeeded" => self.on_intent_succeeded(event).await,
            "payment_intent.payment_failed" => self.on_intent_failed(event).await,
            "customer.subscription.updated" => self.on_subscription_updated(event).await,
            "customer.subscription.deleted" => self.on_subscription_deleted(event).await,
            "payment_method.attached" => self.on_payment_method_attached(event).await,
            other => {
                tracing::debug!(
                    target: "seatwise::webhook",
                    event_id = %event.id,
                    kind = other,
                    "no handler for event kind"
                );
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn on_invoice_paid(&self, event: &GatewayEvent) -> Result<WebhookOutcome> {
        let gateway_invoice_id = required_str(event, "id")?;
        let intent_ref = optional_str(&event.payload, "payment_intent");

        let Some(invoice) = self
            .invoices
            .get_invoice_by_gateway_id(&gateway_invoice_id)
            .await?
        else {
            // Orphaned gateway invoice: created at the gateway but never
            // persisted locally. Nothing to settle; a redelivery cannot help.
            tracing::warn!(
                target: "seatwise::webhook",
                gateway_invoice_id = %gateway_invoice_id,
                "payment succeeded for an invoice with no local record"
            );
            return Ok(WebhookOutcome::Processed);
        };

        self.invoices
            .mark_invoice_as_paid(&invoice.id, intent_ref.as_deref())
            .await?;
        Ok(WebhookOutcome::Processed)
    }

    async fn on_invoice_failed(&self, event: &GatewayEvent) -> Result<WebhookOutcome> {
        let gateway_invoice_id = required_str(event, "id")?;
        let Some(invoice) = self
            .invoices
            .get_invoice_by_gateway_id(&gateway_invoice_id)
            .await?
        else {
            tracing::warn!(
                target: "seatwise::webhook",
                gateway_invoice_id = %gateway_invoice_id,
                "payment failed for an invoice with no local record"
            );
            return Ok(WebhookOutcome::Processed);
        };
        let Some(intent_ref) = optional_str(&event.payload, "payment_intent") else {
            tracing::warn!(
                target: "seatwise::webhook",
                invoice_id = %invoice.id,
                "failed invoice event carries no payment intent"
            );
            return Ok(WebhookOutcome::Processed);
        };

        // Make sure the attempt chain exists before recording its failure;
        // the failure event can beat the intent events to us.
        self.payments
            .process_payment(ProcessPaymentRequest {
                invoice_id: invoice.id.clone(),
                payment_intent_ref: intent_ref.clone(),
            })
            .await?;

        let (failure_code, failure_message) = last_payment_error(&event.payload);
        self.payments
            .handle_payment_failure(PaymentFailureNotice {
                payment_intent_ref: Some(intent_ref),
                failure_code,
                failure_message,
                ..Default::default()
            })
            .await?;
        Ok(WebhookOutcome::Processed)
    }

    async fn on_intent_succeeded(&self, event: &GatewayEvent) -> Result<WebhookOutcome> {
        let intent_id = required_str(event, "id")?;
        let Some(invoice_id) = self.invoice_for_intent(&event.payload, &intent_id).await? else {
            tracing::warn!(
                target: "seatwise::webhook",
                intent_id = %intent_id,
                "payment intent succeeded with no resolvable invoice"
            );
            return Ok(WebhookOutcome::Processed);
        };

        self.payments
            .process_payment(ProcessPaymentRequest {
                invoice_id: invoice_id.clone(),
                payment_intent_ref: intent_id.clone(),
            })
            .await?;
        self.invoices
            .mark_invoice_as_paid(&invoice_id, Some(&intent_id))
            .await?;
        Ok(WebhookOutcome::Processed)
    }

    async fn on_intent_failed(&self, event: &GatewayEvent) -> Result<WebhookOutcome> {
        let intent_id = required_str(event, "id")?;

        if let Some(invoice_id) = self.invoice_for_intent(&event.payload, &intent_id).await? {
            self.payments
                .process_payment(ProcessPaymentRequest {
                    invoice_id,
                    payment_intent_ref: intent_id.clone(),
                })
                .await?;
        }

        let (failure_code, failure_message) = last_payment_error(&event.payload);
        match self
            .payments
            .handle_payment_failure(PaymentFailureNotice {
                payment_intent_ref: Some(intent_id.clone()),
                failure_code,
                failure_message,
                ..Default::default()
            })
            .await
        {
            Ok(_) => {}
            Err(BillingError::NotFound { .. }) => {
                tracing::warn!(
                    target: "seatwise::webhook",
                    intent_id = %intent_id,
                    "payment failure for an intent with no local payment"
                );
            }
            Err(err) => return Err(err),
        }
        Ok(WebhookOutcome::Processed)
    }

    async fn on_subscription_updated(&self, event: &GatewayEvent) -> Result<WebhookOutcome> {
        let data: GatewaySubscriptionData = serde_json::from_value(event.payload.clone())
            .map_err(|err| {
                BillingError::invalid_payload(format!("subscription event payload: {err}"))
            })?;

        if self.lifecycle.apply_gateway_update(&data).await?.is_none() {
            tracing::warn!(
                target: "seatwise::webhook",
                gateway_subscription_id = %data.id,
                "subscription update for an unknown subscription"
            );
        }
        Ok(WebhookOutcome::Processed)
    }

    async fn on_subscription_deleted(&self, event: &GatewayEvent) -> Result<WebhookOutcome> {
        let gateway_subscription_id = required_str(event, "id")?;
        if self
            .lifecycle
            .finalize_gateway_cancellation(&gateway_subscription_id)
            .await?
            .is_none()
        {
            tracing::warn!(
                target: "seatwise::webhook",
                gateway_subscription_id = %gateway_subscription_id,
                "subscription deletion for an unknown subscription"
            );
        }
        Ok(WebhookOutcome::Processed)
    }

    async fn on_payment_method_attached(&self, event: &GatewayEvent) -> Result<WebhookOutcome> {
        // Informational; the directory reads methods live from the gateway.
        let payment_method_id = required_str(event, "id")?;
        tracing::info!(
            target: "seatwise::webhook",
            payment_method_id = %payment_method_id,
            customer_id = optional_str(&event.payload, "customer").as_deref().unwrap_or("unknown"),
            "payment method attached at gateway"
        );
        Ok(WebhookOutcome::Processed)
    }

    /// Resolve the local invoice an intent collects: prefer the gateway
    /// invoice reference in the payload, fall back on the payment record.
    async fn invoice_for_intent(&self, payload: &Value, intent_id: &str) -> Result<Option<String>> {
        if let Some(gateway_invoice_id) = optional_str(payload, "invoice") {
            if let Some(invoice) = self
                .invoices
                .get_invoice_by_gateway_id(&gateway_invoice_id)
                .await?
            {
                return Ok(Some(invoice.id));
            }
        }
        if let Some(payment) = self.store.get_payment_by_intent(intent_id).await? {
            return Ok(payment.invoice_id);
        }
        Ok(None)
    }
}

fn required_str(event: &GatewayEvent, field: &str) -> Result<String> {
    optional_str(&event.payload, field).ok_or_else(|| {
        BillingError::invalid_payload(format!("{} event missing '{field}'", event.kind))
    })
}

fn optional_str(payload: &Value, field: &str) -> Option<String> {
    payload.get(field).and_then(Value::as_str).map(str::to_string)
}

fn last_payment_error(payload: &Value) -> (Option<String>, Option<String>) {
    match payload.get("last_payment_error") {
        Some(error) => (
            optional_str(error, "code"),
            optional_str(error, "message"),
        ),
        None => (None, None),
    }
}
