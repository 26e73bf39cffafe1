//! Invoice generation and settlement.
//!
//! Invoices are minted here and nowhere else. Each one covers an elapsed
//! billing period: a base line for the full seat count plus, when mid-period
//! seat changes netted out non-zero, a single proration line. Numbers are
//! deterministic per company and month, which is what lets a re-run after a
//! crash detect an invoice that already exists instead of billing twice.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::clock::{BillingClock, SystemClock, invoice_number};
use crate::config::BillingConfig;
use crate::error::{BillingError, Result};
use crate::history::{BillingEvent, BillingHistoryEntry, HistoryRecorder};
use crate::store::{
    BillingStore, Invoice, InvoiceLineItem, InvoiceStatus, LineItemKind, Subscription,
};
use crate::subscription::SubscriptionLifecycle;
use crate::usage::UsageTracker;

// =============================================================================
// Gateway invoice client
// =============================================================================

/// Request to open a gateway invoice.
#[derive(Debug, Clone)]
pub struct CreateGatewayInvoiceRequest {
    pub customer_id: String,
    pub currency: String,
    /// Company reference carried as gateway metadata.
    pub company_id: String,
}

/// One line pushed onto a gateway invoice before finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayInvoiceLine {
    pub description: String,
    /// Signed cents; negative lines are credits.
    pub amount_cents: i64,
    pub quantity: u32,
}

/// What the gateway reports back once an invoice is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedGatewayInvoice {
    pub id: String,
    /// Raw gateway status string.
    pub status: String,
    pub pdf_url: Option<String>,
    /// Payment intent the gateway opened to collect this invoice, if any.
    pub payment_intent_ref: Option<String>,
}

/// Gateway invoice operations.
#[allow(async_fn_in_trait)]
pub trait GatewayInvoiceClient: Send + Sync {
    /// Open a draft invoice; returns the gateway invoice ID.
    async fn create_invoice(&self, request: CreateGatewayInvoiceRequest) -> Result<String>;

    /// Append a line item to a draft invoice.
    async fn add_invoice_line(
        &self,
        gateway_invoice_id: &str,
        line: GatewayInvoiceLine,
    ) -> Result<()>;

    /// Finalize a draft invoice, making it collectable.
    async fn finalize_invoice(&self, gateway_invoice_id: &str) -> Result<FinalizedGatewayInvoice>;

    /// Void a finalized invoice.
    async fn void_invoice(&self, gateway_invoice_id: &str) -> Result<()>;
}

// =============================================================================
// Generator
// =============================================================================

/// Request to invoice a subscription for an elapsed period.
#[derive(Debug, Clone)]
pub struct CreateInvoiceRequest {
    pub subscription_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// In-memory filters for invoice listings.
///
/// Status narrowing could be pushed into the store; date ranges are applied
/// here to keep the store's index needs flat.
#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub issued_after: Option<DateTime<Utc>>,
    pub issued_before: Option<DateTime<Utc>>,
}

impl InvoiceFilter {
    fn matches(&self, invoice: &Invoice) -> bool {
        if let Some(status) = self.status {
            if invoice.status != status {
                return false;
            }
        }
        if let Some(after) = self.issued_after {
            if invoice.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.issued_before {
            if invoice.created_at >= before {
                return false;
            }
        }
        true
    }
}

/// Generates and settles invoices for elapsed billing periods.
pub struct InvoiceGenerator<S, C>
where
    S: BillingStore + Clone,
    C: GatewayInvoiceClient,
{
    store: S,
    client: C,
    usage: UsageTracker<S>,
    lifecycle: SubscriptionLifecycle<S>,
    config: BillingConfig,
    clock: Arc<dyn BillingClock>,
    recorder: HistoryRecorder<S>,
}

impl<S, C> InvoiceGenerator<S, C>
where
    S: BillingStore + Clone,
    C: GatewayInvoiceClient,
{
    /// Create an invoice generator on the system clock.
    #[must_use]
    pub fn new(store: S, client: C, config: BillingConfig) -> Self {
        Self::with_clock(store, client, config, Arc::new(SystemClock))
    }

    /// Create an invoice generator with an injected clock.
    #[must_use]
    pub fn with_clock(
        store: S,
        client: C,
        config: BillingConfig,
        clock: Arc<dyn BillingClock>,
    ) -> Self {
        Self {
            usage: UsageTracker::with_clock(store.clone(), config.clone(), Arc::clone(&clock)),
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

    /// Invoice a subscription for an elapsed period.
    ///
    /// Idempotent per company and month: when an invoice with the period's
    /// deterministic number already exists it is returned as-is, so a billing
    /// re-run after a crash cannot double-bill. Otherwise the invoice is
    /// created and finalized at the gateway first, then persisted locally
    /// with status open and a due date seven days out (configurable). The
    /// subscription's last billed seat count moves to the count just billed.
    pub async fn create_invoice(&self, request: CreateInvoiceRequest) -> Result<Invoice> {
        let sub = self
            .store
            .get_subscription(&request.subscription_id)
            .await?
            .ok_or_else(|| BillingError::not_found("subscription", &request.subscription_id))?;

        let number = invoice_number(&sub.company_id, request.period_start);
        if let Some(existing) = self.find_by_number(&sub.company_id, &number).await? {
            tracing::info!(
                target: "seatwise::invoice",
                company_id = %sub.company_id,
                invoice_number = %number,
                invoice_id = %existing.id,
                "invoice for this period already exists, returning it"
            );
            return Ok(existing);
        }

        let seats = sub.current_user_count;
        let base_cents = i64::from(seats) * sub.price_per_user_cents;
        let proration_cents = self
            .usage
            .calculate_period_proration(&sub.company_id, request.period_start, request.period_end)
            .await?;
        let subtotal_cents = base_cents + proration_cents;
        let total_cents = subtotal_cents;

        let mut line_items = vec![InvoiceLineItem {
            description: format!("Per-seat subscription, {seats} seats"),
            amount_cents: base_cents,
            quantity: seats,
            kind: LineItemKind::Base,
        }];
        if proration_cents != 0 {
            let description = if proration_cents > 0 {
                "Seat additions (prorated)"
            } else {
                "Seat removal credit (prorated)"
            };
            line_items.push(InvoiceLineItem {
                description: description.to_string(),
                amount_cents: proration_cents,
                quantity: 1,
                kind: LineItemKind::Proration,
            });
        }

        let gateway_invoice_id = self
            .client
            .create_invoice(CreateGatewayInvoiceRequest {
                customer_id: sub.gateway_customer_id.clone(),
                currency: sub.currency.clone(),
                company_id: sub.company_id.clone(),
            })
            .await?;
        for item in &line_items {
            self.client
                .add_invoice_line(
                    &gateway_invoice_id,
                    GatewayInvoiceLine {
                        description: item.description.clone(),
                        amount_cents: item.amount_cents,
                        quantity: item.quantity,
                    },
                )
                .await?;
        }
        let finalized = self.client.finalize_invoice(&gateway_invoice_id).await?;

        let now = self.clock.now();
        let invoice = Invoice {
            id: Uuid::new_v4().to_string(),
            company_id: sub.company_id.clone(),
            subscription_id: sub.id.clone(),
            gateway_invoice_id: Some(gateway_invoice_id),
            invoice_number: number.clone(),
            status: InvoiceStatus::Open,
            currency: sub.currency.clone(),
            line_items,
            subtotal_cents,
            tax_cents: 0,
            total_cents,
            amount_due_cents: total_cents,
            amount_paid_cents: 0,
            period_start: request.period_start,
            period_end: request.period_end,
            due_date: now + Duration::days(i64::from(self.config.invoice_due_days)),
            paid_at: None,
            payment_intent_ref: finalized.payment_intent_ref,
            pdf_url: finalized.pdf_url,
            created_at: now,
        };
        self.store.save_invoice(&invoice).await?;

        self.lifecycle
            .update_with(&sub.id, |record| {
                if record.last_billed_user_count == seats {
                    return Ok(false);
                }
                record.last_billed_user_count = seats;
                Ok(true)
            })
            .await?;

        tracing::info!(
            target: "seatwise::invoice",
            company_id = %sub.company_id,
            subscription_id = %sub.id,
            invoice_id = %invoice.id,
            invoice_number = %number,
            total_cents,
            proration_cents,
            "invoice created"
        );
        self.recorder
            .record(
                BillingHistoryEntry::new(
                    &sub.company_id,
                    BillingEvent::InvoiceCreated,
                    format!("Invoice {number} created for {seats} seats"),
                    now,
                )
                .with_subscription(&sub.id)
                .with_invoice(&invoice.id)
                .with_details(json!({
                    "invoice_number": number,
                    "total_cents": total_cents,
                    "proration_cents": proration_cents,
                    "seats": seats,
                })),
            )
            .await;

        Ok(invoice)
    }

    /// Settle an invoice.
    ///
    /// Safe to call more than once: a webhook and a sweep can race here, and
    /// the second caller finds the invoice already paid and does nothing.
    /// Settling also clears the subscription's grace window and recovers its
    /// status through the lifecycle core.
    pub async fn mark_invoice_as_paid(
        &self,
        invoice_id: &str,
        payment_intent_ref: Option<&str>,
    ) -> Result<Invoice> {
        let mut invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("invoice", invoice_id))?;

        if invoice.status == InvoiceStatus::Paid {
            tracing::debug!(
                target: "seatwise::invoice",
                invoice_id,
                "invoice already paid, nothing to do"
            );
            return Ok(invoice);
        }
        if !invoice.status.can_transition_to(InvoiceStatus::Paid) {
            return Err(BillingError::AlreadyTerminal {
                entity: "invoice",
                id: invoice.id.clone(),
                state: invoice.status.to_string(),
            });
        }

        let now = self.clock.now();
        invoice.status = InvoiceStatus::Paid;
        invoice.amount_paid_cents = invoice.total_cents;
        invoice.amount_due_cents = 0;
        invoice.paid_at = Some(now);
        if let Some(intent) = payment_intent_ref {
            invoice.payment_intent_ref = Some(intent.to_string());
        }
        self.store.save_invoice(&invoice).await?;

        self.lifecycle
            .record_payment_success(&invoice.subscription_id)
            .await?;

        tracing::info!(
            target: "seatwise::invoice",
            company_id = %invoice.company_id,
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            amount_cents = invoice.total_cents,
            "invoice paid"
        );
        self.recorder
            .record(
                BillingHistoryEntry::new(
                    &invoice.company_id,
                    BillingEvent::InvoicePaid,
                    format!("Invoice {} paid", invoice.invoice_number),
                    now,
                )
                .with_subscription(&invoice.subscription_id)
                .with_invoice(&invoice.id)
                .with_details(json!({ "amount_cents": invoice.total_cents })),
            )
            .await;

        Ok(invoice)
    }

    /// Void an open invoice at the gateway and locally.
    ///
    /// Voiding an already-void invoice is a no-op success; paid and
    /// uncollectible invoices are refused.
    pub async fn void_invoice(&self, invoice_id: &str) -> Result<Invoice> {
        let mut invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("invoice", invoice_id))?;

        if invoice.status == InvoiceStatus::Void {
            return Ok(invoice);
        }
        if !invoice.status.can_transition_to(InvoiceStatus::Void) {
            return Err(BillingError::AlreadyTerminal {
                entity: "invoice",
                id: invoice.id.clone(),
                state: invoice.status.to_string(),
            });
        }

        if let Some(gateway_id) = &invoice.gateway_invoice_id {
            self.client.void_invoice(gateway_id).await?;
        }

        let now = self.clock.now();
        invoice.status = InvoiceStatus::Void;
        invoice.amount_due_cents = 0;
        self.store.save_invoice(&invoice).await?;

        tracing::info!(
            target: "seatwise::invoice",
            company_id = %invoice.company_id,
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            "invoice voided"
        );
        self.recorder
            .record(
                BillingHistoryEntry::new(
                    &invoice.company_id,
                    BillingEvent::InvoiceVoided,
                    format!("Invoice {} voided", invoice.invoice_number),
                    now,
                )
                .with_subscription(&invoice.subscription_id)
                .with_invoice(&invoice.id),
            )
            .await;

        Ok(invoice)
    }

    /// Get an invoice by ID.
    pub async fn get_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>> {
        self.store.get_invoice(invoice_id).await
    }

    /// Get an invoice by its gateway reference. This is the lookup webhook
    /// handlers use, and it works even when the local record was written by
    /// an earlier run.
    pub async fn get_invoice_by_gateway_id(
        &self,
        gateway_invoice_id: &str,
    ) -> Result<Option<Invoice>> {
        self.store.get_invoice_by_gateway_id(gateway_invoice_id).await
    }

    /// All invoices, newest first, filtered in memory.
    pub async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>> {
        let invoices = self.store.list_invoices().await?;
        Ok(invoices.into_iter().filter(|i| filter.matches(i)).collect())
    }

    /// One company's invoices, newest first, filtered in memory.
    pub async fn company_invoices(
        &self,
        company_id: &str,
        filter: &InvoiceFilter,
    ) -> Result<Vec<Invoice>> {
        let invoices = self.store.list_company_invoices(company_id).await?;
        Ok(invoices.into_iter().filter(|i| filter.matches(i)).collect())
    }

    async fn find_by_number(&self, company_id: &str, number: &str) -> Result<Option<Invoice>> {
        let invoices = self.store.list_company_invoices(company_id).await?;
        Ok(invoices.into_iter().find(|i| i.invoice_number == number))
    }

    /// Invoice the subscription's stored elapsed period. This is the shape
    /// the billing sweep wants, which already holds the subscription.
    pub async fn invoice_elapsed_period(&self, subscription: &Subscription) -> Result<Invoice> {
        self.create_invoice(CreateInvoiceRequest {
            subscription_id: subscription.id.clone(),
            period_start: subscription.current_period_start,
            period_end: subscription.current_period_end,
        })
        .await
    }

    pub(crate) fn subscription_lifecycle(&self) -> &SubscriptionLifecycle<S> {
        &self.lifecycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryBillingStore;
    use crate::store::{PaymentStanding, SubscriptionStatus};
    use crate::testing::{CompanyBuilder, FixedClock, SubscriptionBuilder, UserBuilder};
    use crate::usage::SeatChange;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::RwLock;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[derive(Default)]
    struct StubInvoiceClient {
        created: AtomicU64,
        lines: RwLock<Vec<GatewayInvoiceLine>>,
        voided: RwLock<Vec<String>>,
    }

    impl GatewayInvoiceClient for &StubInvoiceClient {
        async fn create_invoice(&self, _request: CreateGatewayInvoiceRequest) -> Result<String> {
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("gwinv_{n}"))
        }

        async fn add_invoice_line(
            &self,
            _gateway_invoice_id: &str,
            line: GatewayInvoiceLine,
        ) -> Result<()> {
            self.lines.write().unwrap().push(line);
            Ok(())
        }

        async fn finalize_invoice(
            &self,
            gateway_invoice_id: &str,
        ) -> Result<FinalizedGatewayInvoice> {
            Ok(FinalizedGatewayInvoice {
                id: gateway_invoice_id.to_string(),
                status: "open".to_string(),
                pdf_url: Some(format!("https://pay.example.test/{gateway_invoice_id}/pdf")),
                payment_intent_ref: Some(format!("pi_{gateway_invoice_id}")),
            })
        }

        async fn void_invoice(&self, gateway_invoice_id: &str) -> Result<()> {
            self.voided
                .write()
                .unwrap()
                .push(gateway_invoice_id.to_string());
            Ok(())
        }
    }

    async fn seeded_store(seats: u32) -> InMemoryBillingStore {
        let store = InMemoryBillingStore::new();
        store
            .add_company(
                CompanyBuilder::new("co_1")
                    .with_gateway_customer("cus_co_1")
                    .build(),
            )
            .await;
        for _ in 0..seats {
            store.add_user(UserBuilder::new("co_1").build()).await;
        }
        store
            .save_subscription(
                &SubscriptionBuilder::new("co_1")
                    .with_id("sub_1")
                    .with_seats(seats)
                    .build(),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn create_invoice_builds_base_line_and_number() {
        let store = seeded_store(10).await;
        let client = StubInvoiceClient::default();
        let generator = InvoiceGenerator::with_clock(
            store.clone(),
            &client,
            BillingConfig::default(),
            FixedClock::at(utc(2024, 8, 1)),
        );

        let invoice = generator
            .create_invoice(CreateInvoiceRequest {
                subscription_id: "sub_1".to_string(),
                period_start: utc(2024, 6, 1),
                period_end: utc(2024, 7, 1),
            })
            .await
            .unwrap();

        assert_eq!(invoice.invoice_number, "INV-CO1-202406");
        assert_eq!(invoice.status, InvoiceStatus::Open);
        assert_eq!(invoice.line_items.len(), 1);
        assert_eq!(invoice.line_items[0].kind, LineItemKind::Base);
        assert_eq!(invoice.subtotal_cents, 1000);
        assert_eq!(invoice.tax_cents, 0);
        assert_eq!(invoice.total_cents, 1000);
        assert_eq!(invoice.amount_due_cents, 1000);
        assert_eq!(invoice.due_date, utc(2024, 8, 8));
        assert_eq!(invoice.pdf_url.as_deref(), Some("https://pay.example.test/gwinv_1/pdf"));
        assert_eq!(invoice.payment_intent_ref.as_deref(), Some("pi_gwinv_1"));
    }

    #[tokio::test]
    async fn create_invoice_adds_proration_line() {
        let store = seeded_store(10).await;
        let client = StubInvoiceClient::default();

        // Seat added mid-June: 15 of 30 days at $1.00 -> 50c proration
        let usage = UsageTracker::with_clock(
            store.clone(),
            BillingConfig::default(),
            FixedClock::at(utc(2024, 6, 16)),
        );
        store
            .add_user(UserBuilder::new("co_1").with_id("u_new").unbilled().build())
            .await;
        usage
            .record_user_addition(SeatChange::new("co_1", "u_new"))
            .await
            .unwrap();

        let generator = InvoiceGenerator::with_clock(
            store.clone(),
            &client,
            BillingConfig::default(),
            FixedClock::at(utc(2024, 8, 1)),
        );
        let invoice = generator
            .create_invoice(CreateInvoiceRequest {
                subscription_id: "sub_1".to_string(),
                period_start: utc(2024, 6, 1),
                period_end: utc(2024, 7, 1),
            })
            .await
            .unwrap();

        // 11 seats now, plus the prorated addition
        assert_eq!(invoice.line_items.len(), 2);
        assert_eq!(invoice.line_items[0].amount_cents, 1100);
        assert_eq!(invoice.line_items[1].kind, LineItemKind::Proration);
        assert_eq!(invoice.line_items[1].amount_cents, 50);
        assert_eq!(invoice.total_cents, 1150);

        // Gateway received both lines before finalize
        assert_eq!(client.lines.read().unwrap().len(), 2);

        // Billing baseline moved forward
        let sub = store.get_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.last_billed_user_count, 11);
    }

    #[tokio::test]
    async fn create_invoice_is_idempotent_per_period() {
        let store = seeded_store(4).await;
        let client = StubInvoiceClient::default();
        let generator = InvoiceGenerator::with_clock(
            store.clone(),
            &client,
            BillingConfig::default(),
            FixedClock::at(utc(2024, 8, 1)),
        );
        let request = CreateInvoiceRequest {
            subscription_id: "sub_1".to_string(),
            period_start: utc(2024, 6, 1),
            period_end: utc(2024, 7, 1),
        };

        let first = generator.create_invoice(request.clone()).await.unwrap();
        let second = generator.create_invoice(request).await.unwrap();

        assert_eq!(first.id, second.id);
        // Only one gateway invoice was ever opened
        assert_eq!(client.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mark_paid_settles_and_recovers_subscription() {
        let store = seeded_store(4).await;
        let client = StubInvoiceClient::default();

        // Past-due subscription in grace
        let mut sub = store.get_subscription("sub_1").await.unwrap().unwrap();
        sub.status = SubscriptionStatus::PastDue;
        sub.grace_period_ends_at = Some(utc(2024, 8, 5));
        sub.payment_status = Some(PaymentStanding::Failed);
        store.save_subscription(&sub).await.unwrap();

        let generator = InvoiceGenerator::with_clock(
            store.clone(),
            &client,
            BillingConfig::default(),
            FixedClock::at(utc(2024, 8, 1)),
        );
        let invoice = generator
            .create_invoice(CreateInvoiceRequest {
                subscription_id: "sub_1".to_string(),
                period_start: utc(2024, 6, 1),
                period_end: utc(2024, 7, 1),
            })
            .await
            .unwrap();

        let paid = generator
            .mark_invoice_as_paid(&invoice.id, Some("pi_settle"))
            .await
            .unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert_eq!(paid.amount_paid_cents, paid.total_cents);
        assert_eq!(paid.amount_due_cents, 0);
        assert_eq!(paid.paid_at, Some(utc(2024, 8, 1)));
        assert_eq!(paid.payment_intent_ref.as_deref(), Some("pi_settle"));

        let sub = store.get_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.grace_period_ends_at, None);
        assert_eq!(sub.payment_status, Some(PaymentStanding::Paid));

        // Second settle attempt is a quiet no-op
        let again = generator
            .mark_invoice_as_paid(&invoice.id, None)
            .await
            .unwrap();
        assert_eq!(again.paid_at, paid.paid_at);
    }

    #[tokio::test]
    async fn void_open_invoice_and_refuse_paid() {
        let store = seeded_store(2).await;
        let client = StubInvoiceClient::default();
        let generator = InvoiceGenerator::with_clock(
            store.clone(),
            &client,
            BillingConfig::default(),
            FixedClock::at(utc(2024, 8, 1)),
        );
        let invoice = generator
            .create_invoice(CreateInvoiceRequest {
                subscription_id: "sub_1".to_string(),
                period_start: utc(2024, 6, 1),
                period_end: utc(2024, 7, 1),
            })
            .await
            .unwrap();

        let voided = generator.void_invoice(&invoice.id).await.unwrap();
        assert_eq!(voided.status, InvoiceStatus::Void);
        assert_eq!(voided.amount_due_cents, 0);
        assert_eq!(client.voided.read().unwrap().len(), 1);

        // Voiding again is a no-op, not a second gateway call
        generator.void_invoice(&invoice.id).await.unwrap();
        assert_eq!(client.voided.read().unwrap().len(), 1);

        // A void invoice cannot be settled
        let err = generator
            .mark_invoice_as_paid(&invoice.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::AlreadyTerminal { .. }));
    }

    #[tokio::test]
    async fn listings_apply_filters_in_memory() {
        let store = seeded_store(2).await;
        let client = StubInvoiceClient::default();
        let generator = InvoiceGenerator::with_clock(
            store.clone(),
            &client,
            BillingConfig::default(),
            FixedClock::at(utc(2024, 8, 1)),
        );
        let june = generator
            .create_invoice(CreateInvoiceRequest {
                subscription_id: "sub_1".to_string(),
                period_start: utc(2024, 6, 1),
                period_end: utc(2024, 7, 1),
            })
            .await
            .unwrap();
        generator
            .create_invoice(CreateInvoiceRequest {
                subscription_id: "sub_1".to_string(),
                period_start: utc(2024, 7, 1),
                period_end: utc(2024, 8, 1),
            })
            .await
            .unwrap();
        generator.mark_invoice_as_paid(&june.id, None).await.unwrap();

        let all = generator
            .company_invoices("co_1", &InvoiceFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let open_only = generator
            .company_invoices(
                "co_1",
                &InvoiceFilter {
                    status: Some(InvoiceStatus::Open),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(open_only.len(), 1);
        assert_eq!(open_only[0].invoice_number, "INV-CO1-202407");

        let by_gateway = generator
            .get_invoice_by_gateway_id(june.gateway_invoice_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_gateway.id, june.id);
    }
}
