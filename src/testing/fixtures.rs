//! Builders for billing records used across the test suites.
//!
//! Every builder produces a fully populated store record; tests override only
//! the fields the scenario cares about.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::config::BillingInterval;
use crate::store::{
    AccountStatus, Company, CompanyUser, Invoice, InvoiceLineItem, InvoiceStatus, LineItemKind,
    Subscription, SubscriptionStatus,
};

/// Stable default instant the fixtures anchor to: 2024-06-01 00:00:00 UTC.
#[must_use]
pub fn default_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

/// Helper functions for generating fake test data
pub mod fake {
    use uuid::Uuid;

    /// Generate a fake email address
    pub fn email() -> String {
        format!("billing-{}@example.com", Uuid::new_v4().simple())
    }

    /// Generate a short prefixed identifier, e.g. `co_1b2f3c4d`
    pub fn id(prefix: &str) -> String {
        format!("{prefix}_{}", &Uuid::new_v4().simple().to_string()[..8])
    }

    /// Generate a fake company name
    pub fn company_name() -> String {
        format!("Test Co {}", &Uuid::new_v4().simple().to_string()[..6])
    }
}

/// Builder for [`Company`] records.
#[derive(Debug, Clone)]
pub struct CompanyBuilder {
    id: String,
    name: Option<String>,
    email: Option<String>,
    gateway_customer_id: Option<String>,
    account_status: AccountStatus,
}

impl CompanyBuilder {
    /// Start a company with the given ID and active status.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
            gateway_customer_id: None,
            account_status: AccountStatus::Active,
        }
    }

    /// Set the company name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the billing email
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Link an existing gateway customer
    pub fn with_gateway_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.gateway_customer_id = Some(customer_id.into());
        self
    }

    /// Set the account status
    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.account_status = status;
        self
    }

    /// Build the [`Company`]
    pub fn build(self) -> Company {
        Company {
            name: self.name.unwrap_or_else(fake::company_name),
            email: self.email.unwrap_or_else(fake::email),
            gateway_customer_id: self.gateway_customer_id,
            account_status: self.account_status,
            suspension_reason: None,
            billing_status: None,
            trial_ends_at: None,
            created_at: default_epoch(),
            id: self.id,
        }
    }
}

/// Builder for [`CompanyUser`] records.
#[derive(Debug, Clone)]
pub struct UserBuilder {
    company_id: String,
    id: Option<String>,
    email: Option<String>,
    active: bool,
    billing_processed: bool,
    added_at: DateTime<Utc>,
}

impl UserBuilder {
    /// Start an active, billing-processed user for the given company.
    pub fn new(company_id: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
            id: None,
            email: None,
            active: true,
            billing_processed: true,
            added_at: default_epoch(),
        }
    }

    /// Set the user ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the email
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Mark the user inactive
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Mark the seat change as not yet billed
    pub fn unbilled(mut self) -> Self {
        self.billing_processed = false;
        self
    }

    /// Set when the user was added
    pub fn added_at(mut self, at: DateTime<Utc>) -> Self {
        self.added_at = at;
        self
    }

    /// Build the [`CompanyUser`]
    pub fn build(self) -> CompanyUser {
        CompanyUser {
            id: self.id.unwrap_or_else(|| fake::id("user")),
            email: self.email.unwrap_or_else(fake::email),
            company_id: self.company_id,
            active: self.active,
            billing_processed: self.billing_processed,
            added_at: self.added_at,
            removed_at: None,
        }
    }
}

/// Builder for [`Subscription`] records.
///
/// Defaults to an active monthly subscription over June 2024 with the next
/// payment due at the start of August, matching the billed-in-arrears layout
/// the engine maintains.
#[derive(Debug, Clone)]
pub struct SubscriptionBuilder {
    company_id: String,
    id: Option<String>,
    gateway_subscription_id: Option<String>,
    status: SubscriptionStatus,
    cancel_at_period_end: bool,
    seats: u32,
    price_per_user_cents: i64,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    next_payment_date: DateTime<Utc>,
    trial_ends_at: Option<DateTime<Utc>>,
    grace_period_ends_at: Option<DateTime<Utc>>,
}

impl SubscriptionBuilder {
    /// Start an active monthly subscription for the given company.
    pub fn new(company_id: impl Into<String>) -> Self {
        let start = default_epoch();
        let end = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        Self {
            company_id: company_id.into(),
            id: None,
            gateway_subscription_id: None,
            status: SubscriptionStatus::Active,
            cancel_at_period_end: false,
            seats: 5,
            price_per_user_cents: 100,
            period_start: start,
            period_end: end,
            next_payment_date: Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap(),
            trial_ends_at: None,
            grace_period_ends_at: None,
        }
    }

    /// Set the subscription ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the gateway subscription ID
    pub fn with_gateway_id(mut self, id: impl Into<String>) -> Self {
        self.gateway_subscription_id = Some(id.into());
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the seat count (both current and last billed)
    pub fn with_seats(mut self, seats: u32) -> Self {
        self.seats = seats;
        self
    }

    /// Set the per-seat price in cents
    pub fn with_price(mut self, cents: i64) -> Self {
        self.price_per_user_cents = cents;
        self
    }

    /// Set the current billing period. The next payment date moves to one
    /// month past the period end.
    pub fn with_period(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.period_start = start;
        self.period_end = end;
        self.next_payment_date = crate::clock::next_billing_date(end, BillingInterval::Month);
        self
    }

    /// Override the next payment date
    pub fn with_next_payment_date(mut self, at: DateTime<Utc>) -> Self {
        self.next_payment_date = at;
        self
    }

    /// Set a trial deadline
    pub fn with_trial_end(mut self, at: DateTime<Utc>) -> Self {
        self.trial_ends_at = Some(at);
        self
    }

    /// Set a grace period deadline
    pub fn with_grace_deadline(mut self, at: DateTime<Utc>) -> Self {
        self.grace_period_ends_at = Some(at);
        self
    }

    /// Flag the subscription to cancel at period end
    pub fn canceling_at_period_end(mut self) -> Self {
        self.cancel_at_period_end = true;
        self
    }

    /// Build the [`Subscription`]
    pub fn build(self) -> Subscription {
        let id = self.id.unwrap_or_else(|| fake::id("sub"));
        let gateway_subscription_id = self
            .gateway_subscription_id
            .unwrap_or_else(|| format!("gw_{id}"));
        Subscription {
            gateway_subscription_id,
            gateway_customer_id: format!("cus_{}", self.company_id),
            company_id: self.company_id,
            status: self.status,
            cancel_at_period_end: self.cancel_at_period_end,
            canceled_at: None,
            price_per_user_cents: self.price_per_user_cents,
            currency: "usd".to_string(),
            billing_interval: BillingInterval::Month,
            current_period_start: self.period_start,
            current_period_end: self.period_end,
            next_payment_date: self.next_payment_date,
            current_user_count: self.seats,
            last_billed_user_count: self.seats,
            trial_ends_at: self.trial_ends_at,
            grace_period_ends_at: self.grace_period_ends_at,
            payment_status: None,
            last_payment_date: None,
            version: 1,
            created_at: default_epoch(),
            updated_at: default_epoch(),
            id,
        }
    }
}

/// Builder for [`Invoice`] records.
///
/// Defaults to an open invoice for June 2024 at 5 seats, carrying the
/// deterministic number the generator would mint for that period.
#[derive(Debug, Clone)]
pub struct InvoiceBuilder {
    company_id: String,
    subscription_id: String,
    id: Option<String>,
    gateway_invoice_id: Option<String>,
    status: InvoiceStatus,
    seats: u32,
    price_per_user_cents: i64,
    proration_cents: i64,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    payment_intent_ref: Option<String>,
    created_at: DateTime<Utc>,
}

impl InvoiceBuilder {
    /// Start an open invoice for the given company and subscription.
    pub fn new(company_id: impl Into<String>, subscription_id: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
            subscription_id: subscription_id.into(),
            id: None,
            gateway_invoice_id: None,
            status: InvoiceStatus::Open,
            seats: 5,
            price_per_user_cents: 100,
            proration_cents: 0,
            period_start: default_epoch(),
            period_end: Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
            payment_intent_ref: None,
            created_at: Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap(),
        }
    }

    /// Set the invoice ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the gateway invoice ID
    pub fn with_gateway_id(mut self, id: impl Into<String>) -> Self {
        self.gateway_invoice_id = Some(id.into());
        self
    }

    /// Set the status. Paid invoices get their amounts settled in `build`.
    pub fn with_status(mut self, status: InvoiceStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the billed seat count
    pub fn with_seats(mut self, seats: u32) -> Self {
        self.seats = seats;
        self
    }

    /// Set the per-seat price in cents
    pub fn with_price(mut self, cents: i64) -> Self {
        self.price_per_user_cents = cents;
        self
    }

    /// Add a signed proration line
    pub fn with_proration(mut self, cents: i64) -> Self {
        self.proration_cents = cents;
        self
    }

    /// Set the billed period. The invoice number follows the period start.
    pub fn with_period(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.period_start = start;
        self.period_end = end;
        self
    }

    /// Link the gateway payment intent collecting this invoice
    pub fn with_payment_intent(mut self, intent_ref: impl Into<String>) -> Self {
        self.payment_intent_ref = Some(intent_ref.into());
        self
    }

    /// Set when the invoice was issued
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Build the [`Invoice`]
    pub fn build(self) -> Invoice {
        let id = self.id.unwrap_or_else(|| fake::id("inv"));
        let gateway_invoice_id = self
            .gateway_invoice_id
            .unwrap_or_else(|| format!("gw_{id}"));
        let base_cents = i64::from(self.seats) * self.price_per_user_cents;
        let mut line_items = vec![InvoiceLineItem {
            description: format!("Per-seat subscription, {} seats", self.seats),
            amount_cents: base_cents,
            quantity: self.seats,
            kind: LineItemKind::Base,
        }];
        if self.proration_cents != 0 {
            line_items.push(InvoiceLineItem {
                description: if self.proration_cents > 0 {
                    "Seat additions (prorated)".to_string()
                } else {
                    "Seat removal credit (prorated)".to_string()
                },
                amount_cents: self.proration_cents,
                quantity: 1,
                kind: LineItemKind::Proration,
            });
        }
        let total_cents = base_cents + self.proration_cents;
        let (amount_due_cents, amount_paid_cents, paid_at) = match self.status {
            InvoiceStatus::Paid => (0, total_cents, Some(self.created_at)),
            _ => (total_cents, 0, None),
        };
        Invoice {
            invoice_number: crate::clock::invoice_number(&self.company_id, self.period_start),
            company_id: self.company_id,
            subscription_id: self.subscription_id,
            gateway_invoice_id: Some(gateway_invoice_id),
            status: self.status,
            currency: "usd".to_string(),
            line_items,
            subtotal_cents: total_cents,
            tax_cents: 0,
            total_cents,
            amount_due_cents,
            amount_paid_cents,
            period_start: self.period_start,
            period_end: self.period_end,
            due_date: self.created_at + Duration::days(7),
            paid_at,
            payment_intent_ref: self.payment_intent_ref,
            pdf_url: None,
            created_at: self.created_at,
            id,
        }
    }
}
