//! Storage trait and billing records.
//!
//! Implement [`BillingStore`] to persist billing state to your database. The
//! crate ships [`crate::in_memory::InMemoryBillingStore`] for development,
//! tests, and single-instance deployments.
//!
//! Records are plain serde structs. Status fields are closed enums whose
//! transition predicates reject anything outside the lifecycle state machine,
//! so an unknown state can never be written back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BillingInterval;
use crate::error::Result;
use crate::history::BillingHistoryEntry;

// =============================================================================
// Company and users
// =============================================================================

/// Account-level standing, denormalized from the subscription lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Trial,
    Active,
    PastDue,
    Suspended,
    Canceled,
}

impl AccountStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Suspended => "suspended",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A paying company. One gateway customer, at most one live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Gateway customer reference, set on first billing contact.
    pub gateway_customer_id: Option<String>,
    pub account_status: AccountStatus,
    pub suspension_reason: Option<String>,
    /// Mirror of the live subscription status for cheap display queries.
    pub billing_status: Option<String>,
    /// Mirror of the subscription's trial deadline.
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A seat-occupying member of a company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyUser {
    pub id: String,
    pub company_id: String,
    pub email: String,
    /// Occupies a seat while true.
    pub active: bool,
    /// Set once the seat change has been folded into billing records.
    pub billing_processed: bool,
    pub added_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Subscription
// =============================================================================

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// In the free trial window.
    Trial,
    /// Paid up and running.
    Active,
    /// Payment failed, inside the grace window.
    PastDue,
    /// Canceled. Terminal.
    Canceled,
    /// Gateway reports the subscription unpaid.
    Unpaid,
    /// Grace expired without payment; service is cut.
    Suspended,
}

impl SubscriptionStatus {
    /// Parse a gateway subscription status string.
    ///
    /// `Suspended` is a local-only state, so the gateway never produces it.
    /// Unknown statuses map to `Canceled`.
    #[must_use]
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "trialing" | "trial" => Self::Trial,
            "past_due" => Self::PastDue,
            "unpaid" => Self::Unpaid,
            _ => Self::Canceled,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
            Self::Suspended => "suspended",
        }
    }

    /// Whether a change to `next` is a legal lifecycle transition.
    ///
    /// `Canceled` is terminal. Suspension is only reachable through
    /// `PastDue`, which is how the grace period enforces its ordering.
    /// A transition to the current state is allowed so idempotent replays
    /// pass the guard.
    #[must_use]
    pub fn can_transition_to(self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (Canceled, _) => false,
            (Trial, Active | PastDue | Unpaid | Canceled) => true,
            (Active, PastDue | Unpaid | Canceled) => true,
            (PastDue, Active | Suspended | Unpaid | Canceled) => true,
            (Suspended, Active | Canceled) => true,
            (Unpaid, Active | PastDue | Canceled) => true,
            _ => false,
        }
    }

    /// States in which seat changes are billable.
    #[must_use]
    pub fn is_billable(&self) -> bool {
        matches!(self, Self::Trial | Self::Active | Self::PastDue)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription-level payment standing, distinct from individual
/// [`Payment`] attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStanding {
    Paid,
    Failed,
}

/// A company's subscription.
///
/// `version` is an explicit optimistic-lock counter: writers bump it and save
/// through [`BillingStore::compare_and_save_subscription`] with the version
/// they read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub company_id: String,
    /// Gateway subscription reference.
    pub gateway_subscription_id: String,
    /// Gateway customer reference.
    pub gateway_customer_id: String,
    pub status: SubscriptionStatus,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    /// Price per active user per cycle, in cents.
    pub price_per_user_cents: i64,
    pub currency: String,
    pub billing_interval: BillingInterval,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    /// When the billing sweep should next invoice this subscription. Always
    /// one cycle past the current period end (billing in arrears).
    pub next_payment_date: DateTime<Utc>,
    /// Authoritative seat count, maintained by the usage tracker.
    pub current_user_count: u32,
    /// Seat count as of the last created invoice.
    pub last_billed_user_count: u32,
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// Non-null exactly while status is `PastDue`.
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    pub payment_status: Option<PaymentStanding>,
    pub last_payment_date: Option<DateTime<Utc>>,
    /// Optimistic-lock counter, bumped on every successful save.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trial
        )
    }

    #[must_use]
    pub fn is_trialing(&self) -> bool {
        self.status == SubscriptionStatus::Trial
    }

    #[must_use]
    pub fn is_past_due(&self) -> bool {
        self.status == SubscriptionStatus::PastDue
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.status == SubscriptionStatus::Canceled
    }

    /// Whether seat changes on this subscription are billable.
    #[must_use]
    pub fn is_billable(&self) -> bool {
        self.status.is_billable()
    }

    /// Check if the subscription will cancel at period end.
    #[must_use]
    pub fn will_cancel(&self) -> bool {
        self.cancel_at_period_end
    }

    /// True while a grace deadline is set and still in the future.
    #[must_use]
    pub fn in_grace_period(&self, now: DateTime<Utc>) -> bool {
        self.grace_period_ends_at.is_some_and(|end| end > now)
    }
}

// =============================================================================
// Invoice
// =============================================================================

/// Invoice lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Void,
    Uncollectible,
}

impl InvoiceStatus {
    #[must_use]
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "draft" => Self::Draft,
            "open" => Self::Open,
            "paid" => Self::Paid,
            "void" => Self::Void,
            _ => Self::Uncollectible,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::Paid => "paid",
            Self::Void => "void",
            Self::Uncollectible => "uncollectible",
        }
    }

    /// Paid, void, and uncollectible invoices accept no further edits.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Void | Self::Uncollectible)
    }

    /// Legal status moves. Draft invoices finalize to open; open invoices
    /// settle, void, or write off. Same-state is a no-op success.
    #[must_use]
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        if *self == next {
            return true;
        }
        match (self, next) {
            (Self::Draft, Self::Open | Self::Void) => true,
            (Self::Open, Self::Paid | Self::Void | Self::Uncollectible) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Line item classification on an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemKind {
    /// Seats times price for the billed period.
    Base,
    /// Net mid-period seat changes, positive or negative.
    Proration,
}

/// One line on an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    pub description: String,
    pub amount_cents: i64,
    pub quantity: u32,
    pub kind: LineItemKind,
}

/// One invoice per subscription per billed period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub company_id: String,
    pub subscription_id: String,
    /// Gateway invoice reference, once created there.
    pub gateway_invoice_id: Option<String>,
    /// Human invoice number, deterministic per company and month.
    pub invoice_number: String,
    pub status: InvoiceStatus,
    pub currency: String,
    pub line_items: Vec<InvoiceLineItem>,
    pub subtotal_cents: i64,
    /// Tax collection is out of scope; fixed at zero by policy.
    pub tax_cents: i64,
    pub total_cents: i64,
    pub amount_due_cents: i64,
    pub amount_paid_cents: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    /// Gateway payment intent that settled this invoice, if any.
    pub payment_intent_ref: Option<String>,
    pub pdf_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Payment
// =============================================================================

/// Payment attempt status.
///
/// `pending -> succeeded` is terminal. `pending -> failed` may loop back to
/// `pending` while attempts remain; the final failure is terminal and starts
/// the subscription's grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Canceled,
}

impl PaymentStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match (self, next) {
            (Pending, Succeeded | Failed | Canceled) => true,
            // Retry re-opens a failed payment while attempts remain
            (Failed, Pending) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Redacted card summary safe to persist alongside a payment.
///
/// Never holds a PAN or CVC; brand, last four and expiry only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethodSummary {
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<u32>,
    pub exp_year: Option<u32>,
}

/// A payment attempt chain against one invoice.
///
/// `attempt_number` never exceeds `max_attempts`; the attempt that reaches
/// the cap triggers the grace period exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub company_id: String,
    pub subscription_id: String,
    pub invoice_id: Option<String>,
    /// Gateway payment intent reference.
    pub gateway_payment_intent_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    /// 1-based count of attempts made, including the current one.
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub payment_method: Option<PaymentMethodSummary>,
    /// When the retry sweep should pick this payment up again.
    pub next_retry_date: Option<DateTime<Utc>>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Attempts remain and the payment is not already settled.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.status == PaymentStatus::Failed && self.attempt_number < self.max_attempts
    }

    /// Failed for good: every attempt used, nothing scheduled.
    #[must_use]
    pub fn is_terminally_failed(&self) -> bool {
        self.status == PaymentStatus::Failed
            && self.attempt_number >= self.max_attempts
            && self.next_retry_date.is_none()
    }
}

// =============================================================================
// Usage records
// =============================================================================

/// Seat change direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageEventType {
    UserAdded,
    UserRemoved,
}

impl UsageEventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserAdded => "user_added",
            Self::UserRemoved => "user_removed",
        }
    }
}

/// An immutable seat-change event with its proration.
///
/// Never updated after insert; the invoice generator only aggregates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub company_id: String,
    pub subscription_id: String,
    pub event_type: UsageEventType,
    pub user_id: String,
    pub user_email: Option<String>,
    pub user_count_before: u32,
    pub user_count_after: u32,
    /// Signed cents; negative for removals.
    pub proration_cents: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Cleared semantics: only records with this set are summed into the
    /// next invoice's proration line.
    pub will_affect_next_invoice: bool,
    /// Who performed the seat change; `None` for system-driven changes.
    pub recorded_by: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Pricing tiers
// =============================================================================

/// A configured per-seat price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTier {
    pub id: String,
    pub name: String,
    pub price_per_user_cents: i64,
    pub currency: String,
    pub billing_interval: BillingInterval,
    /// Gateway price object reference, created lazily.
    pub gateway_price_id: Option<String>,
    pub is_default: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Store trait
// =============================================================================

/// Persistence boundary for the billing engine.
///
/// Implement this against your document store. All queries the sweeps need
/// are store methods so backends can index them; the in-memory store scans.
#[async_trait]
pub trait BillingStore: Send + Sync {
    // Companies

    async fn get_company(&self, company_id: &str) -> Result<Option<Company>>;

    async fn save_company(&self, company: &Company) -> Result<()>;

    // Users

    /// Authoritative count of seat-occupying users for a company.
    async fn count_active_users(&self, company_id: &str) -> Result<u32>;

    async fn get_user(&self, user_id: &str) -> Result<Option<CompanyUser>>;

    async fn save_user(&self, user: &CompanyUser) -> Result<()>;

    // Subscriptions

    async fn get_subscription(&self, subscription_id: &str) -> Result<Option<Subscription>>;

    /// The company's live subscription: the newest non-canceled record, or
    /// the newest record when all are canceled.
    async fn subscription_for_company(&self, company_id: &str) -> Result<Option<Subscription>>;

    /// Look up by gateway subscription reference, for webhook payloads that
    /// only carry gateway ids.
    async fn get_subscription_by_gateway_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>>;

    async fn save_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Save only if the stored version still equals `expected_version`.
    ///
    /// Returns `Ok(true)` if the save happened, `Ok(false)` on a version
    /// mismatch. Callers bump `subscription.version` before calling and
    /// re-read on `false`.
    ///
    /// # Important: Production Implementations MUST Override This
    ///
    /// The default implementation has a time-of-check to time-of-use (TOCTOU)
    /// race and is only suitable for single-writer development scenarios.
    /// Production implementations MUST override it with an atomic
    /// compare-and-swap:
    ///
    /// - **PostgreSQL**: `UPDATE ... WHERE id = $1 AND version = $2`
    /// - **MongoDB**: `findOneAndUpdate` with a version filter
    /// - **DynamoDB**: conditional write on the version attribute
    async fn compare_and_save_subscription(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<bool> {
        // WARNING: not atomic. Exists for simple development scenarios only;
        // real backends override with a conditional write.
        #[cfg(debug_assertions)]
        {
            static WARNED: std::sync::atomic::AtomicBool =
                std::sync::atomic::AtomicBool::new(false);
            if !WARNED.swap(true, std::sync::atomic::Ordering::Relaxed) {
                tracing::warn!(
                    target: "seatwise::store",
                    "Using default non-atomic compare_and_save_subscription implementation. \
                     This is NOT safe with concurrent writers. \
                     Override this method with an atomic compare-and-swap operation."
                );
            }
        }

        if let Some(current) = self.get_subscription(&subscription.id).await? {
            if current.version != expected_version {
                return Ok(false);
            }
        }
        self.save_subscription(subscription).await?;
        Ok(true)
    }

    /// Active or trialing subscriptions whose payment date has arrived.
    async fn subscriptions_due_for_billing(&self, now: DateTime<Utc>)
        -> Result<Vec<Subscription>>;

    /// Past-due subscriptions whose grace deadline has passed.
    async fn subscriptions_with_expired_grace(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>>;

    /// Trialing subscriptions whose trial ends at or before `cutoff`.
    async fn subscriptions_in_trial_ending_by(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Subscription>>;

    /// Active or trialing subscriptions, for the usage-sync sweep.
    async fn active_subscriptions(&self) -> Result<Vec<Subscription>>;

    // Invoices

    async fn get_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>>;

    async fn get_invoice_by_gateway_id(
        &self,
        gateway_invoice_id: &str,
    ) -> Result<Option<Invoice>>;

    async fn save_invoice(&self, invoice: &Invoice) -> Result<()>;

    /// All invoices, newest first. Date filtering happens in the generator.
    async fn list_invoices(&self) -> Result<Vec<Invoice>>;

    /// One company's invoices, newest first.
    async fn list_company_invoices(&self, company_id: &str) -> Result<Vec<Invoice>>;

    // Payments

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>>;

    /// Look up by gateway payment intent, for webhook payloads.
    async fn get_payment_by_intent(
        &self,
        gateway_payment_intent_id: &str,
    ) -> Result<Option<Payment>>;

    async fn save_payment(&self, payment: &Payment) -> Result<()>;

    /// Failed payments with attempts left whose retry date has arrived.
    async fn payments_due_for_retry(&self, now: DateTime<Utc>) -> Result<Vec<Payment>>;

    /// One company's payments, newest first.
    async fn list_company_payments(&self, company_id: &str) -> Result<Vec<Payment>>;

    // Usage records (append-only)

    async fn append_usage_record(&self, record: &UsageRecord) -> Result<()>;

    /// Records for a company whose `recorded_at` falls inside the window.
    async fn usage_records_in_period(
        &self,
        company_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>>;

    // Billing history (append-only)

    async fn append_history(&self, entry: &BillingHistoryEntry) -> Result<()>;

    async fn list_company_history(&self, company_id: &str) -> Result<Vec<BillingHistoryEntry>>;

    // Pricing tiers

    async fn get_pricing_tier(&self, tier_id: &str) -> Result<Option<PricingTier>>;

    /// The tier used when a subscription does not name one.
    async fn default_pricing_tier(&self) -> Result<Option<PricingTier>>;

    async fn save_pricing_tier(&self, tier: &PricingTier) -> Result<()>;

    // Webhook idempotency

    /// Check if a gateway event has already been processed.
    async fn is_event_processed(&self, event_id: &str) -> Result<bool>;

    /// Mark a gateway event as processed.
    async fn mark_event_processed(&self, event_id: &str) -> Result<()>;

    /// Clean up old processed events (default: no-op).
    async fn cleanup_old_events(&self, _older_than_days: u32) -> Result<usize> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_gateway() {
        assert_eq!(
            SubscriptionStatus::from_gateway("active"),
            SubscriptionStatus::Active
        );
        assert_eq!(
            SubscriptionStatus::from_gateway("trialing"),
            SubscriptionStatus::Trial
        );
        assert_eq!(
            SubscriptionStatus::from_gateway("past_due"),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            SubscriptionStatus::from_gateway("unpaid"),
            SubscriptionStatus::Unpaid
        );
        // Unknown gateway statuses collapse to canceled
        assert_eq!(
            SubscriptionStatus::from_gateway("incomplete_expired"),
            SubscriptionStatus::Canceled
        );
    }

    #[test]
    fn test_canceled_is_terminal() {
        use SubscriptionStatus::*;
        for next in [Trial, Active, PastDue, Unpaid, Suspended] {
            assert!(!Canceled.can_transition_to(next), "canceled -> {}", next);
        }
        assert!(Canceled.can_transition_to(Canceled));
    }

    #[test]
    fn test_suspension_only_from_past_due() {
        use SubscriptionStatus::*;
        assert!(PastDue.can_transition_to(Suspended));
        assert!(!Active.can_transition_to(Suspended));
        assert!(!Trial.can_transition_to(Suspended));
        assert!(!Unpaid.can_transition_to(Suspended));
    }

    #[test]
    fn test_recovery_transitions() {
        use SubscriptionStatus::*;
        assert!(PastDue.can_transition_to(Active));
        assert!(Suspended.can_transition_to(Active));
        assert!(Unpaid.can_transition_to(Active));
    }

    #[test]
    fn test_self_transition_allowed() {
        use SubscriptionStatus::*;
        for status in [Trial, Active, PastDue, Canceled, Unpaid, Suspended] {
            assert!(status.can_transition_to(status));
        }
    }

    #[test]
    fn test_billable_states() {
        use SubscriptionStatus::*;
        assert!(Trial.is_billable());
        assert!(Active.is_billable());
        assert!(PastDue.is_billable());
        assert!(!Canceled.is_billable());
        assert!(!Unpaid.is_billable());
        assert!(!Suspended.is_billable());
    }

    #[test]
    fn test_payment_status_transitions() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Succeeded));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Canceled));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Succeeded.can_transition_to(Pending));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Succeeded));
        assert!(!Canceled.can_transition_to(Pending));
    }

    #[test]
    fn test_invoice_status_parse_and_terminal() {
        assert_eq!(InvoiceStatus::from_gateway("open"), InvoiceStatus::Open);
        assert_eq!(InvoiceStatus::from_gateway("paid"), InvoiceStatus::Paid);
        assert_eq!(
            InvoiceStatus::from_gateway("nonsense"),
            InvoiceStatus::Uncollectible
        );
        assert!(!InvoiceStatus::Open.is_terminal());
        assert!(InvoiceStatus::Paid.is_terminal());
        assert!(InvoiceStatus::Void.is_terminal());
    }

    #[test]
    fn test_invoice_status_transitions() {
        use InvoiceStatus::*;
        assert!(Draft.can_transition_to(Open));
        assert!(Open.can_transition_to(Paid));
        assert!(Open.can_transition_to(Void));
        assert!(Open.can_transition_to(Uncollectible));
        assert!(Paid.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Open));
        assert!(!Void.can_transition_to(Paid));
        assert!(!Draft.can_transition_to(Paid));
    }

    #[test]
    fn test_status_serde_round_trip() {
        let json = serde_json::to_string(&SubscriptionStatus::PastDue).unwrap();
        assert_eq!(json, "\"past_due\"");
        let back: SubscriptionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SubscriptionStatus::PastDue);
    }

    #[test]
    fn test_payment_retry_predicates() {
        let now = Utc::now();
        let mut payment = Payment {
            id: "pay_1".to_string(),
            company_id: "comp_1".to_string(),
            subscription_id: "sub_1".to_string(),
            invoice_id: None,
            gateway_payment_intent_id: None,
            amount_cents: 1000,
            currency: "usd".to_string(),
            status: PaymentStatus::Failed,
            attempt_number: 1,
            max_attempts: 3,
            failure_code: None,
            failure_message: None,
            payment_method: None,
            next_retry_date: Some(now),
            attempted_at: Some(now),
            created_at: now,
            updated_at: now,
        };

        assert!(payment.can_retry());
        assert!(!payment.is_terminally_failed());

        payment.attempt_number = 3;
        payment.next_retry_date = None;
        assert!(!payment.can_retry());
        assert!(payment.is_terminally_failed());
    }
}
