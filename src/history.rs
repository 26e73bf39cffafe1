//! Billing history: an append-only record of lifecycle events.
//!
//! Every mutation appends one entry. History is a best-effort side channel
//! for support and debugging: a failure to append is logged and swallowed,
//! never propagated, so it cannot fail the mutation that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::BillingStore;

/// Billing lifecycle event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEvent {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCanceled,
    AccountReactivated,
    GracePeriodStarted,
    AccountSuspended,
    InvoiceCreated,
    InvoicePaid,
    InvoiceVoided,
    PaymentRecorded,
    PaymentFailed,
    PaymentRetryScheduled,
    UserAdded,
    UserRemoved,
    TrialEndingSoon,
}

impl BillingEvent {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubscriptionCreated => "subscription_created",
            Self::SubscriptionUpdated => "subscription_updated",
            Self::SubscriptionCanceled => "subscription_canceled",
            Self::AccountReactivated => "account_reactivated",
            Self::GracePeriodStarted => "grace_period_started",
            Self::AccountSuspended => "account_suspended",
            Self::InvoiceCreated => "invoice_created",
            Self::InvoicePaid => "invoice_paid",
            Self::InvoiceVoided => "invoice_voided",
            Self::PaymentRecorded => "payment_recorded",
            Self::PaymentFailed => "payment_failed",
            Self::PaymentRetryScheduled => "payment_retry_scheduled",
            Self::UserAdded => "user_added",
            Self::UserRemoved => "user_removed",
            Self::TrialEndingSoon => "trial_ending_soon",
        }
    }
}

impl std::fmt::Display for BillingEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One appended history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingHistoryEntry {
    pub id: String,
    pub company_id: String,
    pub subscription_id: Option<String>,
    pub invoice_id: Option<String>,
    pub payment_id: Option<String>,
    pub user_id: Option<String>,
    pub event: BillingEvent,
    /// Human-readable summary for support tooling.
    pub description: String,
    /// Structured event detail, event-specific shape.
    pub details: serde_json::Value,
    /// Who performed the action; `None` for system-driven events.
    pub actor: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl BillingHistoryEntry {
    #[must_use]
    pub fn new(
        company_id: impl Into<String>,
        event: BillingEvent,
        description: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            company_id: company_id.into(),
            subscription_id: None,
            invoice_id: None,
            payment_id: None,
            user_id: None,
            event,
            description: description.into(),
            details: serde_json::Value::Null,
            actor: None,
            recorded_at,
        }
    }

    #[must_use]
    pub fn with_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    #[must_use]
    pub fn with_invoice(mut self, invoice_id: impl Into<String>) -> Self {
        self.invoice_id = Some(invoice_id.into());
        self
    }

    #[must_use]
    pub fn with_payment(mut self, payment_id: impl Into<String>) -> Self {
        self.payment_id = Some(payment_id.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Appends history entries, absorbing store failures.
#[derive(Clone)]
pub struct HistoryRecorder<S> {
    store: S,
}

impl<S: BillingStore> HistoryRecorder<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Append `entry` and emit a structured log line.
    ///
    /// Never fails: if the store rejects the append, the entry is logged at
    /// WARN and dropped. The billing mutation that produced it stands.
    pub async fn record(&self, entry: BillingHistoryEntry) {
        match self.store.append_history(&entry).await {
            Ok(()) => {
                tracing::info!(
                    target: "seatwise::history",
                    company_id = %entry.company_id,
                    event = entry.event.as_str(),
                    "{}", entry.description
                );
            }
            Err(e) => {
                tracing::warn!(
                    target: "seatwise::history",
                    company_id = %entry.company_id,
                    event = entry.event.as_str(),
                    error = %e,
                    "Failed to append billing history entry"
                );
            }
        }
    }
}
