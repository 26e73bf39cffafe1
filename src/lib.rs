//! Seatwise - a per-seat subscription billing engine
//!
//! Companies subscribe once and pay per active user. The engine tracks the
//! subscription through trial, activation, cancellation and reactivation,
//! generates arrears invoices with mid-period seat proration, collects
//! payment through a pluggable gateway, and walks failed payments through
//! bounded retries into grace and suspension.
//!
//! # Features
//!
//! - **Lifecycle**: guarded subscription state transitions with optimistic saves
//! - **Invoicing**: arrears billing, seat lines plus mid-period proration lines
//! - **Payments**: bounded retries, then grace period and account suspension
//! - **Webhooks**: idempotent ingestion of gateway events
//! - **Sweeps**: background reconciliation passes with an in-process scheduler
//! - **Operations**: authorization-checked facade for UI backends
//! - **Testing**: in-memory store, scripted gateway double, record builders
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use seatwise::{BillingConfig, BillingOps, InMemoryBillingStore, WebhookIngestor};
//!
//! // Initialize logging
//! seatwise::init_tracing();
//!
//! let config = BillingConfig::from_env();
//! config.validate()?;
//!
//! let store = InMemoryBillingStore::new();
//! let ops = BillingOps::new(store.clone(), gateway.clone(), authorizer, config.clone());
//! let webhooks = WebhookIngestor::new(store, gateway, config);
//! ```

#![allow(async_fn_in_trait)] // gateway client traits are consumed through generics, never boxed

pub mod clock;
pub mod config;
pub mod customer;
pub mod error;
pub mod gateway;
pub mod history;
pub mod in_memory;
pub mod invoice;
pub mod ops;
pub mod payment;
pub mod payment_methods;
pub mod pricing;
pub mod retry;
pub mod store;
pub mod subscription;
pub mod sweeps;
pub mod testing;
pub mod usage;
pub mod webhook;

// Re-exports for public API
pub use config::{BillingConfig, BillingInterval};
pub use customer::CustomerManager;
pub use error::{BillingError, ErrorBody, ErrorCategory, Result};
pub use gateway::{FullGatewayClient, ProvisioningClient};
pub use history::{BillingEvent, BillingHistoryEntry, HistoryRecorder};
pub use in_memory::InMemoryBillingStore;
pub use invoice::{InvoiceFilter, InvoiceGenerator};
pub use ops::{BillingOps, Caller, CompanyAuthorizer, CreateCompanySubscriptionRequest, OpResponse};
pub use payment::{PaymentProcessor, ProcessPaymentRequest};
pub use payment_methods::{PaymentMethod, PaymentMethodManager};
pub use pricing::PriceResolver;
pub use retry::RetryPolicy;
pub use store::{
    AccountStatus, BillingStore, Company, CompanyUser, Invoice, InvoiceLineItem, InvoiceStatus,
    LineItemKind, Payment, PaymentStanding, PaymentStatus, Subscription, SubscriptionStatus,
};
pub use subscription::{
    CancelSubscriptionRequest, CreateSubscriptionRequest, GatewaySubscriptionData,
    ReactivateSubscriptionRequest, SeatSyncOutcome, SubscriptionManager,
};
pub use sweeps::{
    BillingSweep, GraceSweep, PaymentRetrySweep, SweepReport, SweepSchedule, SweepScheduler,
    SweepSchedulerHandle, TrialNotifier, TrialSweep, UsageSyncSweep,
};
pub use usage::{SeatChange, UsageSummary, UsageTracker};
pub use webhook::{GatewayEvent, WebhookIngestor, WebhookOutcome};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// This should be called early in your application, typically in main()
/// before wiring up the engine. Panics if a global subscriber is already set.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "seatwise=debug")
/// - `SEATWISE_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("SEATWISE_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
