//! Callable operations for the UI layer.
//!
//! [`BillingOps`] is the request/response surface the excluded UI layer calls
//! into. Every operation authorizes the caller as an admin of the company it
//! touches before doing anything else; the role check itself lives behind the
//! [`CompanyAuthorizer`] trait because membership and roles are owned by the
//! surrounding product, not by billing. Successful operations wrap their
//! payload in [`OpResponse`]; failures surface as categorized
//! [`BillingError`]s whose [`crate::error::ErrorBody`] is safe to serialize
//! back to the UI.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{BillingClock, SystemClock};
use crate::config::BillingConfig;
use crate::error::{BillingError, Result};
use crate::gateway::FullGatewayClient;
use crate::invoice::{InvoiceFilter, InvoiceGenerator};
use crate::payment::PaymentProcessor;
use crate::payment_methods::{PaymentMethod, PaymentMethodList, PaymentMethodManager};
use crate::store::{BillingStore, Invoice, Payment, Subscription};
use crate::subscription::{
    CancelSubscriptionRequest, CreateSubscriptionRequest, ReactivateSubscriptionRequest,
    SubscriptionManager,
};
use crate::usage::{UsageSummary, UsageTracker};

/// A verified caller identity, produced by the surrounding auth layer.
///
/// Operations take `Option<&Caller>` so the missing-identity case maps to
/// [`BillingError::Unauthenticated`] here instead of being every adapter's
/// problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
}

impl Caller {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Company role check, delegated to the surrounding product.
#[allow(async_fn_in_trait)]
pub trait CompanyAuthorizer: Send + Sync {
    /// Whether `user_id` administers `company_id`.
    async fn is_company_admin(&self, user_id: &str, company_id: &str) -> Result<bool>;
}

/// Response envelope for callable operations.
#[derive(Debug, Clone, Serialize)]
pub struct OpResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> OpResponse<T> {
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// UI payload for creating a company subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCompanySubscriptionRequest {
    pub company_id: String,
    /// Gateway payment method from the client-side tokenizer.
    pub payment_method_id: String,
    /// Start with the configured trial instead of billing now.
    #[serde(default)]
    pub start_trial: bool,
}

/// The callable-operation surface.
pub struct BillingOps<S, G, A>
where
    S: BillingStore + Clone,
    G: FullGatewayClient + Clone,
    A: CompanyAuthorizer,
{
    authorizer: A,
    subscriptions: SubscriptionManager<S, G>,
    invoices: InvoiceGenerator<S, G>,
    payments: PaymentProcessor<S, G>,
    payment_methods: PaymentMethodManager<S, G>,
    usage: UsageTracker<S>,
}

impl<S, G, A> BillingOps<S, G, A>
where
    S: BillingStore + Clone,
    G: FullGatewayClient + Clone,
    A: CompanyAuthorizer,
{
    /// Create the operation surface on the system clock.
    #[must_use]
    pub fn new(store: S, client: G, authorizer: A, config: BillingConfig) -> Self {
        Self::with_clock(store, client, authorizer, config, Arc::new(SystemClock))
    }

    /// Create the operation surface with an injected clock.
    #[must_use]
    pub fn with_clock(
        store: S,
        client: G,
        authorizer: A,
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
                client.clone(),
                config.clone(),
                Arc::clone(&clock),
            ),
            payments: PaymentProcessor::with_clock(
                store.clone(),
                client.clone(),
                config.clone(),
                Arc::clone(&clock),
            ),
            payment_methods: PaymentMethodManager::new(store.clone(), client),
            usage: UsageTracker::with_clock(store, config, clock),
            authorizer,
        }
    }

    /// Require a caller who administers the company.
    async fn authorize<'c>(
        &self,
        caller: Option<&'c Caller>,
        company_id: &str,
    ) -> Result<&'c Caller> {
        let caller = caller.ok_or_else(|| {
            BillingError::unauthenticated("operation requires a signed-in caller")
        })?;
        if !self
            .authorizer
            .is_company_admin(&caller.user_id, company_id)
            .await?
        {
            tracing::warn!(
                target: "seatwise::ops",
                user_id = %caller.user_id,
                company_id,
                "caller is not a company admin"
            );
            return Err(BillingError::permission_denied(format!(
                "user '{}' does not administer company '{company_id}'",
                caller.user_id
            )));
        }
        Ok(caller)
    }

    /// Resolve a company's subscription or fail with subscription-not-found.
    async fn require_subscription(&self, company_id: &str) -> Result<Subscription> {
        self.subscriptions
            .company_subscription(company_id)
            .await?
            .ok_or_else(|| BillingError::NoSubscription {
                company_id: company_id.to_string(),
            })
    }

    /// Create a subscription for a company, sized to its active users.
    pub async fn create_company_subscription(
        &self,
        caller: Option<&Caller>,
        request: CreateCompanySubscriptionRequest,
    ) -> Result<OpResponse<Subscription>> {
        let caller = self.authorize(caller, &request.company_id).await?;
        let subscription = self
            .subscriptions
            .create_subscription(CreateSubscriptionRequest {
                company_id: request.company_id,
                payment_method_id: request.payment_method_id,
                created_by: caller.user_id.clone(),
                start_trial: request.start_trial,
            })
            .await?;
        Ok(OpResponse::ok(subscription))
    }

    /// Cancel a company's subscription, immediately or at the period end.
    pub async fn cancel_company_subscription(
        &self,
        caller: Option<&Caller>,
        company_id: &str,
        immediate: bool,
    ) -> Result<OpResponse<Subscription>> {
        let caller = self.authorize(caller, company_id).await?;
        let subscription = self.require_subscription(company_id).await?;
        let updated = self
            .subscriptions
            .cancel_subscription(CancelSubscriptionRequest {
                subscription_id: subscription.id,
                immediate,
                canceled_by: caller.user_id.clone(),
            })
            .await?;
        Ok(OpResponse::ok(updated))
    }

    /// Reactivate a company's subscription.
    pub async fn reactivate_company_subscription(
        &self,
        caller: Option<&Caller>,
        company_id: &str,
    ) -> Result<OpResponse<Subscription>> {
        let caller = self.authorize(caller, company_id).await?;
        let subscription = self.require_subscription(company_id).await?;
        let updated = self
            .subscriptions
            .reactivate_subscription(ReactivateSubscriptionRequest {
                subscription_id: subscription.id,
                reactivated_by: caller.user_id.clone(),
            })
            .await?;
        Ok(OpResponse::ok(updated))
    }

    /// Get a company's subscription, `None` when it never subscribed.
    pub async fn get_company_subscription(
        &self,
        caller: Option<&Caller>,
        company_id: &str,
    ) -> Result<OpResponse<Option<Subscription>>> {
        self.authorize(caller, company_id).await?;
        let subscription = self.subscriptions.company_subscription(company_id).await?;
        Ok(OpResponse::ok(subscription))
    }

    /// List a company's invoices, newest first, optionally narrowed.
    pub async fn get_invoices(
        &self,
        caller: Option<&Caller>,
        company_id: &str,
        filter: InvoiceFilter,
    ) -> Result<OpResponse<Vec<Invoice>>> {
        self.authorize(caller, company_id).await?;
        let invoices = self.invoices.company_invoices(company_id, &filter).await?;
        Ok(OpResponse::ok(invoices))
    }

    /// Get one invoice.
    ///
    /// The role check runs against the invoice's owning company, so an admin
    /// of one company cannot read another's invoices by guessing ids.
    pub async fn get_invoice(
        &self,
        caller: Option<&Caller>,
        invoice_id: &str,
    ) -> Result<OpResponse<Invoice>> {
        if caller.is_none() {
            return Err(BillingError::unauthenticated(
                "operation requires a signed-in caller",
            ));
        }
        let invoice = self
            .invoices
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("invoice", invoice_id))?;
        self.authorize(caller, &invoice.company_id).await?;
        Ok(OpResponse::ok(invoice))
    }

    /// Attach a payment method and make it the company's default.
    pub async fn add_company_payment_method(
        &self,
        caller: Option<&Caller>,
        company_id: &str,
        payment_method_id: &str,
    ) -> Result<OpResponse<PaymentMethod>> {
        self.authorize(caller, company_id).await?;
        let method = self
            .payment_methods
            .attach(company_id, payment_method_id)
            .await?;
        self.payment_methods
            .set_default(company_id, payment_method_id)
            .await?;
        tracing::info!(
            target: "seatwise::ops",
            company_id,
            payment_method_id,
            "payment method added"
        );
        Ok(OpResponse::ok(method))
    }

    /// List a company's payment methods.
    pub async fn get_company_payment_methods(
        &self,
        caller: Option<&Caller>,
        company_id: &str,
    ) -> Result<OpResponse<PaymentMethodList>> {
        self.authorize(caller, company_id).await?;
        let methods = self.payment_methods.list_payment_methods(company_id).await?;
        Ok(OpResponse::ok(methods))
    }

    /// Detach a payment method from a company.
    pub async fn remove_company_payment_method(
        &self,
        caller: Option<&Caller>,
        company_id: &str,
        payment_method_id: &str,
    ) -> Result<OpResponse<()>> {
        self.authorize(caller, company_id).await?;
        self.payment_methods
            .remove(company_id, payment_method_id)
            .await?;
        tracing::info!(
            target: "seatwise::ops",
            company_id,
            payment_method_id,
            "payment method removed"
        );
        Ok(OpResponse::ok(()))
    }

    /// List a company's payment attempts, newest first.
    pub async fn get_company_payment_history(
        &self,
        caller: Option<&Caller>,
        company_id: &str,
    ) -> Result<OpResponse<Vec<Payment>>> {
        self.authorize(caller, company_id).await?;
        let payments = self.payments.payment_history(company_id).await?;
        Ok(OpResponse::ok(payments))
    }

    /// Summarize seats and pending proration for the current period.
    pub async fn get_usage_summary(
        &self,
        caller: Option<&Caller>,
        company_id: &str,
    ) -> Result<OpResponse<UsageSummary>> {
        self.authorize(caller, company_id).await?;
        let summary = self
            .usage
            .usage_summary(company_id)
            .await?
            .ok_or_else(|| BillingError::NoSubscription {
                company_id: company_id.to_string(),
            })?;
        Ok(OpResponse::ok(summary))
    }
}
