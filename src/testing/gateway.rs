//! A scriptable in-memory payment gateway.
//!
//! Implements every gateway client trait against shared in-process state, so
//! one [`MockGateway`] can stand behind the whole engine in tests. Cloning is
//! cheap and clones share state. Failures are scripted per operation name and
//! consumed on first use, which is what sweep error-isolation tests need:
//! one record trips, the rest of the batch keeps going.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::clock::period_from;
use crate::config::BillingInterval;
use crate::customer::{CreateCustomerRequest, GatewayCustomerClient, UpdateCustomerRequest};
use crate::error::{BillingError, Result};
use crate::invoice::{
    CreateGatewayInvoiceRequest, FinalizedGatewayInvoice, GatewayInvoiceClient, GatewayInvoiceLine,
};
use crate::payment::{GatewayPaymentIntent, GatewayPaymentIntentClient};
use crate::payment_methods::{GatewayPaymentMethodClient, PaymentMethod, PaymentMethodList};
use crate::pricing::{CreatePriceRequest, GatewayPriceClient};
use crate::subscription::{
    CreateGatewaySubscriptionRequest, GatewaySubscriptionClient, GatewaySubscriptionData,
    ProrationBehavior,
};

use super::fixtures::default_epoch;

struct MockCustomer {
    email: String,
    name: Option<String>,
}

struct MockInvoice {
    customer_id: String,
    currency: String,
    lines: Vec<GatewayInvoiceLine>,
    finalized: bool,
    voided: bool,
}

struct MockState {
    counter: AtomicU64,
    now: RwLock<DateTime<Utc>>,
    customers: RwLock<HashMap<String, MockCustomer>>,
    prices: RwLock<HashMap<String, String>>,
    payment_methods: RwLock<HashMap<String, Vec<PaymentMethod>>>,
    default_methods: RwLock<HashMap<String, String>>,
    subscriptions: RwLock<HashMap<String, GatewaySubscriptionData>>,
    invoices: RwLock<HashMap<String, MockInvoice>>,
    intents: RwLock<HashMap<String, GatewayPaymentIntent>>,
    confirmed: RwLock<Vec<String>>,
    fail_next: RwLock<HashSet<String>>,
    finalized_intent_status: RwLock<String>,
}

/// In-memory gateway double for tests.
#[derive(Clone)]
pub struct MockGateway {
    state: Arc<MockState>,
}

impl MockGateway {
    /// A mock gateway whose clock starts at [`default_epoch`].
    #[must_use]
    pub fn new() -> Self {
        Self::at(default_epoch())
    }

    /// A mock gateway with an explicit current time.
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(MockState {
                counter: AtomicU64::new(0),
                now: RwLock::new(now),
                customers: RwLock::new(HashMap::new()),
                prices: RwLock::new(HashMap::new()),
                payment_methods: RwLock::new(HashMap::new()),
                default_methods: RwLock::new(HashMap::new()),
                subscriptions: RwLock::new(HashMap::new()),
                invoices: RwLock::new(HashMap::new()),
                intents: RwLock::new(HashMap::new()),
                confirmed: RwLock::new(Vec::new()),
                fail_next: RwLock::new(HashSet::new()),
                finalized_intent_status: RwLock::new("processing".to_string()),
            }),
        }
    }

    /// Move the gateway's notion of now.
    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.state.now.write().unwrap() = now;
    }

    /// Script a one-shot failure for the named operation. The next call to
    /// that operation errors; later calls succeed again.
    pub fn fail_next(&self, operation: &str) {
        self.state
            .fail_next
            .write()
            .unwrap()
            .insert(operation.to_string());
    }

    /// Status newly opened payment intents get when an invoice is finalized.
    pub fn set_finalized_intent_status(&self, status: &str) {
        *self.state.finalized_intent_status.write().unwrap() = status.to_string();
    }

    /// Register a payment method for a customer without going through attach.
    pub fn seed_payment_method(&self, customer_id: &str, method: PaymentMethod) {
        self.state
            .payment_methods
            .write()
            .unwrap()
            .entry(customer_id.to_string())
            .or_default()
            .push(method);
    }

    /// Register a payment intent directly.
    pub fn seed_intent(&self, intent: GatewayPaymentIntent) {
        self.state
            .intents
            .write()
            .unwrap()
            .insert(intent.id.clone(), intent);
    }

    /// Register a subscription without going through create.
    pub fn seed_subscription(&self, data: GatewaySubscriptionData) {
        self.state
            .subscriptions
            .write()
            .unwrap()
            .insert(data.id.clone(), data);
    }

    /// Overwrite an intent's gateway status.
    pub fn set_intent_status(&self, intent_id: &str, status: &str) {
        if let Some(intent) = self.state.intents.write().unwrap().get_mut(intent_id) {
            intent.status = status.to_string();
        }
    }

    /// Snapshot of a gateway subscription.
    #[must_use]
    pub fn subscription(&self, subscription_id: &str) -> Option<GatewaySubscriptionData> {
        self.state
            .subscriptions
            .read()
            .unwrap()
            .get(subscription_id)
            .cloned()
    }

    /// Lines pushed onto a gateway invoice so far.
    #[must_use]
    pub fn invoice_lines(&self, gateway_invoice_id: &str) -> Vec<GatewayInvoiceLine> {
        self.state
            .invoices
            .read()
            .unwrap()
            .get(gateway_invoice_id)
            .map(|i| i.lines.clone())
            .unwrap_or_default()
    }

    /// Intent IDs confirmed so far, in order.
    #[must_use]
    pub fn confirmed_intents(&self) -> Vec<String> {
        self.state.confirmed.read().unwrap().clone()
    }

    #[must_use]
    pub fn customer_count(&self) -> usize {
        self.state.customers.read().unwrap().len()
    }

    /// Billing email on file for a gateway customer.
    #[must_use]
    pub fn customer_email(&self, customer_id: &str) -> Option<String> {
        self.state
            .customers
            .read()
            .unwrap()
            .get(customer_id)
            .map(|c| c.email.clone())
    }

    #[must_use]
    pub fn customer_name(&self, customer_id: &str) -> Option<String> {
        self.state
            .customers
            .read()
            .unwrap()
            .get(customer_id)
            .and_then(|c| c.name.clone())
    }

    /// Whether a gateway invoice has been voided.
    #[must_use]
    pub fn invoice_voided(&self, gateway_invoice_id: &str) -> bool {
        self.state
            .invoices
            .read()
            .unwrap()
            .get(gateway_invoice_id)
            .is_some_and(|i| i.voided)
    }

    #[must_use]
    pub fn price_count(&self) -> usize {
        self.state.prices.read().unwrap().len()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.state.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}_mock_{n}")
    }

    fn now(&self) -> DateTime<Utc> {
        *self.state.now.read().unwrap()
    }

    fn check_failure(&self, operation: &'static str) -> Result<()> {
        if self.state.fail_next.write().unwrap().remove(operation) {
            return Err(BillingError::gateway(operation, "scripted failure"));
        }
        Ok(())
    }

    fn default_method(&self, customer_id: &str) -> Option<PaymentMethod> {
        let default_id = self
            .state
            .default_methods
            .read()
            .unwrap()
            .get(customer_id)
            .cloned();
        let methods = self.state.payment_methods.read().unwrap();
        let customer_methods = methods.get(customer_id)?;
        match default_id {
            Some(id) => customer_methods.iter().find(|m| m.id == id).cloned(),
            None => customer_methods.first().cloned(),
        }
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayCustomerClient for MockGateway {
    async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String> {
        self.check_failure("create_customer")?;
        let id = self.next_id("cus");
        self.state.customers.write().unwrap().insert(
            id.clone(),
            MockCustomer {
                email: request.email,
                name: request.name,
            },
        );
        Ok(id)
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        request: UpdateCustomerRequest,
    ) -> Result<()> {
        self.check_failure("update_customer")?;
        let mut customers = self.state.customers.write().unwrap();
        let customer = customers
            .get_mut(customer_id)
            .ok_or_else(|| BillingError::gateway("update_customer", "no such customer"))?;
        if let Some(email) = request.email {
            customer.email = email;
        }
        if let Some(name) = request.name {
            customer.name = Some(name);
        }
        Ok(())
    }
}

impl GatewayPriceClient for MockGateway {
    async fn find_price_by_lookup_key(&self, lookup_key: &str) -> Result<Option<String>> {
        self.check_failure("find_price_by_lookup_key")?;
        Ok(self.state.prices.read().unwrap().get(lookup_key).cloned())
    }

    async fn create_price(&self, request: CreatePriceRequest) -> Result<String> {
        self.check_failure("create_price")?;
        let id = self.next_id("price");
        self.state
            .prices
            .write()
            .unwrap()
            .insert(request.lookup_key, id.clone());
        Ok(id)
    }
}

impl GatewayPaymentMethodClient for MockGateway {
    async fn list_payment_methods(
        &self,
        customer_id: &str,
        limit: u8,
    ) -> Result<PaymentMethodList> {
        self.check_failure("list_payment_methods")?;
        let default_id = self
            .state
            .default_methods
            .read()
            .unwrap()
            .get(customer_id)
            .cloned();
        let mut methods: Vec<PaymentMethod> = self
            .state
            .payment_methods
            .read()
            .unwrap()
            .get(customer_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|mut m| {
                m.is_default = default_id.as_deref() == Some(m.id.as_str());
                m
            })
            .collect();
        let has_more = methods.len() > usize::from(limit);
        methods.truncate(usize::from(limit));
        Ok(PaymentMethodList { methods, has_more })
    }

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<PaymentMethod> {
        self.check_failure("attach_payment_method")?;
        let method = PaymentMethod {
            id: payment_method_id.to_string(),
            card_brand: Some("visa".to_string()),
            card_last4: Some("4242".to_string()),
            card_exp_month: Some(12),
            card_exp_year: Some(2030),
            is_default: false,
        };
        self.seed_payment_method(customer_id, method.clone());
        Ok(method)
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<()> {
        self.check_failure("detach_payment_method")?;
        let mut methods = self.state.payment_methods.write().unwrap();
        for customer_methods in methods.values_mut() {
            customer_methods.retain(|m| m.id != payment_method_id);
        }
        Ok(())
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<()> {
        self.check_failure("set_default_payment_method")?;
        self.state
            .default_methods
            .write()
            .unwrap()
            .insert(customer_id.to_string(), payment_method_id.to_string());
        Ok(())
    }
}

impl GatewaySubscriptionClient for MockGateway {
    async fn create_subscription(
        &self,
        request: CreateGatewaySubscriptionRequest,
    ) -> Result<GatewaySubscriptionData> {
        self.check_failure("create_subscription")?;
        let now = self.now();
        let trial_end = request
            .trial_period_days
            .map(|days| now + Duration::days(i64::from(days)));
        // During a trial the gateway's first period runs to the trial end
        let (start, end) = match trial_end {
            Some(t) => (now, t),
            None => period_from(now, BillingInterval::Month),
        };
        let data = GatewaySubscriptionData {
            id: self.next_id("sub_gw"),
            customer_id: request.customer_id,
            status: if trial_end.is_some() { "trialing" } else { "active" }.to_string(),
            current_period_start: start,
            current_period_end: end,
            cancel_at_period_end: false,
            canceled_at: None,
            trial_end,
            quantity: request.quantity,
        };
        self.state
            .subscriptions
            .write()
            .unwrap()
            .insert(data.id.clone(), data.clone());
        Ok(data)
    }

    async fn set_seat_quantity(
        &self,
        subscription_id: &str,
        quantity: u32,
        _proration: ProrationBehavior,
    ) -> Result<GatewaySubscriptionData> {
        self.check_failure("set_seat_quantity")?;
        let mut subscriptions = self.state.subscriptions.write().unwrap();
        let sub = subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| BillingError::gateway("set_seat_quantity", "no such subscription"))?;
        sub.quantity = quantity;
        Ok(sub.clone())
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<GatewaySubscriptionData> {
        self.check_failure("cancel_subscription")?;
        let now = self.now();
        let mut subscriptions = self.state.subscriptions.write().unwrap();
        let sub = subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| BillingError::gateway("cancel_subscription", "no such subscription"))?;
        sub.status = "canceled".to_string();
        sub.canceled_at = Some(now);
        Ok(sub.clone())
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<GatewaySubscriptionData> {
        self.check_failure("cancel_at_period_end")?;
        let mut subscriptions = self.state.subscriptions.write().unwrap();
        let sub = subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| BillingError::gateway("cancel_at_period_end", "no such subscription"))?;
        sub.cancel_at_period_end = true;
        Ok(sub.clone())
    }

    async fn resume_subscription(&self, subscription_id: &str) -> Result<GatewaySubscriptionData> {
        self.check_failure("resume_subscription")?;
        let mut subscriptions = self.state.subscriptions.write().unwrap();
        let sub = subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| BillingError::gateway("resume_subscription", "no such subscription"))?;
        sub.cancel_at_period_end = false;
        Ok(sub.clone())
    }
}

impl GatewayInvoiceClient for MockGateway {
    async fn create_invoice(&self, request: CreateGatewayInvoiceRequest) -> Result<String> {
        self.check_failure("create_invoice")?;
        let id = self.next_id("in");
        self.state.invoices.write().unwrap().insert(
            id.clone(),
            MockInvoice {
                customer_id: request.customer_id,
                currency: request.currency,
                lines: Vec::new(),
                finalized: false,
                voided: false,
            },
        );
        Ok(id)
    }

    async fn add_invoice_line(
        &self,
        gateway_invoice_id: &str,
        line: GatewayInvoiceLine,
    ) -> Result<()> {
        self.check_failure("add_invoice_line")?;
        let mut invoices = self.state.invoices.write().unwrap();
        let invoice = invoices
            .get_mut(gateway_invoice_id)
            .ok_or_else(|| BillingError::gateway("add_invoice_line", "no such invoice"))?;
        if invoice.finalized {
            return Err(BillingError::gateway(
                "add_invoice_line",
                "invoice is finalized",
            ));
        }
        invoice.lines.push(line);
        Ok(())
    }

    async fn finalize_invoice(
        &self,
        gateway_invoice_id: &str,
    ) -> Result<FinalizedGatewayInvoice> {
        self.check_failure("finalize_invoice")?;
        let (amount_cents, currency, customer_id) = {
            let mut invoices = self.state.invoices.write().unwrap();
            let invoice = invoices
                .get_mut(gateway_invoice_id)
                .ok_or_else(|| BillingError::gateway("finalize_invoice", "no such invoice"))?;
            invoice.finalized = true;
            (
                invoice.lines.iter().map(|l| l.amount_cents).sum::<i64>(),
                invoice.currency.clone(),
                invoice.customer_id.clone(),
            )
        };

        // Finalizing opens the intent that will collect the invoice
        let intent_id = format!("pi_{gateway_invoice_id}");
        let intent = GatewayPaymentIntent {
            id: intent_id.clone(),
            status: self.state.finalized_intent_status.read().unwrap().clone(),
            amount_cents,
            currency,
            payment_method: self.default_method(&customer_id),
        };
        self.seed_intent(intent);

        Ok(FinalizedGatewayInvoice {
            id: gateway_invoice_id.to_string(),
            status: "open".to_string(),
            pdf_url: Some(format!(
                "https://mock.gateway/invoices/{gateway_invoice_id}.pdf"
            )),
            payment_intent_ref: Some(intent_id),
        })
    }

    async fn void_invoice(&self, gateway_invoice_id: &str) -> Result<()> {
        self.check_failure("void_invoice")?;
        let mut invoices = self.state.invoices.write().unwrap();
        let invoice = invoices
            .get_mut(gateway_invoice_id)
            .ok_or_else(|| BillingError::gateway("void_invoice", "no such invoice"))?;
        invoice.voided = true;
        Ok(())
    }
}

impl GatewayPaymentIntentClient for MockGateway {
    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<GatewayPaymentIntent> {
        self.check_failure("retrieve_payment_intent")?;
        self.state
            .intents
            .read()
            .unwrap()
            .get(intent_id)
            .cloned()
            .ok_or_else(|| BillingError::gateway("retrieve_payment_intent", "no such intent"))
    }

    async fn confirm_payment_intent(&self, intent_id: &str) -> Result<GatewayPaymentIntent> {
        self.check_failure("confirm_payment_intent")?;
        self.state
            .confirmed
            .write()
            .unwrap()
            .push(intent_id.to_string());
        let mut intents = self.state.intents.write().unwrap();
        let intent = intents
            .get_mut(intent_id)
            .ok_or_else(|| BillingError::gateway("confirm_payment_intent", "no such intent"))?;
        intent.status = "processing".to_string();
        Ok(intent.clone())
    }
}
