//! Payment method management at the gateway.
//!
//! Handles listing, attaching, detaching, and setting default payment methods
//! for a company's gateway customer.

use crate::error::{BillingError, Result};
use crate::store::{BillingStore, PaymentMethodSummary};

/// A payment method attached to a gateway customer.
#[derive(Debug, Clone)]
pub struct PaymentMethod {
    /// Gateway payment method ID.
    pub id: String,
    /// Card brand (visa, mastercard, amex, etc.).
    pub card_brand: Option<String>,
    /// Last 4 digits of the card.
    pub card_last4: Option<String>,
    /// Card expiration month (1-12).
    pub card_exp_month: Option<u32>,
    /// Card expiration year (e.g., 2026).
    pub card_exp_year: Option<u32>,
    /// Whether this is the default payment method.
    pub is_default: bool,
}

impl PaymentMethod {
    /// The redacted summary persisted on payment records.
    #[must_use]
    pub fn summary(&self) -> PaymentMethodSummary {
        PaymentMethodSummary {
            brand: self.card_brand.clone(),
            last4: self.card_last4.clone(),
            exp_month: self.card_exp_month,
            exp_year: self.card_exp_year,
        }
    }
}

/// List of payment methods with pagination.
#[derive(Debug, Clone)]
pub struct PaymentMethodList {
    /// The payment methods.
    pub methods: Vec<PaymentMethod>,
    /// Whether there are more payment methods available.
    pub has_more: bool,
}

/// Gateway payment method operations.
#[allow(async_fn_in_trait)]
pub trait GatewayPaymentMethodClient: Send + Sync {
    /// List payment methods for a customer.
    async fn list_payment_methods(&self, customer_id: &str, limit: u8)
    -> Result<PaymentMethodList>;

    /// Attach a payment method to a customer.
    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<PaymentMethod>;

    /// Detach a payment method from a customer.
    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<()>;

    /// Set the default payment method for a customer.
    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<()>;
}

/// Default limit for listing payment methods.
const DEFAULT_PAYMENT_METHOD_LIMIT: u8 = 100;

/// Payment method management operations for a company.
pub struct PaymentMethodManager<S: BillingStore, C: GatewayPaymentMethodClient> {
    store: S,
    client: C,
    /// Maximum number of payment methods to return in list operations.
    list_limit: u8,
}

impl<S: BillingStore, C: GatewayPaymentMethodClient> PaymentMethodManager<S, C> {
    /// Create a new payment method manager with default settings.
    #[must_use]
    pub fn new(store: S, client: C) -> Self {
        Self {
            store,
            client,
            list_limit: DEFAULT_PAYMENT_METHOD_LIMIT,
        }
    }

    /// Create a new payment method manager with a custom list limit (1-100).
    #[must_use]
    pub fn with_limit(store: S, client: C, list_limit: u8) -> Self {
        Self {
            store,
            client,
            list_limit: list_limit.clamp(1, 100),
        }
    }

    async fn customer_id(&self, company_id: &str) -> Result<String> {
        let company = self
            .store
            .get_company(company_id)
            .await?
            .ok_or_else(|| BillingError::not_found("company", company_id))?;
        company
            .gateway_customer_id
            .ok_or_else(|| BillingError::not_found("gateway customer", company_id))
    }

    /// List payment methods attached to a company's customer.
    pub async fn list_payment_methods(&self, company_id: &str) -> Result<PaymentMethodList> {
        let customer_id = self.customer_id(company_id).await?;
        self.client
            .list_payment_methods(&customer_id, self.list_limit)
            .await
    }

    /// Attach a new payment method to a company's customer.
    ///
    /// The payment method ID comes from the gateway's client-side tokenizer.
    pub async fn attach(&self, company_id: &str, payment_method_id: &str) -> Result<PaymentMethod> {
        let customer_id = self.customer_id(company_id).await?;
        self.client
            .attach_payment_method(payment_method_id, &customer_id)
            .await
    }

    /// Set the default payment method for a company.
    ///
    /// Verifies the payment method belongs to the company's customer first,
    /// so one company cannot point at another's card.
    pub async fn set_default(&self, company_id: &str, payment_method_id: &str) -> Result<()> {
        let customer_id = self.customer_id(company_id).await?;

        let methods = self
            .client
            .list_payment_methods(&customer_id, self.list_limit)
            .await?;
        if !methods.methods.iter().any(|m| m.id == payment_method_id) {
            return Err(BillingError::not_found("payment method", payment_method_id));
        }

        self.client
            .set_default_payment_method(&customer_id, payment_method_id)
            .await
    }

    /// Remove a payment method from a company's customer.
    ///
    /// Ownership is verified before detaching, same as [`Self::set_default`].
    pub async fn remove(&self, company_id: &str, payment_method_id: &str) -> Result<()> {
        let customer_id = self.customer_id(company_id).await?;

        let methods = self
            .client
            .list_payment_methods(&customer_id, self.list_limit)
            .await?;
        if !methods.methods.iter().any(|m| m.id == payment_method_id) {
            return Err(BillingError::not_found("payment method", payment_method_id));
        }

        self.client.detach_payment_method(payment_method_id).await
    }

    /// Get the default payment method for a company, if any.
    pub async fn get_default(&self, company_id: &str) -> Result<Option<PaymentMethod>> {
        let methods = self.list_payment_methods(company_id).await?;
        Ok(methods.methods.into_iter().find(|m| m.is_default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryBillingStore;
    use crate::store::{AccountStatus, Company};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::RwLock;

    #[derive(Default)]
    struct StubPaymentMethodClient {
        methods: RwLock<HashMap<String, Vec<PaymentMethod>>>,
        defaults: RwLock<HashMap<String, String>>,
    }

    impl StubPaymentMethodClient {
        fn seed(&self, customer_id: &str, method: PaymentMethod) {
            self.methods
                .write()
                .unwrap()
                .entry(customer_id.to_string())
                .or_default()
                .push(method);
        }
    }

    impl GatewayPaymentMethodClient for StubPaymentMethodClient {
        async fn list_payment_methods(
            &self,
            customer_id: &str,
            _limit: u8,
        ) -> Result<PaymentMethodList> {
            let methods = self.methods.read().unwrap();
            let defaults = self.defaults.read().unwrap();
            let default_id = defaults.get(customer_id);

            let customer_methods = methods
                .get(customer_id)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|mut m| {
                    m.is_default = default_id.is_some_and(|d| d == &m.id);
                    m
                })
                .collect();

            Ok(PaymentMethodList {
                methods: customer_methods,
                has_more: false,
            })
        }

        async fn attach_payment_method(
            &self,
            payment_method_id: &str,
            customer_id: &str,
        ) -> Result<PaymentMethod> {
            let method = card(payment_method_id);
            self.seed(customer_id, method.clone());
            Ok(method)
        }

        async fn detach_payment_method(&self, payment_method_id: &str) -> Result<()> {
            let mut methods = self.methods.write().unwrap();
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
            self.defaults
                .write()
                .unwrap()
                .insert(customer_id.to_string(), payment_method_id.to_string());
            Ok(())
        }
    }

    fn card(id: &str) -> PaymentMethod {
        PaymentMethod {
            id: id.to_string(),
            card_brand: Some("visa".to_string()),
            card_last4: Some("4242".to_string()),
            card_exp_month: Some(12),
            card_exp_year: Some(2030),
            is_default: false,
        }
    }

    async fn store_with_customer() -> InMemoryBillingStore {
        let store = InMemoryBillingStore::new();
        store
            .add_company(Company {
                id: "co_1".to_string(),
                name: "Test Co".to_string(),
                email: "billing@test.co".to_string(),
                gateway_customer_id: Some("cus_1".to_string()),
                account_status: AccountStatus::Active,
                suspension_reason: None,
                billing_status: None,
                trial_ends_at: None,
                created_at: Utc::now(),
            })
            .await;
        store
    }

    #[tokio::test]
    async fn list_resolves_company_customer() {
        let store = store_with_customer().await;
        let client = StubPaymentMethodClient::default();
        client.seed("cus_1", card("pm_1"));
        client.seed("cus_1", card("pm_2"));
        let manager = PaymentMethodManager::new(store, client);

        let list = manager.list_payment_methods("co_1").await.unwrap();
        assert_eq!(list.methods.len(), 2);
        assert!(!list.has_more);
    }

    #[tokio::test]
    async fn set_default_then_get_default() {
        let store = store_with_customer().await;
        let client = StubPaymentMethodClient::default();
        client.seed("cus_1", card("pm_1"));
        let manager = PaymentMethodManager::new(store, client);

        manager.set_default("co_1", "pm_1").await.unwrap();

        let default = manager.get_default("co_1").await.unwrap();
        assert_eq!(default.map(|m| m.id), Some("pm_1".to_string()));
    }

    #[tokio::test]
    async fn set_default_rejects_foreign_method() {
        let store = store_with_customer().await;
        let manager = PaymentMethodManager::new(store, StubPaymentMethodClient::default());

        let err = manager.set_default("co_1", "pm_other").await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound { .. }));
    }

    #[tokio::test]
    async fn attach_then_remove() {
        let store = store_with_customer().await;
        let manager = PaymentMethodManager::new(store, StubPaymentMethodClient::default());

        let attached = manager.attach("co_1", "pm_new").await.unwrap();
        assert_eq!(attached.id, "pm_new");
        assert_eq!(
            manager.list_payment_methods("co_1").await.unwrap().methods.len(),
            1
        );

        manager.remove("co_1", "pm_new").await.unwrap();
        assert!(
            manager
                .list_payment_methods("co_1")
                .await
                .unwrap()
                .methods
                .is_empty()
        );
    }

    #[tokio::test]
    async fn unlinked_company_fails() {
        let store = InMemoryBillingStore::new();
        store
            .add_company(Company {
                id: "co_nolink".to_string(),
                name: "No Link".to_string(),
                email: "n@l.co".to_string(),
                gateway_customer_id: None,
                account_status: AccountStatus::Active,
                suspension_reason: None,
                billing_status: None,
                trial_ends_at: None,
                created_at: Utc::now(),
            })
            .await;
        let manager = PaymentMethodManager::new(store, StubPaymentMethodClient::default());

        let result = manager.list_payment_methods("co_nolink").await;
        assert!(matches!(result, Err(BillingError::NotFound { .. })));
    }

    #[test]
    fn summary_redacts_to_card_facts() {
        let summary = card("pm_1").summary();
        assert_eq!(summary.brand, Some("visa".to_string()));
        assert_eq!(summary.last4, Some("4242".to_string()));
        assert_eq!(summary.exp_month, Some(12));
        assert_eq!(summary.exp_year, Some(2030));
    }
}
