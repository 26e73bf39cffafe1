//! Customer management for the payment gateway.
//!
//! Handles creating gateway customers and linking them to companies.

use crate::error::{BillingError, Result};
use crate::store::BillingStore;

/// Customer management operations.
///
/// Companies are lazily linked to gateway customers: the link is created
/// the first time billing needs one and reused afterwards.
pub struct CustomerManager<S: BillingStore, C: GatewayCustomerClient> {
    store: S,
    client: C,
}

impl<S: BillingStore, C: GatewayCustomerClient> CustomerManager<S, C> {
    /// Create a new customer manager.
    #[must_use]
    pub fn new(store: S, client: C) -> Self {
        Self { store, client }
    }

    /// Get the gateway customer ID for a company, creating one if needed.
    ///
    /// This is the primary method for getting a customer ID. It will:
    /// 1. Check if the company already has a linked gateway customer
    /// 2. If not, create a new customer at the gateway
    /// 3. Persist the link on the company record
    pub async fn get_or_create_customer(&self, company_id: &str) -> Result<String> {
        let mut company = self
            .store
            .get_company(company_id)
            .await?
            .ok_or_else(|| BillingError::not_found("company", company_id))?;

        // Check if already linked
        if let Some(customer_id) = company.gateway_customer_id {
            return Ok(customer_id);
        }

        // Create new customer at the gateway
        let customer_id = self
            .client
            .create_customer(CreateCustomerRequest {
                email: company.email.clone(),
                name: Some(company.name.clone()),
                metadata: Some(CustomerMetadata {
                    company_id: company.id.clone(),
                }),
            })
            .await?;

        // Link to company
        company.gateway_customer_id = Some(customer_id.clone());
        self.store.save_company(&company).await?;

        Ok(customer_id)
    }

    /// Get the gateway customer ID for a company (without creating).
    pub async fn get_customer_id(&self, company_id: &str) -> Result<Option<String>> {
        let company = self
            .store
            .get_company(company_id)
            .await?
            .ok_or_else(|| BillingError::not_found("company", company_id))?;
        Ok(company.gateway_customer_id)
    }

    /// Link an existing gateway customer to a company.
    ///
    /// Use this when the customer already exists at the gateway (e.g.
    /// migrating from another system).
    pub async fn link_customer(&self, company_id: &str, gateway_customer_id: &str) -> Result<()> {
        let mut company = self
            .store
            .get_company(company_id)
            .await?
            .ok_or_else(|| BillingError::not_found("company", company_id))?;

        company.gateway_customer_id = Some(gateway_customer_id.to_string());
        self.store.save_company(&company).await
    }

    /// Update customer details at the gateway.
    pub async fn update_customer(
        &self,
        company_id: &str,
        update: UpdateCustomerRequest,
    ) -> Result<()> {
        let customer_id = self
            .get_customer_id(company_id)
            .await?
            .ok_or_else(|| BillingError::not_found("gateway customer", company_id))?;

        self.client.update_customer(&customer_id, update).await
    }
}

/// Request to create a gateway customer.
#[derive(Debug, Clone)]
pub struct CreateCustomerRequest {
    /// Customer email address.
    pub email: String,
    /// Customer name.
    pub name: Option<String>,
    /// Metadata to attach to the customer.
    pub metadata: Option<CustomerMetadata>,
}

/// Metadata attached to gateway customers.
#[derive(Debug, Clone)]
pub struct CustomerMetadata {
    /// The company this customer bills for.
    pub company_id: String,
}

/// Request to update a gateway customer.
#[derive(Debug, Clone, Default)]
pub struct UpdateCustomerRequest {
    /// New email address.
    pub email: Option<String>,
    /// New name.
    pub name: Option<String>,
}

/// Gateway customer operations.
///
/// This abstraction allows testing without real gateway calls and supports
/// different gateway client implementations.
#[allow(async_fn_in_trait)]
pub trait GatewayCustomerClient: Send + Sync {
    /// Create a new customer at the gateway, returning its ID.
    async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String>;

    /// Update an existing gateway customer.
    async fn update_customer(&self, customer_id: &str, request: UpdateCustomerRequest)
    -> Result<()>;
}
