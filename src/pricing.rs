//! Per-seat rate resolution and gateway price objects.
//!
//! The seat rate comes from the default active pricing tier when one exists,
//! falling back to the configured constants. Gateway prices are deduplicated
//! by lookup key so repeated subscription creation reuses the same price.

use crate::config::{BillingConfig, BillingInterval};
use crate::error::Result;
use crate::store::BillingStore;

/// The per-seat rate a subscription is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatRate {
    /// Price per seat in minor units.
    pub price_per_user_cents: i64,
    /// Lowercase ISO currency code.
    pub currency: String,
    /// Pricing tier the rate came from, if any.
    pub tier_id: Option<String>,
}

/// Resolves seat rates and ensures matching gateway price objects exist.
pub struct PriceResolver<S: BillingStore, G: GatewayPriceClient> {
    store: S,
    client: G,
    config: BillingConfig,
}

impl<S: BillingStore, G: GatewayPriceClient> PriceResolver<S, G> {
    /// Create a new price resolver.
    #[must_use]
    pub fn new(store: S, client: G, config: BillingConfig) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    /// Resolve the current per-seat rate.
    ///
    /// The default active pricing tier wins; without one the configured
    /// constants apply.
    pub async fn seat_rate(&self) -> Result<SeatRate> {
        if let Some(tier) = self.store.default_pricing_tier().await? {
            return Ok(SeatRate {
                price_per_user_cents: tier.price_per_user_cents,
                currency: tier.currency,
                tier_id: Some(tier.id),
            });
        }

        Ok(SeatRate {
            price_per_user_cents: self.config.price_per_user_cents,
            currency: self.config.currency.clone(),
            tier_id: None,
        })
    }

    /// Get the gateway price ID for a seat rate, creating the price if needed.
    ///
    /// Prices are found by lookup key first so the gateway never accumulates
    /// duplicates for the same rate.
    pub async fn ensure_gateway_price(
        &self,
        rate: &SeatRate,
        interval: BillingInterval,
    ) -> Result<String> {
        let lookup_key = seat_price_lookup_key(rate, interval);

        if let Some(price_id) = self.client.find_price_by_lookup_key(&lookup_key).await? {
            return Ok(price_id);
        }

        self.client
            .create_price(CreatePriceRequest {
                lookup_key,
                unit_amount_cents: rate.price_per_user_cents,
                currency: rate.currency.clone(),
                interval,
                product_name: "Per-seat subscription".to_string(),
            })
            .await
    }
}

/// Deterministic lookup key for a seat price at the gateway.
#[must_use]
pub fn seat_price_lookup_key(rate: &SeatRate, interval: BillingInterval) -> String {
    format!(
        "seat-{}-{}-{}",
        rate.currency,
        rate.price_per_user_cents,
        interval.as_str()
    )
}

/// Request to create a recurring per-seat price at the gateway.
#[derive(Debug, Clone)]
pub struct CreatePriceRequest {
    /// Stable key the price can be found by later.
    pub lookup_key: String,
    /// Price per seat in minor units.
    pub unit_amount_cents: i64,
    /// Lowercase ISO currency code.
    pub currency: String,
    /// Recurring billing interval.
    pub interval: BillingInterval,
    /// Product name shown on gateway invoices.
    pub product_name: String,
}

/// Gateway price operations.
#[allow(async_fn_in_trait)]
pub trait GatewayPriceClient: Send + Sync {
    /// Find an existing price by lookup key.
    async fn find_price_by_lookup_key(&self, lookup_key: &str) -> Result<Option<String>>;

    /// Create a new recurring price, returning its ID.
    async fn create_price(&self, request: CreatePriceRequest) -> Result<String>;
}
