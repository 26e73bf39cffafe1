//! Gateway client composition.
//!
//! Each manager takes the narrowest client trait it needs; the bounds here
//! exist for the callers that hold one concrete client for everything. A
//! gateway SDK wrapper implements the six per-concern traits and picks up
//! these umbrella traits through the blanket impls.

pub use crate::customer::GatewayCustomerClient;
pub use crate::invoice::GatewayInvoiceClient;
pub use crate::payment::GatewayPaymentIntentClient;
pub use crate::payment_methods::GatewayPaymentMethodClient;
pub use crate::pricing::GatewayPriceClient;
pub use crate::subscription::GatewaySubscriptionClient;

/// What subscription provisioning needs from the gateway: customers, prices,
/// payment methods and subscriptions.
pub trait ProvisioningClient:
    GatewayCustomerClient
    + GatewayPriceClient
    + GatewayPaymentMethodClient
    + GatewaySubscriptionClient
{
}

impl<T> ProvisioningClient for T where
    T: GatewayCustomerClient
        + GatewayPriceClient
        + GatewayPaymentMethodClient
        + GatewaySubscriptionClient
{
}

/// The whole gateway surface, adding invoices and payment intents on top of
/// provisioning. Webhook ingestion and the sweeps hold one of these.
pub trait FullGatewayClient:
    ProvisioningClient + GatewayInvoiceClient + GatewayPaymentIntentClient
{
}

impl<T> FullGatewayClient for T where
    T: ProvisioningClient + GatewayInvoiceClient + GatewayPaymentIntentClient
{
}
