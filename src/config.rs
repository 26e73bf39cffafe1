//! Billing engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{BillingError, Result};
use crate::retry::RetryPolicy;

/// Get environment variable with SEATWISE_ prefix, falling back to unprefixed version
///
/// This helper function checks for `SEATWISE_{key}` first, then falls back to `{key}`
/// for compatibility with standard environment variable naming.
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("SEATWISE_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Billing cycle length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Month,
    Year,
}

impl Default for BillingInterval {
    fn default() -> Self {
        Self::Month
    }
}

impl BillingInterval {
    /// Length of one cycle in calendar months.
    #[must_use]
    pub fn months(&self) -> u32 {
        match self {
            Self::Month => 1,
            Self::Year => 12,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

/// Currency codes accepted by `BillingConfig::validate`.
const VALID_CURRENCIES: &[&str] = &[
    "usd", "eur", "gbp", "cad", "aud", "jpy", "chf", "sek", "nok", "dkk",
];

/// Configuration for the billing engine.
///
/// All monetary amounts are integer cents.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BillingConfig {
    /// Price per active user per billing cycle, in cents
    #[serde(default = "default_price_per_user_cents")]
    pub price_per_user_cents: i64,

    /// ISO 4217 currency code, lowercase
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Billing cycle length
    #[serde(default)]
    pub billing_interval: BillingInterval,

    /// Days a past-due subscription keeps service before suspension
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: u32,

    /// Total payment attempts before the grace period starts
    #[serde(default = "default_max_payment_retries")]
    pub max_payment_retries: u32,

    /// Trial length for new subscriptions, in days
    #[serde(default = "default_trial_period_days")]
    pub trial_period_days: u32,

    /// Days between invoice creation and its due date
    #[serde(default = "default_invoice_due_days")]
    pub invoice_due_days: u32,

    /// Hours between payment attempts
    #[serde(default = "default_payment_retry_delay_hours")]
    pub payment_retry_delay_hours: u32,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            price_per_user_cents: default_price_per_user_cents(),
            currency: default_currency(),
            billing_interval: BillingInterval::default(),
            grace_period_days: default_grace_period_days(),
            max_payment_retries: default_max_payment_retries(),
            trial_period_days: default_trial_period_days(),
            invoice_due_days: default_invoice_due_days(),
            payment_retry_delay_hours: default_payment_retry_delay_hours(),
        }
    }
}

impl BillingConfig {
    /// Load billing configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(price) = get_env_with_prefix("BILLING_PRICE_PER_USER_CENTS") {
            if let Ok(p) = price.parse() {
                config.price_per_user_cents = p;
            }
        }

        if let Some(currency) = get_env_with_prefix("BILLING_CURRENCY") {
            config.currency = currency.to_lowercase();
        }

        if let Some(interval) = get_env_with_prefix("BILLING_INTERVAL") {
            config.billing_interval = match interval.to_lowercase().as_str() {
                "year" => BillingInterval::Year,
                _ => BillingInterval::Month,
            };
        }

        if let Some(days) = get_env_with_prefix("BILLING_GRACE_PERIOD_DAYS") {
            if let Ok(d) = days.parse() {
                config.grace_period_days = d;
            }
        }

        if let Some(retries) = get_env_with_prefix("BILLING_MAX_PAYMENT_RETRIES") {
            if let Ok(r) = retries.parse() {
                config.max_payment_retries = r;
            }
        }

        if let Some(days) = get_env_with_prefix("BILLING_TRIAL_PERIOD_DAYS") {
            if let Ok(d) = days.parse() {
                config.trial_period_days = d;
            }
        }

        if let Some(days) = get_env_with_prefix("BILLING_INVOICE_DUE_DAYS") {
            if let Ok(d) = days.parse() {
                config.invoice_due_days = d;
            }
        }

        if let Some(hours) = get_env_with_prefix("BILLING_PAYMENT_RETRY_DELAY_HOURS") {
            if let Ok(h) = hours.parse() {
                config.payment_retry_delay_hours = h;
            }
        }

        config
    }

    /// Check the configuration for values the engine cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidArgument` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.price_per_user_cents < 0 {
            return Err(BillingError::invalid_argument(
                "price_per_user_cents cannot be negative",
            ));
        }

        if !VALID_CURRENCIES.contains(&self.currency.as_str()) {
            return Err(BillingError::invalid_argument(format!(
                "unsupported currency '{}'",
                self.currency
            )));
        }

        if self.max_payment_retries == 0 {
            return Err(BillingError::invalid_argument(
                "max_payment_retries must be at least 1",
            ));
        }

        if self.grace_period_days == 0 {
            return Err(BillingError::invalid_argument(
                "grace_period_days must be at least 1",
            ));
        }

        Ok(())
    }

    /// Retry schedule for failed payments: fixed interval, bounded attempts.
    #[must_use]
    pub fn payment_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.max_payment_retries,
            Duration::from_secs(u64::from(self.payment_retry_delay_hours) * 3600),
        )
    }
}

fn default_price_per_user_cents() -> i64 {
    100
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_grace_period_days() -> u32 {
    7
}

fn default_max_payment_retries() -> u32 {
    3
}

fn default_trial_period_days() -> u32 {
    14
}

fn default_invoice_due_days() -> u32 {
    7
}

fn default_payment_retry_delay_hours() -> u32 {
    24
}
