//! In-memory billing store.
//!
//! This implementation keeps all collections in process memory and is
//! suitable for development, testing, and single-instance deployments.
//! `compare_and_save_subscription` is atomic here: the version check and the
//! insert happen under one write lock.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::history::BillingHistoryEntry;
use crate::store::{
    BillingStore, Company, CompanyUser, Invoice, Payment, PaymentStatus, PricingTier,
    Subscription, UsageRecord,
};

/// In-memory [`BillingStore`] backend.
///
/// Wraps its collections in `Arc` so clones share state; handing a clone to
/// each manager is the intended wiring.
#[derive(Default, Clone)]
pub struct InMemoryBillingStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    companies: RwLock<HashMap<String, Company>>,
    users: RwLock<HashMap<String, CompanyUser>>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    invoices: RwLock<HashMap<String, Invoice>>,
    payments: RwLock<HashMap<String, Payment>>,
    usage_records: RwLock<Vec<UsageRecord>>,
    history: RwLock<Vec<BillingHistoryEntry>>,
    pricing_tiers: RwLock<HashMap<String, PricingTier>>,
    processed_events: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryBillingStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a company directly, for seeding.
    pub async fn add_company(&self, company: Company) {
        self.inner
            .companies
            .write()
            .await
            .insert(company.id.clone(), company);
    }

    /// Insert a user directly, for seeding.
    pub async fn add_user(&self, user: CompanyUser) {
        self.inner.users.write().await.insert(user.id.clone(), user);
    }

    /// Flip a user's seat flag off, for seeding removal scenarios.
    pub async fn deactivate_user(&self, user_id: &str, at: DateTime<Utc>) {
        let mut users = self.inner.users.write().await;
        if let Some(user) = users.get_mut(user_id) {
            user.active = false;
            user.removed_at = Some(at);
        }
    }

    /// All subscriptions, for assertions.
    pub async fn all_subscriptions(&self) -> Vec<Subscription> {
        self.inner.subscriptions.read().await.values().cloned().collect()
    }

    /// All usage records, for assertions.
    pub async fn all_usage_records(&self) -> Vec<UsageRecord> {
        self.inner.usage_records.read().await.clone()
    }

    /// Processed event ids, for assertions.
    pub async fn processed_events(&self) -> Vec<String> {
        self.inner
            .processed_events
            .read()
            .await
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn get_company(&self, company_id: &str) -> Result<Option<Company>> {
        Ok(self.inner.companies.read().await.get(company_id).cloned())
    }

    async fn save_company(&self, company: &Company) -> Result<()> {
        self.inner
            .companies
            .write()
            .await
            .insert(company.id.clone(), company.clone());
        Ok(())
    }

    async fn count_active_users(&self, company_id: &str) -> Result<u32> {
        let users = self.inner.users.read().await;
        let count = users
            .values()
            .filter(|u| u.company_id == company_id && u.active)
            .count();
        Ok(count as u32)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<CompanyUser>> {
        Ok(self.inner.users.read().await.get(user_id).cloned())
    }

    async fn save_user(&self, user: &CompanyUser) -> Result<()> {
        self.inner
            .users
            .write()
            .await
            .insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_subscription(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        Ok(self
            .inner
            .subscriptions
            .read()
            .await
            .get(subscription_id)
            .cloned())
    }

    async fn subscription_for_company(&self, company_id: &str) -> Result<Option<Subscription>> {
        let subs = self.inner.subscriptions.read().await;
        let mut candidates: Vec<&Subscription> = subs
            .values()
            .filter(|s| s.company_id == company_id)
            .collect();
        candidates.sort_by_key(|s| s.created_at);

        let live = candidates
            .iter()
            .rev()
            .find(|s| !s.status.is_terminal())
            .copied();
        Ok(live.or_else(|| candidates.last().copied()).cloned())
    }

    async fn get_subscription_by_gateway_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        let subs = self.inner.subscriptions.read().await;
        Ok(subs
            .values()
            .find(|s| s.gateway_subscription_id == gateway_subscription_id)
            .cloned())
    }

    async fn save_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.inner
            .subscriptions
            .write()
            .await
            .insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn compare_and_save_subscription(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<bool> {
        let mut subs = self.inner.subscriptions.write().await;

        // Version check and insert under one lock
        if let Some(current) = subs.get(&subscription.id) {
            if current.version != expected_version {
                return Ok(false);
            }
        }
        subs.insert(subscription.id.clone(), subscription.clone());
        Ok(true)
    }

    async fn subscriptions_due_for_billing(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>> {
        let subs = self.inner.subscriptions.read().await;
        Ok(subs
            .values()
            .filter(|s| s.is_active() && s.next_payment_date <= now)
            .cloned()
            .collect())
    }

    async fn subscriptions_with_expired_grace(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>> {
        let subs = self.inner.subscriptions.read().await;
        Ok(subs
            .values()
            .filter(|s| s.is_past_due() && s.grace_period_ends_at.is_some_and(|end| end <= now))
            .cloned()
            .collect())
    }

    async fn subscriptions_in_trial_ending_by(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Subscription>> {
        let subs = self.inner.subscriptions.read().await;
        Ok(subs
            .values()
            .filter(|s| s.is_trialing() && s.trial_ends_at.is_some_and(|end| end <= cutoff))
            .cloned()
            .collect())
    }

    async fn active_subscriptions(&self) -> Result<Vec<Subscription>> {
        let subs = self.inner.subscriptions.read().await;
        Ok(subs.values().filter(|s| s.is_active()).cloned().collect())
    }

    async fn get_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>> {
        Ok(self.inner.invoices.read().await.get(invoice_id).cloned())
    }

    async fn get_invoice_by_gateway_id(
        &self,
        gateway_invoice_id: &str,
    ) -> Result<Option<Invoice>> {
        let invoices = self.inner.invoices.read().await;
        Ok(invoices
            .values()
            .find(|i| i.gateway_invoice_id.as_deref() == Some(gateway_invoice_id))
            .cloned())
    }

    async fn save_invoice(&self, invoice: &Invoice) -> Result<()> {
        self.inner
            .invoices
            .write()
            .await
            .insert(invoice.id.clone(), invoice.clone());
        Ok(())
    }

    async fn list_invoices(&self) -> Result<Vec<Invoice>> {
        let invoices = self.inner.invoices.read().await;
        let mut all: Vec<Invoice> = invoices.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn list_company_invoices(&self, company_id: &str) -> Result<Vec<Invoice>> {
        let invoices = self.inner.invoices.read().await;
        let mut matching: Vec<Invoice> = invoices
            .values()
            .filter(|i| i.company_id == company_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>> {
        Ok(self.inner.payments.read().await.get(payment_id).cloned())
    }

    async fn get_payment_by_intent(
        &self,
        gateway_payment_intent_id: &str,
    ) -> Result<Option<Payment>> {
        let payments = self.inner.payments.read().await;
        Ok(payments
            .values()
            .find(|p| p.gateway_payment_intent_id.as_deref() == Some(gateway_payment_intent_id))
            .cloned())
    }

    async fn save_payment(&self, payment: &Payment) -> Result<()> {
        self.inner
            .payments
            .write()
            .await
            .insert(payment.id.clone(), payment.clone());
        Ok(())
    }

    async fn payments_due_for_retry(&self, now: DateTime<Utc>) -> Result<Vec<Payment>> {
        let payments = self.inner.payments.read().await;
        Ok(payments
            .values()
            .filter(|p| {
                p.status == PaymentStatus::Failed
                    && p.attempt_number < p.max_attempts
                    && p.next_retry_date.is_some_and(|due| due <= now)
            })
            .cloned()
            .collect())
    }

    async fn list_company_payments(&self, company_id: &str) -> Result<Vec<Payment>> {
        let payments = self.inner.payments.read().await;
        let mut matching: Vec<Payment> = payments
            .values()
            .filter(|p| p.company_id == company_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn append_usage_record(&self, record: &UsageRecord) -> Result<()> {
        self.inner.usage_records.write().await.push(record.clone());
        Ok(())
    }

    async fn usage_records_in_period(
        &self,
        company_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>> {
        let records = self.inner.usage_records.read().await;
        Ok(records
            .iter()
            .filter(|r| {
                r.company_id == company_id
                    && r.recorded_at >= period_start
                    && r.recorded_at < period_end
            })
            .cloned()
            .collect())
    }

    async fn append_history(&self, entry: &BillingHistoryEntry) -> Result<()> {
        self.inner.history.write().await.push(entry.clone());
        Ok(())
    }

    async fn list_company_history(&self, company_id: &str) -> Result<Vec<BillingHistoryEntry>> {
        let history = self.inner.history.read().await;
        Ok(history
            .iter()
            .filter(|e| e.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn get_pricing_tier(&self, tier_id: &str) -> Result<Option<PricingTier>> {
        Ok(self.inner.pricing_tiers.read().await.get(tier_id).cloned())
    }

    async fn default_pricing_tier(&self) -> Result<Option<PricingTier>> {
        let tiers = self.inner.pricing_tiers.read().await;
        Ok(tiers.values().find(|t| t.is_default && t.active).cloned())
    }

    async fn save_pricing_tier(&self, tier: &PricingTier) -> Result<()> {
        self.inner
            .pricing_tiers
            .write()
            .await
            .insert(tier.id.clone(), tier.clone());
        Ok(())
    }

    async fn is_event_processed(&self, event_id: &str) -> Result<bool> {
        Ok(self
            .inner
            .processed_events
            .read()
            .await
            .contains_key(event_id))
    }

    async fn mark_event_processed(&self, event_id: &str) -> Result<()> {
        self.inner
            .processed_events
            .write()
            .await
            .insert(event_id.to_string(), Utc::now());
        Ok(())
    }

    async fn cleanup_old_events(&self, older_than_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(older_than_days));
        let mut events = self.inner.processed_events.write().await;
        let initial_len = events.len();
        events.retain(|_, &mut at| at >= cutoff);
        Ok(initial_len - events.len())
    }
}
