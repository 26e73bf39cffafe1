//! Seat usage tracking.
//!
//! Records every seat addition and removal together with its proration
//! impact. Seat counts are always taken from an authoritative active-user
//! query rather than incremented locally, so concurrent writers converge on
//! the same number. Records are immutable once appended; the invoice
//! generator consumes them read-only.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::clock::{BillingClock, SystemClock, seat_proration};
use crate::config::BillingConfig;
use crate::error::Result;
use crate::history::{BillingEvent, BillingHistoryEntry, HistoryRecorder};
use crate::store::{BillingStore, Subscription, UsageEventType, UsageRecord};
use crate::subscription::SubscriptionLifecycle;

/// A seat change to record.
#[derive(Debug, Clone)]
pub struct SeatChange {
    pub company_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    /// Who performed the change; `None` for system-driven changes.
    pub performed_by: Option<String>,
}

impl SeatChange {
    /// A minimal seat change carrying only the identifiers.
    #[must_use]
    pub fn new(company_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
            user_id: user_id.into(),
            user_name: None,
            user_email: None,
            performed_by: None,
        }
    }

    fn display_name(&self) -> &str {
        self.user_name
            .as_deref()
            .or(self.user_email.as_deref())
            .unwrap_or(&self.user_id)
    }
}

/// Current-period seat usage for a company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub company_id: String,
    pub subscription_id: String,
    /// Authoritative active-user count at the time of the query.
    pub current_user_count: u32,
    /// Signed cents that will fold into the next invoice's proration line.
    pub pending_proration_cents: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Tracks per-seat usage against a company's billable subscription.
pub struct UsageTracker<S: BillingStore + Clone> {
    store: S,
    lifecycle: SubscriptionLifecycle<S>,
    clock: Arc<dyn BillingClock>,
    recorder: HistoryRecorder<S>,
}

impl<S: BillingStore + Clone> Clone for UsageTracker<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            lifecycle: self.lifecycle.clone(),
            clock: Arc::clone(&self.clock),
            recorder: self.recorder.clone(),
        }
    }
}

impl<S: BillingStore + Clone> UsageTracker<S> {
    /// Create a usage tracker on the system clock.
    #[must_use]
    pub fn new(store: S, config: BillingConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a usage tracker with an injected clock.
    #[must_use]
    pub fn with_clock(store: S, config: BillingConfig, clock: Arc<dyn BillingClock>) -> Self {
        Self {
            lifecycle: SubscriptionLifecycle::with_clock(store.clone(), config, Arc::clone(&clock)),
            recorder: HistoryRecorder::new(store.clone()),
            store,
            clock,
        }
    }

    async fn billable_subscription(&self, company_id: &str) -> Result<Option<Subscription>> {
        Ok(self
            .store
            .subscription_for_company(company_id)
            .await?
            .filter(Subscription::is_billable))
    }

    /// Record a seat addition.
    ///
    /// Returns `Ok(None)` when the company has no billable subscription;
    /// seat tracking only means something while one exists. Never fails for
    /// that case, only for store errors.
    pub async fn record_user_addition(&self, change: SeatChange) -> Result<Option<UsageRecord>> {
        self.record_seat_change(change, UsageEventType::UserAdded)
            .await
    }

    /// Record a seat removal. Mirror of [`Self::record_user_addition`]; the
    /// proration amount is the exact negation of the equivalent addition
    /// computed at the same instant.
    pub async fn record_user_removal(&self, change: SeatChange) -> Result<Option<UsageRecord>> {
        self.record_seat_change(change, UsageEventType::UserRemoved)
            .await
    }

    async fn record_seat_change(
        &self,
        change: SeatChange,
        event_type: UsageEventType,
    ) -> Result<Option<UsageRecord>> {
        let Some(sub) = self.billable_subscription(&change.company_id).await? else {
            tracing::debug!(
                target: "seatwise::usage",
                company_id = %change.company_id,
                user_id = %change.user_id,
                event = event_type.as_str(),
                "no billable subscription, seat change not recorded"
            );
            return Ok(None);
        };

        // The caller has already applied the membership change, so the
        // authoritative count reflects the new state.
        let count = self.store.count_active_users(&change.company_id).await?;
        let (user_count_before, user_count_after) = match event_type {
            UsageEventType::UserAdded => (count.saturating_sub(1), count),
            UsageEventType::UserRemoved => (count + 1, count),
        };

        let now = self.clock.now();
        let magnitude = seat_proration(sub.price_per_user_cents, now, sub.current_period_end);
        let proration_cents = match event_type {
            UsageEventType::UserAdded => magnitude,
            UsageEventType::UserRemoved => -magnitude,
        };

        let record = UsageRecord {
            id: Uuid::new_v4().to_string(),
            company_id: change.company_id.clone(),
            subscription_id: sub.id.clone(),
            event_type,
            user_id: change.user_id.clone(),
            user_email: change.user_email.clone(),
            user_count_before,
            user_count_after,
            proration_cents,
            period_start: sub.current_period_start,
            period_end: sub.current_period_end,
            // Seat changes during a trial carry no charge; the first real
            // invoice bills the full post-trial seat count instead.
            will_affect_next_invoice: !sub.is_trialing(),
            recorded_by: change.performed_by.clone(),
            recorded_at: now,
        };
        self.store.append_usage_record(&record).await?;

        self.lifecycle
            .update_with(&sub.id, |record| {
                if record.current_user_count == count {
                    return Ok(false);
                }
                record.current_user_count = count;
                Ok(true)
            })
            .await?;

        if let Some(mut user) = self.store.get_user(&change.user_id).await? {
            if !user.billing_processed {
                user.billing_processed = true;
                self.store.save_user(&user).await?;
            }
        }

        tracing::info!(
            target: "seatwise::usage",
            company_id = %change.company_id,
            subscription_id = %sub.id,
            user_id = %change.user_id,
            event = event_type.as_str(),
            user_count_after,
            proration_cents,
            "seat change recorded"
        );
        let verb = match event_type {
            UsageEventType::UserAdded => "added",
            UsageEventType::UserRemoved => "removed",
        };
        let event = match event_type {
            UsageEventType::UserAdded => BillingEvent::UserAdded,
            UsageEventType::UserRemoved => BillingEvent::UserRemoved,
        };
        let mut entry = BillingHistoryEntry::new(
            &change.company_id,
            event,
            format!(
                "User {} {verb} ({user_count_before} -> {user_count_after} seats)",
                change.display_name()
            ),
            now,
        )
        .with_subscription(&sub.id)
        .with_user(&change.user_id)
        .with_details(json!({
            "user_count_before": user_count_before,
            "user_count_after": user_count_after,
            "proration_cents": proration_cents,
        }));
        if let Some(actor) = &change.performed_by {
            entry = entry.with_actor(actor);
        }
        self.recorder.record(entry).await;

        Ok(Some(record))
    }

    /// Sum the proration amounts over a period window.
    ///
    /// Only records flagged to affect the next invoice are counted. Pure
    /// aggregation, no side effects.
    pub async fn calculate_period_proration(
        &self,
        company_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<i64> {
        let records = self
            .store
            .usage_records_in_period(company_id, period_start, period_end)
            .await?;
        Ok(records
            .iter()
            .filter(|r| r.will_affect_next_invoice)
            .map(|r| r.proration_cents)
            .sum())
    }

    /// Current-period usage for a company, or `None` without a billable
    /// subscription.
    pub async fn usage_summary(&self, company_id: &str) -> Result<Option<UsageSummary>> {
        let Some(sub) = self.billable_subscription(company_id).await? else {
            return Ok(None);
        };
        let current_user_count = self.store.count_active_users(company_id).await?;
        let pending_proration_cents = self
            .calculate_period_proration(company_id, sub.current_period_start, sub.current_period_end)
            .await?;
        Ok(Some(UsageSummary {
            company_id: company_id.to_string(),
            subscription_id: sub.id,
            current_user_count,
            pending_proration_cents,
            period_start: sub.current_period_start,
            period_end: sub.current_period_end,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryBillingStore;
    use crate::store::SubscriptionStatus;
    use crate::testing::{CompanyBuilder, FixedClock, SubscriptionBuilder, UserBuilder};
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    async fn tracker_at(
        now: DateTime<Utc>,
    ) -> (UsageTracker<InMemoryBillingStore>, InMemoryBillingStore) {
        let store = InMemoryBillingStore::new();
        let tracker =
            UsageTracker::with_clock(store.clone(), BillingConfig::default(), FixedClock::at(now));
        (tracker, store)
    }

    async fn seed_company(store: &InMemoryBillingStore, active_users: u32) {
        store.add_company(CompanyBuilder::new("co_1").build()).await;
        for _ in 0..active_users {
            store.add_user(UserBuilder::new("co_1").build()).await;
        }
    }

    #[tokio::test]
    async fn addition_records_proration_and_updates_count() {
        // Mid-June: 15 of 30 days remain, one $1.00 seat prorates to 50c
        let (tracker, store) = tracker_at(utc(2024, 6, 16)).await;
        seed_company(&store, 9).await;
        store
            .save_subscription(&SubscriptionBuilder::new("co_1").with_id("sub_1").build())
            .await
            .unwrap();
        store
            .add_user(UserBuilder::new("co_1").with_id("user_new").unbilled().build())
            .await;

        let record = tracker
            .record_user_addition(SeatChange::new("co_1", "user_new"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.event_type, UsageEventType::UserAdded);
        assert_eq!(record.user_count_before, 9);
        assert_eq!(record.user_count_after, 10);
        assert_eq!(record.proration_cents, 50);
        assert!(record.will_affect_next_invoice);

        let sub = store.get_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.current_user_count, 10);

        let user = store.get_user("user_new").await.unwrap().unwrap();
        assert!(user.billing_processed);

        let history = store.list_company_history("co_1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event, BillingEvent::UserAdded);
        assert_eq!(history[0].user_id.as_deref(), Some("user_new"));
    }

    #[tokio::test]
    async fn removal_negates_addition_at_same_instant() {
        let now = utc(2024, 6, 16);
        let (tracker, store) = tracker_at(now).await;
        seed_company(&store, 10).await;
        store
            .save_subscription(&SubscriptionBuilder::new("co_1").with_id("sub_1").build())
            .await
            .unwrap();
        store
            .add_user(UserBuilder::new("co_1").with_id("user_out").build())
            .await;

        let added = tracker
            .record_user_addition(SeatChange::new("co_1", "user_out"))
            .await
            .unwrap()
            .unwrap();

        store.deactivate_user("user_out", now).await;
        let removed = tracker
            .record_user_removal(SeatChange::new("co_1", "user_out"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(removed.proration_cents, -added.proration_cents);
        assert_eq!(removed.user_count_before, 11);
        assert_eq!(removed.user_count_after, 10);

        let sub = store.get_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(sub.current_user_count, 10);
    }

    #[tokio::test]
    async fn no_billable_subscription_is_quiet_noop() {
        let (tracker, store) = tracker_at(utc(2024, 6, 16)).await;
        seed_company(&store, 3).await;

        let result = tracker
            .record_user_addition(SeatChange::new("co_1", "user_x"))
            .await
            .unwrap();
        assert!(result.is_none());

        // Canceled subscriptions do not count as billable either
        store
            .save_subscription(
                &SubscriptionBuilder::new("co_1")
                    .with_id("sub_1")
                    .with_status(SubscriptionStatus::Canceled)
                    .build(),
            )
            .await
            .unwrap();
        let result = tracker
            .record_user_removal(SeatChange::new("co_1", "user_x"))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(store.all_usage_records().await.is_empty());
    }

    #[tokio::test]
    async fn trial_seat_changes_do_not_affect_next_invoice() {
        let (tracker, store) = tracker_at(utc(2024, 6, 16)).await;
        seed_company(&store, 2).await;
        store
            .save_subscription(
                &SubscriptionBuilder::new("co_1")
                    .with_id("sub_1")
                    .with_status(SubscriptionStatus::Trial)
                    .with_trial_end(utc(2024, 6, 20))
                    .build(),
            )
            .await
            .unwrap();
        store
            .add_user(UserBuilder::new("co_1").with_id("user_t").unbilled().build())
            .await;

        let record = tracker
            .record_user_addition(SeatChange::new("co_1", "user_t"))
            .await
            .unwrap()
            .unwrap();
        assert!(!record.will_affect_next_invoice);

        let total = tracker
            .calculate_period_proration("co_1", utc(2024, 6, 1), utc(2024, 7, 1))
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn period_proration_sums_only_the_window() {
        let (tracker, store) = tracker_at(utc(2024, 6, 16)).await;
        seed_company(&store, 5).await;
        store
            .save_subscription(&SubscriptionBuilder::new("co_1").with_id("sub_1").build())
            .await
            .unwrap();

        store
            .add_user(UserBuilder::new("co_1").with_id("u_a").unbilled().build())
            .await;
        tracker
            .record_user_addition(SeatChange::new("co_1", "u_a"))
            .await
            .unwrap();

        // Second change later in the month: 10 of 30 days left -> 33c
        let clock_late = utc(2024, 6, 21);
        let late_tracker = UsageTracker::with_clock(
            store.clone(),
            BillingConfig::default(),
            FixedClock::at(clock_late),
        );
        store
            .add_user(UserBuilder::new("co_1").with_id("u_b").unbilled().build())
            .await;
        late_tracker
            .record_user_addition(SeatChange::new("co_1", "u_b"))
            .await
            .unwrap();

        let total = tracker
            .calculate_period_proration("co_1", utc(2024, 6, 1), utc(2024, 7, 1))
            .await
            .unwrap();
        assert_eq!(total, 50 + 33);

        // A window that misses both records sums to zero
        let total = tracker
            .calculate_period_proration("co_1", utc(2024, 7, 1), utc(2024, 8, 1))
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn usage_summary_reports_current_period() {
        let (tracker, store) = tracker_at(utc(2024, 6, 16)).await;
        seed_company(&store, 4).await;
        store
            .save_subscription(&SubscriptionBuilder::new("co_1").with_id("sub_1").build())
            .await
            .unwrap();
        store
            .add_user(UserBuilder::new("co_1").with_id("u_s").unbilled().build())
            .await;
        tracker
            .record_user_addition(SeatChange::new("co_1", "u_s"))
            .await
            .unwrap();

        let summary = tracker.usage_summary("co_1").await.unwrap().unwrap();
        assert_eq!(summary.subscription_id, "sub_1");
        assert_eq!(summary.current_user_count, 5);
        assert_eq!(summary.pending_proration_cents, 50);
        assert_eq!(summary.period_start, utc(2024, 6, 1));
        assert_eq!(summary.period_end, utc(2024, 7, 1));

        assert!(tracker.usage_summary("co_none").await.unwrap().is_none());
    }
}
