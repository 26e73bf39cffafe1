//! Time source and pure date/money helpers.
//!
//! Everything that reads "now" goes through [`BillingClock`] so lifecycle
//! logic can be driven deterministically in tests. The free functions are
//! pure: proration math, invoice numbering, and billing period arithmetic.

use chrono::{DateTime, Datelike, Duration, Months, Utc};

use crate::config::BillingInterval;

/// Injected time source for billing decisions.
pub trait BillingClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time. The production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl BillingClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Number of days in the calendar month containing `at`.
#[must_use]
pub fn days_in_month(at: DateTime<Utc>) -> i64 {
    let date = at.date_naive();
    let first = date.with_day(1).unwrap_or(date);
    let next = first.checked_add_months(Months::new(1)).unwrap_or(first);
    (next - first).num_days().max(1)
}

/// Days left in the billing period, rounded up. A period that ended returns 0.
///
/// Any partial day counts as a full day, so a change made an hour before the
/// boundary still prorates one day.
#[must_use]
pub fn days_remaining_in_period(now: DateTime<Utc>, period_end: DateTime<Utc>) -> i64 {
    let secs = (period_end - now).num_seconds();
    if secs <= 0 {
        return 0;
    }
    (secs + 86_399) / 86_400
}

/// Prorated charge in cents for one seat added at `at`, for the remainder of
/// the period: `(price / days-in-month) * ceil(days-remaining)`, rounded half
/// up.
///
/// A seat removal is the exact negation of this value computed at the same
/// instant; callers negate rather than recompute so the symmetry holds under
/// rounding.
#[must_use]
pub fn seat_proration(
    price_per_user_cents: i64,
    at: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> i64 {
    let remaining = days_remaining_in_period(at, period_end);
    if remaining == 0 || price_per_user_cents <= 0 {
        return 0;
    }
    let month_days = days_in_month(at);
    (price_per_user_cents * remaining + month_days / 2) / month_days
}

/// Deterministic human invoice number: `INV-{COMPANY}-{YYYYMM}`.
///
/// The company tag is the first eight alphanumerics of the company id,
/// uppercased, so the same company and month always mint the same number.
#[must_use]
pub fn invoice_number(company_id: &str, at: DateTime<Utc>) -> String {
    let mut tag: String = company_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect();
    tag.make_ascii_uppercase();
    if tag.is_empty() {
        tag.push_str("ACCT");
    }
    format!("INV-{}-{}{:02}", tag, at.year(), at.month())
}

/// The payment date for a period: one billing cycle past its end.
///
/// Billing runs in arrears, so the invoice for a period is due a full cycle
/// after that period closes. Month arithmetic clamps to the last day of a
/// shorter target month.
#[must_use]
pub fn next_billing_date(period_end: DateTime<Utc>, interval: BillingInterval) -> DateTime<Utc> {
    period_end
        .checked_add_months(Months::new(interval.months()))
        .unwrap_or(period_end)
}

/// One billing period starting at `start`.
#[must_use]
pub fn period_from(start: DateTime<Utc>, interval: BillingInterval) -> (DateTime<Utc>, DateTime<Utc>) {
    (start, next_billing_date(start, interval))
}

/// Roll a closed period forward: the old end becomes the new start.
#[must_use]
pub fn advance_period(
    current_end: DateTime<Utc>,
    interval: BillingInterval,
) -> (DateTime<Utc>, DateTime<Utc>) {
    period_from(current_end, interval)
}

/// Grace deadline for a payment-failure cascade entered at `now`.
#[must_use]
pub fn grace_period_end(now: DateTime<Utc>, grace_period_days: u32) -> DateTime<Utc> {
    now + Duration::days(i64::from(grace_period_days))
}

/// Trial deadline for a subscription started at `now`.
#[must_use]
pub fn trial_end(now: DateTime<Utc>, trial_period_days: u32) -> DateTime<Utc> {
    now + Duration::days(i64::from(trial_period_days))
}
