//! Scheduled reconciliation sweeps.
//!
//! Each sweep is a periodic, stateless pass: scan the store for records
//! matching a due condition, process each independently, and keep going past
//! per-record failures. A bad record costs one entry in the report, never the
//! rest of the batch. Every sweep is re-entrant; overlapping runs converge
//! because each per-record action re-checks persisted state before writing
//! and treats "already in target state" as success.
//!
//! Cadences follow the reconciliation schedule: billing, grace, payment
//! retry and trial expiration sweep daily, usage sync hourly. Run them from
//! the in-process [`SweepScheduler`] or call each sweep's `run()` from an
//! external cron.

mod billing;
mod grace;
mod payment_retry;
mod scheduler;
mod trial;
mod usage_sync;

pub use billing::BillingSweep;
pub use grace::GraceSweep;
pub use payment_retry::PaymentRetrySweep;
pub use scheduler::{SweepSchedule, SweepScheduler, SweepSchedulerHandle};
pub use trial::{TrialNotifier, TrialSweep};
pub use usage_sync::UsageSyncSweep;

use crate::error::BillingError;

/// Outcome of one sweep run.
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct SweepReport {
    /// Records matching the due condition at scan time.
    pub scanned: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// One entry per failed record.
    pub errors: Vec<SweepRecordError>,
}

/// A per-record failure inside a sweep run.
#[derive(Debug, Clone)]
pub struct SweepRecordError {
    pub record_id: String,
    pub error: BillingError,
}

impl SweepReport {
    fn sized(scanned: usize) -> Self {
        Self {
            scanned,
            ..Self::default()
        }
    }

    fn success(&mut self) {
        self.succeeded += 1;
    }

    fn failure(&mut self, record_id: impl Into<String>, error: BillingError) {
        self.failed += 1;
        self.errors.push(SweepRecordError {
            record_id: record_id.into(),
            error,
        });
    }

    /// Whether every scanned record processed cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}
