//! Testing utilities for the billing engine
//!
//! This module provides the tools the test suites are built on:
//! - A manually advanced clock for driving time-dependent billing flows
//! - Builders for companies, users and subscriptions with sensible defaults
//! - A scripted gateway double covering every gateway client trait
//!
//! # Example
//!
//! ```rust,ignore
//! use chrono::Duration;
//! use seatwise::testing::{FixedClock, SubscriptionBuilder, default_epoch};
//!
//! #[tokio::test]
//! async fn test_grace_period_expiry() {
//!     let clock = FixedClock::at(default_epoch());
//!     let sub = SubscriptionBuilder::new("co_1").with_seats(5).build();
//!     // drive the lifecycle, then:
//!     clock.advance(Duration::days(8));
//! }
//! ```

mod clock;
mod fixtures;
mod gateway;

pub use clock::FixedClock;
pub use fixtures::{
    CompanyBuilder, InvoiceBuilder, SubscriptionBuilder, UserBuilder, default_epoch, fake,
};
pub use gateway::MockGateway;
