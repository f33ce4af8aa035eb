//! Admission gates: rate limiting, daily quota, and monthly budget.
//!
//! The three gates run in a fixed order and each one either passes the
//! request or rejects it with a typed error. None of them refund on a
//! later failure: an admitted request costs a rate token and a quota unit
//! whatever happens downstream, while budget is only consumed after a
//! confirmed successful dispatch.

pub mod budget;
pub mod quota;
pub mod rate_limit;

pub use budget::{AlertSink, BudgetGate, TracingAlertSink};
pub use quota::{QuotaGate, QuotaOutcome};
pub use rate_limit::{RateDecision, RateLimiter};
