//! The admission decision pipeline.

mod chain;
mod engine;
mod limiter;
mod matcher;
mod provider;
mod request;

pub use chain::{
    Chain, ChainOutcome, Predicate, PredicateOutcome, StopOnBlacklist, StopOnOverLimit,
    StopOnWhitelist,
};
pub use engine::{Decision, DecisionEngine};
pub use limiter::{slot_key, LimitDecision, RateLimiter};
pub use matcher::cidrs_contain;
pub use provider::{GlobalLimitProvider, LimitProvider, RouteLimitProvider};
pub use request::Request;
