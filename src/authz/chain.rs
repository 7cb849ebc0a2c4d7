//! Ordered short-circuit admission predicates.

use async_trait::async_trait;
use tracing::debug;

use super::limiter::RateLimiter;
use super::matcher::cidrs_contain;
use super::request::Request;
use crate::conf::ConfigSnapshot;
use crate::error::WardenError;

/// What a single predicate decided.
///
/// A predicate that does not stop must not block; its error, if any, is
/// advisory and the chain keeps going.
#[derive(Debug, Default)]
pub struct PredicateOutcome {
    /// Halt the chain; `block` is the verdict.
    pub stop: bool,
    /// Deny the request.
    pub block: bool,
    /// Tokens left in the bucket this predicate consulted, if it ran a
    /// limiter.
    pub remaining: Option<u32>,
    /// Advisory error, recorded for telemetry.
    pub error: Option<WardenError>,
}

/// One link of the admission chain.
#[async_trait]
pub trait Predicate: Send + Sync {
    async fn check(&self, req: &Request, conf: &ConfigSnapshot) -> PredicateOutcome;
}

/// Verdict of a full chain evaluation.
#[derive(Debug)]
pub struct ChainOutcome {
    pub blocked: bool,
    /// Minimum remaining across the limiters that ran.
    pub remaining: u32,
    /// Last error any predicate reported.
    pub error: Option<WardenError>,
}

/// Evaluates predicates in order, adopting the first stopping verdict.
///
/// Errors propagate to the outcome but never abort evaluation on their own.
pub struct Chain {
    predicates: Vec<Box<dyn Predicate>>,
}

impl Chain {
    pub fn new(predicates: Vec<Box<dyn Predicate>>) -> Self {
        Self { predicates }
    }

    pub async fn evaluate(&self, req: &Request, conf: &ConfigSnapshot) -> ChainOutcome {
        let mut remaining = u32::MAX;
        let mut error = None;

        for predicate in &self.predicates {
            let outcome = predicate.check(req, conf).await;

            if let Some(left) = outcome.remaining {
                remaining = remaining.min(left);
            }
            if outcome.error.is_some() {
                error = outcome.error;
            }
            if outcome.stop {
                return ChainOutcome {
                    blocked: outcome.block,
                    remaining,
                    error,
                };
            }
        }

        ChainOutcome {
            blocked: false,
            remaining,
            error,
        }
    }
}

/// Admits immediately when the client is whitelisted.
pub struct StopOnWhitelist;

#[async_trait]
impl Predicate for StopOnWhitelist {
    async fn check(&self, req: &Request, conf: &ConfigSnapshot) -> PredicateOutcome {
        if cidrs_contain(&conf.whitelist, req) {
            debug!(address = %req.remote_address, "client whitelisted");
            return PredicateOutcome {
                stop: true,
                block: false,
                ..Default::default()
            };
        }
        PredicateOutcome::default()
    }
}

/// Blocks immediately when the client is blacklisted.
pub struct StopOnBlacklist;

#[async_trait]
impl Predicate for StopOnBlacklist {
    async fn check(&self, req: &Request, conf: &ConfigSnapshot) -> PredicateOutcome {
        if cidrs_contain(&conf.blacklist, req) {
            debug!(address = %req.remote_address, "client blacklisted");
            return PredicateOutcome {
                stop: true,
                block: true,
                ..Default::default()
            };
        }
        PredicateOutcome::default()
    }
}

/// Counts the request against a limiter and blocks when over budget.
///
/// Limiter errors fail open: the chain continues with the error recorded.
pub struct StopOnOverLimit {
    limiter: RateLimiter,
}

impl StopOnOverLimit {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Predicate for StopOnOverLimit {
    async fn check(&self, req: &Request, conf: &ConfigSnapshot) -> PredicateOutcome {
        let (decision, error) = self.limiter.limit(req, conf).await;

        PredicateOutcome {
            stop: decision.blocked,
            block: decision.blocked,
            remaining: Some(decision.remaining),
            error,
        }
    }
}
