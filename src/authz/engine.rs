//! The decision engine: chain orchestration, report-only, telemetry.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use super::chain::Chain;
use super::request::Request;
use crate::conf::ConfStore;
use crate::error::WardenError;
use crate::metrics::MetricReporter;

/// Final admission decision for one request.
#[derive(Debug)]
pub struct Decision {
    /// Verdict delivered to the caller.
    pub blocked: bool,
    /// Verdict the chain produced before report-only was applied.
    pub would_block: bool,
    /// Tokens remaining in the most constrained bucket.
    pub remaining: u32,
    /// Last error observed during evaluation; decisions fail open.
    pub error: Option<WardenError>,
}

/// Orchestrates the admission chain for every inbound request.
pub struct DecisionEngine {
    chain: Chain,
    conf: Arc<ConfStore>,
    reporter: Arc<dyn MetricReporter>,
}

impl DecisionEngine {
    pub fn new(chain: Chain, conf: Arc<ConfStore>, reporter: Arc<dyn MetricReporter>) -> Self {
        Self {
            chain,
            conf,
            reporter,
        }
    }

    /// Decide whether to admit a request.
    ///
    /// One snapshot is grabbed at entry and used for the whole evaluation,
    /// so a concurrent sync never splits a single decision across two
    /// configurations. In report-only mode the chain (and its counters)
    /// still runs; only the delivered verdict is softened.
    pub async fn decide(&self, req: &Request) -> Decision {
        let started = Instant::now();
        let conf = self.conf.snapshot();

        let outcome = self.chain.evaluate(req, &conf).await;
        let would_block = outcome.blocked;
        let blocked = would_block && !conf.report_only;

        if would_block && conf.report_only {
            info!(
                address = %req.remote_address,
                authority = %req.authority,
                path = %req.path,
                "report-only: request would have been blocked"
            );
        }

        let elapsed = started.elapsed();
        self.reporter
            .duration(req, would_block, outcome.error.is_some(), elapsed);

        debug!(
            address = %req.remote_address,
            authority = %req.authority,
            method = %req.method,
            blocked = blocked,
            remaining = outcome.remaining,
            elapsed_us = elapsed.as_micros() as u64,
            "admission decision"
        );

        Decision {
            blocked,
            would_block,
            remaining: outcome.remaining,
            error: outcome.error,
        }
    }
}
