//! The counter engine: fixed-window rate limiting over the shared store.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use super::provider::LimitProvider;
use super::request::Request;
use crate::conf::ConfigSnapshot;
use crate::error::WardenError;
use crate::store::Store;

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitDecision {
    pub blocked: bool,
    /// Tokens left in the current window, clamped to `u32::MAX`.
    pub remaining: u32,
}

impl LimitDecision {
    /// The decision when no limit applies: never blocks, budget unknown.
    pub fn unlimited() -> Self {
        Self {
            blocked: false,
            remaining: u32::MAX,
        }
    }
}

/// Fixed-window rate limiter sharing its counters through the store.
///
/// Every instance pointed at the same store computes identical bucket keys,
/// so the k-th increment within a window observes count k no matter which
/// instance performed it.
pub struct RateLimiter {
    store: Arc<dyn Store>,
    provider: Box<dyn LimitProvider>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>, provider: Box<dyn LimitProvider>) -> Self {
        Self { store, provider }
    }

    /// Count this request against its window and decide.
    ///
    /// Errors never block: a store failure yields an allow decision with
    /// the error attached for telemetry.
    pub async fn limit(
        &self,
        req: &Request,
        conf: &ConfigSnapshot,
    ) -> (LimitDecision, Option<WardenError>) {
        let limit = self.provider.get_limit(req, conf);
        if !limit.enabled {
            return (LimitDecision::unlimited(), None);
        }

        let key = slot_key(req, SystemTime::now(), limit.duration);
        let new_count = match self.store.incr(&key, 1, limit.duration).await {
            Ok(count) => count,
            Err(err) => {
                debug!(key = %key, error = %err, "store increment failed, failing open");
                return (LimitDecision::unlimited(), Some(err));
            }
        };

        let blocked = new_count > limit.count;
        if blocked {
            debug!(
                key = %key,
                count = new_count,
                limit = limit.count,
                "rate limit exceeded"
            );
        }

        (
            LimitDecision {
                blocked,
                remaining: clamp_remaining(limit.count, new_count),
            },
            None,
        )
    }
}

/// Bucket key for a request at a point in time.
///
/// Two requests from one client inside the same window share a key; the
/// first instant of the next window starts a new one.
pub fn slot_key(req: &Request, when: SystemTime, window: Duration) -> String {
    let window_secs = window.as_secs().max(1);
    let epoch_secs = when
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let slot = (epoch_secs / window_secs) * window_secs;

    format!("{}:{}", req.remote_address, slot)
}

fn clamp_remaining(limit: u64, count: u64) -> u32 {
    u32::try_from(limit.saturating_sub(count)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::provider::GlobalLimitProvider;
    use crate::store::testutil::FailingStore;
    use crate::store::MemoryStore;
    use crate::conf::Limit;

    fn test_request() -> Request {
        Request {
            remote_address: "192.168.1.2".to_string(),
            ..Default::default()
        }
    }

    fn conf_with_limit(limit: Limit) -> ConfigSnapshot {
        ConfigSnapshot {
            limit,
            ..Default::default()
        }
    }

    fn global_limiter(store: Arc<dyn Store>) -> RateLimiter {
        RateLimiter::new(store, Box::new(GlobalLimitProvider))
    }

    #[tokio::test]
    async fn test_blocks_once_over_the_limit() {
        // A long window so the test cannot straddle a bucket boundary.
        let conf = conf_with_limit(Limit {
            count: 3,
            duration: Duration::from_secs(60),
            enabled: true,
        });
        let limiter = global_limiter(Arc::new(MemoryStore::new()));
        let req = test_request();

        for sent in 1..=10u64 {
            let (decision, err) = limiter.limit(&req, &conf).await;
            assert!(err.is_none());

            let expected_blocked = sent > 3;
            assert_eq!(decision.blocked, expected_blocked, "request {sent}");

            let expected_remaining = 3u64.saturating_sub(sent) as u32;
            assert_eq!(decision.remaining, expected_remaining, "request {sent}");
        }
    }

    #[tokio::test]
    async fn test_allows_again_in_the_next_window() {
        let conf = conf_with_limit(Limit {
            count: 3,
            duration: Duration::from_secs(1),
            enabled: true,
        });
        let limiter = global_limiter(Arc::new(MemoryStore::new()));
        let req = test_request();

        for _ in 0..4 {
            limiter.limit(&req, &conf).await;
        }
        let (decision, _) = limiter.limit(&req, &conf).await;
        assert!(decision.blocked);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let (decision, err) = limiter.limit(&req, &conf).await;
        assert!(err.is_none());
        assert!(!decision.blocked);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test]
    async fn test_disabled_limit_never_blocks_or_counts() {
        let conf = conf_with_limit(Limit::disabled());
        let store = Arc::new(MemoryStore::new());
        let limiter = global_limiter(store.clone());
        let req = test_request();

        let (decision, err) = limiter.limit(&req, &conf).await;

        assert!(err.is_none());
        assert_eq!(decision, LimitDecision::unlimited());

        let key = slot_key(&req, SystemTime::now(), Duration::from_secs(1));
        assert_eq!(store.counter(&key), None, "no counter should be created");
    }

    #[tokio::test]
    async fn test_zero_count_blocks_everything() {
        let conf = conf_with_limit(Limit {
            count: 0,
            duration: Duration::from_secs(60),
            enabled: true,
        });
        let limiter = global_limiter(Arc::new(MemoryStore::new()));

        let (decision, err) = limiter.limit(&test_request(), &conf).await;

        assert!(err.is_none());
        assert!(decision.blocked);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_remaining_overflow_clamps_to_u32_max() {
        let conf = conf_with_limit(Limit {
            count: u64::MAX,
            duration: Duration::from_secs(60),
            enabled: true,
        });
        let store = Arc::new(MemoryStore::new());
        let limiter = global_limiter(store.clone());
        let req = test_request();

        // Seed the current bucket far above what fits in a u32.
        let key = slot_key(&req, SystemTime::now(), Duration::from_secs(60));
        store.set_counter(&key, (u32::MAX as u64) << 5);

        let (decision, err) = limiter.limit(&req, &conf).await;

        assert!(err.is_none());
        assert!(!decision.blocked);
        assert_eq!(decision.remaining, u32::MAX);
    }

    #[tokio::test]
    async fn test_fails_open_on_store_error() {
        let conf = conf_with_limit(Limit {
            count: 3,
            duration: Duration::from_secs(1),
            enabled: true,
        });
        let limiter = global_limiter(Arc::new(FailingStore));

        let (decision, err) = limiter.limit(&test_request(), &conf).await;

        assert!(err.is_some());
        assert!(!decision.blocked, "failed closed when it should fail open");
        assert_eq!(decision.remaining, u32::MAX);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_budget() {
        let conf = Arc::new(conf_with_limit(Limit {
            count: 3,
            duration: Duration::from_secs(60),
            enabled: true,
        }));
        let limiter = Arc::new(global_limiter(Arc::new(MemoryStore::new())));
        let req = Arc::new(test_request());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            let conf = conf.clone();
            let req = req.clone();
            handles.push(tokio::spawn(async move {
                limiter.limit(&req, &conf).await.0.blocked
            }));
        }

        let mut blocked = 0;
        for handle in handles {
            if handle.await.unwrap() {
                blocked += 1;
            }
        }
        assert_eq!(blocked, 7, "exactly sent - count requests must be blocked");
    }

    #[test]
    fn test_slot_key_rounds_down_to_window_start() {
        let req = test_request();
        let reference = SystemTime::UNIX_EPOCH + Duration::from_secs(1522969710);
        let window = Duration::from_secs(10);

        assert_eq!(
            slot_key(&req, reference, window),
            "192.168.1.2:1522969710"
        );
        assert_eq!(
            slot_key(&req, reference + Duration::from_secs(5), window),
            "192.168.1.2:1522969710"
        );
        assert_eq!(
            slot_key(&req, reference + Duration::from_secs(10), window),
            "192.168.1.2:1522969720"
        );
    }

    #[test]
    fn test_slot_key_keeps_unparseable_addresses_verbatim() {
        let req = Request {
            remote_address: "not-an-address".to_string(),
            ..Default::default()
        };
        let reference = SystemTime::UNIX_EPOCH + Duration::from_secs(1522969710);

        assert_eq!(
            slot_key(&req, reference, Duration::from_secs(10)),
            "not-an-address:1522969710"
        );
    }

    #[test]
    fn test_sub_second_windows_degrade_to_one_second() {
        let req = test_request();
        let reference = SystemTime::UNIX_EPOCH + Duration::from_secs(100);

        assert_eq!(
            slot_key(&req, reference, Duration::from_millis(250)),
            "192.168.1.2:100"
        );
    }
}
