//! Limit selection for a request.

use tracing::warn;

use super::request::Request;
use crate::conf::{canonical_route, ConfigSnapshot, Limit};

/// Selects the limit that applies to a request from a configuration
/// snapshot.
pub trait LimitProvider: Send + Sync {
    fn get_limit(&self, req: &Request, conf: &ConfigSnapshot) -> Limit;
}

/// Applies the instance-wide limit to every request.
pub struct GlobalLimitProvider;

impl LimitProvider for GlobalLimitProvider {
    fn get_limit(&self, _req: &Request, conf: &ConfigSnapshot) -> Limit {
        conf.limit
    }
}

/// Applies a per-route limit looked up by the request's canonical URL.
///
/// Routes without an entry, and paths that fail to parse, get a disabled
/// limit.
pub struct RouteLimitProvider;

impl LimitProvider for RouteLimitProvider {
    fn get_limit(&self, req: &Request, conf: &ConfigSnapshot) -> Limit {
        let Some(route) = canonical_route(&req.path) else {
            warn!(path = %req.path, "unable to parse request path for route limits");
            return Limit::disabled();
        };

        conf.route_limits
            .get(&route)
            .copied()
            .unwrap_or_else(Limit::disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request_for(path: &str) -> Request {
        Request {
            remote_address: "192.168.1.2".to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    fn enabled_limit(count: u64) -> Limit {
        Limit {
            count,
            duration: Duration::from_secs(1),
            enabled: true,
        }
    }

    #[test]
    fn test_global_provider_ignores_the_request() {
        let conf = ConfigSnapshot {
            limit: enabled_limit(42),
            ..Default::default()
        };

        let limit = GlobalLimitProvider.get_limit(&request_for("/anything"), &conf);
        assert_eq!(limit, enabled_limit(42));
    }

    #[test]
    fn test_route_provider_finds_configured_route() {
        let mut conf = ConfigSnapshot::default();
        conf.route_limits
            .insert(canonical_route("/api/foo").unwrap(), enabled_limit(5));

        let limit = RouteLimitProvider.get_limit(&request_for("/api/foo"), &conf);
        assert_eq!(limit, enabled_limit(5));
    }

    #[test]
    fn test_route_provider_misses_return_disabled() {
        let mut conf = ConfigSnapshot::default();
        conf.route_limits
            .insert(canonical_route("/api/foo").unwrap(), enabled_limit(5));

        let limit = RouteLimitProvider.get_limit(&request_for("/api/bar"), &conf);
        assert!(!limit.enabled);
    }

    #[test]
    fn test_route_provider_query_must_match_exactly() {
        let mut conf = ConfigSnapshot::default();
        conf.route_limits
            .insert(canonical_route("/api/foo?a=1&b=2").unwrap(), enabled_limit(5));

        assert!(
            RouteLimitProvider
                .get_limit(&request_for("/api/foo?a=1&b=2"), &conf)
                .enabled
        );
        assert!(
            !RouteLimitProvider
                .get_limit(&request_for("/api/foo?b=2&a=1"), &conf)
                .enabled
        );
    }

    #[test]
    fn test_route_provider_unparseable_path_returns_disabled() {
        let conf = ConfigSnapshot::default();
        let limit = RouteLimitProvider.get_limit(&request_for("http://["), &conf);
        assert!(!limit.enabled);
    }
}
