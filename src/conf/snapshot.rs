//! Configuration data model: limits, route maps, and the immutable snapshot.

use std::collections::HashMap;
use std::time::Duration;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

/// A request budget over a fixed time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    /// Maximum requests allowed per window. Zero blocks everything.
    pub count: u64,
    /// Window size. Sub-second durations are bucketed as one second.
    pub duration: Duration,
    /// Disabled limits never block.
    pub enabled: bool,
}

impl Limit {
    /// A limit that never applies.
    pub fn disabled() -> Self {
        Self {
            count: 0,
            duration: Duration::from_secs(1),
            enabled: false,
        }
    }
}

impl Default for Limit {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Per-route budgets keyed by canonical route URL.
pub type RouteLimits = HashMap<Url, Limit>;

/// Immutable bundle of all decision-time configuration.
///
/// Snapshots are swapped wholesale by the synchronizer; readers clone the
/// `Arc` and may keep it past the lock, so a single chain evaluation always
/// sees one consistent view.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub whitelist: Vec<IpNet>,
    pub blacklist: Vec<IpNet>,
    pub limit: Limit,
    pub route_limits: RouteLimits,
    pub report_only: bool,
}

/// Base used to canonicalize route keys. Only path and query survive.
const ROUTE_BASE: &str = "http://route.local/";

/// Parse a request path or configured route into its canonical URL form.
///
/// Scheme and authority are pinned to a synthetic base, so equality reduces
/// to the parsed path plus query, with query-parameter order significant.
/// Fragments are dropped.
pub fn canonical_route(path: &str) -> Option<Url> {
    let base = Url::parse(ROUTE_BASE).ok()?;
    let mut url = base.join(path).ok()?;

    url.set_fragment(None);
    if url.set_host(Some("route.local")).is_err() {
        return None;
    }
    let _ = url.set_scheme("http");
    let _ = url.set_port(None);

    Some(url)
}

/// Parse CIDR strings, skipping malformed members.
///
/// The result is sorted: set iteration order from the store is unspecified.
pub fn parse_cidrs<S: AsRef<str>>(members: &[S]) -> Vec<IpNet> {
    let mut cidrs: Vec<IpNet> = members
        .iter()
        .filter_map(|member| match member.as_ref().parse() {
            Ok(net) => Some(net),
            Err(err) => {
                warn!(member = member.as_ref(), error = %err, "skipping malformed CIDR");
                None
            }
        })
        .collect();
    cidrs.sort();
    cidrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_route_ignores_leading_slash() {
        assert_eq!(canonical_route("/foo/bar"), canonical_route("foo/bar"));
    }

    #[test]
    fn test_canonical_route_query_order_is_significant() {
        assert_ne!(
            canonical_route("/foo?a=1&b=2"),
            canonical_route("/foo?b=2&a=1")
        );
    }

    #[test]
    fn test_canonical_route_drops_fragments() {
        assert_eq!(canonical_route("/foo#frag"), canonical_route("/foo"));
    }

    #[test]
    fn test_canonical_route_pins_authority() {
        let url = canonical_route("http://example.com:8080/foo").unwrap();
        assert_eq!(url.host_str(), Some("route.local"));
        assert_eq!(url.port(), None);
        assert_eq!(url.path(), "/foo");
    }

    #[test]
    fn test_parse_cidrs_skips_malformed() {
        let cidrs = parse_cidrs(&["10.0.0.0/8", "not-a-cidr", "192.168.1.0/24"]);
        assert_eq!(cidrs.len(), 2);
    }

    #[test]
    fn test_parse_cidrs_is_sorted() {
        let forward = parse_cidrs(&["10.0.0.0/8", "192.168.1.0/24"]);
        let reverse = parse_cidrs(&["192.168.1.0/24", "10.0.0.0/8"]);
        assert_eq!(forward, reverse);
    }
}
