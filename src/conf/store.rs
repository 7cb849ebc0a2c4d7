//! Cached configuration snapshot, its synchronizer, and the mutator API.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ipnet::IpNet;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::snapshot::{canonical_route, parse_cidrs, ConfigSnapshot, Limit, RouteLimits};
use crate::error::{Result, WardenError};
use crate::store::Store;

const WHITELIST_KEY: &str = "whitelist_ipnets";
const BLACKLIST_KEY: &str = "blacklist_ipnets";
const LIMIT_COUNT_KEY: &str = "limit_count";
const LIMIT_DURATION_KEY: &str = "limit_duration_secs";
const LIMIT_ENABLED_KEY: &str = "limit_enabled";
const ROUTE_LIMITS_KEY: &str = "route_limits";
const REPORT_ONLY_KEY: &str = "report_only";

/// Owns the locally cached configuration and keeps it fresh from the store.
///
/// Readers clone the current snapshot `Arc` under a read lock and never
/// touch the store; the synchronizer builds a replacement outside the lock
/// and swaps it in with a single pointer write. Administrative mutations
/// write through to the store and become visible on the next sync.
pub struct ConfStore {
    store: Arc<dyn Store>,
    conf: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfStore {
    /// Create a conf store seeded with defaults.
    ///
    /// The defaults stay in effect until the first successful sync, so the
    /// service is usable before the store is reachable.
    pub fn new(
        store: Arc<dyn Store>,
        default_whitelist: Vec<IpNet>,
        default_blacklist: Vec<IpNet>,
        default_limit: Limit,
        default_report_only: bool,
    ) -> Self {
        let snapshot = ConfigSnapshot {
            whitelist: default_whitelist,
            blacklist: default_blacklist,
            limit: default_limit,
            route_limits: RouteLimits::new(),
            report_only: default_report_only,
        };

        Self {
            store,
            conf: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The current snapshot. Cheap; callers may hold it past the lock.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.conf.read().clone()
    }

    pub fn get_whitelist(&self) -> Vec<IpNet> {
        self.conf.read().whitelist.clone()
    }

    pub fn get_blacklist(&self) -> Vec<IpNet> {
        self.conf.read().blacklist.clone()
    }

    pub fn get_limit(&self) -> Limit {
        self.conf.read().limit
    }

    pub fn get_route_limits(&self) -> RouteLimits {
        self.conf.read().route_limits.clone()
    }

    pub fn get_report_only(&self) -> bool {
        self.conf.read().report_only
    }

    /// Refresh the snapshot from the store until `shutdown` resolves.
    ///
    /// Exits within one tick of the shutdown signal.
    pub async fn run_sync<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = tokio::time::interval(interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.update_cached_conf().await;
                }
                _ = &mut shutdown => {
                    debug!("configuration synchronizer stopping");
                    break;
                }
            }
        }
    }

    /// Fetch every field and swap in a new snapshot.
    ///
    /// A field that fails to fetch keeps its previous value. The swap
    /// itself is a single pointer write, so readers never observe a
    /// half-built snapshot.
    pub async fn update_cached_conf(&self) {
        let mut next = (*self.snapshot()).clone();

        match self.fetch_whitelist().await {
            Ok(whitelist) => next.whitelist = whitelist,
            Err(err) => warn!(error = %err, "keeping cached whitelist"),
        }
        match self.fetch_blacklist().await {
            Ok(blacklist) => next.blacklist = blacklist,
            Err(err) => warn!(error = %err, "keeping cached blacklist"),
        }
        match self.fetch_limit().await {
            Ok(limit) => next.limit = limit,
            Err(err) => warn!(error = %err, "keeping cached global limit"),
        }
        match self.fetch_route_limits().await {
            Ok(routes) => next.route_limits = routes,
            Err(err) => warn!(error = %err, "keeping cached route limits"),
        }
        match self.fetch_report_only().await {
            Ok(report_only) => next.report_only = report_only,
            Err(err) => warn!(error = %err, "keeping cached report-only flag"),
        }

        debug!(
            whitelist = next.whitelist.len(),
            blacklist = next.blacklist.len(),
            routes = next.route_limits.len(),
            report_only = next.report_only,
            "configuration snapshot refreshed"
        );

        *self.conf.write() = Arc::new(next);
    }

    /// Read the whitelist straight from the store.
    pub async fn fetch_whitelist(&self) -> Result<Vec<IpNet>> {
        let members = self.store.set_members(WHITELIST_KEY).await?;
        Ok(parse_cidrs(&members))
    }

    /// Read the blacklist straight from the store.
    pub async fn fetch_blacklist(&self) -> Result<Vec<IpNet>> {
        let members = self.store.set_members(BLACKLIST_KEY).await?;
        Ok(parse_cidrs(&members))
    }

    /// Read the global limit straight from the store.
    pub async fn fetch_limit(&self) -> Result<Limit> {
        let count = self.store.get(LIMIT_COUNT_KEY).await?;
        let duration = self.store.get(LIMIT_DURATION_KEY).await?;
        let enabled = self.store.get(LIMIT_ENABLED_KEY).await?;

        let (Some(count), Some(duration), Some(enabled)) = (count, duration, enabled) else {
            return Err(WardenError::Config(
                "global limit is not set in the store".to_string(),
            ));
        };

        let count = count
            .parse::<u64>()
            .map_err(|err| WardenError::Config(format!("bad limit count: {err}")))?;
        let duration_secs = duration
            .parse::<u64>()
            .map_err(|err| WardenError::Config(format!("bad limit duration: {err}")))?;
        let enabled = enabled
            .parse::<bool>()
            .map_err(|err| WardenError::Config(format!("bad limit enabled flag: {err}")))?;

        Ok(Limit {
            count,
            duration: Duration::from_secs(duration_secs),
            enabled,
        })
    }

    /// Read the per-route limits straight from the store.
    ///
    /// Malformed entries are skipped; the rest of the map still loads.
    pub async fn fetch_route_limits(&self) -> Result<RouteLimits> {
        let entries = self.store.hash_get_all(ROUTE_LIMITS_KEY).await?;

        let mut routes = RouteLimits::new();
        for (raw_route, raw_limit) in entries {
            let Some(route) = canonical_route(&raw_route) else {
                warn!(route = %raw_route, "skipping route limit with unparseable URL");
                continue;
            };
            match serde_json::from_str::<Limit>(&raw_limit) {
                Ok(limit) => {
                    routes.insert(route, limit);
                }
                Err(err) => {
                    warn!(route = %raw_route, error = %err, "skipping malformed route limit");
                }
            }
        }
        Ok(routes)
    }

    /// Read the report-only flag straight from the store.
    pub async fn fetch_report_only(&self) -> Result<bool> {
        let value = self.store.get(REPORT_ONLY_KEY).await?;
        let Some(value) = value else {
            return Err(WardenError::Config(
                "report-only flag is not set in the store".to_string(),
            ));
        };
        value
            .parse::<bool>()
            .map_err(|err| WardenError::Config(format!("bad report-only flag: {err}")))
    }

    pub async fn add_whitelist_cidrs(&self, cidrs: &[IpNet]) -> Result<()> {
        debug!(count = cidrs.len(), "adding whitelist CIDRs");
        self.store
            .set_add(WHITELIST_KEY, &cidr_strings(cidrs))
            .await
    }

    pub async fn remove_whitelist_cidrs(&self, cidrs: &[IpNet]) -> Result<()> {
        debug!(count = cidrs.len(), "removing whitelist CIDRs");
        self.store
            .set_remove(WHITELIST_KEY, &cidr_strings(cidrs))
            .await
    }

    pub async fn add_blacklist_cidrs(&self, cidrs: &[IpNet]) -> Result<()> {
        debug!(count = cidrs.len(), "adding blacklist CIDRs");
        self.store
            .set_add(BLACKLIST_KEY, &cidr_strings(cidrs))
            .await
    }

    pub async fn remove_blacklist_cidrs(&self, cidrs: &[IpNet]) -> Result<()> {
        debug!(count = cidrs.len(), "removing blacklist CIDRs");
        self.store
            .set_remove(BLACKLIST_KEY, &cidr_strings(cidrs))
            .await
    }

    pub async fn set_limit(&self, limit: Limit) -> Result<()> {
        self.store
            .set(LIMIT_COUNT_KEY, &limit.count.to_string())
            .await?;
        self.store
            .set(
                LIMIT_DURATION_KEY,
                &limit.duration.as_secs().max(1).to_string(),
            )
            .await?;
        self.store
            .set(LIMIT_ENABLED_KEY, &limit.enabled.to_string())
            .await
    }

    pub async fn set_report_only(&self, report_only: bool) -> Result<()> {
        self.store
            .set(REPORT_ONLY_KEY, &report_only.to_string())
            .await
    }

    /// Write per-route limits through to the store.
    ///
    /// Routes that fail to canonicalize are skipped with a warning.
    pub async fn set_route_rate_limits(&self, routes: &HashMap<String, Limit>) -> Result<()> {
        for (raw_route, limit) in routes {
            let Some(route) = canonical_route(raw_route) else {
                warn!(route = %raw_route, "skipping unparseable route limit key");
                continue;
            };
            let value = serde_json::to_string(limit)
                .map_err(|err| WardenError::Config(format!("bad route limit: {err}")))?;
            self.store
                .hash_set(ROUTE_LIMITS_KEY, route.as_str(), &value)
                .await?;
        }
        Ok(())
    }
}

fn cidr_strings(cidrs: &[IpNet]) -> Vec<String> {
    cidrs.iter().map(|cidr| cidr.to_string()).collect()
}
