//! Cached configuration and its synchronizer.

mod snapshot;
mod store;

pub use snapshot::{canonical_route, parse_cidrs, ConfigSnapshot, Limit, RouteLimits};
pub use store::ConfStore;
