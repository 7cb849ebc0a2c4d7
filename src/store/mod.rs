//! Storage backends for shared counters and configuration.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::{RedisStore, RedisStoreConfig};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// The atomic counter / set / scalar store shared by all Warden instances.
///
/// The decision pipeline never talks to a concrete backend; it sees this
/// trait so the same engine runs against Redis in production and the
/// in-process store in tests.
#[async_trait]
pub trait Store: Send + Sync {
    /// Atomically add `delta` to `key` and return the new value.
    ///
    /// If the key did not exist, the new value is `delta` and the entry
    /// expires after `ttl`. An existing entry keeps its original expiry.
    async fn incr(&self, key: &str, delta: u64, ttl: Duration) -> Result<u64>;

    /// Add members to a named set. Insertion is idempotent.
    async fn set_add(&self, set: &str, members: &[String]) -> Result<()>;

    /// Remove members from a named set by exact value.
    async fn set_remove(&self, set: &str, members: &[String]) -> Result<()>;

    /// All members of a named set, in no particular order.
    async fn set_members(&self, set: &str) -> Result<Vec<String>>;

    /// Read a scalar key. `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a scalar key.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write one field of a hash.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// All fields of a hash. Empty when the hash is absent.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::error::WardenError;

    /// A store whose every operation fails, for exercising fail-open paths.
    pub(crate) struct FailingStore;

    impl FailingStore {
        fn err<T>(&self) -> Result<T> {
            Err(WardenError::Store("injected store failure".to_string()))
        }
    }

    #[async_trait]
    impl Store for FailingStore {
        async fn incr(&self, _key: &str, _delta: u64, _ttl: Duration) -> Result<u64> {
            self.err()
        }

        async fn set_add(&self, _set: &str, _members: &[String]) -> Result<()> {
            self.err()
        }

        async fn set_remove(&self, _set: &str, _members: &[String]) -> Result<()> {
            self.err()
        }

        async fn set_members(&self, _set: &str) -> Result<Vec<String>> {
            self.err()
        }

        async fn get(&self, _key: &str) -> Result<Option<String>> {
            self.err()
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            self.err()
        }

        async fn hash_set(&self, _key: &str, _field: &str, _value: &str) -> Result<()> {
            self.err()
        }

        async fn hash_get_all(&self, _key: &str) -> Result<HashMap<String, String>> {
            self.err()
        }
    }
}
