//! TTL store boundary.
//!
//! Every record in the credential core carries its own expiration, so the
//! storage contract is a cache, not a database: set-with-expiry, get, delete,
//! atomic take, and atomic increment-with-expiry. `take` is the consuming
//! primitive behind single-use tokens; a plain get-then-delete would let two
//! concurrent requests both believe they consumed the same token.

pub mod memory;

use async_trait::async_trait;
use std::time::Duration;

pub use memory::MemoryTtlStore;

/// Shared key-value store with per-entry expiration.
///
/// Implementations are externally synchronized (e.g. Redis); the core holds
/// no in-process locks and assumes no single-node affinity. Errors are
/// transient infrastructure failures; services surface them as
/// `StoreUnavailable` rather than retrying internally.
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Write a value with the given TTL, replacing any existing entry.
    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> anyhow::Result<()>;

    /// Read a value; `None` when absent or expired.
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Atomically read and delete a value (Redis `GETDEL` semantics).
    ///
    /// Exactly one of any set of concurrent callers observes the value.
    async fn take(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Delete an entry; deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Atomically increment an integer counter, returning the new value.
    ///
    /// When the key is absent the counter starts at 1 with the given TTL;
    /// when present the TTL is left untouched, so the expiry window stays
    /// anchored to the first increment.
    async fn incr(&self, key: &str, ttl: Duration) -> anyhow::Result<u64>;
}
