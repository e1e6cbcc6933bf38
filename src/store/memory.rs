//! In-memory TTL store.
//!
//! Mutex-protected map with lazy expiry against an injected clock. Suitable
//! for tests and single-node deployments; `take` and `incr` hold the map
//! lock for the whole operation, which gives them the atomicity the token
//! and counter contracts require.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::clock::Clock;
use crate::store::TtlStore;

#[derive(Clone, Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// In-memory [`TtlStore`] implementation.
pub struct MemoryTtlStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryTtlStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn expiry(&self, ttl: Duration) -> Result<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(ttl).context("ttl out of range")?;
        Ok(self.clock.now() + ttl)
    }

    fn live_entry(entry: Option<&Entry>, now: DateTime<Utc>) -> Option<Entry> {
        entry.filter(|entry| entry.expires_at > now).cloned()
    }
}

#[async_trait]
impl TtlStore for MemoryTtlStore {
    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let expires_at = self.expiry(ttl)?;
        self.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let live = Self::live_entry(entries.get(key), now);
        if live.is_none() {
            entries.remove(key);
        }
        Ok(live.map(|entry| entry.value))
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let live = Self::live_entry(entries.get(key), now);
        entries.remove(key);
        Ok(live.map(|entry| entry.value))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl)?;
        let mut entries = self.lock();
        let current = match Self::live_entry(entries.get(key), now) {
            Some(entry) => {
                let text = std::str::from_utf8(&entry.value)
                    .map_err(|_| anyhow!("counter value is not valid utf-8"))?;
                let count: u64 = text
                    .parse()
                    .map_err(|_| anyhow!("counter value is not an integer"))?;
                // Keep the original expiry; the window is anchored to the
                // first increment.
                Some((count + 1, entry.expires_at))
            }
            None => None,
        };
        let (next, expires_at) = current.unwrap_or((1, expires_at));
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(next)
    }
}
