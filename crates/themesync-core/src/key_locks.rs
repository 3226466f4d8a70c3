//! Per-key serialization of async work.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// Runs work for the same key one at a time while different keys proceed in
/// parallel. A key's lock is dropped from the map once nobody holds or waits
/// on it, so the map only ever holds keys with work in flight.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` once every earlier call for `key` has finished.
    pub async fn serialize<T>(&self, key: &str, work: impl Future<Output = T>) -> T {
        let lock = self.locks.entry(key.to_string()).or_default().clone();
        let out = {
            let _guard = lock.lock().await;
            work.await
        };
        // The map and `lock` are the only holders: no one is waiting.
        self.locks
            .remove_if(key, |_, held| Arc::strong_count(held) == 2);
        out
    }

    /// Keys with work running or queued.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
