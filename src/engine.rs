//! The single-flight fetch engine: coalesces concurrent fetches for the same
//! resource, races upstreams for the winner, and remembers recent failures
//! so a hot-miss resource doesn't hammer every upstream on every request.
//!
//! This is the core of the proxy. Everything here follows one rule from the
//! concurrency model: shard locks guard only in-memory bookkeeping and are
//! never held across a network call or disk I/O.

use std::{
    collections::{HashMap, HashSet},
    hash::{BuildHasher, Hash, Hasher},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::{
    cache::CacheStore,
    upstream::{ProbeStatus, StorageServer, TransferStatus},
};

/// Outcome of a `fetch` call: a complete, readable file, or unavailable.
/// Nothing in the engine's public surface returns a `Result` — see the
/// error-handling design this mirrors at the upstream-client boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Path(PathBuf),
    Unavailable,
}

#[derive(Default)]
struct Shard {
    in_flight: HashMap<String, Arc<Notify>>,
    recent_failures: HashSet<String>,
}

/// First-come, non-blocking race winner selection: the first HEAD-200 task
/// to call `claim` performs the GET; everyone else backs off.
#[derive(Default)]
struct RaceLock(AtomicBool);

impl RaceLock {
    fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// Owns the fetch coordination tables and the cache store. Constructed once
/// at startup and shared (behind an `Arc`) between the front door and the
/// registry convergence loop — there is no module-level global state.
pub struct Engine {
    cache: CacheStore,
    shards: Vec<Mutex<Shard>>,
    servers: Vec<Arc<dyn StorageServer>>,
    hash_builder: std::collections::hash_map::RandomState,
}

impl Engine {
    pub fn new(cache: CacheStore, servers: Vec<Arc<dyn StorageServer>>, shard_count: usize) -> Self {
        assert!(shard_count.is_power_of_two(), "shard_count must be a power of two");
        let shards = (0..shard_count).map(|_| Mutex::new(Shard::default())).collect();
        Self {
            cache,
            shards,
            servers,
            hash_builder: std::collections::hash_map::RandomState::new(),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn servers(&self) -> &[Arc<dyn StorageServer>] {
        &self.servers
    }

    fn shard_for(&self, resource: &str) -> usize {
        let mut hasher = self.hash_builder.build_hasher();
        resource.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    /// `forget_failures`: clears every shard's failure set. Invoked on every
    /// convergence tick; leaves in-flight/leadership state untouched.
    pub fn forget_failures(&self) {
        for shard in &self.shards {
            shard.lock().recent_failures.clear();
        }
    }

    /// `fetch(resource)`, defaulting to racing every configured upstream.
    pub async fn fetch(&self, resource: &str) -> FetchOutcome {
        self.fetch_with_servers(resource, None).await
    }

    /// `fetch(resource, servers)`: constrain the race to a specific server
    /// subset, used by the registry convergence loop once cross-checking has
    /// narrowed down which upstreams actually carry a candidate hash.
    pub async fn fetch_with_servers(
        &self,
        resource: &str,
        servers: Option<&[Arc<dyn StorageServer>]>,
    ) -> FetchOutcome {
        if self.cache.exists(resource) {
            return FetchOutcome::Path(self.cache.resource_path(resource));
        }

        let shard_idx = self.shard_for(resource);
        let notify = {
            let mut shard = self.shards[shard_idx].lock();
            if shard.recent_failures.contains(resource) {
                return FetchOutcome::Unavailable;
            }
            if let Some(existing) = shard.in_flight.get(resource) {
                let existing = existing.clone();
                // `enable()` registers this waiter with the `Notify` while the
                // shard lock is still held, so a `notify_waiters()` call that
                // lands between dropping the lock and the first `poll` can't
                // be missed — registration, not the `.await`, is what matters.
                let notified = existing.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                drop(shard);
                notified.await;
                return if self.cache.exists(resource) {
                    FetchOutcome::Path(self.cache.resource_path(resource))
                } else {
                    FetchOutcome::Unavailable
                };
            }
            let notify = Arc::new(Notify::new());
            shard.in_flight.insert(resource.to_string(), notify.clone());
            notify
        };

        // Leader from here on. The notify must fire on every exit path, so
        // the shard cleanup below runs regardless of how `race` resolved.
        let outcome = self.race(resource, servers).await;

        {
            let mut shard = self.shards[shard_idx].lock();
            if !self.cache.exists(resource) {
                shard.recent_failures.insert(resource.to_string());
            }
            shard.in_flight.remove(resource);
        }
        notify.notify_waiters();

        outcome
    }

    async fn race(&self, resource: &str, servers: Option<&[Arc<dyn StorageServer>]>) -> FetchOutcome {
        let candidates: Vec<Arc<dyn StorageServer>> = match servers {
            Some(s) if !s.is_empty() => s.to_vec(),
            Some(_) => return FetchOutcome::Unavailable,
            None => self.servers.clone(),
        };
        if candidates.is_empty() {
            return FetchOutcome::Unavailable;
        }

        let temp_path = self.cache.new_temp_path();

        if candidates.len() == 1 {
            info!(server = candidates[0].base_url(), resource, "single-source GET");
            let status = candidates[0].get(resource, &temp_path).await;
            return self.finish_leader(resource, &temp_path, status).await;
        }

        let race = Arc::new(RaceLock::default());
        let mut tasks = Vec::with_capacity(candidates.len());
        for server in candidates {
            let race = race.clone();
            let resource = resource.to_string();
            let temp_path = temp_path.clone();
            tasks.push(tokio::spawn(async move {
                if server.head(&resource).await != ProbeStatus::Found {
                    return None;
                }
                if !race.claim() {
                    return None;
                }
                info!(server = server.base_url(), resource, "racing GET after HEAD win");
                Some(server.get(&resource, &temp_path).await)
            }));
        }

        let mut winner_status = None;
        for task in tasks {
            if let Ok(Some(status)) = task.await {
                winner_status = Some(status);
            }
        }

        match winner_status {
            Some(status) => self.finish_leader(resource, &temp_path, status).await,
            None => FetchOutcome::Unavailable,
        }
    }

    async fn finish_leader(
        &self,
        resource: &str,
        temp_path: &Path,
        status: TransferStatus,
    ) -> FetchOutcome {
        match status {
            TransferStatus::Complete => match self.cache.publish(temp_path, resource).await {
                Ok(path) => FetchOutcome::Path(path),
                Err(err) => {
                    warn!(resource, error = %err, "cache publish failed");
                    let _ = tokio::fs::remove_file(temp_path).await;
                    FetchOutcome::Unavailable
                }
            },
            TransferStatus::HttpError(status) => {
                let _ = tokio::fs::remove_file(temp_path).await;
                warn!(resource, %status, "upstream GET returned non-200");
                FetchOutcome::Unavailable
            }
            TransferStatus::NetworkError => {
                let _ = tokio::fs::remove_file(temp_path).await;
                warn!(resource, "upstream GET failed with a network error");
                FetchOutcome::Unavailable
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-process fake upstream, per the design notes' suggestion that the
    /// `StorageServer` abstraction exists precisely to ease this kind of
    /// test.
    #[derive(Debug)]
    pub struct FakeServer {
        pub name: String,
        pub has: Option<Vec<u8>>,
        pub head_calls: AtomicUsize,
        pub get_calls: AtomicUsize,
        pub get_delay: Option<Duration>,
    }

    impl FakeServer {
        pub fn new(name: &str, has: Option<&[u8]>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                has: has.map(|b| b.to_vec()),
                head_calls: AtomicUsize::new(0),
                get_calls: AtomicUsize::new(0),
                get_delay: None,
            })
        }

        pub fn slow(name: &str, has: &[u8], delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                has: Some(has.to_vec()),
                head_calls: AtomicUsize::new(0),
                get_calls: AtomicUsize::new(0),
                get_delay: Some(delay),
            })
        }
    }

    #[async_trait]
    impl StorageServer for FakeServer {
        fn base_url(&self) -> &str {
            &self.name
        }

        async fn head(&self, _resource: &str) -> ProbeStatus {
            self.head_calls.fetch_add(1, Ordering::SeqCst);
            match &self.has {
                Some(_) => ProbeStatus::Found,
                None => ProbeStatus::Missing,
            }
        }

        async fn get(&self, _resource: &str, dest: &Path) -> TransferStatus {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.get_delay {
                tokio::time::sleep(delay).await;
            }
            match &self.has {
                Some(bytes) => {
                    if tokio::fs::write(dest, bytes).await.is_err() {
                        return TransferStatus::NetworkError;
                    }
                    TransferStatus::Complete
                }
                None => TransferStatus::HttpError(hyper::StatusCode::NOT_FOUND),
            }
        }

        async fn get_bytes(&self, _resource: &str) -> Option<Vec<u8>> {
            self.has.clone()
        }
    }
}
