//! Process configuration: a JSON file plus two environment overrides. No CLI
//! flag parser — the file path is the only argument `main` takes.

use std::{collections::HashSet, net::SocketAddr, path::Path};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use uuid::Uuid;

fn default_shard_count() -> usize {
    1024
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_head_timeout_secs() -> u64 {
    30
}

fn default_get_timeout_secs() -> u64 {
    300
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_cache_dir() -> String {
    "cache".to_string()
}

fn default_temp_dir() -> String {
    "temp".to_string()
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    listen_addr: String,
    upstreams: Vec<String>,
    registries: Vec<Uuid>,
    #[serde(default = "default_shard_count")]
    shard_count: usize,
    #[serde(default = "default_tick_interval_secs")]
    tick_interval_secs: u64,
    #[serde(default = "default_head_timeout_secs")]
    head_timeout_secs: u64,
    #[serde(default = "default_get_timeout_secs")]
    get_timeout_secs: u64,
    #[serde(default = "default_log_filter")]
    log_filter: String,
    #[serde(default = "default_cache_dir")]
    cache_dir: String,
    #[serde(default = "default_temp_dir")]
    temp_dir: String,
}

/// Fully resolved, validated configuration. Built once at startup; nothing in
/// the serving core reads from the environment or re-parses this file.
#[derive(Debug)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub upstreams: Vec<String>,
    pub registries: Vec<Uuid>,
    pub shard_count: usize,
    pub tick_interval_secs: u64,
    pub head_timeout_secs: u64,
    pub get_timeout_secs: u64,
    pub log_filter: String,
    pub cache_dir: String,
    pub temp_dir: String,
}

/// Loads and validates configuration from `path`, applying `PANTRY_LISTEN_ADDR`
/// and `PANTRY_LOG` environment overrides on top of the file. This is the one
/// place in the process where a startup-time error is allowed to propagate as
/// an `anyhow::Error` up to `main`.
pub fn load(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let raw: RawConfig =
        serde_json::from_str(&contents).with_context(|| format!("parsing config file {}", path.display()))?;

    if raw.upstreams.is_empty() {
        bail!("config: at least one upstream is required");
    }

    let mut seen = HashSet::new();
    for uuid in &raw.registries {
        if !seen.insert(*uuid) {
            bail!("config: duplicate registry uuid {uuid}");
        }
    }

    if !raw.shard_count.is_power_of_two() {
        bail!("config: shard_count must be a power of two, got {}", raw.shard_count);
    }

    let listen_addr_str = std::env::var("PANTRY_LISTEN_ADDR").unwrap_or(raw.listen_addr);
    let listen_addr: SocketAddr = listen_addr_str
        .parse()
        .with_context(|| format!("invalid listen address {listen_addr_str:?}"))?;

    let log_filter = std::env::var("PANTRY_LOG").unwrap_or(raw.log_filter);

    Ok(Config {
        listen_addr,
        upstreams: raw.upstreams,
        registries: raw.registries,
        shard_count: raw.shard_count,
        tick_interval_secs: raw.tick_interval_secs,
        head_timeout_secs: raw.head_timeout_secs,
        get_timeout_secs: raw.get_timeout_secs,
        log_filter,
        cache_dir: raw.cache_dir,
        temp_dir: raw.temp_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pantry.json"), contents).unwrap();
        dir
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let dir = write_config(
            r#"{"listen_addr": "127.0.0.1:9000", "upstreams": ["http://a.example"], "registries": []}"#,
        );
        let config = load(dir.path().join("pantry.json")).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.shard_count, 1024);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn rejects_empty_upstreams() {
        let dir = write_config(r#"{"listen_addr": "127.0.0.1:9000", "upstreams": [], "registries": []}"#);
        assert!(load(dir.path().join("pantry.json")).is_err());
    }

    #[test]
    fn rejects_non_power_of_two_shard_count() {
        let dir = write_config(
            r#"{"listen_addr": "127.0.0.1:9000", "upstreams": ["http://a.example"], "registries": [], "shard_count": 10}"#,
        );
        assert!(load(dir.path().join("pantry.json")).is_err());
    }

    #[test]
    fn rejects_duplicate_registry_uuids() {
        let u = "8cf4e0fa-c3c7-4ee4-b1a3-0e58a810291a";
        let dir = write_config(&format!(
            r#"{{"listen_addr": "127.0.0.1:9000", "upstreams": ["http://a.example"], "registries": ["{u}", "{u}"]}}"#
        ));
        assert!(load(dir.path().join("pantry.json")).is_err());
    }

    #[test]
    fn listen_addr_env_override_wins() {
        let dir = write_config(
            r#"{"listen_addr": "127.0.0.1:9000", "upstreams": ["http://a.example"], "registries": []}"#,
        );
        // SAFETY-equivalent: tests in this module don't run concurrently with
        // other env-reading tests in this process.
        unsafe { std::env::set_var("PANTRY_LISTEN_ADDR", "127.0.0.1:9999") };
        let config = load(dir.path().join("pantry.json")).unwrap();
        unsafe { std::env::remove_var("PANTRY_LISTEN_ADDR") };
        assert_eq!(config.listen_addr, "127.0.0.1:9999".parse().unwrap());
    }
}
