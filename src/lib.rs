//! A read-through caching proxy for an immutable, content-addressed package
//! ecosystem: registries, packages, and artifacts are named by UUID and
//! SHA-1-shaped hash, fetched once from a fleet of upstream storage servers,
//! and served from local disk forever after.
//!
//! # Modules
//! - [classify] decides whether a request target names a servable resource.
//! - [cache] owns the on-disk cache directory and atomic publish.
//! - [upstream] is the HTTP client used to probe and download from a single
//!   storage server.
//! - [engine] coalesces concurrent fetches for the same resource and races
//!   the upstream fleet for the winner.
//! - [registry] runs the background loop that keeps `cache/registries`
//!   converged with what upstreams advertise.
//! - [front_door] and [server] are the HTTP-facing glue.
//! - [config] and [tracing] are process bootstrap concerns.

/// HTTP response body handling.
pub mod body;

/// On-disk cache directory and atomic publish.
pub mod cache;

/// Request target classification.
pub mod classify;

/// Process configuration: JSON file plus environment overrides.
pub mod config;

/// Single-flight fetch engine and upstream race.
pub mod engine;

/// Streams a cached file into an HTTP response.
pub mod file_stream;

/// HTTP-facing request handling: classify, fetch, stream, or 404.
pub mod front_door;

/// Registry convergence loop.
pub mod registry;

/// HTTP accept loop.
pub mod server;

/// Structured logging setup.
pub mod tracing;

/// Core type definitions shared across HTTP-facing modules.
pub mod types;

/// The upstream storage-server client.
pub mod upstream;
