//! Structured logging setup.
//!
//! Configures the global `tracing` subscriber from a filter string (the
//! `RUST_LOG`-style syntax `tracing_subscriber::EnvFilter` understands) so an
//! operator can raise verbosity for one module without recompiling.

use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global tracing subscriber. `filter` is an `EnvFilter`
/// directive string, e.g. `"info"` or `"pantry=debug,hyper=warn"`.
pub fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_file(true)
                .with_line_number(true)
                .with_level(true)
                .with_filter(env_filter),
        )
        .init();
}
