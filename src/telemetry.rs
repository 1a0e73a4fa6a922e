//! Tracing/metrics bootstrap.
//!
//! Construction happens once at process start; the engine itself only ever
//! emits through the `tracing`/`metrics` facades and never owns a global
//! handle directly (see DESIGN.md, "Global state").

/// Initialize the global tracing subscriber with an `EnvFilter`, falling
/// back to a sane default when `RUST_LOG` is unset.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "obscore=info,reqwest=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok();
}

/// Metric names, kept in one place so call sites can't drift on spelling.
pub mod metric_names {
    pub const FANOUT_DURATION: &str = "obscore_fanout_duration_ms";
    pub const FANOUT_SUCCESS: &str = "obscore_fanout_success_total";
    pub const FANOUT_FAILURE: &str = "obscore_fanout_failure_total";
    pub const RETRY_ATTEMPTS: &str = "obscore_retry_attempts_total";
    pub const CORRELATIONS_EMITTED: &str = "obscore_correlations_emitted_total";
}
