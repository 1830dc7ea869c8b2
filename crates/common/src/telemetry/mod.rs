//! Telemetry initialization
//!
//! One process-wide subscriber, installed once at startup by the
//! host; components receive it implicitly through `tracing` instead
//! of attaching their own sinks per call.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Call once from the host
/// binary before any component runs.
pub fn init() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .json()
        .init();
}

/// Plain (non-JSON) variant for local development and tests
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
