pub mod metrics;

pub use metrics::Metrics;

use tracing_subscriber::EnvFilter;

/// Install the process-wide log subscriber. `RUST_LOG` overrides `filter`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}
