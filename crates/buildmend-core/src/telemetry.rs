//! Tracing initialisation for Buildmend binaries.
//!
//! The global subscriber can only be set once per process, so repeated
//! calls are silently ignored — library tests and embedding applications
//! may both attempt initialisation.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` takes precedence for filtering; `level` is the default
/// verbosity when it is not set. With `json` enabled, log lines are
/// newline-delimited JSON for aggregation pipelines; otherwise a compact
/// human-readable format is used.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("buildmend={level},{level}")));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().with_target(false).compact())
            .try_init()
            .ok();
    }
}
