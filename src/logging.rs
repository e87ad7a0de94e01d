use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber: `RUST_LOG` if set, `info` otherwise.
///
/// For binaries; the library only emits events.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // a second init (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
