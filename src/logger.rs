use std::sync::Once;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

/// Log timestamp format
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const DEFAULT_FILTER: &str = "watch_signal=debug,webrtc=warn";

static INIT: Once = Once::new();

/// Whether log output is switched on for this build.
pub fn logging_enabled() -> bool {
    crate::config::LOGGING_ENABLED && crate::config::dev::ENABLE_LOGGING
}

/// Installs the global subscriber once; later calls are no-ops.
///
/// `RUST_LOG` overrides the default filter. Does nothing when logging is
/// disabled for the build, unless `force` is set.
pub fn init_logging(force: bool) {
    if !force && !logging_enabled() {
        return;
    }

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        // another subscriber may already be installed by the host application
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
            .with_target(false)
            .try_init();
    });
}
