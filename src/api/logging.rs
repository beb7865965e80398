use std::sync::Once;
use tracing::info;
use tracing_subscriber::EnvFilter;

static INIT_TRACING: Once = Once::new();

/// Install the global tracing subscriber. `RUST_LOG` wins when set;
/// otherwise `debug` selects the default level. Later calls are no-ops.
pub fn init_tracing(debug: bool) {
    INIT_TRACING.call_once(|| {
        let default_level = if debug { "debug" } else { "info" };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{default_level},hyper=warn,tower_http=warn"))
        });

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();

        info!("spine landmark tracing initialized");
    });
}
