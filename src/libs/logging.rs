use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGING: OnceCell<()> = OnceCell::new();

/// Installs the global subscriber. `RUST_LOG` overrides `default_filter`.
/// Later calls, or a subscriber installed by the host, leave things as they are.
pub fn init_logging(default_filter: &str) {
    LOGGING.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init();
    });
}
