use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

static INSTALLED: OnceCell<bool> = OnceCell::new();

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `config.filter`. Only the first call has any effect; the
/// return value says whether that call managed to install the subscriber (it
/// fails if the host application already installed its own).
pub fn init_tracing(config: &LoggingConfig) -> bool {
    *INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(config.ansi).with_target(true))
            .try_init()
            .is_ok()
    })
}
