//! Logging setup: console plus optional file, filtered by `RUST_LOG`.

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "pmcp=info,pmcp_camera=info,tower_http=warn,warn";

/// Initialize global logging. Returns an error if a subscriber was already
/// installed (tests may hit this; they can ignore it).
pub fn init(
    log_file: Option<&std::path::Path>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            Some(
                fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true),
            )
        }
        None => None,
    };

    let console_layer = fmt::layer().with_target(true);

    let collector = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);
    tracing::subscriber::set_global_default(collector)?;
    Ok(())
}
