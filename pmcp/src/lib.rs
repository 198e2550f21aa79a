//! physical-mcp: an always-on ambient perception engine.
//!
//! Frames flow from cameras through cheap perceptual-hash change detection
//! and a sampling gate into a vision language model; user-defined watch
//! rules are evaluated against the model's output and trigger notifications
//! with photo attachments. An HTTP surface exposes live MJPEG, frames,
//! scene state, rule CRUD and an alert replay log; the MCP tool surface
//! wraps the same operations.

use std::time::Duration;

use eyre::WrapErr;
use tracing::{info, warn};

pub mod alert_log;
pub mod changes;
pub mod engine;
pub mod http_api;
pub mod imutil;
pub mod mdns;
pub mod memory;
pub mod notify;
pub mod pending;
pub mod perception;
pub mod provider;
pub mod rules;
pub mod sampler;
pub mod scene;
pub mod stats;
pub mod tracing_logger;

pub use engine::Engine;
pub use pmcp_config_data::PmcpConfig;

/// Grace period for in-flight notification deliveries at shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Run the engine until SIGINT/SIGTERM.
///
/// Fatal errors (config already validated by the caller; socket bind here)
/// bubble up; everything after startup is handled inside the loops.
pub async fn run(config: PmcpConfig) -> eyre::Result<()> {
    let addr = format!("{}:{}", config.vision_api.host, config.vision_api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("binding vision api to {addr}"))?;

    let mdns = match mdns::MdnsAdvertiser::start(config.vision_api.port) {
        Ok(m) => Some(m),
        Err(e) => {
            warn!("mDNS advertisement unavailable: {e}");
            None
        }
    };

    let engine = Engine::new(config)?;
    engine.startup().await;

    let server = {
        let engine = engine.clone();
        tokio::spawn(async move { http_api::serve(engine, listener).await })
    };

    wait_for_signal().await;
    info!("signal received");
    engine.shutdown(SHUTDOWN_GRACE).await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("http server ended with error: {e}"),
        Err(e) => warn!("http server task join failed: {e}"),
    }
    drop(mdns);
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
