use stream_relay::RelayEngine;
use stream_relay::config::EngineConfig;
use stream_relay::logging::{init_logging, install_panic_hook};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = EngineConfig::load()?;
    let _logging = init_logging(&config.logging)?;
    install_panic_hook(config.logging.directory.clone());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        source = %config.source.base_url,
        "Starting stream relay"
    );

    let engine = RelayEngine::new(config)?;
    engine.start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    engine.shutdown().await;
    Ok(())
}
