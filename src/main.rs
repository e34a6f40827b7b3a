mod app;
mod audio;
mod config;
mod error;
mod messages;
mod pitch;
mod services;
mod track;
mod transport;

use app::App;
use config::Config;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting rehearsal practice engine");

    let config = Config::load()?;
    config.validate()?;

    // LocalSet for the !Send output stream held by the transport
    let local = tokio::task::LocalSet::new();

    local
        .run_until(async move { App::new(config)?.run().await })
        .await
}
