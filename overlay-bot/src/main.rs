//! Overlay Bot - Main entry point.

use anyhow::Result;
use overlay_bot::start_server;
use overlay_common::config::Config;
use overlay_common::logging::init_logging_with_exclusions;

#[tokio::main]
async fn main() -> Result<()> {
    // Missing token or store URL stops us here
    let config = Config::load_and_validate()?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Overlay Bot v{}", env!("CARGO_PKG_VERSION"));

    start_server(&config).await
}
