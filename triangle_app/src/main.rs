//! Triangle demo
//!
//! Brings up the Vulkan device, then draws a single triangle until the window
//! is closed or Escape is pressed.
//!
//! Usage: `triangle [config.toml|config.ron]`

use std::path::PathBuf;

use ember_engine::prelude::*;

const DEFAULT_CONFIG_PATH: &str = "config/ember.toml";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // An explicit path must exist; the default one is optional
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => ApplicationConfig::load_from_file(&path)?,
        None => ApplicationConfig::load_or_default(DEFAULT_CONFIG_PATH)?,
    };

    // RUST_LOG overrides the configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.engine.log_level.as_str()))
        .init();

    log::info!("Starting {}", config.window.title);
    log::debug!("Configuration: {:?}", config);

    let app = VulkanApplication::new(config);
    match app.run() {
        Ok(stats) => {
            log::info!(
                "Exited cleanly after {} frames ({} swapchain rebuilds)",
                stats.frames_presented,
                stats.swapchain_rebuilds
            );
            Ok(())
        }
        Err(e) => {
            log::error!("Application failed: {}", e);
            Err(e.into())
        }
    }
}
