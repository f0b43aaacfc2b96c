//! BYOH Host Agent
//!
//! Runs on every bring-your-own host. Registers the host as a ByoHost, then
//! executes the install, bootstrap and reset scripts the manager assigns to it.

mod cloudinit;
mod config;
mod controller;
mod error;
mod reconciler;
mod registration;
mod runtime;
mod watcher;

#[cfg(test)]
mod test_utils;

use controller::Controller;
use crate::config::AgentConfig;
use crate::error::AgentError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    tracing_subscriber::fmt::init();

    info!("Starting BYOH Agent");

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider already installed");
    }

    let config = AgentConfig::from_env()?;
    config.log();

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
