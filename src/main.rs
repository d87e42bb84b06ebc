//! RAX FTP Server - Entry Point
//!
//! Loads configuration, starts the connection service and the control
//! listener, and shuts both down on Ctrl-C.

use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;

use rax_ftpd_core::auth::InMemoryUserDirectory;
use rax_ftpd_core::config::DEFAULT_CONFIG_PATH;
use rax_ftpd_core::{ConnectionService, Listener, ServerConfig};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match ServerConfig::load(&config_path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Launching FTP server...");

    let directory = Arc::new(InMemoryUserDirectory::new());
    let service = match ConnectionService::start(config.connections.clone(), directory).await {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to start connection service: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let listener = Listener::new(Arc::clone(&config), Arc::clone(&service));
    if let Err(e) = listener.start().await {
        error!("{}", e);
        service.dispose().await;
        return ExitCode::FAILURE;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Shutting down");
    listener.stop().await;
    service.dispose().await;
    ExitCode::SUCCESS
}
