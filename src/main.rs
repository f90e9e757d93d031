use std::sync::Arc;

use catalogd::configuration::{CliArgs, Config};
use catalogd::controller::Controller;
use catalogd::web_interface::WebServer;
use clap::Parser;
use log::{error, info};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    info!("Importing configuration");
    let args = CliArgs::parse();
    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration: {}", e);
            std::process::exit(1);
        }
    };
    let addr = match config.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid listen address: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration imported successfully");

    let controller = match Controller::new(config) {
        Ok(controller) => Arc::new(controller),
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    let sweeper = controller.spawn_sweeper();
    let server = WebServer::new(Arc::clone(&controller));

    tokio::select! {
        _ = server.start(addr) => {
            error!("Web interface stopped unexpectedly");
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Unable to listen for the shutdown signal: {}", e);
            }
            info!("Shutdown requested");
        }
    }

    sweeper.abort();
    controller.shutdown();
    info!("Bye");
}
