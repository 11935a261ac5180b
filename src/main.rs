use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use pronghorn_ofp::config::ControllerConfig;
use pronghorn_ofp::{Controller, OfpController};

#[derive(Parser)]
#[command(about = "OpenFlow 1.3 controller core")]
struct ControllerArgs {
    /// json5 configuration file; defaults apply when absent
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Overrides `listen_address` from the configuration
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,
}

fn main() -> pronghorn_ofp::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = ControllerArgs::parse();
    let mut config = match args.config {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen_address = listen;
    }

    let listener = TcpListener::bind(&config.listen_address)?;
    info!("listening for switches on {}", config.listen_address);
    let controller = Arc::new(Controller::new(config)?);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let controller = controller.clone();
                std::thread::spawn(move || {
                    if let Err(e) = controller.handle_client_connected(stream) {
                        error!("switch connection ended: {}", e);
                    }
                });
            }
            Err(e) => error!("accept failed: {}", e),
        }
    }
    Ok(())
}
