//! `huddle-server`: run the chat server.
//!
//! Configuration comes from `HUDDLE_*` environment variables, logging from
//! `RUST_LOG` (default `info`).

use log::{error, info};

use huddle_server::{ChatServer, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };
    info!(
        "Starting huddle-server on {} (names: {:?}, max message {} bytes)",
        config.bind_addr, config.name_policy, config.max_message_bytes
    );

    let server = ChatServer::new(config);
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats();
            info!(
                "Shutting down: {} connections served, {} deliveries, {} failed",
                stats.total_connections, stats.deliveries, stats.delivery_failures
            );
        }
    }
}
