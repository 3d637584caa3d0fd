use std::path::PathBuf;

use interview_collab::{RoomServer, ServerConfig};
use log::{error, info};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match ServerConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    info!(
        "Starting interview room server on {} (max {} participants per room, idle grace {}s)",
        config.bind_addr, config.max_participants_per_room, config.idle_grace_secs
    );

    let server = RoomServer::new(config);
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            info!(
                "Shutting down: {} rooms, {} sessions, {} events appended",
                stats.active_rooms, stats.active_sessions, stats.events_appended
            );
        }
    }
}
