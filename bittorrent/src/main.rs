use std::sync::Arc;
use bittorrent::{
    Channel, ChannelListenerFactory, Config, ConnectionError, ConnectionListener, ConnectionManager,
};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

// Logs whatever peers send, without speaking the protocol.
struct LoggingPeer;

impl ConnectionListener for LoggingPeer {

    fn on_connected(&mut self, channel: &Channel) {
        tracing::info!("peer {} connected as {}", channel.peer, channel.id);
    }

    fn on_data(&mut self, channel: &Channel, data: &[u8]) {
        tracing::info!("{} bytes from {}", data.len(), channel.peer);
    }

    fn on_error(&mut self, channel: &Channel, error: &ConnectionError) {
        tracing::info!("peer {} gone: {}", channel.peer, error);
    }
}

struct LoggingPeers;

impl ChannelListenerFactory for LoggingPeers {
    fn create_listener(&self, _channel: &Channel) -> Box<dyn ConnectionListener> {
        Box::new(LoggingPeer)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {

    // Set up logging.
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let sub = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(sub)?;

    let config = Config::default();
    let ports = config.port_range.clone();
    let mut manager = ConnectionManager::new(config, Arc::new(LoggingPeers))?;
    let port = manager.bind(ports)?;
    manager.start(&tokio::runtime::Handle::current())?;
    println!("listening for peers on port {}, ctrl-c to stop", port);

    tokio::signal::ctrl_c().await?;

    // Shutdown blocks while the loop winds down.
    let closed = tokio::task::spawn_blocking(move || manager.close()).await?;
    if !closed {
        println!("connection manager did not close cleanly");
    }

    Ok(())
}
