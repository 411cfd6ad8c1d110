use std::{error::Error, net::SocketAddr, sync::mpsc, time::Duration};

use clap::Parser;
use courier::{Config, Echo, MessageServer, config};
use log::info;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for new connections at address
    address: SocketAddr,
    /// Bytes buffered per connection between the socket and the decoder
    #[arg(long, default_value_t = config::DEFAULT_BUFFER_CAPACITY)]
    buffer_capacity: usize,
    /// Largest accepted frame body, in bytes
    #[arg(long, default_value_t = config::DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: u32,
    /// Drop connections idle for this many milliseconds
    #[arg(long)]
    read_timeout_ms: Option<u64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::default()
        .with_buffer_capacity(cli.buffer_capacity)
        .with_max_frame_size(cli.max_frame_size)
        .with_read_timeout(cli.read_timeout_ms.map(Duration::from_millis));

    let server = MessageServer::start(cli.address, Echo, config)?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    rx.recv()?;
    info!("received interrupt, shutting down");
    server.stop();
    Ok(())
}
