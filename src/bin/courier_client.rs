use std::{error::Error, net::SocketAddr};

use clap::Parser;
use courier::{Config, Message, MessageClient, config};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address of a running courier server
    address: SocketAddr,
    /// Strings to send, one request each
    #[arg(required = true)]
    values: Vec<String>,
    /// Largest accepted frame body, in bytes
    #[arg(long, default_value_t = config::DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: u32,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::default().with_max_frame_size(cli.max_frame_size);
    let mut client = MessageClient::connect(cli.address, &config)?;

    for value in &cli.values {
        let mut request = Message::new();
        request.put_string(Some(value));

        let mut response = client.send_message(&request)?;
        while response.remaining() > 0 {
            match response.get_string()? {
                Some(s) => println!("{s}"),
                None => println!("<null>"),
            }
        }
    }

    client.disconnect()?;
    Ok(())
}
