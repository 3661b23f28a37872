use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;

use rovernet::node::rover::Rover;
use rovernet::node::rover_config::RoverConfig;

/// A rover: advertises and maintains distance-vector routes over a multicast
/// group and can deliver a file to another rover across them.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// This rover's identity; its private address becomes 10.<id>.0.1
    #[arg(long)]
    rover_id: u8,

    /// Multicast group routing advertisements are exchanged on
    #[arg(long)]
    multicast_group: Ipv4Addr,

    /// Port of the multicast group
    #[arg(long)]
    multicast_port: u16,

    /// File to send to --destination
    #[arg(long, requires = "destination")]
    send_file: Option<PathBuf>,

    /// Private address of the rover to send the file to
    #[arg(long, requires = "send_file")]
    destination: Option<Ipv4Addr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut config = RoverConfig::new(cli.rover_id, cli.multicast_group, cli.multicast_port);
    config.file_to_send = cli.send_file;
    config.destination = cli.destination;

    Rover::new(config).run().await
}
