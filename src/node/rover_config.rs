use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug)]
pub struct RoverConfig {
    /// This rover's 8-bit identity; determines the private address `10.<id>.0.1`.
    pub rover_id: u8,
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,

    /// Set together with `destination` to originate a file transfer.
    pub file_to_send: Option<PathBuf>,
    pub destination: Option<Ipv4Addr>,

    /// Cadence of periodic full-table advertisements.
    pub advertisement_interval: Duration,
    /// Silence after which a neighbor is declared dead.
    pub dead_interval: Duration,
    /// Grace period before the sender starts, letting routes converge.
    pub transfer_startup_delay: Duration,
    /// How often the sender re-checks the table for a missing destination.
    pub route_poll_interval: Duration,
    /// How long the sender waits for an acknowledgement before retransmitting.
    pub ack_timeout: Duration,
}

impl RoverConfig {
    pub fn new(rover_id: u8, multicast_group: Ipv4Addr, multicast_port: u16) -> RoverConfig {
        RoverConfig {
            rover_id,
            multicast_group,
            multicast_port,
            file_to_send: None,
            destination: None,
            advertisement_interval: Duration::from_secs(5),
            dead_interval: Duration::from_secs(7),
            transfer_startup_delay: Duration::from_secs(3),
            route_poll_interval: Duration::from_secs(5),
            ack_timeout: Duration::from_millis(1000),
        }
    }
}
