use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::info;

use crate::node::control_plane::ControlPlane;
use crate::node::rover_config::RoverConfig;
use crate::routing::distance_vector::{AdvertisementSink, DistanceVector};
use crate::routing::liveness::NeighborTimers;
use crate::routing::route_table::RouteTable;
use crate::routing::{RoutingEvent, LOCAL_SUBNET_PREFIX};
use crate::transfer::receiver::run_data_plane;
use crate::transfer::sender::send_file;
use crate::transfer::{ACK_PORT, DATA_PORT};
use crate::util::addr::{discover_public_address, private_address_for_id};
use crate::wire::advertisement::{RipCommand, RouteRecord};

const EVENT_QUEUE_DEPTH: usize = 64;

/// A rover node: wires the routing protocol and the data plane together and
///  runs them until a transfer completes or a fatal I/O error occurs.
pub struct Rover {
    config: Arc<RoverConfig>,
}

impl Rover {
    pub fn new(config: RoverConfig) -> Rover {
        Rover {
            config: Arc::new(config),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let config = self.config.clone();

        let my_private = private_address_for_id(config.rover_id);
        let my_public = discover_public_address()?;
        match (&config.file_to_send, config.destination) {
            (Some(file), Some(destination)) => info!(
                "rover {} is up: public {}, private {}, sending {} to {}",
                config.rover_id,
                my_public,
                my_private,
                file.display(),
                destination
            ),
            _ => info!(
                "rover {} is up: public {}, private {}",
                config.rover_id, my_public, my_private
            ),
        }

        let table = Arc::new(RouteTable::new());
        table
            .put(RouteRecord {
                destination: my_private,
                subnet_mask: LOCAL_SUBNET_PREFIX,
                next_hop: my_public,
                metric: 1,
            })
            .await;

        let control_plane = Arc::new(ControlPlane::bind(config.multicast_group, config.multicast_port)?);
        let data_socket = Arc::new(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, DATA_PORT)).await?);
        let ack_socket = Arc::new(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, ACK_PORT)).await?);

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let distance_vector = DistanceVector::new(
            config.rover_id,
            my_private,
            my_public,
            table.clone(),
            NeighborTimers::new(config.dead_interval, events_tx.clone()),
            control_plane.clone(),
        );

        // the first arm to finish ends the process: Ok for a completed
        // transfer, Err for a fatal I/O failure
        select! {
            r = Self::periodic_advertisements(control_plane.clone(), table.clone(), config.rover_id, config.advertisement_interval) => r,
            r = control_plane.recv_loop(events_tx) => r,
            r = Self::routing_event_loop(distance_vector, events_rx) => r,
            r = run_data_plane(data_socket.clone(), table.clone(), my_private) => r,
            r = Self::maybe_send_file(data_socket, ack_socket, table, my_private, config) => r,
        }
    }

    /// Emits the full table at the configured cadence, starting immediately.
    async fn periodic_advertisements(
        control_plane: Arc<ControlPlane>,
        table: Arc<RouteTable>,
        rover_id: u8,
        every: Duration,
    ) -> anyhow::Result<()> {
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            let advertisement = table.current_advertisement(RipCommand::Update, rover_id).await;
            control_plane.emit(&advertisement).await?;
        }
    }

    /// Serializes all routing table mutations: advertisements and death
    ///  notices are processed one at a time, and any triggered update hits the
    ///  wire before the next event is taken.
    async fn routing_event_loop(
        mut distance_vector: DistanceVector,
        mut events: mpsc::Receiver<RoutingEvent>,
    ) -> anyhow::Result<()> {
        while let Some(event) = events.recv().await {
            match event {
                RoutingEvent::Advertisement {
                    source_public,
                    advertisement,
                } => {
                    distance_vector
                        .on_advertisement(source_public, advertisement)
                        .await?
                }
                RoutingEvent::NeighborDeath {
                    private,
                    public,
                    generation,
                } => {
                    distance_vector
                        .on_neighbor_death(private, public, generation)
                        .await?
                }
            }
        }
        Ok(())
    }

    async fn maybe_send_file(
        data_socket: Arc<UdpSocket>,
        ack_socket: Arc<UdpSocket>,
        table: Arc<RouteTable>,
        my_private: Ipv4Addr,
        config: Arc<RoverConfig>,
    ) -> anyhow::Result<()> {
        match (&config.file_to_send, config.destination) {
            (Some(path), Some(destination)) => {
                let path = path.clone();
                send_file(
                    data_socket,
                    ack_socket,
                    table,
                    my_private,
                    destination,
                    &path,
                    config.clone(),
                )
                .await
            }
            _ => std::future::pending().await,
        }
    }
}
