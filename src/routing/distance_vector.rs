use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tracing::{debug, info, trace};

use crate::routing::liveness::NeighborTimers;
use crate::routing::route_table::RouteTable;
use crate::routing::LOCAL_SUBNET_PREFIX;
use crate::util::addr::private_address_for_id;
use crate::wire::advertisement::{Advertisement, RipCommand, RouteRecord, INFINITY_METRIC};

/// Where triggered (and requested) advertisements are emitted to. In
///  production this is the multicast control plane; tests substitute a
///  recording sink.
#[async_trait]
pub trait AdvertisementSink: Send + Sync {
    async fn emit(&self, advertisement: &Advertisement) -> anyhow::Result<()>;
}

/// The last advertisement heard from a neighbor, kept for a future full path
///  recomputation on neighbor death. The death path itself only poisons
///  routes via the dead next hop.
struct CachedAdvertisement {
    public_address: Ipv4Addr,
    records: Vec<RouteRecord>,
}

/// The distance-vector state machine. Consumes decoded advertisements and
///  neighbor death notices, is the only mutator of the routing table, and
///  emits triggered updates. Driven from a single event loop, so one
///  advertisement (or death) is fully processed before the next.
pub struct DistanceVector {
    rover_id: u8,
    my_private: Ipv4Addr,
    my_public: Ipv4Addr,
    table: Arc<RouteTable>,
    timers: NeighborTimers,
    neighbor_cache: FxHashMap<Ipv4Addr, CachedAdvertisement>,
    sink: Arc<dyn AdvertisementSink>,
}

impl DistanceVector {
    pub fn new(
        rover_id: u8,
        my_private: Ipv4Addr,
        my_public: Ipv4Addr,
        table: Arc<RouteTable>,
        timers: NeighborTimers,
        sink: Arc<dyn AdvertisementSink>,
    ) -> DistanceVector {
        DistanceVector {
            rover_id,
            my_private,
            my_public,
            table,
            timers,
            neighbor_cache: Default::default(),
            sink,
        }
    }

    pub async fn on_advertisement(
        &mut self,
        source_public: Ipv4Addr,
        advertisement: Advertisement,
    ) -> anyhow::Result<()> {
        if advertisement.rover_id == self.rover_id {
            trace!("dropping our own multicast echo");
            return Ok(());
        }

        let before = self.table.signature().await;

        let source_private = private_address_for_id(advertisement.rover_id);
        self.neighbor_cache.insert(
            source_private,
            CachedAdvertisement {
                public_address: source_public,
                records: advertisement.records.clone(),
            },
        );

        // hearing from a rover means it is one hop away, whatever we believed before
        self.table
            .put(RouteRecord {
                destination: source_private,
                subnet_mask: LOCAL_SUBNET_PREFIX,
                next_hop: source_public,
                metric: 1,
            })
            .await;

        self.timers.touch(source_private, source_public);

        for record in &advertisement.records {
            if record.destination == self.my_private {
                continue;
            }
            self.apply_record(source_public, record).await;
        }

        let after = self.table.signature().await;
        if before != after {
            info!("routing table updated by {}:\n{}", source_private, after);
            self.emit_update().await?;
        } else if advertisement.command == RipCommand::Request {
            debug!("update requested by {}", source_private);
            self.emit_update().await?;
        }
        Ok(())
    }

    /// The distance-vector update rule for one advertised record. A record
    ///  claiming to reach its destination through us is read as unreachable
    ///  (split horizon by poisoning).
    async fn apply_record(&self, source_public: Ipv4Addr, record: &RouteRecord) {
        let advertised = if record.next_hop == self.my_public {
            INFINITY_METRIC as u16
        } else {
            record.metric as u16
        };
        let new_metric = (1 + advertised).min(INFINITY_METRIC as u16) as u8;

        let replace = match self.table.get(record.destination).await {
            None => true,
            // the current next hop is trusted to refresh its own route, even to a worse
            // metric; anyone else must offer a strictly better path
            Some(current) => current.next_hop == source_public || (current.metric as u16) > 1 + advertised,
        };

        if replace {
            self.table
                .put(RouteRecord {
                    destination: record.destination,
                    subnet_mask: record.subnet_mask,
                    next_hop: source_public,
                    metric: new_metric,
                })
                .await;
        }
    }

    pub async fn on_neighbor_death(
        &mut self,
        private: Ipv4Addr,
        public: Ipv4Addr,
        generation: u64,
    ) -> anyhow::Result<()> {
        if !self.timers.is_current(private, generation) {
            debug!("discarding death notice for {}, a heartbeat overtook it", private);
            return Ok(());
        }
        self.timers.cancel(private);

        info!("neighbor {} ({}) is dead", private, public);

        self.table.set_metric(private, INFINITY_METRIC).await;
        self.table.mark_unreachable_via(public).await;

        if let Some(cached) = self.neighbor_cache.get(&private) {
            debug!(
                "retaining {} cached records from {} ({})",
                cached.records.len(),
                private,
                cached.public_address
            );
        }

        info!("routing table after death of {}:\n{}", private, self.table.signature().await);
        self.emit_update().await
    }

    async fn emit_update(&self) -> anyhow::Result<()> {
        let advertisement = self
            .table
            .current_advertisement(RipCommand::Update, self.rover_id)
            .await;
        self.sink.emit(&advertisement).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RoutingEvent;
    use std::time::Duration;
    use tokio::sync::{mpsc, Mutex};

    const DEAD_INTERVAL: Duration = Duration::from_secs(7);

    struct RecordingSink {
        emitted: Mutex<Vec<Advertisement>>,
    }

    impl RecordingSink {
        fn new() -> Arc<RecordingSink> {
            Arc::new(RecordingSink {
                emitted: Mutex::new(Vec::new()),
            })
        }

        async fn emitted_count(&self) -> usize {
            self.emitted.lock().await.len()
        }
    }

    #[async_trait]
    impl AdvertisementSink for RecordingSink {
        async fn emit(&self, advertisement: &Advertisement) -> anyhow::Result<()> {
            self.emitted.lock().await.push(advertisement.clone());
            Ok(())
        }
    }

    fn private(n: u8) -> Ipv4Addr {
        private_address_for_id(n)
    }

    fn public(n: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 1, n)
    }

    fn record(destination: Ipv4Addr, next_hop: Ipv4Addr, metric: u8) -> RouteRecord {
        RouteRecord {
            destination,
            subnet_mask: LOCAL_SUBNET_PREFIX,
            next_hop,
            metric,
        }
    }

    fn update_from(rover_id: u8, records: Vec<RouteRecord>) -> Advertisement {
        Advertisement {
            command: RipCommand::Update,
            rover_id,
            records,
        }
    }

    struct Fixture {
        distance_vector: DistanceVector,
        table: Arc<RouteTable>,
        sink: Arc<RecordingSink>,
        events: mpsc::Receiver<RoutingEvent>,
    }

    /// A rover with id 1 that has already installed its self-route.
    async fn fixture() -> Fixture {
        let table = Arc::new(RouteTable::new());
        table.put(record(private(1), public(1), 1)).await;

        let (tx, events) = mpsc::channel(8);
        let sink = RecordingSink::new();
        let distance_vector = DistanceVector::new(
            1,
            private(1),
            public(1),
            table.clone(),
            NeighborTimers::new(DEAD_INTERVAL, tx),
            sink.clone(),
        );
        Fixture {
            distance_vector,
            table,
            sink,
            events,
        }
    }

    #[tokio::test]
    async fn test_own_echo_is_dropped() {
        let mut f = fixture().await;

        f.distance_vector
            .on_advertisement(public(1), update_from(1, vec![record(private(9), public(9), 1)]))
            .await
            .unwrap();

        assert!(!f.table.has(private(9)).await);
        assert_eq!(f.sink.emitted_count().await, 0);
    }

    #[tokio::test]
    async fn test_neighbor_installed_at_metric_one() {
        let mut f = fixture().await;

        // even a prior worse record is overwritten by a heartbeat
        f.table.put(record(private(2), public(7), 5)).await;

        f.distance_vector
            .on_advertisement(public(2), update_from(2, vec![]))
            .await
            .unwrap();

        assert_eq!(f.table.get(private(2)).await, Some(record(private(2), public(2), 1)));
    }

    #[tokio::test]
    async fn test_new_destination_inserted_with_incremented_metric() {
        let mut f = fixture().await;

        f.distance_vector
            .on_advertisement(public(2), update_from(2, vec![record(private(3), public(3), 1)]))
            .await
            .unwrap();

        assert_eq!(f.table.get(private(3)).await, Some(record(private(3), public(2), 2)));
    }

    #[tokio::test]
    async fn test_metric_saturates_at_infinity() {
        let mut f = fixture().await;

        f.distance_vector
            .on_advertisement(
                public(2),
                update_from(2, vec![
                    record(private(3), public(3), 15),
                    record(private(4), public(4), 200),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(f.table.get(private(3)).await.unwrap().metric, INFINITY_METRIC);
        assert_eq!(f.table.get(private(4)).await.unwrap().metric, INFINITY_METRIC);
    }

    #[tokio::test]
    async fn test_route_through_us_is_poisoned() {
        let mut f = fixture().await;

        // the peer claims to reach 10.3.0.1 through us; never believe it
        f.distance_vector
            .on_advertisement(public(2), update_from(2, vec![record(private(3), public(1), 2)]))
            .await
            .unwrap();

        assert_eq!(f.table.get(private(3)).await.unwrap().metric, INFINITY_METRIC);
    }

    #[tokio::test]
    async fn test_own_destination_records_are_skipped() {
        let mut f = fixture().await;

        f.distance_vector
            .on_advertisement(public(2), update_from(2, vec![record(private(1), public(2), 1)]))
            .await
            .unwrap();

        // the self-route stays untouched
        assert_eq!(f.table.get(private(1)).await, Some(record(private(1), public(1), 1)));
    }

    #[tokio::test]
    async fn test_current_next_hop_is_trusted_even_when_worse() {
        let mut f = fixture().await;

        f.distance_vector
            .on_advertisement(public(2), update_from(2, vec![record(private(3), public(3), 1)]))
            .await
            .unwrap();
        assert_eq!(f.table.get(private(3)).await.unwrap().metric, 2);

        // the same neighbor now reports a worse path; we follow it
        f.distance_vector
            .on_advertisement(public(2), update_from(2, vec![record(private(3), public(3), 5)]))
            .await
            .unwrap();
        assert_eq!(f.table.get(private(3)).await, Some(record(private(3), public(2), 6)));
    }

    #[tokio::test]
    async fn test_other_neighbor_must_offer_strictly_better_path() {
        let mut f = fixture().await;

        f.distance_vector
            .on_advertisement(public(2), update_from(2, vec![record(private(4), public(4), 2)]))
            .await
            .unwrap();
        assert_eq!(f.table.get(private(4)).await, Some(record(private(4), public(2), 3)));

        // an equal-cost path from another neighbor does not replace the route
        f.distance_vector
            .on_advertisement(public(3), update_from(3, vec![record(private(4), public(4), 2)]))
            .await
            .unwrap();
        assert_eq!(f.table.get(private(4)).await.unwrap().next_hop, public(2));

        // a strictly better one does
        f.distance_vector
            .on_advertisement(public(3), update_from(3, vec![record(private(4), public(4), 1)]))
            .await
            .unwrap();
        assert_eq!(f.table.get(private(4)).await, Some(record(private(4), public(3), 2)));
    }

    #[tokio::test]
    async fn test_triggered_update_on_change_only() {
        let mut f = fixture().await;

        f.distance_vector
            .on_advertisement(public(2), update_from(2, vec![]))
            .await
            .unwrap();
        assert_eq!(f.sink.emitted_count().await, 1);

        // identical advertisement: no change, no triggered update
        f.distance_vector
            .on_advertisement(public(2), update_from(2, vec![]))
            .await
            .unwrap();
        assert_eq!(f.sink.emitted_count().await, 1);
    }

    #[tokio::test]
    async fn test_request_forces_emission_without_change() {
        let mut f = fixture().await;

        f.distance_vector
            .on_advertisement(public(2), update_from(2, vec![]))
            .await
            .unwrap();
        assert_eq!(f.sink.emitted_count().await, 1);

        f.distance_vector
            .on_advertisement(
                public(2),
                Advertisement {
                    command: RipCommand::Request,
                    rover_id: 2,
                    records: vec![],
                },
            )
            .await
            .unwrap();
        assert_eq!(f.sink.emitted_count().await, 2);

        let emitted = f.sink.emitted.lock().await;
        assert_eq!(emitted[1].command, RipCommand::Update);
        assert_eq!(emitted[1].rover_id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_neighbor_death_poisons_routes_via_dead_hop() {
        let mut f = fixture().await;

        // neighbor 2 relays us to 10.3.0.1; neighbor 4 is unrelated
        f.distance_vector
            .on_advertisement(public(2), update_from(2, vec![record(private(3), public(3), 1)]))
            .await
            .unwrap();
        f.distance_vector
            .on_advertisement(public(4), update_from(4, vec![]))
            .await
            .unwrap();
        let emitted_before = f.sink.emitted_count().await;

        tokio::time::advance(Duration::from_secs(8)).await;
        let (private_dead, public_dead, generation) = loop {
            match f.events.recv().await.unwrap() {
                RoutingEvent::NeighborDeath {
                    private: p,
                    public: pu,
                    generation,
                } if p == private(2) => break (p, pu, generation),
                _ => continue,
            }
        };

        f.distance_vector
            .on_neighbor_death(private_dead, public_dead, generation)
            .await
            .unwrap();

        assert_eq!(f.table.get(private(2)).await.unwrap().metric, INFINITY_METRIC);
        assert_eq!(f.table.get(private(3)).await.unwrap().metric, INFINITY_METRIC);
        assert_eq!(f.table.get(private(4)).await.unwrap().metric, 1);
        assert_eq!(f.sink.emitted_count().await, emitted_before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_death_notice_is_discarded() {
        let mut f = fixture().await;

        f.distance_vector
            .on_advertisement(public(2), update_from(2, vec![]))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        let generation = match f.events.recv().await.unwrap() {
            RoutingEvent::NeighborDeath { generation, .. } => generation,
            other => panic!("unexpected event {:?}", other),
        };

        // a heartbeat is processed before the queued death notice
        f.distance_vector
            .on_advertisement(public(2), update_from(2, vec![]))
            .await
            .unwrap();
        let emitted_before = f.sink.emitted_count().await;

        f.distance_vector
            .on_neighbor_death(private(2), public(2), generation)
            .await
            .unwrap();

        assert_eq!(f.table.get(private(2)).await.unwrap().metric, 1);
        assert_eq!(f.sink.emitted_count().await, emitted_before);
    }
}
