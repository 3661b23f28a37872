use std::fmt::Write;
use std::net::Ipv4Addr;

use rustc_hash::FxHashMap;
use tokio::sync::RwLock;

use crate::wire::advertisement::{Advertisement, RipCommand, RouteRecord, INFINITY_METRIC};

/// The routing table: one record per destination private address ever heard
///  of, including unreachable ones. Read concurrently by the data-plane
///  forwarder and the file sender; mutated only through the distance-vector
///  event loop.
pub struct RouteTable {
    records: RwLock<FxHashMap<Ipv4Addr, RouteRecord>>,
}

impl RouteTable {
    pub fn new() -> RouteTable {
        RouteTable {
            records: Default::default(),
        }
    }

    pub async fn get(&self, destination: Ipv4Addr) -> Option<RouteRecord> {
        self.records.read().await.get(&destination).copied()
    }

    pub async fn has(&self, destination: Ipv4Addr) -> bool {
        self.records.read().await.contains_key(&destination)
    }

    /// Inserts or replaces the record for its destination.
    pub async fn put(&self, record: RouteRecord) {
        self.records.write().await.insert(record.destination, record);
    }

    pub async fn set_metric(&self, destination: Ipv4Addr, metric: u8) {
        if let Some(record) = self.records.write().await.get_mut(&destination) {
            record.metric = metric;
        }
    }

    /// Poisons every record routed via the given next hop.
    pub async fn mark_unreachable_via(&self, next_hop: Ipv4Addr) {
        for record in self.records.write().await.values_mut() {
            if record.next_hop == next_hop {
                record.metric = INFINITY_METRIC;
            }
        }
    }

    /// All records, ordered by destination.
    pub async fn snapshot(&self) -> Vec<RouteRecord> {
        let mut records: Vec<RouteRecord> = self.records.read().await.values().copied().collect();
        records.sort_by_key(|r| r.destination);
        records
    }

    /// A stable textual rendering of the table, ordered by destination. Used
    ///  both for change detection around a distance-vector update and for
    ///  logging the table after a change.
    pub async fn signature(&self) -> String {
        let mut result = String::new();
        for record in self.snapshot().await {
            let _ = writeln!(
                result,
                "{}/{} via {} metric {}",
                record.destination, record.subnet_mask, record.next_hop, record.metric
            );
        }
        result
    }

    /// Snapshots the table into an advertisement frame.
    pub async fn current_advertisement(&self, command: RipCommand, rover_id: u8) -> Advertisement {
        Advertisement {
            command,
            rover_id,
            records: self.snapshot().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(destination: &str, next_hop: &str, metric: u8) -> RouteRecord {
        RouteRecord {
            destination: destination.parse().unwrap(),
            subnet_mask: 24,
            next_hop: next_hop.parse().unwrap(),
            metric,
        }
    }

    #[tokio::test]
    async fn test_put_get_has() {
        let table = RouteTable::new();
        assert!(!table.has("10.1.0.1".parse().unwrap()).await);

        table.put(record("10.1.0.1", "192.168.1.4", 1)).await;
        assert!(table.has("10.1.0.1".parse().unwrap()).await);
        assert_eq!(
            table.get("10.1.0.1".parse().unwrap()).await,
            Some(record("10.1.0.1", "192.168.1.4", 1))
        );

        table.put(record("10.1.0.1", "192.168.1.9", 3)).await;
        assert_eq!(
            table.get("10.1.0.1".parse().unwrap()).await,
            Some(record("10.1.0.1", "192.168.1.9", 3))
        );
    }

    #[tokio::test]
    async fn test_set_metric() {
        let table = RouteTable::new();
        table.put(record("10.1.0.1", "192.168.1.4", 2)).await;

        table.set_metric("10.1.0.1".parse().unwrap(), INFINITY_METRIC).await;
        assert_eq!(table.get("10.1.0.1".parse().unwrap()).await.unwrap().metric, INFINITY_METRIC);

        // absent destinations are left alone
        table.set_metric("10.9.0.1".parse().unwrap(), 5).await;
        assert!(!table.has("10.9.0.1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn test_mark_unreachable_via() {
        let table = RouteTable::new();
        table.put(record("10.1.0.1", "192.168.1.4", 1)).await;
        table.put(record("10.2.0.1", "192.168.1.4", 2)).await;
        table.put(record("10.3.0.1", "192.168.1.7", 2)).await;

        table.mark_unreachable_via("192.168.1.4".parse().unwrap()).await;

        assert_eq!(table.get("10.1.0.1".parse().unwrap()).await.unwrap().metric, INFINITY_METRIC);
        assert_eq!(table.get("10.2.0.1".parse().unwrap()).await.unwrap().metric, INFINITY_METRIC);
        assert_eq!(table.get("10.3.0.1".parse().unwrap()).await.unwrap().metric, 2);
    }

    #[tokio::test]
    async fn test_snapshot_sorted_by_destination() {
        let table = RouteTable::new();
        table.put(record("10.7.0.1", "192.168.1.4", 1)).await;
        table.put(record("10.2.0.1", "192.168.1.5", 1)).await;
        table.put(record("10.5.0.1", "192.168.1.6", 1)).await;

        let destinations: Vec<Ipv4Addr> = table.snapshot().await.iter().map(|r| r.destination).collect();
        assert_eq!(
            destinations,
            vec![
                "10.2.0.1".parse::<Ipv4Addr>().unwrap(),
                "10.5.0.1".parse().unwrap(),
                "10.7.0.1".parse().unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn test_signature_detects_changes() {
        let table = RouteTable::new();
        table.put(record("10.1.0.1", "192.168.1.4", 1)).await;
        let before = table.signature().await;

        // re-inserting the identical record leaves the signature unchanged
        table.put(record("10.1.0.1", "192.168.1.4", 1)).await;
        assert_eq!(table.signature().await, before);

        table.set_metric("10.1.0.1".parse().unwrap(), 3).await;
        assert_ne!(table.signature().await, before);
    }

    #[tokio::test]
    async fn test_current_advertisement() {
        let table = RouteTable::new();
        table.put(record("10.1.0.1", "192.168.1.4", 1)).await;
        table.put(record("10.2.0.1", "192.168.1.5", 16)).await;

        let advertisement = table.current_advertisement(RipCommand::Update, 4).await;
        assert_eq!(advertisement.command, RipCommand::Update);
        assert_eq!(advertisement.rover_id, 4);
        assert_eq!(
            advertisement.records,
            vec![
                record("10.1.0.1", "192.168.1.4", 1),
                record("10.2.0.1", "192.168.1.5", 16),
            ]
        );
    }
}
