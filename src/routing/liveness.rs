use std::net::Ipv4Addr;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::trace;

use crate::routing::RoutingEvent;

/// One-shot death timers, one per neighbor we have heard from. A heartbeat
///  re-arms the neighbor's timer; if it is allowed to expire, a
///  [RoutingEvent::NeighborDeath] is sent into the routing event channel.
///
/// The event carries the arm generation so that the event loop can discard a
///  death notice that raced with a heartbeat: a timer may have fired and
///  queued its event just before the heartbeat that would have disarmed it
///  was processed.
pub struct NeighborTimers {
    dead_interval: Duration,
    events: mpsc::Sender<RoutingEvent>,
    timers: FxHashMap<Ipv4Addr, ArmedTimer>,
    next_generation: u64,
}

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl NeighborTimers {
    pub fn new(dead_interval: Duration, events: mpsc::Sender<RoutingEvent>) -> NeighborTimers {
        NeighborTimers {
            dead_interval,
            events,
            timers: Default::default(),
            next_generation: 0,
        }
    }

    /// Heartbeat: disarm any running timer for this neighbor and arm a fresh
    ///  one for the full dead interval.
    pub fn touch(&mut self, private: Ipv4Addr, public: Ipv4Addr) {
        if let Some(existing) = self.timers.remove(&private) {
            existing.handle.abort();
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let events = self.events.clone();
        let dead_interval = self.dead_interval;
        let handle = tokio::spawn(async move {
            sleep(dead_interval).await;
            trace!("death timer for {} expired", private);
            let _ = events
                .send(RoutingEvent::NeighborDeath {
                    private,
                    public,
                    generation,
                })
                .await;
        });

        self.timers.insert(private, ArmedTimer { generation, handle });
    }

    pub fn cancel(&mut self, private: Ipv4Addr) {
        if let Some(timer) = self.timers.remove(&private) {
            timer.handle.abort();
        }
    }

    /// True iff the given generation is still the neighbor's current timer,
    ///  i.e. no heartbeat re-armed it after that timer was armed.
    pub fn is_current(&self, private: Ipv4Addr, generation: u64) -> bool {
        self.timers
            .get(&private)
            .map(|timer| timer.generation == generation)
            .unwrap_or(false)
    }
}
