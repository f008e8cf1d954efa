//! Network simulator
//!
//! Directed chaos links between peers, exposed to nodes as ordinary
//! `Transport` endpoints. Packets only move when `advance` is called.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use marionette_core::{MarionetteError, MarionetteResult, PeerId};
use marionette_transport::Transport;
use parking_lot::Mutex;

use crate::chaos::{ChaosConfig, ChaosNetwork, ChaosStats};

struct SimulatorState {
    links: BTreeMap<(PeerId, PeerId), ChaosNetwork>,
    inboxes: HashMap<PeerId, VecDeque<(PeerId, Bytes)>>,
    default_config: ChaosConfig,
    current_time: Duration,
    seed: u64,
    seed_counter: u64,
}

impl SimulatorState {
    fn link(&mut self, from: PeerId, to: PeerId) -> &mut ChaosNetwork {
        let seed = self.seed.wrapping_add(self.seed_counter);
        let config = &self.default_config;
        let current_time = self.current_time;
        let created = &mut self.seed_counter;
        self.links.entry((from, to)).or_insert_with(|| {
            *created += 1;
            let mut link = ChaosNetwork::new(config.clone(), seed);
            // Links created mid-run start at the shared clock
            link.tick(current_time);
            link
        })
    }
}

/// Shared set of chaos links
#[derive(Clone)]
pub struct NetworkSimulator {
    state: Arc<Mutex<SimulatorState>>,
}

impl NetworkSimulator {
    pub fn new(default_config: ChaosConfig, seed: u64) -> Self {
        NetworkSimulator {
            state: Arc::new(Mutex::new(SimulatorState {
                links: BTreeMap::new(),
                inboxes: HashMap::new(),
                default_config,
                current_time: Duration::ZERO,
                seed,
                seed_counter: 0,
            })),
        }
    }

    pub fn perfect() -> Self {
        Self::new(ChaosConfig::perfect(), 0)
    }

    pub fn good(seed: u64) -> Self {
        Self::new(ChaosConfig::good(), seed)
    }

    pub fn poor(seed: u64) -> Self {
        Self::new(ChaosConfig::poor(), seed)
    }

    pub fn hostile(seed: u64) -> Self {
        Self::new(ChaosConfig::hostile(), seed)
    }

    /// Attach a peer and hand back its endpoint
    pub fn endpoint(&self, peer: PeerId) -> ChaosEndpoint {
        self.state.lock().inboxes.insert(peer, VecDeque::new());
        ChaosEndpoint {
            peer,
            state: Arc::clone(&self.state),
        }
    }

    /// Detach a peer; packets in flight to it are dropped on arrival
    pub fn disconnect(&self, peer: PeerId) {
        self.state.lock().inboxes.remove(&peer);
    }

    /// Override the conditions of one directed link
    pub fn set_link_config(&self, from: PeerId, to: PeerId, config: ChaosConfig) {
        let mut state = self.state.lock();
        let seed = state.seed.wrapping_add(state.seed_counter);
        state.seed_counter += 1;
        let mut link = ChaosNetwork::new(config, seed);
        link.tick(state.current_time);
        state.links.insert((from, to), link);
    }

    /// Move virtual time forward and deliver what is due
    pub fn advance(&self, dt: Duration) -> usize {
        let mut state = self.state.lock();
        state.current_time += dt;

        let mut arrivals = Vec::new();
        for ((from, to), link) in state.links.iter_mut() {
            for data in link.tick(dt) {
                arrivals.push((*from, *to, data));
            }
        }

        let mut delivered = 0;
        for (from, to, data) in arrivals {
            if let Some(inbox) = state.inboxes.get_mut(&to) {
                inbox.push_back((from, data));
                delivered += 1;
            }
        }
        delivered
    }

    pub fn current_time(&self) -> Duration {
        self.state.lock().current_time
    }

    pub fn link_stats(&self, from: PeerId, to: PeerId) -> Option<ChaosStats> {
        self.state
            .lock()
            .links
            .get(&(from, to))
            .map(|link| link.stats().clone())
    }

    /// Sum over every link
    pub fn total_stats(&self) -> ChaosStats {
        let state = self.state.lock();
        let mut total = ChaosStats::default();
        for link in state.links.values() {
            let s = link.stats();
            total.packets_sent += s.packets_sent;
            total.packets_delivered += s.packets_delivered;
            total.packets_lost += s.packets_lost;
            total.packets_reordered += s.packets_reordered;
            total.packets_duplicated += s.packets_duplicated;
            total.total_latency_ms += s.total_latency_ms;
            total.max_latency_ms = total.max_latency_ms.max(s.max_latency_ms);
        }
        total
    }
}

/// One peer's view of a `NetworkSimulator`
pub struct ChaosEndpoint {
    peer: PeerId,
    state: Arc<Mutex<SimulatorState>>,
}

impl Transport for ChaosEndpoint {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn send(&mut self, recipients: &[PeerId], payload: Bytes) -> MarionetteResult<()> {
        let mut state = self.state.lock();
        let mut unknown = None;

        for recipient in recipients {
            if !state.inboxes.contains_key(recipient) {
                unknown.get_or_insert(*recipient);
                continue;
            }
            state.link(self.peer, *recipient).send(payload.clone());
        }

        match unknown {
            Some(peer) => Err(MarionetteError::UnknownRecipient(peer)),
            None => Ok(()),
        }
    }

    fn poll_receive(&mut self) -> Option<(PeerId, Bytes)> {
        self.state.lock().inboxes.get_mut(&self.peer)?.pop_front()
    }
}

impl Drop for ChaosEndpoint {
    fn drop(&mut self) {
        self.state.lock().inboxes.remove(&self.peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packets_wait_for_advance() {
        let mut config = ChaosConfig::perfect();
        config.base_latency = Duration::from_millis(30);
        let sim = NetworkSimulator::new(config, 1);
        let mut a = sim.endpoint(PeerId::new(1));
        let mut b = sim.endpoint(PeerId::new(2));

        a.send(&[PeerId::new(2)], Bytes::from_static(b"hi")).unwrap();
        assert!(b.poll_receive().is_none());

        sim.advance(Duration::from_millis(20));
        assert!(b.poll_receive().is_none());

        assert_eq!(sim.advance(Duration::from_millis(10)), 1);
        assert_eq!(
            b.poll_receive(),
            Some((PeerId::new(1), Bytes::from_static(b"hi")))
        );
    }

    #[test]
    fn test_links_are_directed() {
        let sim = NetworkSimulator::perfect();
        let mut a = sim.endpoint(PeerId::new(1));
        let mut b = sim.endpoint(PeerId::new(2));
        sim.set_link_config(PeerId::new(1), PeerId::new(2), {
            let mut lossy = ChaosConfig::perfect();
            lossy.loss_rate = 1.0;
            lossy
        });

        for _ in 0..10 {
            a.send(&[PeerId::new(2)], Bytes::from_static(b"a")).unwrap();
            b.send(&[PeerId::new(1)], Bytes::from_static(b"b")).unwrap();
        }
        sim.advance(Duration::from_millis(1));

        assert_eq!(a.drain().len(), 10);
        assert!(b.drain().is_empty());
        let stats = sim.link_stats(PeerId::new(1), PeerId::new(2)).unwrap();
        assert_eq!(stats.packets_lost, 10);
    }

    #[test]
    fn test_unknown_recipient() {
        let sim = NetworkSimulator::perfect();
        let mut a = sim.endpoint(PeerId::new(1));
        let _b = sim.endpoint(PeerId::new(2));

        let result = a.send(&[PeerId::new(2), PeerId::new(5)], Bytes::from_static(b"x"));
        assert_eq!(result, Err(MarionetteError::UnknownRecipient(PeerId::new(5))));
        assert_eq!(sim.total_stats().packets_sent, 1);
    }

    #[test]
    fn test_dropped_endpoint_detaches() {
        let sim = NetworkSimulator::perfect();
        let mut a = sim.endpoint(PeerId::new(1));
        drop(sim.endpoint(PeerId::new(2)));

        assert!(a.send(&[PeerId::new(2)], Bytes::from_static(b"x")).is_err());
    }
}
