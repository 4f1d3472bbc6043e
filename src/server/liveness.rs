//! Per-client liveness tracking
//!
//! Every inbound message refreshes the sender's last-contact time. The
//! background sweep evicts clients silent for longer than the timeout,
//! without notifying them.

use crate::net::PeerId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Records {
    last_contact: HashMap<PeerId, Instant>,
    /// Entries added to `last_contact` since start
    registrations: u64,
}

/// Last-contact registry for connected clients
pub struct ClientRegistry {
    timeout: Duration,
    records: Mutex<Records>,
}

impl ClientRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            records: Mutex::new(Records {
                last_contact: HashMap::new(),
                registrations: 0,
            }),
        }
    }

    /// Record activity for a client
    #[inline]
    pub fn record_contact(&self, peer: PeerId, now: Instant) {
        let mut records = self.records.lock();
        if records.last_contact.insert(peer, now).is_none() {
            records.registrations += 1;
        }
    }

    /// Remove and return every client whose last contact is older than the timeout
    pub fn evict_stale(&self, now: Instant) -> Vec<PeerId> {
        let mut records = self.records.lock();
        let mut evicted = Vec::new();
        records.last_contact.retain(|peer, last| {
            let stale = now.saturating_duration_since(*last) > self.timeout;
            if stale {
                evicted.push(*peer);
            }
            !stale
        });
        evicted.sort();
        evicted
    }

    pub fn last_contact(&self, peer: PeerId) -> Option<Instant> {
        self.records.lock().last_contact.get(&peer).copied()
    }

    /// Clients currently considered alive
    pub fn active(&self) -> usize {
        self.records.lock().last_contact.len()
    }

    /// Clients registered since start
    ///
    /// A client evicted and later heard from again registers again.
    pub fn unique_clients(&self) -> u64 {
        self.records.lock().registrations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_refreshes_record() {
        let registry = ClientRegistry::new(Duration::from_secs(30));
        let start = Instant::now();

        registry.record_contact(PeerId(1), start);
        registry.record_contact(PeerId(1), start + Duration::from_secs(20));

        assert_eq!(
            registry.last_contact(PeerId(1)),
            Some(start + Duration::from_secs(20))
        );
        assert!(registry
            .evict_stale(start + Duration::from_secs(40))
            .is_empty());
    }

    #[test]
    fn test_evicts_only_stale_clients() {
        let registry = ClientRegistry::new(Duration::from_secs(30));
        let start = Instant::now();

        registry.record_contact(PeerId(1), start);
        registry.record_contact(PeerId(2), start + Duration::from_secs(25));

        let evicted = registry.evict_stale(start + Duration::from_secs(31));
        assert_eq!(evicted, vec![PeerId(1)]);
        assert_eq!(registry.active(), 1);
        assert!(registry.last_contact(PeerId(1)).is_none());
    }

    #[test]
    fn test_registrations_survive_eviction() {
        let registry = ClientRegistry::new(Duration::from_millis(1));
        let start = Instant::now();

        registry.record_contact(PeerId(1), start);
        registry.record_contact(PeerId(2), start);
        registry.evict_stale(start + Duration::from_secs(1));

        assert_eq!(registry.active(), 0);
        assert_eq!(registry.unique_clients(), 2);

        registry.record_contact(PeerId(1), start + Duration::from_secs(2));
        registry.record_contact(PeerId(1), start + Duration::from_secs(3));
        assert_eq!(registry.active(), 1);
        assert_eq!(registry.unique_clients(), 3);
    }

    #[test]
    fn test_repeated_contact_registers_once() {
        let registry = ClientRegistry::new(Duration::from_secs(30));
        let start = Instant::now();

        for offset in 0..1_000 {
            registry.record_contact(PeerId(7), start + Duration::from_millis(offset));
        }
        assert_eq!(registry.unique_clients(), 1);
        assert_eq!(registry.active(), 1);
    }
}
