use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Default number of ground stations served at once.
pub const DEFAULT_MAX_ENDPOINTS: usize = 4;

/// Idle time after which a ground station is forgotten.
pub const DEFAULT_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

/// A ground station that has sent at least one datagram to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub addr: SocketAddr,
    pub first_seen: Instant,
    pub last_seen: Instant,
    /// Datagrams the bridge sent to this endpoint.
    pub messages_sent: u64,
    /// Datagrams received from this endpoint.
    pub messages_received: u64,
}

/// What `EndpointTable::touch` did with a datagram's sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOutcome {
    Inserted,
    Refreshed,
    /// Unknown sender and no free slot; the table is unchanged.
    Full,
}

/// Fixed-capacity table of ground stations keyed by address and port.
///
/// Time is always supplied by the caller so the table never reads a clock.
#[derive(Debug, Clone)]
pub struct EndpointTable {
    entries: Vec<RemoteEndpoint>,
    capacity: usize,
    timeout: Duration,
}

impl EndpointTable {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            timeout,
        }
    }

    /// Register a datagram from `addr`.
    pub fn touch(&mut self, addr: SocketAddr, now: Instant) -> TouchOutcome {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.addr == addr) {
            entry.last_seen = now;
            entry.messages_received += 1;
            return TouchOutcome::Refreshed;
        }
        if self.entries.len() >= self.capacity {
            return TouchOutcome::Full;
        }
        self.entries.push(RemoteEndpoint {
            addr,
            first_seen: now,
            last_seen: now,
            messages_sent: 0,
            messages_received: 1,
        });
        TouchOutcome::Inserted
    }

    /// Remove every endpoint idle for longer than the timeout.
    pub fn sweep(&mut self, now: Instant) -> Vec<SocketAddr> {
        let timeout = self.timeout;
        let mut evicted = Vec::new();
        self.entries.retain(|entry| {
            let stale = now.saturating_duration_since(entry.last_seen) > timeout;
            if stale {
                evicted.push(entry.addr);
            }
            !stale
        });
        evicted
    }

    /// Count one delivered datagram against each address.
    pub fn record_sent(&mut self, delivered: &[SocketAddr]) {
        for entry in &mut self.entries {
            if delivered.contains(&entry.addr) {
                entry.messages_sent += 1;
            }
        }
    }

    /// True when at least one endpoint has been heard from within the timeout.
    pub fn is_any_fresh(&self, now: Instant) -> bool {
        self.entries
            .iter()
            .any(|entry| now.saturating_duration_since(entry.last_seen) <= self.timeout)
    }

    /// Broadcast targets, in registration order.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.entries.iter().map(|entry| entry.addr).collect()
    }

    pub fn snapshot(&self) -> Vec<RemoteEndpoint> {
        self.entries.clone()
    }

    pub fn get(&self, addr: SocketAddr) -> Option<&RemoteEndpoint> {
        self.entries.iter().find(|entry| entry.addr == addr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 4, 2], port))
    }

    #[test]
    fn first_datagram_inserts_then_refreshes() {
        let t0 = Instant::now();
        let mut table = EndpointTable::new(4, DEFAULT_ENDPOINT_TIMEOUT);

        assert_eq!(table.touch(addr(14550), t0), TouchOutcome::Inserted);
        let later = t0 + Duration::from_secs(3);
        assert_eq!(table.touch(addr(14550), later), TouchOutcome::Refreshed);

        let entry = table.get(addr(14550)).unwrap();
        assert_eq!(entry.messages_received, 2);
        assert_eq!(entry.first_seen, t0);
        assert_eq!(entry.last_seen, later);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn same_host_different_port_is_a_new_endpoint() {
        let t0 = Instant::now();
        let mut table = EndpointTable::new(4, DEFAULT_ENDPOINT_TIMEOUT);
        table.touch(addr(14550), t0);
        assert_eq!(table.touch(addr(14551), t0), TouchOutcome::Inserted);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn full_table_refuses_new_senders() {
        let t0 = Instant::now();
        let mut table = EndpointTable::new(2, DEFAULT_ENDPOINT_TIMEOUT);
        table.touch(addr(1), t0);
        table.touch(addr(2), t0);

        assert_eq!(table.touch(addr(3), t0), TouchOutcome::Full);
        assert_eq!(table.addrs(), vec![addr(1), addr(2)]);
        // known senders still refresh
        assert_eq!(table.touch(addr(2), t0), TouchOutcome::Refreshed);
    }

    #[test]
    fn sweep_evicts_only_stale_entries() {
        let t0 = Instant::now();
        let timeout = Duration::from_secs(30);
        let mut table = EndpointTable::new(4, timeout);
        table.touch(addr(1), t0);
        table.touch(addr(2), t0 + Duration::from_secs(20));

        // exactly at the timeout is still fresh
        assert!(table.sweep(t0 + timeout).is_empty());

        let evicted = table.sweep(t0 + timeout + Duration::from_millis(1));
        assert_eq!(evicted, vec![addr(1)]);
        assert_eq!(table.addrs(), vec![addr(2)]);

        // a second sweep never reports the same endpoint again
        assert!(table.sweep(t0 + timeout + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn evicted_slot_is_reusable() {
        let t0 = Instant::now();
        let mut table = EndpointTable::new(1, Duration::from_secs(1));
        table.touch(addr(1), t0);
        table.sweep(t0 + Duration::from_secs(2));
        assert_eq!(table.touch(addr(9), t0 + Duration::from_secs(2)), TouchOutcome::Inserted);
    }

    #[test]
    fn freshness_follows_timeout() {
        let t0 = Instant::now();
        let mut table = EndpointTable::new(4, Duration::from_secs(30));
        assert!(!table.is_any_fresh(t0));
        table.touch(addr(1), t0);
        assert!(table.is_any_fresh(t0 + Duration::from_secs(30)));
        assert!(!table.is_any_fresh(t0 + Duration::from_secs(31)));
    }

    #[test]
    fn record_sent_counts_delivered_only() {
        let t0 = Instant::now();
        let mut table = EndpointTable::new(4, DEFAULT_ENDPOINT_TIMEOUT);
        table.touch(addr(1), t0);
        table.touch(addr(2), t0);
        table.record_sent(&[addr(2)]);
        table.record_sent(&[addr(1), addr(2)]);

        assert_eq!(table.get(addr(1)).unwrap().messages_sent, 1);
        assert_eq!(table.get(addr(2)).unwrap().messages_sent, 2);
    }
}
