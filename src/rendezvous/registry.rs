//! Rendezvous registry: one entry per source IP, keyed the way
//! `matchmaker.py` keys its `clients` dict, except keyed on IP alone — a
//! re-register from a new port replaces the prior entry.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RegistryEntry {
    pub observed_addr: SocketAddr,
    pub last_seen: Instant,
}

#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<Ipv4Addr, RegistryEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records or refreshes the sender's observed address. A new port for a
    /// known IP replaces the prior entry (NAT rebinding), satisfying the
    /// "only one entry per source IP" invariant.
    pub fn observe(&self, ip: Ipv4Addr, addr: SocketAddr) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            ip,
            RegistryEntry {
                observed_addr: addr,
                last_seen: Instant::now(),
            },
        );
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<SocketAddr> {
        let entries = self.entries.lock().unwrap();
        entries.get(&ip).map(|e| e.observed_addr)
    }

    /// Evicts entries whose `last_seen` is older than `stale_after`. Returns
    /// the number reaped.
    pub fn sweep(&self, stale_after: Duration) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let cutoff = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| cutoff.duration_since(e.last_seen) < stale_after);
        before - entries.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::thread::sleep;

    fn addr(port: u16) -> SocketAddr {
        format!("203.0.113.9:{port}").parse().unwrap()
    }

    #[test]
    fn only_one_entry_per_ip_and_rebind_replaces_it() {
        let reg = Registry::new();
        let ip: Ipv4Addr = "203.0.113.9".parse().unwrap();
        reg.observe(ip, addr(1111));
        reg.observe(ip, addr(2222));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup(ip), Some(addr(2222)));
    }

    #[test]
    fn sweep_reaps_only_stale_entries() {
        let reg = Registry::new();
        let stale_ip: Ipv4Addr = "203.0.113.1".parse().unwrap();
        let fresh_ip: Ipv4Addr = "203.0.113.2".parse().unwrap();
        reg.observe(stale_ip, addr(1));
        sleep(Duration::from_millis(20));
        reg.observe(fresh_ip, addr(2));

        let reaped = reg.sweep(Duration::from_millis(10));
        assert_eq!(reaped, 1);
        assert_eq!(reg.lookup(stale_ip), None);
        assert!(reg.lookup(fresh_ip).is_some());
    }
}
