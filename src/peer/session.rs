//! Per-endpoint peer session state: at most one active session at a time,
//! held behind a single lock so callers can copy the address out and
//! release the lock before touching the network.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We asked the rendezvous service to connect us to this peer.
    Initiator,
    /// The rendezvous service introduced this peer to us.
    Responder,
}

#[derive(Debug)]
pub struct PeerSession {
    pub remote_observed_address: SocketAddr,
    pub direction: Direction,
    punch_enabled: AtomicBool,
}

impl PeerSession {
    pub fn new(remote_observed_address: SocketAddr, direction: Direction) -> Self {
        PeerSession {
            remote_observed_address,
            direction,
            punch_enabled: AtomicBool::new(true),
        }
    }

    pub fn punch_enabled(&self) -> bool {
        self.punch_enabled.load(Ordering::Relaxed)
    }

    pub fn disable_punch(&self) {
        self.punch_enabled.store(false, Ordering::Relaxed);
    }
}

/// Holds at most one active `PeerSession`. A new assignment always replaces
/// the prior one.
#[derive(Default)]
pub struct SessionSlot {
    inner: Mutex<Option<PeerSession>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        SessionSlot { inner: Mutex::new(None) }
    }

    pub fn set(&self, remote: SocketAddr, direction: Direction) {
        let mut slot = self.inner.lock().unwrap();
        *slot = Some(PeerSession::new(remote, direction));
    }

    pub fn clear(&self) {
        let mut slot = self.inner.lock().unwrap();
        *slot = None;
    }

    /// Copies out the current remote address, releasing the lock before
    /// returning so callers never hold it across network I/O.
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.inner.lock().unwrap().as_ref().map(|s| s.remote_observed_address)
    }

    pub fn is_remote(&self, addr: SocketAddr) -> bool {
        self.remote_address() == Some(addr)
    }

    pub fn punch_enabled(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.punch_enabled())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn new_assignment_replaces_prior_session() {
        let slot = SessionSlot::new();
        slot.set(addr(1), Direction::Initiator);
        slot.set(addr(2), Direction::Responder);
        assert_eq!(slot.remote_address(), Some(addr(2)));
    }

    #[test]
    fn clear_disables_punch() {
        let slot = SessionSlot::new();
        slot.set(addr(1), Direction::Initiator);
        assert!(slot.punch_enabled());
        slot.clear();
        assert!(!slot.punch_enabled());
        assert_eq!(slot.remote_address(), None);
    }
}
