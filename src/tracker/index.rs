//! The tracker's algorithmic core: a content -> holders directory plus the
//! reverse map and liveness bookkeeping, kept separate from the HTTP surface
//! so it is unit-testable without spinning up axum. Grounded in
//! `original_source/tracker-server/app.py`'s redis-backed handlers, adapted
//! to an in-memory map (no persistence across restarts).

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::SystemTime;

#[derive(Default)]
pub struct TrackerIndex {
    file_to_ips: Mutex<HashMap<String, HashSet<Ipv4Addr>>>,
    ip_to_files: Mutex<HashMap<Ipv4Addr, HashSet<String>>>,
    last_seen: Mutex<HashMap<Ipv4Addr, SystemTime>>,
}

impl TrackerIndex {
    pub fn new() -> Self {
        TrackerIndex::default()
    }

    pub fn get_peers(&self, filename: &str) -> HashSet<Ipv4Addr> {
        self.file_to_ips
            .lock()
            .unwrap()
            .get(filename)
            .cloned()
            .unwrap_or_default()
    }

    /// `add(ip, f)` called N times leaves the registry identical to one
    /// call: the backing `HashSet` insert is naturally idempotent.
    pub fn add(&self, ip: Ipv4Addr, filename: &str) {
        self.file_to_ips
            .lock()
            .unwrap()
            .entry(filename.to_string())
            .or_default()
            .insert(ip);
        self.ip_to_files
            .lock()
            .unwrap()
            .entry(ip)
            .or_default()
            .insert(filename.to_string());
        self.last_seen.lock().unwrap().insert(ip, SystemTime::now());
    }

    /// Does not touch `last_seen` — the peer may still serve other files.
    pub fn remove(&self, ip: Ipv4Addr, filename: &str) {
        let mut forward = self.file_to_ips.lock().unwrap();
        if let Some(ips) = forward.get_mut(filename) {
            ips.remove(&ip);
            if ips.is_empty() {
                forward.remove(filename);
            }
        }
        drop(forward);

        let mut reverse = self.ip_to_files.lock().unwrap();
        if let Some(files) = reverse.get_mut(&ip) {
            files.remove(filename);
            if files.is_empty() {
                reverse.remove(&ip);
            }
        }
    }

    pub fn peer_offline(&self, ip: Ipv4Addr) {
        let files = self
            .ip_to_files
            .lock()
            .unwrap()
            .remove(&ip)
            .unwrap_or_default();

        let mut forward = self.file_to_ips.lock().unwrap();
        for f in files {
            if let Some(ips) = forward.get_mut(&f) {
                ips.remove(&ip);
                if ips.is_empty() {
                    forward.remove(&f);
                }
            }
        }
        drop(forward);

        self.last_seen.lock().unwrap().remove(&ip);
    }

    /// Sampled list of index keys, capped the way
    /// `app.py::get_all_trackers`'s `scan_iter(count=10)` loop is capped.
    pub fn all_trackers(&self, limit: usize) -> Vec<String> {
        self.file_to_ips
            .lock()
            .unwrap()
            .keys()
            .take(limit)
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub fn files_for(&self, ip: Ipv4Addr) -> HashSet<String> {
        self.ip_to_files.lock().unwrap().get(&ip).cloned().unwrap_or_default()
    }
}
