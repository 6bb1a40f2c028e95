//! Inbound/outbound transfer state, grounded directly in
//! `original_source/browser-client/transfer_classes.py`'s
//! `InboundTransfer`/`OutboundTransfer` dataclasses: a table of transfers
//! behind one lock, each transfer's mutable fields behind its own lock.

use crate::config;
use crate::digest::hex_digest;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Active,
    Done,
    Cancelled,
    Error,
}

pub struct InboundTransfer {
    pub nonce: String,
    pub expected_digest: String,
    pub filename: String,
    pub expected_total: Option<u64>,
    pub chunks: HashMap<u64, Vec<u8>>,
    pub received: HashSet<u64>,
    pub state: TransferState,
    pub last_activity: Instant,
}

impl InboundTransfer {
    pub fn new(nonce: String, expected_digest: String, filename: String) -> Self {
        InboundTransfer {
            nonce,
            expected_digest,
            filename,
            expected_total: None,
            chunks: HashMap::new(),
            received: HashSet::new(),
            state: TransferState::Active,
            last_activity: Instant::now(),
        }
    }

    pub fn add_chunk(&mut self, seq: u64, data: Vec<u8>, is_last: bool) {
        if self.state != TransferState::Active {
            return;
        }
        self.chunks.insert(seq, data);
        self.received.insert(seq);
        if is_last {
            self.expected_total = Some(seq + 1);
        }
        self.last_activity = Instant::now();
    }

    /// A transfer is complete once every seq up to the last chunk's
    /// `expected_total` has been received.
    pub fn is_complete(&self) -> bool {
        match self.expected_total {
            Some(total) => self.received.len() as u64 >= total,
            None => false,
        }
    }

    pub fn missing_seqs(&self) -> Vec<u64> {
        match self.expected_total {
            Some(total) => (0..total).filter(|s| !self.received.contains(s)).collect(),
            None => Vec::new(),
        }
    }

    /// Concatenates chunks in sequence order. Panics if called before
    /// `is_complete()` — callers must check first, mirroring the Python
    /// original's `RuntimeError("Transfer not complete")` guard.
    pub fn assemble(&self) -> Vec<u8> {
        assert!(self.is_complete(), "assemble called on incomplete transfer");
        let total = self.expected_total.unwrap();
        let mut out = Vec::new();
        for seq in 0..total {
            out.extend_from_slice(&self.chunks[&seq]);
        }
        out
    }

    pub fn verify(&self, assembled: &[u8]) -> bool {
        hex_digest(assembled) == self.expected_digest
    }
}

pub struct OutboundTransfer {
    pub nonce: String,
    pub logical_filepath: String,
    pub expected_digest: String,
    pub chunk_size: usize,
    pub chunks: Vec<Vec<u8>>,
    pub acked: HashSet<u64>,
    pub base: u64,
    pub last_sent: HashMap<u64, Instant>,
    pub retries: HashMap<u64, u32>,
    pub state: TransferState,
    pub last_activity: Instant,
}

impl OutboundTransfer {
    /// Splits `bytes` into `chunk_size`-byte chunks up front.
    pub fn new(nonce: String, logical_filepath: String, bytes: &[u8], expected_digest: String, chunk_size: usize) -> Self {
        let chunks: Vec<Vec<u8>> = bytes.chunks(chunk_size.max(1)).map(|c| c.to_vec()).collect();
        OutboundTransfer {
            nonce,
            logical_filepath,
            expected_digest,
            chunk_size,
            chunks,
            acked: HashSet::new(),
            base: 0,
            last_sent: HashMap::new(),
            retries: HashMap::new(),
            state: TransferState::Active,
            last_activity: Instant::now(),
        }
    }

    pub fn total_chunks(&self) -> u64 {
        self.chunks.len() as u64
    }

    pub fn is_single_chunk(&self) -> bool {
        self.total_chunks() == 1
    }

    pub fn chunk(&self, seq: u64) -> Option<&[u8]> {
        self.chunks.get(seq as usize).map(|c| c.as_slice())
    }

    pub fn mark_sent(&mut self, seq: u64, now: Instant) {
        self.last_sent.insert(seq, now);
        *self.retries.entry(seq).or_insert(0) += 1;
        self.last_activity = now;
    }

    /// Advances `base` to the lowest unacked sequence after marking `seq`
    /// acked.
    pub fn mark_acked(&mut self, seq: u64) {
        self.acked.insert(seq);
        while self.base < self.total_chunks() && self.acked.contains(&self.base) {
            self.base += 1;
        }
        self.last_activity = Instant::now();
        if self.base >= self.total_chunks() {
            self.state = TransferState::Done;
        }
    }

    pub fn next_seq_to_send(&self) -> Option<u64> {
        if self.base < self.total_chunks() {
            Some(self.base)
        } else {
            None
        }
    }

    /// A chunk is eligible for retransmission if it is the current unacked
    /// chunk, its last send is older than `timeout`, and its retry count is
    /// below `max_retries`.
    pub fn should_retransmit(&self, seq: u64, now: Instant, timeout: std::time::Duration, max_retries: u32) -> bool {
        if self.acked.contains(&seq) {
            return false;
        }
        match self.last_sent.get(&seq) {
            Some(last) => now.duration_since(*last) > timeout && self.retries.get(&seq).copied().unwrap_or(0) < max_retries,
            None => true,
        }
    }

    pub fn retries_exhausted(&self, seq: u64, max_retries: u32) -> bool {
        self.retries.get(&seq).copied().unwrap_or(0) >= max_retries
    }
}

/// A table of transfers behind one lock, each entry additionally wrapped in
/// its own `Mutex` for field-level updates.
pub struct TransferTable<T> {
    entries: Mutex<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T> Default for TransferTable<T> {
    fn default() -> Self {
        TransferTable { entries: Mutex::new(HashMap::new()) }
    }
}

impl<T> TransferTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, nonce: String, transfer: T) -> Arc<Mutex<T>> {
        let handle = Arc::new(Mutex::new(transfer));
        self.entries.lock().unwrap().insert(nonce, handle.clone());
        handle
    }

    pub fn get(&self, nonce: &str) -> Option<Arc<Mutex<T>>> {
        self.entries.lock().unwrap().get(nonce).cloned()
    }

    pub fn remove(&self, nonce: &str) {
        self.entries.lock().unwrap().remove(nonce);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

impl<T: Cancellable> TransferTable<T> {
    /// Marks every active transfer `Cancelled`, e.g. on session disconnect.
    pub fn cancel_all(&self) {
        for handle in self.entries.lock().unwrap().values() {
            handle.lock().unwrap().cancel();
        }
    }
}

pub trait Cancellable {
    fn cancel(&mut self);
}

impl Cancellable for InboundTransfer {
    fn cancel(&mut self) {
        if self.state == TransferState::Active {
            self.state = TransferState::Cancelled;
        }
    }
}

impl Cancellable for OutboundTransfer {
    fn cancel(&mut self) {
        if self.state == TransferState::Active {
            self.state = TransferState::Cancelled;
        }
    }
}

pub type InboundTable = TransferTable<InboundTransfer>;
pub type OutboundTable = TransferTable<OutboundTransfer>;

/// Removes transfers whose `last_activity` is older than the stale
/// threshold, regardless of state.
pub fn gc_stale<T: StaleCheck>(table: &TransferTable<T>, stale_after: std::time::Duration) -> usize {
    let mut entries = table.entries.lock().unwrap();
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, t| now.duration_since(t.lock().unwrap().last_activity()) < stale_after);
    before - entries.len()
}

pub trait StaleCheck {
    fn last_activity(&self) -> Instant;
}

impl StaleCheck for InboundTransfer {
    fn last_activity(&self) -> Instant {
        self.last_activity
    }
}

impl StaleCheck for OutboundTransfer {
    fn last_activity(&self) -> Instant {
        self.last_activity
    }
}

pub const DEFAULT_CHUNK_SIZE: usize = config::CHUNK_SIZE;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn inbound_completes_only_once_total_known() {
        let mut t = InboundTransfer::new("n".into(), "d".into(), "f".into());
        assert!(!t.is_complete());
        t.add_chunk(0, b"ABCD".to_vec(), false);
        assert!(!t.is_complete());
        t.add_chunk(1, b"EF".to_vec(), true);
        assert!(t.is_complete());
        assert_eq!(t.assemble(), b"ABCDEF");
    }

    #[test]
    fn inbound_missing_seqs_reports_gaps() {
        let mut t = InboundTransfer::new("n".into(), "d".into(), "f".into());
        t.add_chunk(0, b"A".to_vec(), false);
        t.add_chunk(2, b"C".to_vec(), true);
        assert_eq!(t.missing_seqs(), vec![1]);
    }

    #[test]
    fn inbound_verify_matches_digest() {
        let bytes = b"<html>ok</html>".to_vec();
        let digest = hex_digest(&bytes);
        let mut t = InboundTransfer::new("n".into(), digest, "f".into());
        t.add_chunk(0, bytes.clone(), true);
        assert!(t.verify(&t.assemble()));
    }

    #[test]
    fn outbound_splits_into_chunks_up_front() {
        let t = OutboundTransfer::new("n".into(), "f".into(), b"ABCDEFGHIJ", "d".into(), 4);
        assert_eq!(t.total_chunks(), 3);
        assert_eq!(t.chunk(0), Some(&b"ABCD"[..]));
        assert_eq!(t.chunk(1), Some(&b"EFGH"[..]));
        assert_eq!(t.chunk(2), Some(&b"IJ"[..]));
        assert!(!t.is_single_chunk());
    }

    #[test]
    fn outbound_base_advances_only_contiguously() {
        let mut t = OutboundTransfer::new("n".into(), "f".into(), b"ABCDEFGHIJ", "d".into(), 4);
        t.mark_acked(1);
        assert_eq!(t.base, 0);
        t.mark_acked(0);
        assert_eq!(t.base, 2);
        t.mark_acked(2);
        assert_eq!(t.base, 3);
        assert_eq!(t.state, TransferState::Done);
    }

    #[test]
    fn outbound_retransmit_respects_timeout_and_retries() {
        let mut t = OutboundTransfer::new("n".into(), "f".into(), b"ABCD", "d".into(), 4);
        assert!(t.should_retransmit(0, Instant::now(), Duration::from_millis(10), 6));
        t.mark_sent(0, Instant::now());
        assert!(!t.should_retransmit(0, Instant::now(), Duration::from_millis(50), 6));
    }

    #[test]
    fn table_insert_get_remove_round_trip() {
        let table: TransferTable<InboundTransfer> = TransferTable::new();
        table.insert("n".into(), InboundTransfer::new("n".into(), "d".into(), "f".into()));
        assert!(table.get("n").is_some());
        table.remove("n");
        assert!(table.get("n").is_none());
    }

    #[test]
    fn cancel_all_marks_active_transfers_cancelled() {
        let table: TransferTable<InboundTransfer> = TransferTable::new();
        table.insert("n".into(), InboundTransfer::new("n".into(), "d".into(), "f".into()));
        table.cancel_all();
        let handle = table.get("n").unwrap();
        assert_eq!(handle.lock().unwrap().state, TransferState::Cancelled);
    }
}
