//! The peer endpoint: socket owner for registration, keepalive punching,
//! the receive dispatch loop, and reliable chunked file transfer. Grounded
//! in `original_source/browser-client/holepunch_server.py`'s
//! `UDPPeerClient` (register, `_recv_loop`, `_punch_loop`, cooperative
//! `stop_event`) plus `transfer_classes.py` for the transfer bookkeeping,
//! rendered here as a blocking socket with a short read timeout, mirroring
//! the Python original's own `sock.settimeout(1.0)` plus polled
//! `stop_event`.

use crate::config;
use crate::digest::hex_digest;
use crate::peer::message::{generate_nonce, Message};
use crate::peer::session::{Direction, SessionSlot};
use crate::peer::transfer::{gc_stale, InboundTable, InboundTransfer, OutboundTable, OutboundTransfer, TransferState};
use crate::site::SiteStore;
use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serde_json::Value;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub struct Endpoint {
    socket: Arc<UdpSocket>,
    rendezvous_addr: SocketAddr,
    session: Arc<SessionSlot>,
    inbound: Arc<InboundTable>,
    outbound: Arc<OutboundTable>,
    site: Arc<SiteStore>,
    stop: Arc<AtomicBool>,
    requested_connect: Arc<AtomicBool>,
}

impl Endpoint {
    pub fn bind(local_addr: SocketAddr, rendezvous_addr: SocketAddr, site: Arc<SiteStore>) -> Result<Self> {
        let socket = UdpSocket::bind(local_addr)?;
        socket.set_read_timeout(Some(config::SOCKET_POLL_TIMEOUT))?;
        Ok(Endpoint {
            socket: Arc::new(socket),
            rendezvous_addr,
            session: Arc::new(SessionSlot::new()),
            inbound: Arc::new(InboundTable::new()),
            outbound: Arc::new(OutboundTable::new()),
            site,
            stop: Arc::new(AtomicBool::new(false)),
            requested_connect: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn session(&self) -> &SessionSlot {
        &self.session
    }

    /// Sends `register` and waits (bounded by `REGISTRATION_TIMEOUT`) for
    /// `your_addr`.
    pub fn register(&self) -> Result<SocketAddr> {
        let msg = serde_json::json!({"type": "register"});
        self.socket.send_to(msg.to_string().as_bytes(), self.rendezvous_addr)?;

        let deadline = Instant::now() + config::REGISTRATION_TIMEOUT;
        let mut buf = [0u8; 4096];
        loop {
            if Instant::now() >= deadline {
                anyhow::bail!("rendezvous registration timed out");
            }
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) if from == self.rendezvous_addr => {
                    if let Ok(v) = serde_json::from_slice::<Value>(&buf[..len]) {
                        if v.get("type").and_then(|t| t.as_str()) == Some("your_addr") {
                            let addr = &v["your_addr"];
                            let ip: Ipv4Addr = addr
                                .get(0)
                                .and_then(|x| x.as_str())
                                .ok_or_else(|| anyhow!("malformed your_addr"))?
                                .parse()?;
                            let port = addr.get(1).and_then(|x| x.as_u64()).unwrap_or_default() as u16;
                            return Ok(SocketAddr::from((ip, port)));
                        }
                    }
                }
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Asks the rendezvous service to introduce us to `target_ip`.
    pub fn request_connect(&self, target_ip: Ipv4Addr) -> Result<()> {
        self.requested_connect.store(true, Ordering::Relaxed);
        let msg = serde_json::json!({"type": "connect", "target_ip": target_ip.to_string()});
        self.socket.send_to(msg.to_string().as_bytes(), self.rendezvous_addr)?;
        Ok(())
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.session.clear();
    }

    /// Punch task: every `KEEPALIVE_INTERVAL`, send a `punch` datagram and a
    /// single zero byte to the current peer. Suspends when no peer is set.
    pub fn spawn_keepalive(&self) -> JoinHandle<()> {
        let socket = self.socket.clone();
        let session = self.session.clone();
        let stop = self.stop.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                if session.punch_enabled() {
                    if let Some(remote) = session.remote_address() {
                        let t = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
                        let msg = Message::Punch { t };
                        if let Err(e) = socket.send_to(&msg.to_bytes(), remote) {
                            warn!("punch sendto {remote} failed: {e}");
                        }
                        let _ = socket.send_to(&[0u8], remote);
                    }
                }
                thread::sleep(config::KEEPALIVE_INTERVAL);
            }
        })
    }

    /// Receive task: the only reader of the socket.
    pub fn spawn_receive(&self) -> JoinHandle<()> {
        let socket = self.socket.clone();
        let session = self.session.clone();
        let inbound = self.inbound.clone();
        let outbound = self.outbound.clone();
        let site = self.site.clone();
        let rendezvous_addr = self.rendezvous_addr;
        let requested_connect = self.requested_connect.clone();
        let stop = self.stop.clone();

        thread::spawn(move || {
            let mut buf = [0u8; 2048];
            while !stop.load(Ordering::Relaxed) {
                match socket.recv_from(&mut buf) {
                    Ok((len, from)) => {
                        if from == rendezvous_addr {
                            handle_rendezvous_reply(&buf[..len], &session, &requested_connect);
                        } else if session.is_remote(from) {
                            handle_peer_datagram(&buf[..len], from, &socket, &session, &inbound, &outbound, &site);
                        } else {
                            debug!("dropping datagram from unknown source {from}");
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => continue,
                    Err(e) => {
                        warn!("recv_from failed: {e}");
                        continue;
                    }
                }
            }
        })
    }

    /// Background maintenance: holder-side retransmission of unacked chunks
    /// and stale-transfer garbage collection.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let socket = self.socket.clone();
        let session = self.session.clone();
        let inbound = self.inbound.clone();
        let outbound = self.outbound.clone();
        let stop = self.stop.clone();

        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(200));
                if let Some(remote) = session.remote_address() {
                    retransmit_due_chunks(&socket, remote, &outbound);
                }
                fail_stalled_inbound(&inbound, config::CHUNK_RETRANSMIT_TIMEOUT * (config::CHUNK_MAX_RETRIES + 1));
                gc_stale(&inbound, config::TRANSFER_STALE_THRESHOLD);
                gc_stale(&outbound, config::TRANSFER_STALE_THRESHOLD);
            }
        })
    }

    /// Drives a fetch of `filepath` from `holder` to completion, writing the
    /// result via `site` under `out_path` on success. The background
    /// receive + maintenance tasks must already be running.
    pub fn fetch(&self, holder: SocketAddr, filepath: &str, out_path: &str) -> Result<()> {
        self.session.set(holder, Direction::Initiator);

        let nonce = generate_nonce();
        let request = Message::FileRequest {
            filepath: filepath.to_string(),
            nonce: nonce.clone(),
        };
        self.socket.send_to(&request.to_bytes(), holder)?;

        let overall_deadline = Instant::now() + config::CHUNK_RETRANSMIT_TIMEOUT * (config::CHUNK_MAX_RETRIES + 1);
        loop {
            if let Some(handle) = self.inbound.get(&nonce) {
                let (state, filename, digest, done) = {
                    let t = handle.lock().unwrap();
                    (t.state, t.filename.clone(), t.expected_digest.clone(), t.is_complete())
                };
                match state {
                    TransferState::Error | TransferState::Cancelled => {
                        self.inbound.remove(&nonce);
                        anyhow::bail!("transfer {nonce} for {filepath} failed");
                    }
                    TransferState::Active if done => {
                        let assembled = {
                            let t = handle.lock().unwrap();
                            t.assemble()
                        };
                        if hex_digest(&assembled) != digest {
                            self.inbound.remove(&nonce);
                            anyhow::bail!("digest mismatch assembling {filename}");
                        }
                        self.site.write(out_path, &assembled)?;
                        let complete = Message::FileComplete { nonce: nonce.clone() };
                        self.socket.send_to(&complete.to_bytes(), holder)?;
                        self.inbound.remove(&nonce);
                        return Ok(());
                    }
                    TransferState::Active => {}
                    TransferState::Done => unreachable!("Done state only used for outbound transfers"),
                }
            }
            if Instant::now() >= overall_deadline {
                self.inbound.remove(&nonce);
                anyhow::bail!("no response from holder for {filepath} within retry budget");
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
}

fn handle_rendezvous_reply(data: &[u8], session: &SessionSlot, requested_connect: &AtomicBool) {
    let Ok(v) = serde_json::from_slice::<Value>(data) else {
        return;
    };
    if v.get("type").and_then(|t| t.as_str()) == Some("peer") {
        let Some(peer) = v.get("peer").and_then(|p| p.as_array()) else {
            return;
        };
        let (Some(ip), Some(port)) = (
            peer.first().and_then(|x| x.as_str()).and_then(|s| s.parse::<Ipv4Addr>().ok()),
            peer.get(1).and_then(|x| x.as_u64()),
        ) else {
            return;
        };
        let direction = if requested_connect.swap(false, Ordering::Relaxed) {
            Direction::Initiator
        } else {
            Direction::Responder
        };
        let addr = SocketAddr::from((ip, port as u16));
        info!("received peer assignment from rendezvous: {addr}");
        session.set(addr, direction);
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_peer_datagram(
    data: &[u8],
    from: SocketAddr,
    socket: &UdpSocket,
    session: &SessionSlot,
    inbound: &InboundTable,
    outbound: &OutboundTable,
    site: &SiteStore,
) {
    let Ok(msg) = Message::from_bytes(data) else {
        // zero-byte NAT-pinhole keepalive and any other undecodable datagram
        return;
    };

    match msg {
        Message::FileRequest { filepath, nonce } => {
            let bytes = match site.read(&filepath) {
                Ok(b) => b,
                Err(e) => {
                    warn!("file_request for {filepath}: {e}");
                    return;
                }
            };
            let digest = hex_digest(&bytes);
            let filename = filepath.clone();
            let transfer = OutboundTransfer::new(nonce.clone(), filepath, &bytes, digest.clone(), config::CHUNK_SIZE);
            let single_chunk = transfer.is_single_chunk();
            let chunk0 = transfer.chunk(0).unwrap_or(&[]).to_vec();
            let handle = outbound.insert(nonce.clone(), transfer);
            handle.lock().unwrap().mark_sent(0, Instant::now());

            let response = Message::FileResponse {
                hash: digest,
                chunk: hex::encode(chunk0),
                nonce,
                filename,
                single_chunk,
            };
            send(socket, &response, from);
        }

        Message::FileResponse {
            hash,
            chunk,
            nonce,
            filename,
            single_chunk,
        } => {
            let Ok(data) = hex::decode(&chunk) else {
                warn!("file_response with non-hex chunk for {filename}");
                return;
            };
            let mut transfer = InboundTransfer::new(nonce.clone(), hash, filename);
            transfer.add_chunk(0, data, single_chunk);
            inbound.insert(nonce.clone(), transfer);
            send(socket, &Message::FileAck { seq: 0, nonce }, from);
        }

        Message::FileAck { seq, nonce } => {
            let Some(handle) = outbound.get(&nonce) else { return };
            let mut transfer = handle.lock().unwrap();
            transfer.mark_acked(seq);
            if let Some(next_seq) = transfer.next_seq_to_send() {
                send_chunk(socket, from, &nonce, next_seq, &mut transfer);
            }
        }

        Message::FileChunk { seq, data, nonce, is_last } | Message::FileDone { seq, data, nonce, is_last } => {
            let Some(handle) = inbound.get(&nonce) else {
                return;
            };
            let Ok(raw) = hex::decode(&data) else {
                warn!("file_chunk/file_done with non-hex data, nonce {nonce}");
                return;
            };
            {
                let mut transfer = handle.lock().unwrap();
                transfer.add_chunk(seq, raw, is_last);
            }
            // Acknowledge the exact seq received; stop-and-wait on the
            // holder side means it never sends seq+1 before seeing this.
            send(socket, &Message::FileAck { seq, nonce }, from);
        }

        Message::FileComplete { nonce } => {
            outbound.remove(&nonce);
        }

        Message::Disconnect => {
            // At most one peer session is active at a time, so every
            // current transfer belongs to the session being torn down.
            inbound.cancel_all();
            outbound.cancel_all();
            session.clear();
        }

        Message::Punch { .. } => {}
    }
}

fn send_chunk(socket: &UdpSocket, to: SocketAddr, nonce: &str, seq: u64, transfer: &mut OutboundTransfer) {
    let Some(bytes) = transfer.chunk(seq).map(|c| c.to_vec()) else { return };
    let is_last = seq + 1 == transfer.total_chunks();
    let msg = if is_last {
        Message::FileDone { seq, data: hex::encode(bytes), nonce: nonce.to_string(), is_last: true }
    } else {
        Message::FileChunk { seq, data: hex::encode(bytes), nonce: nonce.to_string(), is_last: false }
    };
    transfer.mark_sent(seq, Instant::now());
    send(socket, &msg, to);
}

/// Resends the current unacked chunk of every outbound transfer whose
/// retransmit timer has elapsed, and fails transfers that exhaust their
/// retry budget.
fn retransmit_due_chunks(socket: &UdpSocket, remote: SocketAddr, outbound: &OutboundTable) {
    let nonces: Vec<String> = outbound.keys();
    for nonce in nonces {
        let Some(handle) = outbound.get(&nonce) else { continue };
        let mut transfer = handle.lock().unwrap();
        if transfer.state != TransferState::Active {
            continue;
        }
        let Some(seq) = transfer.next_seq_to_send() else { continue };
        let now = Instant::now();
        if transfer.retries_exhausted(seq, config::CHUNK_MAX_RETRIES) {
            transfer.state = TransferState::Error;
            continue;
        }
        if transfer.should_retransmit(seq, now, config::CHUNK_RETRANSMIT_TIMEOUT, config::CHUNK_MAX_RETRIES) {
            send_chunk(socket, remote, &nonce, seq, &mut transfer);
        }
    }
}

/// Marks an inbound transfer `Error` if a `file_done` already arrived but
/// the transfer has made no progress within `window`. A requester missing
/// interior chunks relies on the holder's own retransmit loop to fill the
/// gap; only a transfer that stalls entirely is surfaced as an error.
fn fail_stalled_inbound(inbound: &InboundTable, window: Duration) {
    let now = Instant::now();
    for nonce in inbound.keys() {
        let Some(handle) = inbound.get(&nonce) else { continue };
        let mut transfer = handle.lock().unwrap();
        if transfer.state == TransferState::Active
            && transfer.expected_total.is_some()
            && !transfer.is_complete()
            && now.duration_since(transfer.last_activity) > window
        {
            transfer.state = TransferState::Error;
        }
    }
}

fn send(socket: &UdpSocket, msg: &Message, to: SocketAddr) {
    if let Err(e) = socket.send_to(&msg.to_bytes(), to) {
        warn!("sendto {to} failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (UdpSocket, UdpSocket) {
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();
        a.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        b.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        (a, b)
    }

    #[test]
    fn file_request_yields_file_response_with_matching_digest() {
        let (holder_sock, requester_sock) = pair();
        let session = SessionSlot::new();
        let inbound = InboundTable::new();
        let outbound = OutboundTable::new();
        let dir = tempfile::tempdir().unwrap();
        let site = SiteStore::new(dir.path());
        site.write("index.html", b"hello world").unwrap();

        let requester_addr = requester_sock.local_addr().unwrap();
        let request = Message::FileRequest { filepath: "index.html".into(), nonce: "00000001".into() };
        requester_sock.send_to(&request.to_bytes(), holder_sock.local_addr().unwrap()).unwrap();

        let mut buf = [0u8; 2048];
        let (len, from) = holder_sock.recv_from(&mut buf).unwrap();
        handle_peer_datagram(&buf[..len], from, &holder_sock, &session, &inbound, &outbound, &site);

        let (len, _) = requester_sock.recv_from(&mut buf).unwrap();
        let reply = Message::from_bytes(&buf[..len]).unwrap();
        match reply {
            Message::FileResponse { hash, chunk, single_chunk, .. } => {
                assert!(single_chunk);
                let raw = hex::decode(chunk).unwrap();
                assert_eq!(raw, b"hello world");
                assert_eq!(hash, hex_digest(b"hello world"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert_eq!(outbound.len(), 1);
        let _ = requester_addr;
    }

    #[test]
    fn file_ack_advances_outbound_and_sends_next_chunk() {
        let (holder_sock, requester_sock) = pair();
        let inbound = InboundTable::new();
        let outbound = OutboundTable::new();
        let session = SessionSlot::new();
        let dir = tempfile::tempdir().unwrap();
        let site = SiteStore::new(dir.path());

        let bytes = vec![b'x'; (config::CHUNK_SIZE * 2) + 10];
        let digest = hex_digest(&bytes);
        let mut transfer = OutboundTransfer::new("n".into(), "big.bin".into(), &bytes, digest, config::CHUNK_SIZE);
        transfer.mark_sent(0, Instant::now());
        outbound.insert("n".into(), transfer);

        let ack = Message::FileAck { seq: 0, nonce: "n".into() };
        handle_peer_datagram(&ack.to_bytes(), requester_sock.local_addr().unwrap(), &holder_sock, &session, &inbound, &outbound, &site);

        let handle = outbound.get("n").unwrap();
        assert_eq!(handle.lock().unwrap().base, 1);

        let mut buf = [0u8; 2048];
        let (len, _) = requester_sock.recv_from(&mut buf).unwrap();
        let sent = Message::from_bytes(&buf[..len]).unwrap();
        assert!(matches!(sent, Message::FileChunk { seq: 1, .. }));
    }

    #[test]
    fn stalled_inbound_with_gap_is_marked_error_after_window() {
        let inbound = InboundTable::new();
        let mut t = InboundTransfer::new("n".into(), "d".into(), "f".into());
        t.add_chunk(0, b"a".to_vec(), false);
        t.add_chunk(2, b"c".to_vec(), true);
        t.last_activity = Instant::now() - Duration::from_secs(3600);
        inbound.insert("n".into(), t);

        fail_stalled_inbound(&inbound, Duration::from_millis(1));
        let handle = inbound.get("n").unwrap();
        assert_eq!(handle.lock().unwrap().state, TransferState::Error);
    }

    #[test]
    fn disconnect_cancels_active_transfers_and_clears_session() {
        let (holder_sock, requester_sock) = pair();
        let inbound = InboundTable::new();
        let outbound = OutboundTable::new();
        let session = SessionSlot::new();
        let dir = tempfile::tempdir().unwrap();
        let site = SiteStore::new(dir.path());

        let peer_addr = requester_sock.local_addr().unwrap();
        session.set(peer_addr, Direction::Responder);
        inbound.insert("in".into(), InboundTransfer::new("in".into(), "d".into(), "f".into()));
        outbound.insert(
            "out".into(),
            OutboundTransfer::new("out".into(), "f".into(), b"ABCD", "d".into(), config::CHUNK_SIZE),
        );

        let disconnect = Message::Disconnect;
        handle_peer_datagram(&disconnect.to_bytes(), peer_addr, &holder_sock, &session, &inbound, &outbound, &site);

        assert_eq!(inbound.get("in").unwrap().lock().unwrap().state, TransferState::Cancelled);
        assert_eq!(outbound.get("out").unwrap().lock().unwrap().state, TransferState::Cancelled);
        assert_eq!(session.remote_address(), None);
    }
}
