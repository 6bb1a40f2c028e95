//! UDP rendezvous server: a single listener that records observed addresses
//! and introduces pairs on request. Grounded directly in
//! `original_source/matchmaker-server/matchmaker.py` (`run_server`,
//! `handle_packet`, `cleanup_loop`) — one thread per inbound packet for
//! decoding, a single `Registry` mutex for mutation, and a background sweep
//! thread for staleness.

use crate::config;
use crate::rendezvous::message::{parse_request, ServerMessage};
use crate::rendezvous::registry::Registry;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub struct Config {
    pub host: String,
    pub port: u16,
    pub stale_after: Duration,
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: config::RENDEZVOUS_DEFAULT_PORT,
            stale_after: config::RENDEZVOUS_STALE_THRESHOLD,
            sweep_interval: config::RENDEZVOUS_SWEEP_INTERVAL,
        }
    }
}

pub fn run(cfg: Config) -> Result<()> {
    let socket = UdpSocket::bind((cfg.host.as_str(), cfg.port))
        .with_context(|| format!("binding rendezvous socket on {}:{}", cfg.host, cfg.port))?;
    info!("rendezvous listening on {}:{}", cfg.host, cfg.port);

    let registry = Arc::new(Registry::new());

    {
        let registry = registry.clone();
        let stale_after = cfg.stale_after;
        let sweep_interval = cfg.sweep_interval;
        thread::spawn(move || sweep_loop(registry, stale_after, sweep_interval));
    }

    let mut buf = [0u8; 4096];
    loop {
        let (len, addr) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) => {
                warn!("recv_from failed: {e}");
                continue;
            }
        };
        let data = buf[..len].to_vec();
        let registry = registry.clone();
        let socket = socket.try_clone().context("cloning rendezvous socket")?;
        thread::spawn(move || handle_packet(&data, addr, &socket, &registry));
    }
}

fn sweep_loop(registry: Arc<Registry>, stale_after: Duration, interval: Duration) {
    loop {
        thread::sleep(interval);
        let reaped = registry.sweep(stale_after);
        if reaped > 0 {
            info!("reaped {reaped} stale rendezvous entries");
        }
    }
}

/// Decodes and dispatches one inbound datagram. `addr` is the observed
/// source address — never anything the payload itself claims.
fn handle_packet(data: &[u8], addr: SocketAddr, socket: &UdpSocket, registry: &Registry) {
    let SocketAddr::V4(v4) = addr else {
        debug!("dropping datagram from non-ipv4 peer {addr}");
        return;
    };
    let Some(msg) = parse_request(data) else {
        debug!("dropping malformed datagram from {addr}");
        return;
    };
    let ip = *v4.ip();

    match msg.get("type").and_then(|t| t.as_str()) {
        Some("register") => {
            registry.observe(ip, addr);
            let reply = ServerMessage::YourAddr {
                your_addr: (ip.to_string(), addr.port()),
            };
            send(socket, &reply, addr);
        }
        Some("connect") => {
            let target_ip = msg.get("target_ip").and_then(|t| t.as_str());
            let Some(target_ip) = target_ip.and_then(|s| s.parse::<std::net::Ipv4Addr>().ok())
            else {
                send(
                    socket,
                    &ServerMessage::Error {
                        error: "invalid target_ip".to_string(),
                    },
                    addr,
                );
                return;
            };

            match registry.lookup(target_ip) {
                Some(target_addr) => {
                    let to_requester = ServerMessage::Peer {
                        peer: (target_ip.to_string(), target_addr.port()),
                    };
                    let to_target = ServerMessage::Peer {
                        peer: (ip.to_string(), addr.port()),
                    };
                    send(socket, &to_requester, addr);
                    send(socket, &to_target, target_addr);
                    info!("linked {addr} <-> {target_addr}");
                }
                None => {
                    send(
                        socket,
                        &ServerMessage::Error {
                            error: "target not found or inactive".to_string(),
                        },
                        addr,
                    );
                }
            }
        }
        _ => {
            send(
                socket,
                &ServerMessage::Error {
                    error: "unknown message type".to_string(),
                },
                addr,
            );
        }
    }
}

fn send(socket: &UdpSocket, msg: &ServerMessage, to: SocketAddr) {
    if let Err(e) = socket.send_to(&msg.to_bytes(), to) {
        warn!("sendto {to} failed: {e}");
    }
}
