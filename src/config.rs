//! Shared defaults and environment fallback, mirroring the env vars the
//! Python original read at startup (`MATCHMAKER_HOST`, `MATCHMAKER_PORT`,
//! `TRACKER_SERVER_URL`).

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const RENDEZVOUS_DEFAULT_PORT: u16 = 3478;
pub const RENDEZVOUS_STALE_THRESHOLD: Duration = Duration::from_secs(120);
pub const RENDEZVOUS_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
pub const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

pub const CHUNK_SIZE: usize = 1200;
pub const CHUNK_RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(1000);
pub const CHUNK_MAX_RETRIES: u32 = 6;
pub const TRANSFER_STALE_THRESHOLD: Duration = Duration::from_secs(300);

pub const SOCKET_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Resolves the rendezvous address a peer should register with, falling
/// back to the `MATCHMAKER_HOST`/`MATCHMAKER_PORT` environment variables
/// when no explicit flag was given.
pub fn rendezvous_addr_from_env() -> anyhow::Result<SocketAddr> {
    let host = std::env::var("MATCHMAKER_HOST")
        .map_err(|_| anyhow::anyhow!("MATCHMAKER_HOST must be set"))?;
    let port: u16 = std::env::var("MATCHMAKER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(RENDEZVOUS_DEFAULT_PORT);
    let ip: Ipv4Addr = host.parse()?;
    Ok(SocketAddr::from((ip, port)))
}

pub fn tracker_url_from_env() -> String {
    std::env::var("TRACKER_SERVER_URL").unwrap_or_else(|_| "http://localhost:8000".to_string())
}
