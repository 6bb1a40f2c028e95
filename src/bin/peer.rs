//! Peer endpoint binary: publishes a local site to the tracker and serves
//! it to other peers, or fetches a single page from whichever peer holds
//! it.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use peernet::config;
use peernet::digest::hex_digest;
use peernet::peer::endpoint::Endpoint;
use peernet::site::SiteStore;
use peernet::tracker::client::TrackerClient;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "peer", about = "Peer endpoint: publish or fetch site pages")]
struct Args {
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    #[arg(long, env = "MATCHMAKER_HOST")]
    rendezvous_host: String,

    #[arg(long, env = "MATCHMAKER_PORT", default_value_t = config::RENDEZVOUS_DEFAULT_PORT)]
    rendezvous_port: u16,

    #[arg(long, env = "TRACKER_SERVER_URL", default_value = "http://localhost:8000")]
    tracker_url: String,

    #[arg(long, default_value = ".")]
    site_root: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Announce every file under a site directory and serve it to peers.
    Publish {
        /// Site name, the top-level directory under --site-root.
        site: String,
    },
    /// Fetch a single logical file path from whichever peer holds it.
    Fetch {
        /// Logical path, e.g. "myblog/index.html".
        filepath: String,
        /// Where to write the downloaded bytes under --site-root.
        #[arg(long)]
        out: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let rendezvous_addr: SocketAddr = format!("{}:{}", args.rendezvous_host, args.rendezvous_port)
        .parse()
        .with_context(|| "parsing rendezvous address")?;
    let site = Arc::new(SiteStore::new(args.site_root.clone()));
    let tracker = TrackerClient::new(&args.tracker_url)?;

    let endpoint = Endpoint::bind(args.bind, rendezvous_addr, site.clone())?;
    let observed = endpoint.register()?;
    log::info!("registered with rendezvous, observed address {observed}");

    let _receive = endpoint.spawn_receive();
    let _keepalive = endpoint.spawn_keepalive();
    let _maintenance = endpoint.spawn_maintenance();

    match args.command {
        Command::Publish { site: site_name } => publish(&endpoint, &site, &tracker, &site_name),
        Command::Fetch { filepath, out } => fetch(&endpoint, &site, &tracker, &filepath, &out),
    }
}

fn publish(endpoint: &Endpoint, site: &SiteStore, tracker: &TrackerClient, site_name: &str) -> Result<()> {
    let files = site.walk_site(site_name)?;
    if files.is_empty() {
        return Err(anyhow!("no files found under site {site_name}"));
    }
    for filepath in &files {
        let bytes = site.read(filepath)?;
        let digest = hex_digest(&bytes);
        tracker.add(filepath, &digest)?;
        log::info!("announced {filepath} ({} bytes, {digest})", bytes.len());
    }
    log::info!("serving {} file(s); press Ctrl-C to stop", files.len());
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

/// Tries each candidate holder in turn; a candidate that fails is reported
/// to the tracker for that file only and the next candidate is tried. On
/// success, this peer registers itself with the tracker as a new holder.
fn fetch(endpoint: &Endpoint, site: &SiteStore, tracker: &TrackerClient, filepath: &str, out: &str) -> Result<()> {
    let peers = tracker.get_peers(filepath)?;
    if peers.is_empty() {
        return Err(anyhow!("no peers hold {filepath}"));
    }

    let mut last_err = None;
    for holder_ip in peers {
        match fetch_from_holder(endpoint, holder_ip, filepath, out) {
            Ok(()) => {
                let bytes = site.read(out)?;
                let digest = hex_digest(&bytes);
                tracker.add(filepath, &digest)?;
                log::info!("fetched {filepath} -> {out}, registered as holder");
                return Ok(());
            }
            Err(e) => {
                log::warn!("fetch of {filepath} from {holder_ip} failed: {e}, trying next candidate");
                let _ = tracker.remove(holder_ip, filepath);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("no peers hold {filepath}")))
}

fn fetch_from_holder(endpoint: &Endpoint, holder_ip: Ipv4Addr, filepath: &str, out: &str) -> Result<()> {
    endpoint.request_connect(holder_ip)?;

    let deadline = Instant::now() + config::REGISTRATION_TIMEOUT;
    let holder_addr = loop {
        if let Some(addr) = endpoint.session().remote_address() {
            break addr;
        }
        if Instant::now() >= deadline {
            return Err(anyhow!("rendezvous did not introduce peer {holder_ip} in time"));
        }
        thread::sleep(Duration::from_millis(50));
    };

    endpoint.fetch(holder_addr, filepath, out)
}
