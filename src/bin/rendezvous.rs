//! Rendezvous service binary: records observed addresses and introduces
//! peers to each other on request.

use clap::Parser;
use peernet::config;
use peernet::rendezvous::server::{self, Config};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "rendezvous", about = "UDP rendezvous / hole-punching service")]
struct Args {
    #[arg(long, env = "MATCHMAKER_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "MATCHMAKER_PORT", default_value_t = config::RENDEZVOUS_DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = config::RENDEZVOUS_STALE_THRESHOLD.as_secs())]
    stale_after_secs: u64,

    #[arg(long, default_value_t = config::RENDEZVOUS_SWEEP_INTERVAL.as_secs())]
    sweep_interval_secs: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    server::run(Config {
        host: args.host,
        port: args.port,
        stale_after: Duration::from_secs(args.stale_after_secs),
        sweep_interval: Duration::from_secs(args.sweep_interval_secs),
    })
}
