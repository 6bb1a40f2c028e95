//! Tracker service binary: the HTTP file/peer index.

use clap::Parser;
use peernet::tracker::http::router;
use peernet::tracker::index::TrackerIndex;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "tracker", about = "HTTP file/peer index")]
struct Args {
    #[arg(long, env = "TRACKER_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "TRACKER_PORT", default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let index = Arc::new(TrackerIndex::new());
    let app = router(index).into_make_service_with_connect_info::<SocketAddr>();

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    log::info!("tracker listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
