//! HTTP surface fronting `TrackerIndex`. Handlers are thin: all the logic
//! lives in `index.rs`. Grounded in `torrust-torrust-tracker` and
//! `mhajder-tftp-rs`, both real P2P/file-transfer services that use `axum`
//! for their HTTP surface.

use crate::tracker::index::TrackerIndex;
use axum::extract::{ConnectInfo, Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

pub fn router(index: Arc<TrackerIndex>) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/peers", get(peers))
        .route("/add", post(add))
        .route("/remove", post(remove))
        .route("/peer_offline", post(peer_offline))
        .route("/all_trackers", get(all_trackers))
        .with_state(index)
}

async fn status() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct PeersQuery {
    filename: String,
}

async fn peers(State(index): State<Arc<TrackerIndex>>, Query(q): Query<PeersQuery>) -> Json<Value> {
    let peers: Vec<String> = index.get_peers(&q.filename).iter().map(|ip| ip.to_string()).collect();
    Json(json!({"filename": q.filename, "peers": peers}))
}

#[derive(Deserialize)]
struct AddQuery {
    filename: String,
    #[allow(dead_code)]
    hash: Option<String>,
}

/// The holder IP is taken from the connecting socket, not a request body
/// field, so a peer can only announce itself — never another address —
/// resolved here via axum's `ConnectInfo`.
async fn add(
    State(index): State<Arc<TrackerIndex>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(q): Query<AddQuery>,
) -> Json<Value> {
    if let SocketAddr::V4(v4) = addr {
        index.add(*v4.ip(), &q.filename);
    }
    Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct RemoveQuery {
    ip: Ipv4Addr,
    filename: String,
}

async fn remove(State(index): State<Arc<TrackerIndex>>, Query(q): Query<RemoveQuery>) -> Json<Value> {
    index.remove(q.ip, &q.filename);
    Json(json!({"status": "ok"}))
}

#[derive(Deserialize)]
struct PeerOfflineQuery {
    ip: Ipv4Addr,
}

async fn peer_offline(State(index): State<Arc<TrackerIndex>>, Query(q): Query<PeerOfflineQuery>) -> Json<Value> {
    index.peer_offline(q.ip);
    Json(json!({"status": "removed"}))
}

async fn all_trackers(State(index): State<Arc<TrackerIndex>>) -> Json<Value> {
    Json(json!({"peers": index.all_trackers(10)}))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> State<Arc<TrackerIndex>> {
        State(Arc::new(TrackerIndex::new()))
    }

    #[tokio::test]
    async fn root_reports_ok() {
        let Json(body) = status().await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn peers_for_unknown_file_is_empty() {
        let state = state();
        let Json(body) = peers(
            State(state.0.clone()),
            Query(PeersQuery {
                filename: "site/index.html".to_string(),
            }),
        )
        .await;
        assert_eq!(body["peers"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn add_then_peers_round_trips() {
        let state = state();
        let conn = ConnectInfo("203.0.113.4:51820".parse().unwrap());
        add(
            State(state.0.clone()),
            conn,
            Query(AddQuery {
                filename: "site/index.html".to_string(),
                hash: None,
            }),
        )
        .await;

        let Json(body) = peers(
            State(state.0.clone()),
            Query(PeersQuery {
                filename: "site/index.html".to_string(),
            }),
        )
        .await;
        assert_eq!(body["peers"][0], "203.0.113.4");
    }

    #[tokio::test]
    async fn remove_then_peers_is_empty() {
        let state = state();
        state.0.add("203.0.113.4".parse().unwrap(), "site/index.html");
        remove(
            State(state.0.clone()),
            Query(RemoveQuery {
                ip: "203.0.113.4".parse().unwrap(),
                filename: "site/index.html".to_string(),
            }),
        )
        .await;
        let Json(body) = peers(
            State(state.0.clone()),
            Query(PeersQuery {
                filename: "site/index.html".to_string(),
            }),
        )
        .await;
        assert_eq!(body["peers"].as_array().unwrap().len(), 0);
    }
}
