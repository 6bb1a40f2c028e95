//! Wire messages for the rendezvous (matchmaking) service. JSON over UDP,
//! one message per datagram, grounded directly in
//! `original_source/matchmaker-server/matchmaker.py`'s `json.dumps` shapes.

use serde::Serialize;
use serde_json::Value;

/// Replies the server sends. Requests are parsed loosely (see
/// `server.rs::handle_packet`) so that an unrecognized `type` still gets an
/// `error` reply instead of being rejected by strict enum decoding.
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "your_addr")]
    YourAddr { your_addr: (String, u16) },
    #[serde(rename = "peer")]
    Peer { peer: (String, u16) },
    #[serde(rename = "error")]
    Error { error: String },
}

impl ServerMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("ServerMessage always serializes")
    }
}

/// The two request kinds this service recognizes, plus their raw decode.
/// Returns `None` for anything that isn't a JSON object at all; malformed
/// or undecodable datagrams are silently dropped.
pub fn parse_request(data: &[u8]) -> Option<Value> {
    serde_json::from_slice::<Value>(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn your_addr_serializes_with_tag() {
        let msg = ServerMessage::YourAddr {
            your_addr: ("203.0.113.5".to_string(), 51820),
        };
        let v: Value = serde_json::from_slice(&msg.to_bytes()).unwrap();
        assert_eq!(v["type"], "your_addr");
        assert_eq!(v["your_addr"][0], "203.0.113.5");
        assert_eq!(v["your_addr"][1], 51820);
    }

    #[test]
    fn malformed_datagram_parses_to_none() {
        assert!(parse_request(b"not json").is_none());
    }
}
