//! Peer-to-peer wire messages: JSON datagrams tagged by `type`, each
//! carrying the 8-character `nonce` drawn by the transfer's initiator. The
//! tagged-enum-over-JSON idiom mirrors a binary tagged union over a wire
//! protocol, just swapped to JSON.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::{Error, ErrorKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "file_request")]
    FileRequest { filepath: String, nonce: String },

    #[serde(rename = "file_response")]
    FileResponse {
        hash: String,
        chunk: String,
        nonce: String,
        filename: String,
        single_chunk: bool,
    },

    #[serde(rename = "file_ack")]
    FileAck { seq: u64, nonce: String },

    #[serde(rename = "file_chunk")]
    FileChunk {
        seq: u64,
        data: String,
        nonce: String,
        is_last: bool,
    },

    #[serde(rename = "file_done")]
    FileDone {
        seq: u64,
        data: String,
        nonce: String,
        is_last: bool,
    },

    #[serde(rename = "file_complete")]
    FileComplete { nonce: String },

    #[serde(rename = "disconnect")]
    Disconnect,

    #[serde(rename = "punch")]
    Punch { t: f64 },
}

impl Message {
    pub fn nonce(&self) -> Option<&str> {
        match self {
            Message::FileRequest { nonce, .. }
            | Message::FileResponse { nonce, .. }
            | Message::FileAck { nonce, .. }
            | Message::FileChunk { nonce, .. }
            | Message::FileDone { nonce, .. }
            | Message::FileComplete { nonce } => Some(nonce),
            Message::Disconnect | Message::Punch { .. } => None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Message always serializes")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Message, Error> {
        serde_json::from_slice(data).map_err(|e| Error::new(ErrorKind::InvalidData, e))
    }
}

/// 8-decimal-digit nonce, drawn by whichever side allocates a new transfer.
pub fn generate_nonce() -> String {
    let mut rng = rand::thread_rng();
    format!("{:08}", rng.gen_range(0..100_000_000u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_request_round_trips() {
        let msg = Message::FileRequest {
            filepath: "site/index.html".to_string(),
            nonce: "12345678".to_string(),
        };
        let bytes = msg.to_bytes();
        let decoded = Message::from_bytes(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn file_chunk_and_file_done_tag_differently() {
        let chunk = Message::FileChunk {
            seq: 1,
            data: "ab".to_string(),
            nonce: "x".to_string(),
            is_last: false,
        };
        let done = Message::FileDone {
            seq: 2,
            data: "cd".to_string(),
            nonce: "x".to_string(),
            is_last: true,
        };
        let chunk_v: serde_json::Value = serde_json::from_slice(&chunk.to_bytes()).unwrap();
        let done_v: serde_json::Value = serde_json::from_slice(&done.to_bytes()).unwrap();
        assert_eq!(chunk_v["type"], "file_chunk");
        assert_eq!(done_v["type"], "file_done");
    }

    #[test]
    fn nonce_is_eight_digits() {
        for _ in 0..50 {
            let n = generate_nonce();
            assert_eq!(n.len(), 8);
            assert!(n.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn unknown_type_fails_to_decode() {
        assert!(Message::from_bytes(br#"{"type":"bogus"}"#).is_err());
    }
}
