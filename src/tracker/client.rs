//! Peer-side tracker HTTP client: a raw `TcpStream` driven by a non-blocking
//! `mio::Poll`, matching the shape of a tracker announce/scrape client
//! almost exactly (register, reregister on interest change, split the
//! response at the first blank line), just swapping the wire format from
//! bencode to plain JSON bodies.

use anyhow::{anyhow, Context, Result};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use serde_json::Value;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::Duration;
use url::Url;

pub struct TrackerClient {
    host: String,
    port: u16,
    path_prefix: String,
}

impl TrackerClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let url = Url::parse(base_url).with_context(|| format!("parsing {base_url}"))?;
        let host = url.host_str().ok_or_else(|| anyhow!("no host in {base_url}"))?.to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let path_prefix = url.path().trim_end_matches('/').to_string();
        Ok(TrackerClient { host, port, path_prefix })
    }

    pub fn get_peers(&self, filename: &str) -> Result<Vec<Ipv4Addr>> {
        let body = self.request("GET", &format!("/peers?filename={}", urlencode(filename)))?;
        let peers = body
            .get("peers")
            .and_then(|p| p.as_array())
            .ok_or_else(|| anyhow!("malformed /peers response"))?;
        Ok(peers
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(|s| s.parse().ok())
            .collect())
    }

    pub fn add(&self, filename: &str, hash: &str) -> Result<()> {
        self.request(
            "POST",
            &format!("/add?filename={}&hash={}", urlencode(filename), urlencode(hash)),
        )?;
        Ok(())
    }

    pub fn remove(&self, ip: Ipv4Addr, filename: &str) -> Result<()> {
        self.request(
            "POST",
            &format!("/remove?ip={ip}&filename={}", urlencode(filename)),
        )?;
        Ok(())
    }

    pub fn peer_offline(&self, ip: Ipv4Addr) -> Result<()> {
        self.request("POST", &format!("/peer_offline?ip={ip}"))?;
        Ok(())
    }

    fn request(&self, method: &str, path: &str) -> Result<Value> {
        let addr = format!("{}:{}", self.host, self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow!("could not resolve {}:{}", self.host, self.port))?;
        let raw = http_round_trip(addr, method, &format!("{}{}", self.path_prefix, path), &self.host)?;
        parse_json_body(&raw)
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn http_round_trip(addr: SocketAddr, method: &str, path: &str, host: &str) -> Result<Vec<u8>> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(16);
    let mut stream = TcpStream::connect(addr)?;
    let token = Token(0);
    poll.registry().register(&mut stream, token, Interest::WRITABLE)?;

    let request = format!("{method} {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    let mut written = false;

    loop {
        poll.poll(&mut events, Some(Duration::from_secs(5)))?;
        if events.is_empty() {
            return Err(anyhow!("timeout talking to tracker"));
        }
        for event in events.iter() {
            if event.is_writable() && !written {
                stream.write_all(request.as_bytes())?;
                written = true;
                poll.registry().reregister(&mut stream, token, Interest::READABLE)?;
            }
            if event.is_readable() {
                let mut buf = Vec::new();
                stream.read_to_end(&mut buf)?;
                return Ok(buf);
            }
        }
    }
}

fn parse_json_body(raw: &[u8]) -> Result<Value> {
    let header_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| anyhow!("invalid HTTP response: no header terminator"))?
        + 4;
    let body = &raw[header_end..];
    serde_json::from_slice(body).with_context(|| "decoding tracker JSON response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_body_after_headers() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"status\":\"ok\"}";
        let v = parse_json_body(raw).unwrap();
        assert_eq!(v["status"], "ok");
    }

    #[test]
    fn urlencode_preserves_path_separators() {
        assert_eq!(urlencode("site/index.html"), "site/index.html");
        assert_eq!(urlencode("a b"), "a%20b");
    }

    #[test]
    fn rejects_url_without_host() {
        assert!(TrackerClient::new("not a url").is_err());
    }
}
