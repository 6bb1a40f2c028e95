//! Content digest used for end-to-end transfer integrity: MD5, hex-encoded.
//! Used only for integrity, never for security.

use md5::{Digest, Md5};

pub fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
