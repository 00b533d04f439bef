//! Content digest used to name output bundles.

use md5::{Digest, Md5};

/// MD5 of a byte slice as lowercase hex (32 characters).
pub fn digest_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}
