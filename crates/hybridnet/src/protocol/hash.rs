use md5::{Digest, Md5};

/// Wire identity of a packet type or rpc method: the first four bytes of the
/// MD5 digest of `name`, read as a little-endian `i32`.
pub fn stable_hash(name: &str) -> i32 {
    let digest = Md5::digest(name.as_bytes());
    i32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}
