//! Random & hash primitives: a thin layer over a CSPRNG, SHA-256
//! and constant-time comparison. Every other module in the vault draws its
//! randomness and hashing through here rather than reaching for `rand`/`sha2`
//! directly, so the whole crate has one audit point for "is this predictable".

use rand::RngExt;
use sha2::{Digest, Sha256};

/// Fills and returns `n` cryptographically random bytes.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::make_rng::<rand::rngs::StdRng>().fill(&mut buf);
    buf
}

/// Fills a caller-provided buffer with cryptographically random bytes.
pub fn fill_random(buf: &mut [u8]) {
    rand::make_rng::<rand::rngs::StdRng>().fill(buf);
}

/// A cryptographically random integer in `[min, max]` inclusive.
pub fn random_int(min: i64, max: i64) -> i64 {
    assert!(min <= max, "random_int: min must be <= max");
    rand::make_rng::<rand::rngs::StdRng>().random_range(min..=max)
}

/// A random UUID v4.
pub fn uuid_v4() -> uuid::Uuid {
    uuid::Uuid::new_v4()
}

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// First 8 bytes of `sha256(data)`, rendered as 16 lowercase hex characters.
pub fn checksum8(data: &[u8]) -> String {
    let digest = sha256(data);
    hex_encode(&digest[..8])
}

/// Raw 8-byte truncated SHA-256 checksum (used in binary headers where a hex
/// string would waste space — the fragment and stego headers both want the
/// 8 bytes directly, `checksum8` is for the human/JSON-facing form).
pub fn checksum8_bytes(data: &[u8]) -> [u8; 8] {
    let digest = sha256(data);
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

pub fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Milliseconds since the Unix epoch, used for entry/index timestamps.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Constant-time byte comparison. Returns `false` immediately if the lengths
/// differ — length itself is assumed non-secret, only content is.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum8_is_deterministic() {
        let data = b"hello world";
        assert_eq!(checksum8(data), checksum8(data));
        assert_eq!(checksum8_bytes(data).len(), 8);
    }

    #[test]
    fn constant_time_eq_matches_content() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn random_int_stays_in_bounds() {
        for _ in 0..100 {
            let v = random_int(5, 9);
            assert!((5..=9).contains(&v));
        }
    }

    #[test]
    fn random_bytes_has_requested_length() {
        assert_eq!(random_bytes(32).len(), 32);
    }
}
