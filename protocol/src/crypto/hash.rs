//! # Hashing Utilities
//!
//! Every digest in the ledger is BLAKE3 rendered as 64 lowercase hex
//! characters. Proofs of work, block hashes and Merkle nodes all go through
//! this module so that every node agrees on the exact byte encoding.
//!
//! ## Proof-of-work encoding
//!
//! ```text
//! pow_hash(data, nonce) = hex(BLAKE3(utf8(data) ++ ascii_decimal(nonce)))
//! ```
//!
//! For a block, `data` is `previous_hash ++ merkle_root`. A hash satisfies
//! difficulty `d` when its first `d` characters are all `'0'`.

/// Compute the BLAKE3 hash of the input data.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// BLAKE3 digest of `data` as lowercase hex.
///
/// # Example
///
/// ```
/// use registu_protocol::crypto::hash::blake3_hex;
///
/// let digest = blake3_hex(b"registu");
/// assert_eq!(digest.len(), 64);
/// ```
pub fn blake3_hex(data: &[u8]) -> String {
    hex::encode(blake3_hash(data))
}

/// Hash of `data` followed by the decimal rendering of `nonce`.
pub fn pow_hash(data: &str, nonce: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(data.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

/// True when the first `difficulty` characters of `hash` are `'0'`.
///
/// A hash shorter than `difficulty` never qualifies.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.as_bytes()[..difficulty].iter().all(|&b| b == b'0')
}

/// Parent digest of two hex-encoded Merkle children.
pub fn merkle_parent(left: &str, right: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

/// True when `s` looks like a digest produced by this module.
pub fn is_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
