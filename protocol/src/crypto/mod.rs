//! # Cryptographic Primitives
//!
//! Hashing only. Signing, key generation and encryption of credential
//! material belong to the credential layer that produces transaction
//! payloads; the ledger core never inspects them.

pub mod hash;

pub use hash::{blake3_hash, blake3_hex, meets_difficulty, pow_hash};
