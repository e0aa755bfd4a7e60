//! Core cryptographic primitives.
//!
//! Everything here is synchronous and free of protocol state: the
//! commutative cipher, the hash constructions, fixed-width wire
//! encodings, peer identity and the table RNG.

pub mod wire;
pub mod hash;
pub mod peer;
pub mod rng;
pub mod sra;

// Re-export core types
pub use wire::{Cipher, WireError, CIPHER_BYTES, DIGEST_BYTES};
pub use hash::{derive_name, fold_names, hash_card, hash_key, Name, Nonce};
pub use peer::{OrderExt, PeerId};
pub use rng::{seeded_rng, table_rng, TableRng};
pub use sra::Key;
