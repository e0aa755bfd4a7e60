//! Card Hashing
//!
//! SHA-256 over fixed-width encodings, with a domain separator per use:
//! - Raw card commitments (the public initial deck)
//! - Name chains (`name = hash(nonce ‖ prev_name)`)
//! - Per-card key commitments published during rekey

use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use super::wire::{biguint_to_bytes, fixed_bytes, CIPHER_BYTES};

fixed_bytes! {
    /// Hash-chained card name, also used for raw card commitments.
    Name
}

fixed_bytes! {
    /// 256-bit random nonce disclosed along a name chain.
    Nonce
}

/// Domain separator for raw card commitments.
const CARD_DOMAIN: &[u8] = b"SECRET_CARDS_CARD_V1";

/// Domain separator for name chain links.
const NAME_DOMAIN: &[u8] = b"SECRET_CARDS_NAME_V1";

/// Domain separator for per-card key commitments.
const KEY_DOMAIN: &[u8] = b"SECRET_CARDS_KEY_V1";

/// Deterministic hasher for protocol values.
///
/// Wraps SHA-256 with helpers for fixed-width integers.
/// Order of updates is part of the format.
pub struct CardHasher {
    hasher: Sha256,
}

impl CardHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a big integer at the ciphertext width.
    ///
    /// Values wider than the ciphertext width are hashed unpadded; the
    /// protocol never produces one since every value is reduced mod p.
    pub fn update_biguint(&mut self, value: &BigUint) {
        match biguint_to_bytes(value, CIPHER_BYTES) {
            Ok(bytes) => self.hasher.update(bytes),
            Err(_) => self.hasher.update(value.to_bytes_be()),
        }
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> Name {
        Name(self.hasher.finalize().into())
    }
}

/// Commitment to a raw card value.
pub fn hash_card(value: &BigUint) -> Name {
    let mut hasher = CardHasher::new(CARD_DOMAIN);
    hasher.update_biguint(value);
    hasher.finalize()
}

/// Derive the next name in a chain: `hash(nonce ‖ prev)`.
pub fn derive_name(nonce: &Nonce, prev: &Name) -> Name {
    let mut hasher = CardHasher::new(NAME_DOMAIN);
    hasher.update_bytes(nonce.as_bytes());
    hasher.update_bytes(prev.as_bytes());
    hasher.finalize()
}

/// Commitment to a per-card decryption exponent.
pub fn hash_key(exponent: &BigUint) -> Name {
    let mut hasher = CardHasher::new(KEY_DOMAIN);
    hasher.update_biguint(exponent);
    hasher.finalize()
}

/// Compute a plain SHA-256 of arbitrary data.
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Fold a nonce list back up a name chain.
///
/// `nonces` is ordered outermost first (the nonce closest to the final
/// name comes first), so folding starts from the last element.
pub fn fold_names(start: &Name, nonces: &[Nonce]) -> Name {
    nonces
        .iter()
        .rev()
        .fold(*start, |name, nonce| derive_name(nonce, &name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_name_determinism() {
        let nonce = Nonce::new([7; 32]);
        let prev = Name::new([9; 32]);
        assert_eq!(derive_name(&nonce, &prev), derive_name(&nonce, &prev));
    }

    #[test]
    fn test_derive_name_order_matters() {
        let a = Nonce::new([1; 32]);
        let b = Name::new([2; 32]);
        let swapped = derive_name(&Nonce::new(b.0), &Name::new(a.0));
        assert_ne!(derive_name(&a, &b), swapped);
    }

    #[test]
    fn test_domain_separation() {
        let value = BigUint::from(12345u32);
        assert_ne!(hash_card(&value), hash_key(&value));
    }

    #[test]
    fn test_fold_names_matches_manual_chain() {
        let name0 = Name::new([3; 32]);
        let n1 = Nonce::new([4; 32]);
        let n2 = Nonce::new([5; 32]);
        let name1 = derive_name(&n1, &name0);
        let name2 = derive_name(&n2, &name1);

        assert_eq!(fold_names(&name0, &[n2, n1]), name2);
        assert_ne!(fold_names(&name0, &[n1, n2]), name2);
        assert_eq!(fold_names(&name2, &[]), name2);
    }

    #[test]
    fn test_card_hash_uses_fixed_width() {
        // Same integer, different byte lengths on input: identical commitment
        let a = BigUint::from_bytes_be(&[0, 0, 1, 2]);
        let b = BigUint::from_bytes_be(&[1, 2]);
        assert_eq!(hash_card(&a), hash_card(&b));
    }

    #[test]
    fn test_name_hex_roundtrip_through_json() {
        let name = derive_name(&Nonce::new([1; 32]), &Name::new([2; 32]));
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json.len(), 64 + 2);
        let parsed: Name = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, name);
    }
}
