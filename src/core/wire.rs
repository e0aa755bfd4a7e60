//! Fixed-Width Wire Encoding
//!
//! Every large integer crosses the channel as a fixed-width hex string.
//! Hash chains are computed over these exact widths, so a value that
//! round-trips with a different width would break verification.
//!
//! - 32 bytes: names, nonces, peer identifiers
//! - 80 bytes: ciphertexts and key exponents

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Width of names, nonces and peer ids in bytes.
pub const DIGEST_BYTES: usize = 32;

/// Width of ciphertexts and exponents in bytes.
pub const CIPHER_BYTES: usize = 80;

/// Errors decoding fixed-width values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WireError {
    /// Hex string has the wrong number of characters.
    #[error("expected {expected} hex chars, got {got}")]
    BadLength {
        /// Expected character count.
        expected: usize,
        /// Actual character count.
        got: usize,
    },

    /// String is not valid hex.
    #[error("invalid hex: {0}")]
    BadHex(#[from] hex::FromHexError),

    /// Value does not fit the fixed width.
    #[error("value needs {needed} bytes, width is {width}")]
    Overflow {
        /// Bytes the value needs.
        needed: usize,
        /// Available width.
        width: usize,
    },
}

/// Encode a big integer as big-endian bytes, left padded to `width`.
pub fn biguint_to_bytes(value: &BigUint, width: usize) -> Result<Vec<u8>, WireError> {
    let bytes = value.to_bytes_be();
    // to_bytes_be() yields [0] for zero
    let raw: &[u8] = if bytes == [0u8] { &[] } else { &bytes };
    if raw.len() > width {
        return Err(WireError::Overflow { needed: raw.len(), width });
    }
    let mut out = vec![0u8; width - raw.len()];
    out.extend_from_slice(raw);
    Ok(out)
}

/// Encode a big integer as a fixed-width lowercase hex string.
pub fn biguint_to_hex(value: &BigUint, width: usize) -> Result<String, WireError> {
    biguint_to_bytes(value, width).map(hex::encode)
}

/// Decode a fixed-width hex string into a big integer.
pub fn biguint_from_hex(s: &str, width: usize) -> Result<BigUint, WireError> {
    if s.len() != width * 2 {
        return Err(WireError::BadLength { expected: width * 2, got: s.len() });
    }
    let bytes = hex::decode(s)?;
    Ok(BigUint::from_bytes_be(&bytes))
}

/// Decode a 32-byte hex string.
pub fn digest_from_hex(s: &str) -> Result<[u8; DIGEST_BYTES], WireError> {
    if s.len() != DIGEST_BYTES * 2 {
        return Err(WireError::BadLength { expected: DIGEST_BYTES * 2, got: s.len() });
    }
    let mut out = [0u8; DIGEST_BYTES];
    hex::decode_to_slice(s, &mut out)?;
    Ok(out)
}

/// Declare a 32-byte identifier newtype carried on the wire as hex.
macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; $crate::core::wire::DIGEST_BYTES]);

        impl $name {
            /// Create from raw bytes.
            pub const fn new(bytes: [u8; $crate::core::wire::DIGEST_BYTES]) -> Self {
                Self(bytes)
            }

            /// Get raw bytes.
            pub fn as_bytes(&self) -> &[u8; $crate::core::wire::DIGEST_BYTES] {
                &self.0
            }

            /// Full 64-char hex form.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse the full 64-char hex form.
            pub fn from_hex(s: &str) -> Result<Self, $crate::core::wire::WireError> {
                $crate::core::wire::digest_from_hex(s).map(Self)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", hex::encode(&self.0[..4]))
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(&self.0[..4]))
            }
        }

        impl ::serde::Serialize for $name {
            fn serialize<S: ::serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D: ::serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <String as ::serde::Deserialize>::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(::serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use fixed_bytes;

/// A ciphertext or exponent on the wire (80-byte hex).
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Cipher(pub BigUint);

impl Cipher {
    /// Unwrap the integer.
    pub fn into_inner(self) -> BigUint {
        self.0
    }

    /// Borrow the integer.
    pub fn value(&self) -> &BigUint {
        &self.0
    }
}

impl From<BigUint> for Cipher {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.0.to_bytes_be();
        let tail = &bytes[bytes.len().saturating_sub(4)..];
        write!(f, "Cipher(..{})", hex::encode(tail))
    }
}

impl Serialize for Cipher {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = biguint_to_hex(&self.0, CIPHER_BYTES).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&s)
    }
}

impl<'de> Deserialize<'de> for Cipher {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        biguint_from_hex(&s, CIPHER_BYTES)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_hex_is_fixed_width() {
        let small = BigUint::from(5u32);
        let s = biguint_to_hex(&small, CIPHER_BYTES).unwrap();
        assert_eq!(s.len(), CIPHER_BYTES * 2);
        assert!(s.ends_with("05"));
        assert_eq!(biguint_from_hex(&s, CIPHER_BYTES).unwrap(), small);
    }

    #[test]
    fn test_zero_encodes_as_all_zeroes() {
        let s = biguint_to_hex(&BigUint::from(0u32), DIGEST_BYTES).unwrap();
        assert_eq!(s, "0".repeat(DIGEST_BYTES * 2));
    }

    #[test]
    fn test_short_hex_rejected() {
        let err = biguint_from_hex("abcd", CIPHER_BYTES).unwrap_err();
        assert_eq!(err, WireError::BadLength { expected: 160, got: 4 });
    }

    #[test]
    fn test_overflow_rejected() {
        let big = BigUint::from(1u32) << (CIPHER_BYTES * 8);
        assert!(matches!(
            biguint_to_hex(&big, CIPHER_BYTES),
            Err(WireError::Overflow { needed: 81, width: 80 })
        ));
    }

    #[test]
    fn test_cipher_json_rejects_wrong_width() {
        let json = format!("\"{}\"", "ab".repeat(CIPHER_BYTES - 1));
        assert!(serde_json::from_str::<Cipher>(&json).is_err());

        let json = format!("\"{}\"", "ab".repeat(CIPHER_BYTES));
        let cipher: Cipher = serde_json::from_str(&json).unwrap();
        assert_eq!(cipher.value().to_bytes_be().len(), CIPHER_BYTES);
    }

    #[test]
    fn test_digest_from_hex_rejects_non_hex() {
        let s = "zz".repeat(DIGEST_BYTES);
        assert!(matches!(digest_from_hex(&s), Err(WireError::BadHex(_))));
    }
}
