//! SRA Commutative Cipher
//!
//! Pohlig-Hellman style exponentiation cipher over a shared prime.
//! Because every key works mod the same `p`, exponents compose by
//! multiplication mod `p - 1`, so layers can be added and removed in
//! any order:
//!
//! ```text
//! m^(e1·e2) ^(d1) ^(d2) == m^(e1·e2) ^(d2) ^(d1) == m   (mod p)
//! ```
//!
//! The modulus is the Mersenne prime `2^607 - 1`, a nothing-up-my-sleeve
//! number every peer can derive independently.

use std::sync::OnceLock;

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_traits::{One, Signed, Zero};
use rand::Rng;
use tracing::trace;

use super::hash::{hash_key, Name};

/// Exponent of the Mersenne prime modulus.
pub const MODULUS_EXPONENT: u32 = 607;

/// Default key size in bits.
pub const DEFAULT_KEY_BITS: u64 = 600;

static MODULUS: OnceLock<BigUint> = OnceLock::new();
static PHI: OnceLock<BigUint> = OnceLock::new();

/// The shared prime `p = 2^607 - 1`.
pub fn modulus() -> &'static BigUint {
    MODULUS.get_or_init(|| (BigUint::one() << MODULUS_EXPONENT) - BigUint::one())
}

/// `p - 1`, the order of the multiplicative group.
pub fn phi() -> &'static BigUint {
    PHI.get_or_init(|| modulus() - BigUint::one())
}

/// Whether `value` can carry a card under the cipher.
///
/// `0` and `1` are fixed points of every key, so a card that reaches
/// either value stays publicly traceable through any number of layers.
pub fn is_ciphertext(value: &BigUint) -> bool {
    value > &BigUint::one() && value < modulus()
}

/// Compute `base^exp mod p`.
#[inline]
pub fn mod_exp(base: &BigUint, exp: &BigUint) -> BigUint {
    base.modpow(exp, modulus())
}

/// Extended Euclid.
///
/// Returns `(g, x, y)` with `a·x + b·y = g = gcd(a, b)`.
pub fn egcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    let (mut a, mut b) = (a.clone(), b.clone());
    let (mut x, mut y) = (BigInt::zero(), BigInt::one());
    let (mut u, mut v) = (BigInt::one(), BigInt::zero());

    while !a.is_zero() {
        let q = &b / &a;
        let r = &b % &a;
        let m = &x - &u * &q;
        let n = &y - &v * &q;
        b = a;
        a = r;
        x = u;
        y = v;
        u = m;
        v = n;
    }

    (b, x, y)
}

/// An SRA key pair `(e, d)` with `e·d ≡ 1 (mod p-1)`.
///
/// Keys are single-use: one per peer per shuffle round, or one per
/// card per draw. Debug output never prints the exponents.
#[derive(Clone, PartialEq, Eq)]
pub struct Key {
    e: BigUint,
    d: BigUint,
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key").finish_non_exhaustive()
    }
}

impl Key {
    /// Generate a fresh key with a random `bits`-bit encryption exponent.
    ///
    /// Candidates that are not coprime to `p - 1` are discarded and
    /// redrawn; this is expected roughly half the time since `p - 1` is even.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, bits: u64) -> Self {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let candidate = rng.gen_biguint(bits);
            if let Some(key) = Self::from_exponent(candidate) {
                trace!(attempts, "SRA key generated");
                return key;
            }
        }
    }

    /// Build a key from a chosen encryption exponent.
    ///
    /// Returns `None` if `e < 2` or `gcd(e, p-1) != 1`.
    pub fn from_exponent(e: BigUint) -> Option<Self> {
        if e <= BigUint::one() || &e >= phi() {
            return None;
        }

        let phi = BigInt::from(phi().clone());
        let (g, x, _) = egcd(&BigInt::from(e.clone()), &phi);
        if !g.is_one() {
            return None;
        }

        // ensure the inverse is positive
        let d = if x.is_negative() { x + &phi } else { x };
        let d = d.to_biguint()?;

        Some(Self { e, d })
    }

    /// Encryption exponent.
    pub fn e(&self) -> &BigUint {
        &self.e
    }

    /// Decryption exponent.
    pub fn d(&self) -> &BigUint {
        &self.d
    }

    /// Apply this key: `m^e mod p`.
    pub fn encrypt(&self, m: &BigUint) -> BigUint {
        mod_exp(m, &self.e)
    }

    /// Remove this key: `c^d mod p`.
    pub fn decrypt(&self, c: &BigUint) -> BigUint {
        mod_exp(c, &self.d)
    }

    /// Public commitment to the decryption exponent.
    pub fn commitment(&self) -> Name {
        hash_key(&self.d)
    }
}
