//! Card Identity
//!
//! A raw card packs a random nonce and the card index into one integer:
//!
//! ```text
//! value = nonce (256 bits) << 256 | index
//! ```
//!
//! Its commitment `hash_card(value)` is the card's name in the initial
//! deck. Each shuffle pass renames every card with
//! `name' = hash(nonce' ‖ name)`, so names hide the mapping back to the
//! initial deck until the nonces are disclosed.

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use rand::Rng;

use crate::core::rng::random_nonce;
use crate::core::{hash_card, Cipher, Name, Nonce};
use crate::network::protocol::PublishedCard;

use super::error::ProtocolError;

/// Bits reserved for the index below the nonce.
pub const INDEX_BITS: usize = 256;

/// A card in the clear: its face index and blinding nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawCard {
    /// Face index in `0..deck_size`.
    pub index: u32,
    /// Blinding nonce.
    pub nonce: Nonce,
}

impl RawCard {
    /// Create a card with a fresh nonce.
    pub fn generate<R: Rng + ?Sized>(index: u32, rng: &mut R) -> Self {
        Self { index, nonce: random_nonce(rng) }
    }

    /// Packed integer value.
    pub fn value(&self) -> BigUint {
        (BigUint::from_bytes_be(self.nonce.as_bytes()) << INDEX_BITS) | BigUint::from(self.index)
    }

    /// Unpack a value; `None` if it does not have the raw card layout.
    pub fn from_value(value: &BigUint) -> Option<Self> {
        if value.bits() > 2 * INDEX_BITS as u64 {
            return None;
        }
        let mask = (BigUint::one() << INDEX_BITS) - BigUint::one();
        let index = (value & &mask).to_u32()?;
        let high = value >> INDEX_BITS;

        let mut nonce = [0u8; 32];
        if !high.is_zero() {
            let bytes = high.to_bytes_be();
            nonce[32 - bytes.len()..].copy_from_slice(&bytes);
        }
        Some(Self { index, nonce: Nonce::new(nonce) })
    }

    /// Public commitment, the card's initial name.
    pub fn commitment(&self) -> Name {
        hash_card(&self.value())
    }
}

/// One peer's view of a card it renamed and encrypted during its
/// shuffle pass. Kept locally, keyed by the output `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRecord {
    /// Name the card arrived under.
    pub prev_name: Name,
    /// Ciphertext this peer published.
    pub encrypted: BigUint,
    /// Nonce used for the rename.
    pub nonce: Nonce,
    /// Name this peer published.
    pub name: Name,
}

/// The public, unencrypted deck, keyed by commitment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitialDeck {
    cards: BTreeMap<Name, RawCard>,
}

impl InitialDeck {
    /// Generate cards `0..size`, each with a fresh nonce.
    pub fn generate<R: Rng + ?Sized>(size: usize, rng: &mut R) -> Self {
        let cards = (0..size as u32)
            .map(|i| {
                let card = RawCard::generate(i, rng);
                (card.commitment(), card)
            })
            .collect();
        Self { cards }
    }

    /// Validate a published deck.
    ///
    /// Every entry must unpack to a raw card whose commitment is its
    /// name, and the indices must be exactly `0..len` with no repeats.
    /// A zero nonce is refused: the bare index would survive encryption
    /// as a small, guessable value.
    pub fn from_published(deck: &[PublishedCard]) -> Result<Self, ProtocolError> {
        let mut cards = BTreeMap::new();
        let mut indices = BTreeSet::new();

        for published in deck {
            let card = RawCard::from_value(published.encrypted.value()).ok_or_else(|| {
                ProtocolError::InvalidInitialDeck(format!("card {} has no index", published.name))
            })?;
            if card.nonce == Nonce::default() {
                return Err(ProtocolError::InvalidInitialDeck(format!(
                    "card {} has a zero nonce",
                    published.name
                )));
            }
            if card.commitment() != published.name {
                return Err(ProtocolError::InvalidInitialDeck(format!(
                    "card {} does not match its commitment",
                    published.name
                )));
            }
            if (card.index as usize) >= deck.len() || !indices.insert(card.index) {
                return Err(ProtocolError::InvalidInitialDeck(format!(
                    "index {} repeated or out of range",
                    card.index
                )));
            }
            if cards.insert(published.name, card).is_some() {
                return Err(ProtocolError::DuplicateName(published.name));
            }
        }

        Ok(Self { cards })
    }

    /// Cards in the published form, ordered by index.
    pub fn to_published(&self) -> Vec<PublishedCard> {
        let mut cards: Vec<&RawCard> = self.cards.values().collect();
        cards.sort_by_key(|c| c.index);
        cards
            .into_iter()
            .map(|c| PublishedCard { name: c.commitment(), encrypted: Cipher(c.value()) })
            .collect()
    }

    /// Look up a card by commitment.
    pub fn get(&self, commitment: &Name) -> Option<&RawCard> {
        self.cards.get(commitment)
    }

    /// Look up the card a plaintext value unpacks to.
    pub fn lookup_value(&self, value: &BigUint) -> Option<&RawCard> {
        self.cards.get(&hash_card(value)).filter(|card| &card.value() == value)
    }

    /// Number of cards.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Whether the deck is empty.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Iterate `(commitment, card)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Name, &RawCard)> {
        self.cards.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::seeded_rng;

    #[test]
    fn test_raw_card_value_layout() {
        let card = RawCard { index: 7, nonce: Nonce::new([0xAB; 32]) };
        let value = card.value();
        assert_eq!(value.bits(), 512);
        assert_eq!(RawCard::from_value(&value), Some(card));
    }

    #[test]
    fn test_from_value_rejects_wide_values() {
        let value = BigUint::one() << 512;
        assert_eq!(RawCard::from_value(&value), None);

        let huge_index = BigUint::from(u64::MAX);
        assert_eq!(RawCard::from_value(&huge_index), None);
    }

    #[test]
    fn test_generated_deck_validates() {
        let mut rng = seeded_rng(1);
        let deck = InitialDeck::generate(8, &mut rng);
        let published = deck.to_published();

        assert_eq!(published.len(), 8);
        let parsed = InitialDeck::from_published(&published).unwrap();
        assert_eq!(parsed, deck);
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let mut rng = seeded_rng(2);
        let mut published = InitialDeck::generate(4, &mut rng).to_published();
        let dup = RawCard { index: 1, nonce: Nonce::new([9; 32]) };
        published[3] = PublishedCard { name: dup.commitment(), encrypted: Cipher(dup.value()) };

        assert!(matches!(
            InitialDeck::from_published(&published),
            Err(ProtocolError::InvalidInitialDeck(_))
        ));
    }

    #[test]
    fn test_wrong_commitment_rejected() {
        let mut rng = seeded_rng(3);
        let mut published = InitialDeck::generate(4, &mut rng).to_published();
        published[0].name = Name::new([0; 32]);
        assert!(InitialDeck::from_published(&published).is_err());
    }

    #[test]
    fn test_zero_nonce_rejected() {
        let mut rng = seeded_rng(5);
        let mut published = InitialDeck::generate(4, &mut rng).to_published();
        let bare = RawCard { index: 1, nonce: Nonce::default() };
        let slot = published.iter().position(|c| {
            RawCard::from_value(c.encrypted.value()).map(|r| r.index) == Some(1)
        });
        published[slot.unwrap()] = PublishedCard { name: bare.commitment(), encrypted: Cipher(bare.value()) };

        assert!(matches!(
            InitialDeck::from_published(&published),
            Err(ProtocolError::InvalidInitialDeck(_))
        ));
    }

    #[test]
    fn test_lookup_value() {
        let mut rng = seeded_rng(4);
        let deck = InitialDeck::generate(4, &mut rng);
        let (_, card) = deck.iter().next().unwrap();
        assert_eq!(deck.lookup_value(&card.value()), Some(card));
        assert_eq!(deck.lookup_value(&BigUint::from(3u32)), None);
    }
}
