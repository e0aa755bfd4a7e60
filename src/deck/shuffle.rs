//! Shuffle Engine
//!
//! One round runs `2n + 1` broadcast passes for an order of `n` peers:
//!
//! ```text
//! Shuffle 0        anyone      publishes the raw deck and the order
//! Shuffle k (1..n) order[k-1]  permutes, renames, applies its deck key
//! Rekey k (n-1..0) order[k]    swaps its deck key for per-card keys
//! ```
//!
//! Every peer tracks the round from the broadcasts alone. The peer whose
//! turn is next builds the following pass from its own echo of the
//! previous one. After rekey pass 0 the round becomes a [`FinalDeck`].

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::BigUint;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TableConfig;
use crate::core::rng::{permute, random_nonce};
use crate::core::sra::is_ciphertext;
use crate::core::{derive_name, Cipher, Key, Name, PeerId};
use crate::network::protocol::{PublishedCard, ShufflePayload};

use super::card::{CardRecord, InitialDeck};
use super::entry::FinalDeck;
use super::error::ProtocolError;

/// Direction of a shuffle round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShuffleStage {
    /// Forward passes: permute and encrypt.
    Shuffle,
    /// Reverse passes: replace deck keys with per-card keys.
    Rekey,
}

/// Whether a round finished with the last accepted pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStatus {
    /// More passes expected.
    InProgress,
    /// Rekey pass 0 accepted; the deck is final.
    Complete,
}

/// The pass a round expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedPass {
    /// Stage of the next pass.
    pub stage: ShuffleStage,
    /// Pass number.
    pub pass: usize,
    /// Peer that must produce it.
    pub peer: PeerId,
}

/// Validate a peer order: non-empty with no repeats.
pub fn validate_order(order: &[PeerId]) -> Result<(), ProtocolError> {
    let unique: BTreeSet<&PeerId> = order.iter().collect();
    if order.is_empty() || unique.len() != order.len() {
        return Err(ProtocolError::InvalidOrder);
    }
    Ok(())
}

/// A shuffle round in progress at one peer.
pub struct ShuffleRound {
    local: PeerId,
    order: Vec<PeerId>,
    initial: InitialDeck,
    stage: ShuffleStage,
    pass: usize,
    /// Latest accepted deck list.
    deck: Vec<PublishedCard>,
    /// Every forward-pass ciphertext, by name.
    published: BTreeMap<Name, BigUint>,
    /// Local renames, by output name.
    records: BTreeMap<Name, CardRecord>,
    deck_key: Option<Key>,
    card_keys: BTreeMap<Name, Key>,
    commitments: BTreeMap<PeerId, BTreeMap<Name, Name>>,
    key_bits: u64,
}

impl ShuffleRound {
    /// Start a round from a pass 0 broadcast.
    pub fn start(
        local: PeerId,
        sender: PeerId,
        payload: &ShufflePayload,
        config: &TableConfig,
    ) -> Result<Self, ProtocolError> {
        if payload.stage != ShuffleStage::Shuffle || payload.pass != 0 {
            return Err(ProtocolError::UnexpectedPass { stage: payload.stage, pass: payload.pass });
        }
        validate_order(&payload.order)?;
        if !payload.order.contains(&sender) {
            return Err(ProtocolError::NotInOrder(sender));
        }
        let size = payload.deck.len();
        config
            .check_deck_size(size)
            .map_err(|_| ProtocolError::DeckSizeOutOfRange { size, max: config.max_deck_size })?;
        if !payload.commitments.is_empty() {
            return Err(ProtocolError::RekeyMismatch);
        }

        let initial = InitialDeck::from_published(&payload.deck)?;
        let published = payload
            .deck
            .iter()
            .map(|c| (c.name, c.encrypted.value().clone()))
            .collect();

        info!(
            proposer = %sender,
            peers = payload.order.len(),
            cards = initial.len(),
            "Shuffle round started"
        );

        Ok(Self {
            local,
            order: payload.order.clone(),
            initial,
            stage: ShuffleStage::Shuffle,
            pass: 0,
            deck: payload.deck.clone(),
            published,
            records: BTreeMap::new(),
            deck_key: None,
            card_keys: BTreeMap::new(),
            commitments: BTreeMap::new(),
            key_bits: config.key_bits,
        })
    }

    /// Agreed peer order.
    pub fn order(&self) -> &[PeerId] {
        &self.order
    }

    /// Current `(stage, pass)`.
    pub fn position(&self) -> (ShuffleStage, usize) {
        (self.stage, self.pass)
    }

    /// Initial deck of this round.
    pub fn initial(&self) -> &InitialDeck {
        &self.initial
    }

    /// The pass expected next, or `None` once complete.
    pub fn expected(&self) -> Option<ExpectedPass> {
        let n = self.order.len();
        let (stage, pass) = match (self.stage, self.pass) {
            (ShuffleStage::Shuffle, k) if k < n => (ShuffleStage::Shuffle, k + 1),
            (ShuffleStage::Shuffle, _) => (ShuffleStage::Rekey, n - 1),
            (ShuffleStage::Rekey, 0) => return None,
            (ShuffleStage::Rekey, k) => (ShuffleStage::Rekey, k - 1),
        };
        let peer = match stage {
            ShuffleStage::Shuffle => self.order[pass - 1],
            ShuffleStage::Rekey => self.order[pass],
        };
        Some(ExpectedPass { stage, pass, peer })
    }

    /// Validate and apply a pass after 0.
    pub fn accept(
        &mut self,
        sender: PeerId,
        payload: &ShufflePayload,
    ) -> Result<RoundStatus, ProtocolError> {
        let expected = self.expected().ok_or(ProtocolError::UnexpectedPass {
            stage: payload.stage,
            pass: payload.pass,
        })?;
        if (payload.stage, payload.pass) != (expected.stage, expected.pass) {
            return Err(ProtocolError::UnexpectedPass { stage: payload.stage, pass: payload.pass });
        }
        if sender != expected.peer {
            return Err(ProtocolError::OutOfTurn { expected: expected.peer, got: sender });
        }
        if payload.order != self.order {
            return Err(ProtocolError::OrderMismatch);
        }
        if payload.deck.len() != self.deck.len() {
            return Err(ProtocolError::DeckSize { expected: self.deck.len(), got: payload.deck.len() });
        }
        for card in &payload.deck {
            if !is_ciphertext(card.encrypted.value()) {
                return Err(ProtocolError::BadCiphertext(card.name));
            }
        }

        match payload.stage {
            ShuffleStage::Shuffle => self.accept_shuffle(payload)?,
            ShuffleStage::Rekey => self.accept_rekey(sender, payload)?,
        }

        self.stage = payload.stage;
        self.pass = payload.pass;
        self.deck = payload.deck.clone();
        debug!(stage = ?self.stage, pass = self.pass, from = %sender, "Shuffle pass accepted");

        if self.stage == ShuffleStage::Rekey && self.pass == 0 {
            return Ok(RoundStatus::Complete);
        }
        Ok(RoundStatus::InProgress)
    }

    fn accept_shuffle(&mut self, payload: &ShufflePayload) -> Result<(), ProtocolError> {
        if !payload.commitments.is_empty() {
            return Err(ProtocolError::RekeyMismatch);
        }
        let mut seen = BTreeSet::new();
        for card in &payload.deck {
            if !seen.insert(card.name) || self.published.contains_key(&card.name) {
                return Err(ProtocolError::DuplicateName(card.name));
            }
        }

        for card in &payload.deck {
            self.published.insert(card.name, card.encrypted.value().clone());
        }
        Ok(())
    }

    fn accept_rekey(&mut self, sender: PeerId, payload: &ShufflePayload) -> Result<(), ProtocolError> {
        let renamed = payload
            .deck
            .iter()
            .zip(&self.deck)
            .any(|(new, old)| new.name != old.name);
        if renamed || payload.commitments.len() != payload.deck.len() {
            return Err(ProtocolError::RekeyMismatch);
        }

        let commitments = payload
            .deck
            .iter()
            .map(|c| c.name)
            .zip(payload.commitments.iter().copied())
            .collect();
        self.commitments.insert(sender, commitments);
        Ok(())
    }

    /// Build the next pass if it is this peer's turn.
    pub fn produce<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Option<ShufflePayload>, ProtocolError> {
        let Some(expected) = self.expected() else {
            return Ok(None);
        };
        if expected.peer != self.local {
            return Ok(None);
        }

        let payload = match expected.stage {
            ShuffleStage::Shuffle => self.shuffle_pass(expected.pass, rng),
            ShuffleStage::Rekey => self.rekey_pass(expected.pass, rng)?,
        };
        debug!(stage = ?payload.stage, pass = payload.pass, "Producing shuffle pass");
        Ok(Some(payload))
    }

    fn shuffle_pass<R: Rng + ?Sized>(&mut self, pass: usize, rng: &mut R) -> ShufflePayload {
        let deck_key = Key::generate(rng, self.key_bits);
        let mut cards = self.deck.clone();
        permute(&mut cards, rng);

        let deck = cards
            .into_iter()
            .map(|card| {
                let nonce = random_nonce(rng);
                let name = derive_name(&nonce, &card.name);
                let encrypted = deck_key.encrypt(card.encrypted.value());
                self.records.insert(
                    name,
                    CardRecord { prev_name: card.name, encrypted: encrypted.clone(), nonce, name },
                );
                PublishedCard { name, encrypted: Cipher(encrypted) }
            })
            .collect();

        self.deck_key = Some(deck_key);
        ShufflePayload {
            stage: ShuffleStage::Shuffle,
            pass,
            order: self.order.clone(),
            deck,
            commitments: Vec::new(),
        }
    }

    fn rekey_pass<R: Rng + ?Sized>(&mut self, pass: usize, rng: &mut R) -> Result<ShufflePayload, ProtocolError> {
        let first = self.deck.first().map(|c| c.name).unwrap_or_default();
        let deck_key = self.deck_key.as_ref().ok_or(ProtocolError::MissingKey(first))?;

        let mut deck = Vec::with_capacity(self.deck.len());
        let mut commitments = Vec::with_capacity(self.deck.len());
        for card in &self.deck {
            let card_key = Key::generate(rng, self.key_bits);
            let encrypted = card_key.encrypt(&deck_key.decrypt(card.encrypted.value()));
            commitments.push(card_key.commitment());
            deck.push(PublishedCard { name: card.name, encrypted: Cipher(encrypted) });
            self.card_keys.insert(card.name, card_key);
        }

        Ok(ShufflePayload {
            stage: ShuffleStage::Rekey,
            pass,
            order: self.order.clone(),
            deck,
            commitments,
        })
    }

    /// Seed the final deck from a completed round.
    pub fn finish(self) -> FinalDeck {
        info!(cards = self.deck.len(), "Shuffle round complete");
        FinalDeck::new(
            self.local,
            self.order,
            self.initial,
            self.deck,
            self.published,
            self.records,
            self.deck_key,
            self.card_keys,
            self.commitments,
            self.key_bits,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::seeded_rng;

    fn peers(n: u8) -> Vec<PeerId> {
        (1..=n).map(|i| PeerId::new([i; 32])).collect()
    }

    fn proposal(order: &[PeerId], size: usize, seed: u64) -> ShufflePayload {
        let mut rng = seeded_rng(seed);
        ShufflePayload {
            stage: ShuffleStage::Shuffle,
            pass: 0,
            order: order.to_vec(),
            deck: InitialDeck::generate(size, &mut rng).to_published(),
            commitments: Vec::new(),
        }
    }

    fn small_config() -> TableConfig {
        TableConfig { key_bits: 128, ..TableConfig::with_deck_size(4) }
    }

    #[test]
    fn test_validate_order() {
        let order = peers(3);
        assert!(validate_order(&order).is_ok());
        assert_eq!(validate_order(&[]), Err(ProtocolError::InvalidOrder));
        assert_eq!(validate_order(&[order[0], order[0]]), Err(ProtocolError::InvalidOrder));
    }

    #[test]
    fn test_expected_sequence_three_peers() {
        let order = peers(3);
        let payload = proposal(&order, 4, 1);
        let mut round = ShuffleRound::start(order[0], order[1], &payload, &small_config()).unwrap();

        let mut seen = Vec::new();
        while let Some(exp) = round.expected() {
            seen.push((exp.stage, exp.pass, exp.peer));
            round.stage = exp.stage;
            round.pass = exp.pass;
        }

        use ShuffleStage::*;
        assert_eq!(
            seen,
            vec![
                (Shuffle, 1, order[0]),
                (Shuffle, 2, order[1]),
                (Shuffle, 3, order[2]),
                (Rekey, 2, order[2]),
                (Rekey, 1, order[1]),
                (Rekey, 0, order[0]),
            ]
        );
    }

    #[test]
    fn test_start_rejects_empty_deck() {
        let order = peers(2);
        let mut payload = proposal(&order, 4, 12);
        payload.deck.clear();
        assert_eq!(
            ShuffleRound::start(order[0], order[0], &payload, &small_config()).err(),
            Some(ProtocolError::DeckSizeOutOfRange { size: 0, max: 1024 })
        );
    }

    #[test]
    fn test_start_rejects_outsider() {
        let order = peers(2);
        let payload = proposal(&order, 4, 2);
        let outsider = PeerId::new([9; 32]);
        assert_eq!(
            ShuffleRound::start(order[0], outsider, &payload, &small_config()).err(),
            Some(ProtocolError::NotInOrder(outsider))
        );
    }

    #[test]
    fn test_out_of_turn_pass_rejected() {
        let order = peers(2);
        let payload = proposal(&order, 4, 3);
        let config = small_config();
        let mut rng = seeded_rng(4);

        let mut first = ShuffleRound::start(order[0], order[0], &payload, &config).unwrap();
        let pass1 = first.produce(&mut rng).unwrap().unwrap();

        let mut other = ShuffleRound::start(order[1], order[0], &payload, &config).unwrap();
        assert_eq!(
            other.accept(order[1], &pass1),
            Err(ProtocolError::OutOfTurn { expected: order[0], got: order[1] })
        );
        assert_eq!(other.accept(order[0], &pass1), Ok(RoundStatus::InProgress));
        assert_eq!(other.position(), (ShuffleStage::Shuffle, 1));
    }

    #[test]
    fn test_shuffle_pass_renames_every_card() {
        let order = peers(1);
        let payload = proposal(&order, 4, 5);
        let mut round = ShuffleRound::start(order[0], order[0], &payload, &small_config()).unwrap();
        let mut rng = seeded_rng(6);

        let pass1 = round.produce(&mut rng).unwrap().unwrap();
        for card in &pass1.deck {
            let record = &round.records[&card.name];
            assert_eq!(derive_name(&record.nonce, &record.prev_name), card.name);
            assert!(round.initial.get(&record.prev_name).is_some());
        }
    }

    #[test]
    fn test_replayed_names_rejected() {
        let order = peers(1);
        let payload = proposal(&order, 4, 7);
        let mut round = ShuffleRound::start(order[0], order[0], &payload, &small_config()).unwrap();

        // pass 1 that reuses the initial names
        let mut replay = payload.clone();
        replay.pass = 1;
        assert!(matches!(round.accept(order[0], &replay), Err(ProtocolError::DuplicateName(_))));
    }

    #[test]
    fn test_fixed_point_ciphertext_rejected() {
        let order = peers(1);
        let payload = proposal(&order, 4, 10);
        let mut round = ShuffleRound::start(order[0], order[0], &payload, &small_config()).unwrap();
        let mut rng = seeded_rng(11);

        let mut pass1 = round.produce(&mut rng).unwrap().unwrap();
        pass1.deck[2].encrypted = Cipher(BigUint::from(1u32));
        assert_eq!(
            round.accept(order[0], &pass1),
            Err(ProtocolError::BadCiphertext(pass1.deck[2].name))
        );
        assert_eq!(round.position(), (ShuffleStage::Shuffle, 0));
    }

    #[test]
    fn test_wrong_deck_size_rejected() {
        let order = peers(1);
        let payload = proposal(&order, 4, 8);
        let mut round = ShuffleRound::start(order[0], order[0], &payload, &small_config()).unwrap();
        let mut rng = seeded_rng(9);

        let mut pass1 = round.produce(&mut rng).unwrap().unwrap();
        pass1.deck.pop();
        assert_eq!(
            round.accept(order[0], &pass1),
            Err(ProtocolError::DeckSize { expected: 4, got: 3 })
        );
    }
}
