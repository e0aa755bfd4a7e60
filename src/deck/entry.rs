//! Final Deck
//!
//! Entries live in an arena indexed by final name. Only the owning
//! [`FinalDeck`] mutates them; the draw and reveal state machines are
//! `impl FinalDeck` blocks in their own modules.

use std::collections::BTreeMap;

use num_bigint::BigUint;

use crate::core::{hash_key, Key, Name, Nonce, OrderExt, PeerId};
use crate::network::protocol::PublishedCard;

use super::card::{CardRecord, InitialDeck, RawCard};
use super::error::ProtocolError;

/// Draw state of one card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawPhase {
    /// No player assigned.
    Undrawn,
    /// Name chain walking from the final player to the destination.
    Chain,
    /// Temp-key wraps flowing toward `order[0]`.
    Wrap,
    /// Deck-key layers being stripped toward the destination.
    Unwrap,
    /// Temp keys being disclosed toward `order[0]`.
    Unseal,
    /// Card delivered.
    Dealt,
    /// Unsealed value was not a deck card.
    Failed,
}

/// Progress of a reveal chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealProgress {
    /// Peer expected to extend the chain, `None` when finished.
    pub next: Option<PeerId>,
    /// Latest disclosed name.
    pub name: Name,
    /// Nonces disclosed so far, outermost first.
    pub nonces: Vec<Nonce>,
}

/// One card of the final deck.
#[derive(Debug, Clone)]
pub struct FinalDeckEntry {
    /// Name after the last shuffle pass.
    pub final_name: Name,
    /// Ciphertext after rekey, under every peer's per-card key.
    pub encrypted: BigUint,
    /// Nonces disclosed by the draw chain, outermost first.
    pub nonces: Vec<Nonce>,
    /// Assigned recipient, set once.
    pub player: Option<PeerId>,
    /// Wrap ciphertext published by each peer.
    pub wrapped: BTreeMap<PeerId, BigUint>,
    /// Current draw phase.
    pub phase: DrawPhase,
    /// Deepest name the chain has reached.
    pub known_name: Name,
    /// Peer whose message is expected next.
    pub next_actor: Option<PeerId>,
    /// Temp decryption exponents disclosed during unseal.
    pub temp_keys: BTreeMap<PeerId, BigUint>,
    /// Latest unwrap ciphertext.
    pub unwrapped: Option<BigUint>,
    /// Plaintext card, once known to this peer.
    pub card: Option<RawCard>,
    /// Reveal chain state.
    pub reveal: Option<RevealProgress>,
    /// Whether the card was publicly revealed.
    pub revealed: bool,
    pub(crate) temp_key: Option<Key>,
    pub(crate) sealed: Option<BigUint>,
    pub(crate) claimed: bool,
}

impl FinalDeckEntry {
    fn new(card: PublishedCard) -> Self {
        Self {
            final_name: card.name,
            encrypted: card.encrypted.into_inner(),
            nonces: Vec::new(),
            player: None,
            wrapped: BTreeMap::new(),
            phase: DrawPhase::Undrawn,
            known_name: card.name,
            next_actor: None,
            temp_keys: BTreeMap::new(),
            unwrapped: None,
            card: None,
            reveal: None,
            revealed: false,
            temp_key: None,
            sealed: None,
            claimed: false,
        }
    }

    /// Whether the card can still be drawn.
    pub fn is_available(&self) -> bool {
        self.phase == DrawPhase::Undrawn && !self.claimed
    }
}

/// A card in someone's hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldCard {
    /// Final name.
    pub final_name: Name,
    /// Face value, if known to this peer.
    pub card: Option<RawCard>,
    /// Whether the holder proved it publicly.
    pub revealed: bool,
}

/// The agreed deck after a completed shuffle round.
pub struct FinalDeck {
    pub(crate) local: PeerId,
    pub(crate) order: Vec<PeerId>,
    pub(crate) initial: InitialDeck,
    pub(crate) published: BTreeMap<Name, BigUint>,
    pub(crate) records: BTreeMap<Name, CardRecord>,
    pub(crate) deck_key: Option<Key>,
    pub(crate) card_keys: BTreeMap<Name, Key>,
    pub(crate) commitments: BTreeMap<PeerId, BTreeMap<Name, Name>>,
    pub(crate) key_bits: u64,
    entries: Vec<FinalDeckEntry>,
    index: BTreeMap<Name, usize>,
}

impl FinalDeck {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        local: PeerId,
        order: Vec<PeerId>,
        initial: InitialDeck,
        deck: Vec<PublishedCard>,
        published: BTreeMap<Name, BigUint>,
        records: BTreeMap<Name, CardRecord>,
        deck_key: Option<Key>,
        card_keys: BTreeMap<Name, Key>,
        commitments: BTreeMap<PeerId, BTreeMap<Name, Name>>,
        key_bits: u64,
    ) -> Self {
        let entries: Vec<FinalDeckEntry> = deck.into_iter().map(FinalDeckEntry::new).collect();
        let index = entries
            .iter()
            .enumerate()
            .map(|(slot, e)| (e.final_name, slot))
            .collect();

        Self {
            local,
            order,
            initial,
            published,
            records,
            deck_key,
            card_keys,
            commitments,
            key_bits,
            entries,
            index,
        }
    }

    /// The local peer.
    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Agreed peer order.
    pub fn order(&self) -> &[PeerId] {
        &self.order
    }

    /// Public initial deck.
    pub fn initial(&self) -> &InitialDeck {
        &self.initial
    }

    /// Number of cards.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the deck has no cards.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry by final name.
    pub fn entry(&self, name: &Name) -> Option<&FinalDeckEntry> {
        self.index.get(name).map(|&slot| &self.entries[slot])
    }

    /// Entries in deck order.
    pub fn entries(&self) -> impl Iterator<Item = &FinalDeckEntry> {
        self.entries.iter()
    }

    /// Local per-card key for a final name.
    ///
    /// Disclosing `d` lets others strip this peer's layer from the
    /// rekeyed ciphertext; [`verify_card_key`](Self::verify_card_key)
    /// checks it against the rekey commitment.
    pub fn card_key(&self, name: &Name) -> Option<&Key> {
        self.card_keys.get(name)
    }

    /// Check a disclosed per-card decryption exponent against the
    /// commitment `peer` published during rekey.
    pub fn verify_card_key(&self, name: &Name, peer: &PeerId, d: &BigUint) -> bool {
        self.commitments
            .get(peer)
            .and_then(|c| c.get(name))
            .map_or(false, |commitment| *commitment == hash_key(d))
    }

    /// Cards dealt so far, grouped by holder.
    pub fn hands_by_owner(&self) -> BTreeMap<PeerId, Vec<HeldCard>> {
        let mut hands: BTreeMap<PeerId, Vec<HeldCard>> = BTreeMap::new();
        for entry in &self.entries {
            if let (DrawPhase::Dealt, Some(player)) = (entry.phase, entry.player) {
                hands.entry(player).or_default().push(HeldCard {
                    final_name: entry.final_name,
                    card: entry.card,
                    revealed: entry.revealed,
                });
            }
        }
        hands
    }

    pub(crate) fn slot(&self, name: &Name) -> Result<usize, ProtocolError> {
        self.index.get(name).copied().ok_or(ProtocolError::UnknownCard(*name))
    }

    pub(crate) fn entry_mut(&mut self, slot: usize) -> &mut FinalDeckEntry {
        &mut self.entries[slot]
    }

    pub(crate) fn entry_at(&self, slot: usize) -> &FinalDeckEntry {
        &self.entries[slot]
    }

    pub(crate) fn first_player(&self) -> PeerId {
        self.order[0]
    }

    pub(crate) fn final_player(&self) -> PeerId {
        self.order[self.order.len() - 1]
    }

    pub(crate) fn predecessor(&self, peer: &PeerId) -> Option<PeerId> {
        self.order.predecessor(peer)
    }

    pub(crate) fn successor(&self, peer: &PeerId) -> Option<PeerId> {
        self.order.successor(peer)
    }

    pub(crate) fn require_member(&self, peer: &PeerId) -> Result<usize, ProtocolError> {
        self.order.position_of(peer).ok_or(ProtocolError::NotInOrder(*peer))
    }

    pub(crate) fn record(&self, card: &Name, name: &Name) -> Result<&CardRecord, ProtocolError> {
        self.records
            .get(name)
            .ok_or(ProtocolError::MissingRecord { card: *card, name: *name })
    }

    pub(crate) fn deck_key(&self, card: &Name) -> Result<&Key, ProtocolError> {
        self.deck_key.as_ref().ok_or(ProtocolError::MissingKey(*card))
    }

    /// Undrawn final names.
    pub fn available(&self) -> Vec<Name> {
        self.entries
            .iter()
            .filter(|e| e.is_available())
            .map(|e| e.final_name)
            .collect()
    }
}
