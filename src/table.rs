//! Card Table
//!
//! One `CardTable` per peer per game. It owns the local secrets, the
//! shuffle round in progress and the final deck, and turns each inbound
//! message into zero or more outbound messages. Nothing here performs
//! I/O; relays feed it messages and broadcast what it returns.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ConfigError, TableConfig};
use crate::core::{table_rng, Name, PeerId, TableRng};
use crate::deck::shuffle::validate_order;
use crate::deck::{
    ErrorKind, FinalDeck, HeldCard, InitialDeck, ProtocolError, RoundStatus, ShuffleRound,
    ShuffleStage,
};
use crate::network::channel::PeerStatus;
use crate::network::protocol::{ShufflePayload, TableMessage};

/// Per-peer protocol state for one game.
pub struct CardTable {
    local: PeerId,
    config: TableConfig,
    rng: TableRng,
    round: Option<ShuffleRound>,
    deck: Option<FinalDeck>,
    cheaters: BTreeMap<PeerId, u32>,
}

impl CardTable {
    /// Create a table seeded from OS entropy.
    pub fn new(local: PeerId, config: TableConfig) -> Result<Self, ConfigError> {
        Self::with_rng(local, config, table_rng())
    }

    /// Create a table with a caller-supplied RNG.
    pub fn with_rng(local: PeerId, config: TableConfig, rng: TableRng) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            local,
            config,
            rng,
            round: None,
            deck: None,
            cheaters: BTreeMap::new(),
        })
    }

    /// The local peer.
    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Table configuration.
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Whether a final deck is available for drawing.
    pub fn is_ready(&self) -> bool {
        self.deck.is_some()
    }

    /// The final deck, once shuffled.
    pub fn deck(&self) -> Option<&FinalDeck> {
        self.deck.as_ref()
    }

    /// The shuffle round in progress.
    pub fn round(&self) -> Option<&ShuffleRound> {
        self.round.as_ref()
    }

    /// Cheat counts per peer.
    pub fn cheaters(&self) -> &BTreeMap<PeerId, u32> {
        &self.cheaters
    }

    // =========================================================================
    // LOCAL ACTIONS
    // =========================================================================

    /// Propose a new shuffle round with a fresh raw deck.
    ///
    /// Nothing changes locally until the proposal comes back through
    /// the channel.
    pub fn propose_shuffle(&mut self, order: Vec<PeerId>, size: usize) -> Result<TableMessage, ProtocolError> {
        validate_order(&order)?;
        if !order.contains(&self.local) {
            return Err(ProtocolError::NotInOrder(self.local));
        }
        self.config
            .check_deck_size(size)
            .map_err(|_| ProtocolError::DeckSizeOutOfRange { size, max: self.config.max_deck_size })?;

        let initial = InitialDeck::generate(size, &mut self.rng);
        info!(peers = order.len(), cards = size, "Proposing shuffle");

        Ok(TableMessage::Shuffle(ShufflePayload {
            stage: ShuffleStage::Shuffle,
            pass: 0,
            order,
            deck: initial.to_published(),
            commitments: Vec::new(),
        }))
    }

    /// Propose a shuffle over `peers` in a random order.
    pub fn propose_shuffle_random(&mut self, peers: &[PeerId], size: usize) -> Result<TableMessage, ProtocolError> {
        let mut order = peers.to_vec();
        order.shuffle(&mut self.rng);
        self.propose_shuffle(order, size)
    }

    /// Start drawing a card for `dest`, or a random undrawn card if
    /// `card` is `None`.
    pub fn draw_card(&mut self, dest: PeerId, card: Option<Name>) -> Result<TableMessage, ProtocolError> {
        let deck = self.deck.as_mut().ok_or(ProtocolError::NotReady)?;
        deck.draw(dest, card, &mut self.rng)
    }

    /// Start revealing a locally held card.
    pub fn reveal_card(&self, card: &Name) -> Result<TableMessage, ProtocolError> {
        self.deck.as_ref().ok_or(ProtocolError::NotReady)?.reveal(card)
    }

    /// Dealt cards grouped by holder.
    pub fn hands_by_owner(&self) -> BTreeMap<PeerId, Vec<HeldCard>> {
        self.deck.as_ref().map(FinalDeck::hands_by_owner).unwrap_or_default()
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Apply one message delivered by the channel.
    ///
    /// Returns the messages this peer must broadcast in response. On
    /// error nothing was mutated; cheats are counted against the sender.
    #[instrument(skip(self, message), fields(local = %self.local, from = %status.peer, topic = message.topic()))]
    pub fn handle_message(
        &mut self,
        status: &PeerStatus,
        message: TableMessage,
    ) -> Result<Vec<TableMessage>, ProtocolError> {
        if !status.valid {
            debug!("Dropping unauthenticated message");
            return Err(ProtocolError::Unauthenticated(status.peer));
        }

        let sender = status.peer;
        let result = self.dispatch(sender, message);

        match &result {
            Ok(outbound) => debug!(replies = outbound.len(), "Message applied"),
            Err(err) => match err.kind() {
                ErrorKind::Desync => debug!(%err, "Message dropped"),
                ErrorKind::Cheat => {
                    let count = self.cheaters.entry(sender).or_default();
                    *count += 1;
                    warn!(%err, cheats = *count, "Cheat detected");
                }
                ErrorKind::Integrity => error!(%err, "Card integrity failure"),
            },
        }
        result
    }

    fn dispatch(&mut self, sender: PeerId, message: TableMessage) -> Result<Vec<TableMessage>, ProtocolError> {
        if let TableMessage::Shuffle(payload) = &message {
            return self.on_shuffle(sender, payload);
        }

        let deck = self.deck.as_mut().ok_or(ProtocolError::NotReady)?;
        let reply = match &message {
            TableMessage::Draw(p) => deck.on_draw(sender, p, &mut self.rng)?,
            TableMessage::Wrap(p) => deck.on_wrap(sender, p, &mut self.rng)?,
            TableMessage::Unwrap(p) => deck.on_unwrap(sender, p)?,
            TableMessage::Unseal(p) => deck.on_unseal(sender, p)?,
            TableMessage::Reveal(p) => deck.on_reveal(sender, p)?,
            TableMessage::Shuffle(_) => None,
        };
        Ok(reply.into_iter().collect())
    }

    fn on_shuffle(&mut self, sender: PeerId, payload: &ShufflePayload) -> Result<Vec<TableMessage>, ProtocolError> {
        if payload.stage == ShuffleStage::Shuffle && payload.pass == 0 {
            let round = ShuffleRound::start(self.local, sender, payload, &self.config)?;
            if self.round.is_some() {
                info!("Previous shuffle round cancelled");
            }
            self.round = Some(round);
        } else {
            let round = self.round.as_mut().ok_or(ProtocolError::NoRound)?;
            if round.accept(sender, payload)? == RoundStatus::Complete {
                if let Some(round) = self.round.take() {
                    self.deck = Some(round.finish());
                }
                return Ok(Vec::new());
            }
        }

        let Some(round) = self.round.as_mut() else {
            return Ok(Vec::new());
        };
        let next = round.produce(&mut self.rng)?;
        Ok(next.map(TableMessage::Shuffle).into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::seeded_rng;

    fn table(id: u8, seed: u64) -> CardTable {
        let config = TableConfig { key_bits: 128, ..TableConfig::with_deck_size(4) };
        CardTable::with_rng(PeerId::new([id; 32]), config, seeded_rng(seed)).unwrap()
    }

    #[test]
    fn test_propose_requires_membership() {
        let mut t = table(1, 1);
        let other = PeerId::new([2; 32]);
        assert_eq!(
            t.propose_shuffle(vec![other], 4).err(),
            Some(ProtocolError::NotInOrder(t.local()))
        );
    }

    #[test]
    fn test_propose_rejects_oversized_deck() {
        let mut t = table(1, 2);
        let order = vec![t.local()];
        assert_eq!(
            t.propose_shuffle(order, 5000).err(),
            Some(ProtocolError::DeckSizeOutOfRange { size: 5000, max: 1024 })
        );
    }

    #[test]
    fn test_single_peer_round() {
        let mut t = table(1, 3);
        let local = t.local();
        let mut queue = vec![t.propose_shuffle(vec![local], 4).unwrap()];
        let mut seq = 0;

        while let Some(msg) = queue.pop() {
            queue.extend(t.handle_message(&PeerStatus::valid(local, seq), msg).unwrap());
            seq += 1;
        }

        assert!(t.is_ready());
        assert_eq!(t.deck().unwrap().len(), 4);
        // pass 0, shuffle 1, rekey 0
        assert_eq!(seq, 3);
    }

    #[test]
    fn test_invalid_status_dropped() {
        let mut t = table(1, 4);
        let local = t.local();
        let msg = t.propose_shuffle(vec![local], 4).unwrap();
        let status = PeerStatus { peer: local, valid: false, seq: 0 };

        assert_eq!(t.handle_message(&status, msg), Err(ProtocolError::Unauthenticated(local)));
        assert!(t.round().is_none());
    }

    #[test]
    fn test_random_order_covers_roster() {
        let mut t = table(1, 6);
        let peers: Vec<PeerId> = (1..=4).map(|i| PeerId::new([i; 32])).collect();

        let TableMessage::Shuffle(payload) = t.propose_shuffle_random(&peers, 4).unwrap() else {
            panic!("expected a shuffle proposal");
        };
        let mut order = payload.order.clone();
        order.sort();
        assert_eq!(order, peers);
        assert_eq!(payload.pass, 0);
        assert_eq!(payload.deck.len(), 4);
    }

    #[test]
    fn test_draw_before_shuffle() {
        let mut t = table(1, 5);
        let local = t.local();
        assert_eq!(t.draw_card(local, None).err(), Some(ProtocolError::NotReady));
        assert!(t.hands_by_owner().is_empty());
    }
}
