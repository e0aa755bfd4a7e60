//! Reveal Protocol
//!
//! The holder of a dealt card discloses the name it received the card
//! under and its own rename nonce. Each predecessor extends the chain
//! with its nonce and previous name until `order[0]` discloses a raw
//! commitment. Every peer folds each message's nonce list back to the
//! final name before accepting it.

use tracing::{debug, info, warn};

use crate::core::{fold_names, Name, PeerId};
use crate::network::protocol::{RevealPayload, TableMessage};

use super::entry::{DrawPhase, FinalDeck, RevealProgress};
use super::error::ProtocolError;

impl FinalDeck {
    /// Start revealing a locally held card.
    pub fn reveal(&self, card: &Name) -> Result<TableMessage, ProtocolError> {
        let slot = self.slot(card)?;
        let entry = self.entry_at(slot);

        if entry.phase != DrawPhase::Dealt || entry.player != Some(self.local) {
            return Err(ProtocolError::NotHolder(*card));
        }
        if entry.revealed || entry.reveal.is_some() {
            return Err(ProtocolError::AlreadyRevealed(*card));
        }

        let record = self.record(card, &entry.known_name)?;
        let mut nonces = entry.nonces.clone();
        nonces.push(record.nonce);

        Ok(TableMessage::Reveal(RevealPayload {
            dest: self.local,
            next: self.predecessor(&self.local),
            final_name: *card,
            name: record.prev_name,
            nonces,
        }))
    }

    /// Handle a `reveal` message.
    pub fn on_reveal(
        &mut self,
        sender: PeerId,
        p: &RevealPayload,
    ) -> Result<Option<TableMessage>, ProtocolError> {
        let card = p.final_name;
        let slot = self.slot(&card)?;
        let entry = self.entry_at(slot);

        if entry.phase != DrawPhase::Dealt {
            return Err(ProtocolError::WrongPhase { card, phase: entry.phase });
        }
        if entry.player != Some(p.dest) {
            return Err(ProtocolError::Misrouted(card));
        }
        if entry.revealed {
            return Err(ProtocolError::AlreadyRevealed(card));
        }

        let (expected_sender, prior) = match &entry.reveal {
            None => (Some(p.dest), &entry.nonces),
            Some(progress) => (progress.next, &progress.nonces),
        };
        if expected_sender != Some(sender) {
            return Err(ProtocolError::OutOfTurn {
                expected: expected_sender.unwrap_or(p.dest),
                got: sender,
            });
        }
        if p.next != self.predecessor(&sender) {
            return Err(ProtocolError::Misrouted(card));
        }

        // each hop appends exactly one nonce and keeps the rest
        if p.nonces.len() != prior.len() + 1 || !p.nonces.starts_with(prior) {
            warn!(card = %card, from = %sender, "Reveal chain altered");
            return Err(ProtocolError::InvalidChain(card));
        }
        if fold_names(&p.name, &p.nonces) != card {
            warn!(card = %card, from = %sender, "Reveal chain does not fold to the final name");
            return Err(ProtocolError::InvalidChain(card));
        }

        let (raw, reply) = match p.next {
            None => {
                let raw = self
                    .initial
                    .get(&p.name)
                    .copied()
                    .ok_or(ProtocolError::CommitmentMismatch(card))?;
                (Some(raw), None)
            }
            Some(next) if next == self.local => {
                let record = self.record(&card, &p.name)?;
                let mut nonces = p.nonces.clone();
                nonces.push(record.nonce);
                let forward = RevealPayload {
                    dest: p.dest,
                    next: self.predecessor(&next),
                    final_name: card,
                    name: record.prev_name,
                    nonces,
                };
                (None, Some(TableMessage::Reveal(forward)))
            }
            Some(_) => (None, None),
        };
        let progress = RevealProgress { next: p.next, name: p.name, nonces: p.nonces.clone() };

        let entry = self.entry_mut(slot);
        entry.reveal = Some(progress);
        if let Some(raw) = raw {
            entry.card = Some(raw);
            entry.revealed = true;
            info!(card = %card, player = %p.dest, index = raw.index, "Card revealed");
        } else {
            debug!(card = %card, from = %sender, "Reveal chain advanced");
        }
        Ok(reply)
    }
}
