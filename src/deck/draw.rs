//! Draw Protocol
//!
//! Moves one card to one peer in four strictly ordered sub-phases. With
//! `order = [P0 .. Pn-1]` and destination `Pj`:
//!
//! ```text
//! Chain   Pn-1 -> .. -> Pj+1   disclose (prev_name, nonce) per hop
//! Wrap    Pj   -> .. -> P0     each applies a fresh temp key
//! Unwrap  P0   -> .. -> Pj-1   each strips its deck key, Pj strips privately
//! Unseal  Pj   -> .. -> P0     each discloses its temp key, Pj decrypts
//! ```
//!
//! `Pj` wraps the ciphertext it published during its shuffle pass, so
//! every disclosed temp key can be checked against public data: the
//! wrap input of `Pj` is its published ciphertext and the wrap input of
//! every other peer is its successor's wrap. If `Pj == P0` the chain
//! already ends at a raw commitment and the card is dealt outright.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, error, info};

use crate::core::sra::{is_ciphertext, mod_exp};
use crate::core::{derive_name, Cipher, Key, Name, PeerId};
use crate::network::protocol::{ChainLink, CipherPayload, DrawPayload, TableMessage, UnsealPayload};

use super::entry::{DrawPhase, FinalDeck};
use super::error::ProtocolError;

impl FinalDeck {
    /// Begin drawing a card for `dest`; a random undrawn card when
    /// `card` is `None`.
    ///
    /// The final player starts the chain itself. Anyone else sends a
    /// request the final player answers.
    pub fn draw<R: Rng + ?Sized>(
        &mut self,
        dest: PeerId,
        card: Option<Name>,
        rng: &mut R,
    ) -> Result<TableMessage, ProtocolError> {
        self.require_member(&dest)?;
        let final_name = match card {
            Some(name) => name,
            None => *self.available().choose(rng).ok_or(ProtocolError::DeckExhausted)?,
        };
        let slot = self.slot(&final_name)?;
        if !self.entry_at(slot).is_available() {
            return Err(ProtocolError::CardUnavailable(final_name));
        }

        let final_player = self.final_player();
        if self.local == final_player {
            let start = self.chain_start(slot, dest)?;
            self.entry_mut(slot).claimed = true;
            return Ok(start);
        }

        Ok(TableMessage::Draw(DrawPayload { dest, next: final_player, final_name, link: None }))
    }

    fn chain_start(&self, slot: usize, dest: PeerId) -> Result<TableMessage, ProtocolError> {
        let final_name = self.entry_at(slot).final_name;
        let final_player = self.final_player();

        let payload = if dest == final_player {
            DrawPayload { dest, next: final_player, final_name, link: None }
        } else {
            let record = self.record(&final_name, &final_name)?;
            DrawPayload {
                dest,
                next: self.predecessor(&final_player).ok_or(ProtocolError::NotInOrder(dest))?,
                final_name,
                link: Some(ChainLink { name: record.prev_name, nonce: record.nonce }),
            }
        };
        Ok(TableMessage::Draw(payload))
    }

    /// Handle a `draw` message: a request, the chain start, or a hop.
    pub fn on_draw<R: Rng + ?Sized>(
        &mut self,
        sender: PeerId,
        p: &DrawPayload,
        rng: &mut R,
    ) -> Result<Option<TableMessage>, ProtocolError> {
        let card = p.final_name;
        let slot = self.slot(&card)?;
        self.require_member(&sender)?;
        self.require_member(&p.dest)?;
        let final_player = self.final_player();
        let entry = self.entry_at(slot);

        let (name, nonce) = if sender == final_player {
            if entry.player.is_some() {
                return Err(ProtocolError::AlreadyDrawn(card));
            }
            let expected_next = if p.dest == final_player {
                final_player
            } else {
                self.predecessor(&final_player).ok_or(ProtocolError::Misrouted(card))?
            };
            if p.next != expected_next {
                return Err(ProtocolError::Misrouted(card));
            }
            match (&p.link, p.dest == final_player) {
                (None, true) => (card, None),
                (Some(link), false) => {
                    if derive_name(&link.nonce, &link.name) != card {
                        return Err(ProtocolError::ForgedNonce(card));
                    }
                    (link.name, Some(link.nonce))
                }
                _ => return Err(ProtocolError::Misrouted(card)),
            }
        } else if p.link.is_none() {
            if entry.player.is_some() || entry.phase != DrawPhase::Undrawn {
                return Err(ProtocolError::CardUnavailable(card));
            }
            if p.next != final_player {
                return Err(ProtocolError::Misrouted(card));
            }
            if self.local != final_player {
                return Ok(None);
            }
            if entry.claimed {
                debug!(card = %card, from = %sender, "Card already claimed by another draw");
                return Err(ProtocolError::CardUnavailable(card));
            }
            debug!(card = %card, dest = %p.dest, "Answering draw request");
            let start = self.chain_start(slot, p.dest)?;
            self.entry_mut(slot).claimed = true;
            return Ok(Some(start));
        } else {
            if entry.phase != DrawPhase::Chain {
                return Err(ProtocolError::WrongPhase { card, phase: entry.phase });
            }
            expect_actor(entry.next_actor, sender)?;
            if entry.player != Some(p.dest) || self.predecessor(&sender) != Some(p.next) {
                return Err(ProtocolError::Misrouted(card));
            }
            let link = p.link.as_ref().ok_or(ProtocolError::Misrouted(card))?;
            if derive_name(&link.nonce, &link.name) != entry.known_name {
                return Err(ProtocolError::ForgedNonce(card));
            }
            (link.name, Some(link.nonce))
        };

        // the next actor must have shuffled this name
        if self.local == p.next {
            self.record(&card, &name)?;
        }

        let entry = self.entry_mut(slot);
        if entry.player.is_none() {
            entry.player = Some(p.dest);
            entry.phase = DrawPhase::Chain;
        }
        entry.nonces.extend(nonce);
        entry.known_name = name;
        entry.next_actor = Some(p.next);
        debug!(card = %card, from = %sender, next = %p.next, "Draw chain advanced");

        self.advance_chain(slot, rng)
    }

    fn advance_chain<R: Rng + ?Sized>(
        &mut self,
        slot: usize,
        rng: &mut R,
    ) -> Result<Option<TableMessage>, ProtocolError> {
        let entry = self.entry_at(slot);
        let (card, known) = (entry.final_name, entry.known_name);
        let (Some(dest), Some(next)) = (entry.player, entry.next_actor) else {
            return Ok(None);
        };
        let local = self.local;

        if next != dest {
            if local != next {
                return Ok(None);
            }
            let record = self.record(&card, &known)?;
            let hop = DrawPayload {
                dest,
                next: self.predecessor(&local).ok_or(ProtocolError::Misrouted(card))?,
                final_name: card,
                link: Some(ChainLink { name: record.prev_name, nonce: record.nonce }),
            };
            return Ok(Some(TableMessage::Draw(hop)));
        }

        if dest == self.first_player() {
            // the chain already ends at a raw commitment
            let held = if local == dest {
                let prev = self.record(&card, &known)?.prev_name;
                Some(self.initial.get(&prev).copied())
            } else {
                None
            };

            let entry = self.entry_mut(slot);
            entry.next_actor = None;
            match held {
                Some(None) => {
                    entry.phase = DrawPhase::Failed;
                    error!(card = %card, "Dealt card missing from initial deck");
                    return Err(ProtocolError::ForgedCard(card));
                }
                Some(raw) => entry.card = raw,
                None => {}
            }
            entry.phase = DrawPhase::Dealt;
            info!(card = %card, player = %dest, "Card dealt");
            return Ok(None);
        }

        let wrap = if local == dest {
            let input = self.record(&card, &known)?.encrypted.clone();
            let next = self.predecessor(&dest).ok_or(ProtocolError::Misrouted(card))?;
            Some((input, next))
        } else {
            None
        };

        let key_bits = self.key_bits;
        let entry = self.entry_mut(slot);
        entry.phase = DrawPhase::Wrap;
        entry.next_actor = Some(dest);

        let Some((input, next)) = wrap else {
            return Ok(None);
        };
        let temp = Key::generate(rng, key_bits);
        let encrypted = temp.encrypt(&input);
        entry.temp_key = Some(temp);
        debug!(card = %card, "Wrapping drawn card");

        Ok(Some(TableMessage::Wrap(CipherPayload {
            dest,
            next,
            final_name: card,
            encrypted: Cipher(encrypted),
        })))
    }

    /// Handle a `wrap` message.
    pub fn on_wrap<R: Rng + ?Sized>(
        &mut self,
        sender: PeerId,
        p: &CipherPayload,
        rng: &mut R,
    ) -> Result<Option<TableMessage>, ProtocolError> {
        let card = p.final_name;
        let slot = self.slot(&card)?;
        let first = self.first_player();
        let entry = self.entry_at(slot);

        if entry.phase != DrawPhase::Wrap {
            return Err(ProtocolError::WrongPhase { card, phase: entry.phase });
        }
        expect_actor(entry.next_actor, sender)?;
        let expected_next = if sender == first { Some(first) } else { self.predecessor(&sender) };
        if entry.player != Some(p.dest) || expected_next != Some(p.next) {
            return Err(ProtocolError::Misrouted(card));
        }
        check_residue(card, p.encrypted.value())?;

        let local = self.local;
        let key_bits = self.key_bits;
        let value = p.encrypted.value().clone();

        if sender == first {
            let stripped = if local == first {
                let next = self.successor(&first).ok_or(ProtocolError::Misrouted(card))?;
                Some((self.deck_key(&card)?.decrypt(&value), next))
            } else {
                None
            };

            let entry = self.entry_mut(slot);
            entry.wrapped.insert(sender, value);
            entry.phase = DrawPhase::Unwrap;
            entry.next_actor = Some(first);
            debug!(card = %card, "Wrap complete");

            return Ok(stripped.map(|(encrypted, next)| {
                TableMessage::Unwrap(CipherPayload {
                    dest: p.dest,
                    next,
                    final_name: card,
                    encrypted: Cipher(encrypted),
                })
            }));
        }

        let forward = if local == p.next {
            let next = if local == first {
                first
            } else {
                self.predecessor(&local).ok_or(ProtocolError::Misrouted(card))?
            };
            Some(next)
        } else {
            None
        };

        let entry = self.entry_mut(slot);
        entry.wrapped.insert(sender, value.clone());
        entry.next_actor = Some(p.next);

        let Some(next) = forward else {
            return Ok(None);
        };
        let temp = Key::generate(rng, key_bits);
        let encrypted = temp.encrypt(&value);
        entry.temp_key = Some(temp);

        Ok(Some(TableMessage::Wrap(CipherPayload {
            dest: p.dest,
            next,
            final_name: card,
            encrypted: Cipher(encrypted),
        })))
    }

    /// Handle an `unwrap` message.
    pub fn on_unwrap(
        &mut self,
        sender: PeerId,
        p: &CipherPayload,
    ) -> Result<Option<TableMessage>, ProtocolError> {
        let card = p.final_name;
        let slot = self.slot(&card)?;
        let entry = self.entry_at(slot);

        if entry.phase != DrawPhase::Unwrap {
            return Err(ProtocolError::WrongPhase { card, phase: entry.phase });
        }
        expect_actor(entry.next_actor, sender)?;
        if entry.player != Some(p.dest) || self.successor(&sender) != Some(p.next) {
            return Err(ProtocolError::Misrouted(card));
        }
        check_residue(card, p.encrypted.value())?;

        let local = self.local;
        let value = p.encrypted.value().clone();
        let arrived = p.next == p.dest;

        let reply = if local != p.next {
            None
        } else if arrived {
            let sealed = self.deck_key(&card)?.decrypt(&value);
            let temp_d = entry
                .temp_key
                .as_ref()
                .map(|k| k.d().clone())
                .ok_or(ProtocolError::MissingKey(card))?;
            let next = self.predecessor(&local).ok_or(ProtocolError::Misrouted(card))?;
            Some((
                Some(sealed),
                TableMessage::Unseal(UnsealPayload { dest: p.dest, next, final_name: card, key: Cipher(temp_d) }),
            ))
        } else {
            let stripped = self.deck_key(&card)?.decrypt(&value);
            let next = self.successor(&local).ok_or(ProtocolError::Misrouted(card))?;
            Some((
                None,
                TableMessage::Unwrap(CipherPayload {
                    dest: p.dest,
                    next,
                    final_name: card,
                    encrypted: Cipher(stripped),
                }),
            ))
        };

        let entry = self.entry_mut(slot);
        entry.unwrapped = Some(value);
        entry.next_actor = Some(p.next);
        if arrived {
            entry.phase = DrawPhase::Unseal;
            debug!(card = %card, "Unwrap complete");
        }

        Ok(reply.map(|(sealed, message)| {
            if sealed.is_some() {
                entry.sealed = sealed;
            }
            message
        }))
    }

    /// Handle an `unseal` message.
    ///
    /// Every peer checks the disclosed temp key against the recorded
    /// wraps before anything is mutated.
    pub fn on_unseal(
        &mut self,
        sender: PeerId,
        p: &UnsealPayload,
    ) -> Result<Option<TableMessage>, ProtocolError> {
        let card = p.final_name;
        let slot = self.slot(&card)?;
        let first = self.first_player();
        let entry = self.entry_at(slot);

        if entry.phase != DrawPhase::Unseal {
            return Err(ProtocolError::WrongPhase { card, phase: entry.phase });
        }
        expect_actor(entry.next_actor, sender)?;
        let expected_next = if sender == first { Some(p.dest) } else { self.predecessor(&sender) };
        if entry.player != Some(p.dest) || expected_next != Some(p.next) {
            return Err(ProtocolError::Misrouted(card));
        }

        let blind = ProtocolError::BlindSigning { card, peer: sender };
        let wrapped = entry.wrapped.get(&sender).ok_or_else(|| blind.clone())?;
        let input = match sender == p.dest {
            true => self.published.get(&entry.known_name),
            false => self.successor(&sender).and_then(|s| entry.wrapped.get(&s)),
        };
        let input = input.ok_or_else(|| blind.clone())?;
        let d = p.key.value();
        if &mod_exp(wrapped, d) != input {
            return Err(blind);
        }

        let local = self.local;
        let is_dest = local == p.dest;
        let plain = match (is_dest, &entry.sealed) {
            (true, Some(sealed)) => Some(mod_exp(sealed, d)),
            _ => None,
        };

        if sender == first {
            let card_value = if is_dest {
                Some(plain.as_ref().and_then(|v| self.initial.lookup_value(v)).copied())
            } else {
                None
            };

            let entry = self.entry_mut(slot);
            entry.temp_keys.insert(sender, d.clone());
            entry.next_actor = None;
            entry.temp_key = None;
            entry.sealed = None;
            match card_value {
                Some(None) => {
                    entry.phase = DrawPhase::Failed;
                    error!(card = %card, player = %p.dest, "Unsealed card is not in the initial deck");
                    return Err(ProtocolError::ForgedCard(card));
                }
                Some(raw) => entry.card = raw,
                None => {}
            }
            entry.phase = DrawPhase::Dealt;
            info!(card = %card, player = %p.dest, "Card dealt");
            return Ok(None);
        }

        let reply = if local == p.next {
            let own = entry
                .temp_key
                .as_ref()
                .map(|k| k.d().clone())
                .ok_or(ProtocolError::MissingKey(card))?;
            let next = if local == first {
                p.dest
            } else {
                self.predecessor(&local).ok_or(ProtocolError::Misrouted(card))?
            };
            Some(TableMessage::Unseal(UnsealPayload { dest: p.dest, next, final_name: card, key: Cipher(own) }))
        } else {
            None
        };

        let entry = self.entry_mut(slot);
        entry.temp_keys.insert(sender, d.clone());
        entry.next_actor = Some(p.next);
        if plain.is_some() {
            entry.sealed = plain;
        }
        Ok(reply)
    }
}

fn expect_actor(expected: Option<PeerId>, sender: PeerId) -> Result<(), ProtocolError> {
    match expected {
        Some(peer) if peer == sender => Ok(()),
        Some(peer) => Err(ProtocolError::OutOfTurn { expected: peer, got: sender }),
        None => Err(ProtocolError::OutOfTurn { expected: sender, got: sender }),
    }
}

fn check_residue(card: Name, value: &num_bigint::BigUint) -> Result<(), ProtocolError> {
    if !is_ciphertext(value) {
        return Err(ProtocolError::BadCiphertext(card));
    }
    Ok(())
}
