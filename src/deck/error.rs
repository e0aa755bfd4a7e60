//! Protocol Errors
//!
//! Every rejected message maps to one of three kinds:
//!
//! | Kind      | Meaning                                   | Effect                      |
//! |-----------|-------------------------------------------|-----------------------------|
//! | Desync    | wrong turn, wrong phase, unknown card     | dropped, nothing mutated    |
//! | Cheat     | a hash or commitment check failed         | dropped, sender flagged     |
//! | Integrity | an unsealed card is not in the initial deck | draw marked failed        |

use crate::core::{Name, PeerId};

use super::entry::DrawPhase;
use super::shuffle::ShuffleStage;

/// Classification of a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Out-of-turn or stale message. Recoverable if the sender retries.
    Desync,
    /// Evidence of malicious behaviour by the sender.
    Cheat,
    /// A completed draw produced a card that was never in the deck.
    Integrity,
}

/// Errors raised while validating or applying protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    // =========================================================================
    // Desync
    // =========================================================================
    /// Channel could not authenticate the sender.
    #[error("message from {0} failed channel validation")]
    Unauthenticated(PeerId),

    /// Peer is not part of the agreed order.
    #[error("peer {0} is not in the order")]
    NotInOrder(PeerId),

    /// Proposed order is empty or repeats a peer.
    #[error("invalid peer order")]
    InvalidOrder,

    /// Message order differs from the round's order.
    #[error("message order does not match the round")]
    OrderMismatch,

    /// Message came from a peer whose turn it is not.
    #[error("out of turn: expected {expected}, got {got}")]
    OutOfTurn {
        /// Peer whose turn it is.
        expected: PeerId,
        /// Actual sender.
        got: PeerId,
    },

    /// Deck length differs from the agreed size.
    #[error("deck size mismatch: expected {expected}, got {got}")]
    DeckSize {
        /// Agreed size.
        expected: usize,
        /// Received size.
        got: usize,
    },

    /// Proposed deck size outside the configured bounds.
    #[error("deck size {size} outside 1..={max}")]
    DeckSizeOutOfRange {
        /// Proposed size.
        size: usize,
        /// Configured upper bound.
        max: usize,
    },

    /// No shuffle round is running.
    #[error("no shuffle round in progress")]
    NoRound,

    /// Shuffle message for a pass other than the next one.
    #[error("unexpected shuffle pass {stage:?}/{pass}")]
    UnexpectedPass {
        /// Received stage.
        stage: ShuffleStage,
        /// Received pass.
        pass: usize,
    },

    /// No final deck has been agreed yet.
    #[error("deck is not ready")]
    NotReady,

    /// Card name is not in the final deck.
    #[error("unknown card {0}")]
    UnknownCard(Name),

    /// Card has not reached the phase the message belongs to.
    #[error("card {card} is in phase {phase:?}")]
    WrongPhase {
        /// Final name.
        card: Name,
        /// Current phase.
        phase: DrawPhase,
    },

    /// Message `dest` or `next` does not match the card's routing.
    #[error("misrouted message for card {0}")]
    Misrouted(Name),

    /// Draw requested for a card that already has a player.
    #[error("card {0} is not available")]
    CardUnavailable(Name),

    /// Every card has been drawn.
    #[error("no undrawn cards left")]
    DeckExhausted,

    /// Reveal attempted by a peer that does not hold the card.
    #[error("card {0} is not held locally")]
    NotHolder(Name),

    /// Card was already revealed or a reveal is in flight.
    #[error("card {0} is already being revealed")]
    AlreadyRevealed(Name),

    /// Local key material missing for a step this peer must perform.
    #[error("no local key for card {0}")]
    MissingKey(Name),

    // =========================================================================
    // Cheat
    // =========================================================================
    /// Published initial deck fails validation.
    #[error("invalid initial deck: {0}")]
    InvalidInitialDeck(String),

    /// A name appears twice.
    #[error("duplicate card name {0}")]
    DuplicateName(Name),

    /// Ciphertext is not a residue mod p.
    #[error("ciphertext out of range for card {0}")]
    BadCiphertext(Name),

    /// Rekey pass renamed or reordered cards, or omitted commitments.
    #[error("rekey pass altered the deck")]
    RekeyMismatch,

    /// Draw chain nonce does not hash to the known name.
    #[error("forged nonce for card {0}")]
    ForgedNonce(Name),

    /// Second chain start for an assigned card.
    #[error("card {0} was already drawn")]
    AlreadyDrawn(Name),

    /// Hash-valid name with no matching local shuffle record.
    #[error("no shuffle record for {name} (card {card})")]
    MissingRecord {
        /// Final name.
        card: Name,
        /// Name that should have been recorded.
        name: Name,
    },

    /// Disclosed temp key does not undo the recorded wrap.
    #[error("temp key from {peer} does not match its wrap of card {card}")]
    BlindSigning {
        /// Final name.
        card: Name,
        /// Peer that disclosed the key.
        peer: PeerId,
    },

    /// Reveal nonce list does not fold back to the final name.
    #[error("invalid reveal chain for card {0}")]
    InvalidChain(Name),

    /// Terminal reveal name is not an initial deck commitment.
    #[error("reveal of card {0} ends outside the initial deck")]
    CommitmentMismatch(Name),

    // =========================================================================
    // Integrity
    // =========================================================================
    /// Unsealed value is not in the initial deck.
    #[error("card {0} unsealed to a value outside the initial deck")]
    ForgedCard(Name),
}

impl ProtocolError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        use ProtocolError::*;
        match self {
            InvalidInitialDeck(_)
            | DuplicateName(_)
            | BadCiphertext(_)
            | RekeyMismatch
            | ForgedNonce(_)
            | AlreadyDrawn(_)
            | MissingRecord { .. }
            | BlindSigning { .. }
            | InvalidChain(_)
            | CommitmentMismatch(_) => ErrorKind::Cheat,
            ForgedCard(_) => ErrorKind::Integrity,
            _ => ErrorKind::Desync,
        }
    }

    /// Whether the sender should be flagged.
    pub fn is_cheat(&self) -> bool {
        self.kind() == ErrorKind::Cheat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let card = Name::new([1; 32]);
        assert_eq!(ProtocolError::ForgedNonce(card).kind(), ErrorKind::Cheat);
        assert_eq!(ProtocolError::ForgedCard(card).kind(), ErrorKind::Integrity);
        assert_eq!(ProtocolError::CardUnavailable(card).kind(), ErrorKind::Desync);
        assert!(ProtocolError::AlreadyDrawn(card).is_cheat());
        assert!(!ProtocolError::NotReady.is_cheat());
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::DeckSize { expected: 52, got: 51 };
        assert_eq!(err.to_string(), "deck size mismatch: expected 52, got 51");
    }
}
