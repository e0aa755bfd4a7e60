//! Protocol Messages
//!
//! Wire format for the six table topics. Payloads are typed per topic
//! so shape validation happens once, at deserialization. Fixed-width hex
//! encodings come from the field types themselves.
//!
//! JSON is used for inspection and tests, bincode inside relay envelopes.
//! Enums are externally tagged since bincode cannot carry internal tags.

use serde::{Deserialize, Serialize};

use crate::core::{Cipher, Name, Nonce, PeerId};
use crate::deck::ShuffleStage;

// =============================================================================
// PAYLOADS
// =============================================================================

/// A card as published in a shuffle pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedCard {
    /// Card name after this pass.
    pub name: Name,
    /// Ciphertext (plaintext value on pass 0).
    pub encrypted: Cipher,
}

/// `shuffle`: one pass of a shuffle round.
///
/// `stage` and `commitments` travel on every pass so a receiver can
/// tell a rekey pass from a forward pass with the same number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShufflePayload {
    /// Forward or rekey stage.
    pub stage: ShuffleStage,
    /// Pass number within the stage.
    pub pass: usize,
    /// Agreed peer order.
    pub order: Vec<PeerId>,
    /// Deck after this pass.
    pub deck: Vec<PublishedCard>,
    /// Per-card key commitments, rekey passes only.
    pub commitments: Vec<Name>,
}

/// A disclosed link of a name chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    /// Name the sender received the card under.
    pub name: Name,
    /// Nonce with `hash(nonce ‖ name) == known name`.
    pub nonce: Nonce,
}

/// `draw`: a draw request, the chain start, or a chain hop.
///
/// The disclosed name and nonce ride together in `link` rather than as
/// two top-level fields: bincode envelopes cannot carry flattened
/// optionals, and one `Option` rules out a name without its nonce.
/// In JSON a missing link is `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawPayload {
    /// Recipient of the card.
    pub dest: PeerId,
    /// Peer expected to act next.
    pub next: PeerId,
    /// Card being drawn.
    pub final_name: Name,
    /// Absent on requests and when the final player draws for itself.
    pub link: Option<ChainLink>,
}

/// `wrap` and `unwrap`: a ciphertext moving along the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherPayload {
    /// Recipient of the card.
    pub dest: PeerId,
    /// Peer expected to act next.
    pub next: PeerId,
    /// Card being drawn.
    pub final_name: Name,
    /// Ciphertext after the sender's step.
    pub encrypted: Cipher,
}

/// `unseal`: a disclosed temp decryption exponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsealPayload {
    /// Recipient of the card.
    pub dest: PeerId,
    /// Peer expected to act next.
    pub next: PeerId,
    /// Card being drawn.
    pub final_name: Name,
    /// Temp key `d`.
    pub key: Cipher,
}

/// `reveal`: a growing nonce chain from a held card to its commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealPayload {
    /// Holder of the card.
    pub dest: PeerId,
    /// Peer expected to extend the chain; `None` from `order[0]`.
    pub next: Option<PeerId>,
    /// Card being revealed.
    pub final_name: Name,
    /// Innermost disclosed name.
    pub name: Name,
    /// Disclosed nonces, outermost first.
    pub nonces: Vec<Nonce>,
}

// =============================================================================
// TABLE MESSAGES
// =============================================================================

/// Messages exchanged between peers at a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableMessage {
    /// Shuffle pass.
    Shuffle(ShufflePayload),
    /// Draw chain.
    Draw(DrawPayload),
    /// Temp-key wrap.
    Wrap(CipherPayload),
    /// Deck-key strip.
    Unwrap(CipherPayload),
    /// Temp-key disclosure.
    Unseal(UnsealPayload),
    /// Reveal chain.
    Reveal(RevealPayload),
}

impl TableMessage {
    /// Channel topic name.
    pub fn topic(&self) -> &'static str {
        match self {
            TableMessage::Shuffle(_) => "shuffle",
            TableMessage::Draw(_) => "draw",
            TableMessage::Wrap(_) => "wrap",
            TableMessage::Unwrap(_) => "unwrap",
            TableMessage::Unseal(_) => "unseal",
            TableMessage::Reveal(_) => "reveal",
        }
    }

    /// Card this message concerns, if card-scoped.
    pub fn final_name(&self) -> Option<Name> {
        match self {
            TableMessage::Shuffle(_) => None,
            TableMessage::Draw(p) => Some(p.final_name),
            TableMessage::Wrap(p) | TableMessage::Unwrap(p) => Some(p.final_name),
            TableMessage::Unseal(p) => Some(p.final_name),
            TableMessage::Reveal(p) => Some(p.final_name),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    fn sample_draw() -> TableMessage {
        TableMessage::Draw(DrawPayload {
            dest: PeerId::new([1; 32]),
            next: PeerId::new([2; 32]),
            final_name: Name::new([3; 32]),
            link: Some(ChainLink { name: Name::new([4; 32]), nonce: Nonce::new([5; 32]) }),
        })
    }

    #[test]
    fn test_draw_json_shape() {
        let json = sample_draw().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let draw = &value["draw"];
        assert_eq!(draw["dest"], "01".repeat(32));
        assert_eq!(draw["link"]["nonce"], "05".repeat(32));
    }

    #[test]
    fn test_draw_request_json_shape() {
        let msg = TableMessage::Draw(DrawPayload {
            dest: PeerId::new([1; 32]),
            next: PeerId::new([2; 32]),
            final_name: Name::new([3; 32]),
            link: None,
        });
        let json = msg.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert!(value["draw"]["link"].is_null());
        assert_eq!(value["draw"]["next"], "02".repeat(32));
        assert_eq!(TableMessage::from_json(&json).unwrap(), msg);
        assert_eq!(TableMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_cipher_fields_fixed_width() {
        let msg = TableMessage::Unseal(UnsealPayload {
            dest: PeerId::new([1; 32]),
            next: PeerId::new([2; 32]),
            final_name: Name::new([3; 32]),
            key: Cipher(BigUint::from(17u32)),
        });

        let json = msg.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let key = value["unseal"]["key"].as_str().unwrap();
        assert_eq!(key.len(), 160);

        assert_eq!(TableMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_binary_serialization_draw() {
        let msg = sample_draw();
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(TableMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_short_name_rejected() {
        let json = r#"{"reveal":{"dest":"01","next":null,"final_name":"02","name":"03","nonces":[]}}"#;
        assert!(TableMessage::from_json(json).is_err());
    }

    #[test]
    fn test_topics() {
        assert_eq!(sample_draw().topic(), "draw");
        let reveal = TableMessage::Reveal(RevealPayload {
            dest: PeerId::new([1; 32]),
            next: None,
            final_name: Name::new([9; 32]),
            name: Name::new([8; 32]),
            nonces: vec![],
        });
        assert_eq!(reveal.topic(), "reveal");
        assert_eq!(reveal.final_name(), Some(Name::new([9; 32])));
    }
}
