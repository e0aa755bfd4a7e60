//! Channel Boundary
//!
//! The table trusts the channel to say who sent a message and whether
//! it is fresh. Signatures are the channel's business; what lives here
//! is the envelope every relay carries and the per-peer sequence check.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::PeerId;

use super::protocol::TableMessage;

/// Channel verdict on one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerStatus {
    /// Claimed sender.
    pub peer: PeerId,
    /// Whether the sender is known and the sequence number is in order.
    pub valid: bool,
    /// Sequence number carried by the message.
    pub seq: u64,
}

impl PeerStatus {
    /// Status for a message accepted by the channel.
    pub fn valid(peer: PeerId, seq: u64) -> Self {
        Self { peer, valid: true, seq }
    }
}

/// A message as carried by a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender.
    pub from: PeerId,
    /// Sender's sequence number.
    pub seq: u64,
    /// Payload.
    pub message: TableMessage,
}

impl Envelope {
    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// Per-peer sequence validation.
///
/// The first message from a known peer sets its sequence; after that
/// only `last + 1` is accepted. Unknown peers are never valid. The
/// stored sequence only moves on success, so a spoofed out-of-order
/// message cannot desynchronise an honest peer.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    peers: BTreeMap<PeerId, PeerSeq>,
}

#[derive(Debug, Clone, Copy, Default)]
struct PeerSeq {
    last: Option<u64>,
    rejected: u32,
}

impl SequenceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer to the roster.
    pub fn register(&mut self, peer: PeerId) {
        self.peers.entry(peer).or_default();
    }

    /// Drop a peer from the roster.
    pub fn remove(&mut self, peer: &PeerId) {
        self.peers.remove(peer);
    }

    /// Check an inbound sequence number.
    pub fn check(&mut self, peer: PeerId, seq: u64) -> PeerStatus {
        let Some(state) = self.peers.get_mut(&peer) else {
            warn!(peer = %peer, seq, "Message from unknown peer");
            return PeerStatus { peer, valid: false, seq };
        };

        let valid = match state.last {
            None => true,
            Some(last) => last.checked_add(1) == Some(seq),
        };
        if valid {
            state.last = Some(seq);
        } else {
            state.rejected += 1;
            warn!(peer = %peer, seq, expected = ?state.last.map(|s| s + 1), "Sequence mismatch");
        }
        PeerStatus { peer, valid, seq }
    }

    /// Messages rejected from `peer` so far.
    pub fn rejected(&self, peer: &PeerId) -> u32 {
        self.peers.get(peer).map_or(0, |s| s.rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_on_first_use() {
        let peer = PeerId::new([1; 32]);
        let mut tracker = SequenceTracker::new();
        tracker.register(peer);

        assert!(tracker.check(peer, 41).valid);
        assert!(tracker.check(peer, 42).valid);
        assert!(!tracker.check(peer, 42).valid);
        assert!(!tracker.check(peer, 44).valid);
        assert!(tracker.check(peer, 43).valid);
        assert_eq!(tracker.rejected(&peer), 2);
    }

    #[test]
    fn test_unknown_peer_invalid() {
        let mut tracker = SequenceTracker::new();
        let status = tracker.check(PeerId::new([7; 32]), 0);
        assert!(!status.valid);
    }

    #[test]
    fn test_removed_peer_invalid() {
        let peer = PeerId::new([2; 32]);
        let mut tracker = SequenceTracker::new();
        tracker.register(peer);
        tracker.remove(&peer);
        assert!(!tracker.check(peer, 0).valid);
    }
}
