//! Peer Identity
//!
//! Peers are named by the SHA-256 of their channel public key, so an id
//! never depends on anything the relay reports about itself.

use super::hash::hash_bytes;
use super::wire::fixed_bytes;

fixed_bytes! {
    /// Unique peer identifier (hash of the peer's public key).
    ///
    /// Implements Ord for deterministic BTreeMap ordering.
    PeerId
}

impl PeerId {
    /// Derive the id from a channel public key.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self(hash_bytes(public_key))
    }
}

/// Position helpers over an agreed peer order.
pub trait OrderExt {
    /// Index of `peer` in the order.
    fn position_of(&self, peer: &PeerId) -> Option<usize>;

    /// The peer shuffling just before `peer`.
    fn predecessor(&self, peer: &PeerId) -> Option<PeerId>;

    /// The peer shuffling just after `peer`.
    fn successor(&self, peer: &PeerId) -> Option<PeerId>;
}

impl OrderExt for [PeerId] {
    fn position_of(&self, peer: &PeerId) -> Option<usize> {
        self.iter().position(|p| p == peer)
    }

    fn predecessor(&self, peer: &PeerId) -> Option<PeerId> {
        match self.position_of(peer)? {
            0 => None,
            i => Some(self[i - 1]),
        }
    }

    fn successor(&self, peer: &PeerId) -> Option<PeerId> {
        let i = self.position_of(peer)?;
        self.get(i + 1).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_from_public_key() {
        let a = PeerId::from_public_key(b"alice-key");
        let b = PeerId::from_public_key(b"bob-key");
        assert_ne!(a, b);
        assert_eq!(a, PeerId::from_public_key(b"alice-key"));
    }

    #[test]
    fn test_order_neighbours() {
        let order = [PeerId::new([1; 32]), PeerId::new([2; 32]), PeerId::new([3; 32])];
        let order = &order[..];

        assert_eq!(order.predecessor(&order[0]), None);
        assert_eq!(order.predecessor(&order[2]), Some(order[1]));
        assert_eq!(order.successor(&order[0]), Some(order[1]));
        assert_eq!(order.successor(&order[2]), None);
        assert_eq!(order.position_of(&PeerId::new([9; 32])), None);
    }
}
