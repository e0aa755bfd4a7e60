//! Network Layer
//!
//! Typed wire messages, the channel boundary, and relays that connect
//! tables. The protocol core never touches transport; this layer only
//! moves messages between [`CardTable`](crate::table::CardTable)s.

pub mod channel;
pub mod protocol;
pub mod relay;

pub use channel::{Envelope, PeerStatus, SequenceTracker};
pub use protocol::{
    ChainLink, CipherPayload, DrawPayload, PublishedCard, RevealPayload, ShufflePayload,
    TableMessage, UnsealPayload,
};
pub use relay::{MemoryRelay, RelayError, RelayFault, TableHandle, TableHub};
