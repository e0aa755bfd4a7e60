//! Deck state machines.
//!
//! The shuffle round builds a [`FinalDeck`]; the draw and reveal
//! protocols then operate on its entries one card at a time.

pub mod card;
pub mod draw;
pub mod entry;
pub mod error;
pub mod reveal;
pub mod shuffle;

pub use card::{CardRecord, InitialDeck, RawCard};
pub use entry::{DrawPhase, FinalDeck, FinalDeckEntry, HeldCard, RevealProgress};
pub use error::{ErrorKind, ProtocolError};
pub use shuffle::{RoundStatus, ShuffleRound, ShuffleStage};
