//! # Secret Cards
//!
//! Mental poker for mutually distrusting peers: shuffle, deal and reveal
//! a deck with no trusted dealer, over a relay that only broadcasts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SECRET CARDS                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Cryptographic primitives                  │
//! │  ├── sra.rs      - Commutative SRA cipher over 2^607 - 1     │
//! │  ├── hash.rs     - Card commitments and name chains          │
//! │  ├── wire.rs     - Fixed-width hex encodings                 │
//! │  ├── peer.rs     - Peer ids and order navigation             │
//! │  └── rng.rs      - Table randomness                          │
//! │                                                              │
//! │  deck/           - Protocol state machines                   │
//! │  ├── card.rs     - Raw cards and the initial deck            │
//! │  ├── shuffle.rs  - Shuffle and rekey passes                  │
//! │  ├── entry.rs    - Final deck arena                          │
//! │  ├── draw.rs     - Chain, wrap, unwrap, unseal               │
//! │  ├── reveal.rs   - Public proof of a held card               │
//! │  └── error.rs    - Desync / cheat / integrity taxonomy       │
//! │                                                              │
//! │  table.rs        - Per-peer session state                    │
//! │  config.rs       - Table and relay settings                  │
//! │                                                              │
//! │  network/        - Message plumbing                          │
//! │  ├── protocol.rs - Typed topic payloads                      │
//! │  ├── channel.rs  - Envelopes and sequence checks             │
//! │  └── relay.rs    - In-memory relay and async hub             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - A card goes to exactly one peer; the first chain start fixes it
//! - Every hop of a draw or reveal is checked against public hashes
//! - Temp keys disclosed during unseal are checked against the wraps
//! - A dealt card is checked against the initial deck commitments
//!
//! State only changes when a message comes back through the channel,
//! so every peer applies the same sequence of transitions.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod deck;
pub mod network;
pub mod table;

// Re-export commonly used types
pub use config::{ConfigError, RelayConfig, TableConfig};
pub use crate::core::{Key, Name, Nonce, PeerId};
pub use deck::{DrawPhase, ErrorKind, FinalDeck, HeldCard, ProtocolError, RawCard};
pub use network::{MemoryRelay, PeerStatus, TableHub, TableMessage};
pub use table::CardTable;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
