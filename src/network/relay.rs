//! Relays
//!
//! Two ways to connect tables, both delivering every envelope to every
//! peer (sender included) in one global order:
//!
//! - [`MemoryRelay`]: single-threaded, deterministic, with a tamper hook
//!   for adversarial scenarios.
//! - [`TableHub`]: one tokio task per peer on a broadcast bus, driven
//!   through [`TableHandle`] commands.
//!
//! Envelopes cross both relays as bincode bytes.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, RelayConfig};
use crate::core::{Name, PeerId};
use crate::deck::{HeldCard, ProtocolError};
use crate::table::CardTable;

use super::channel::{Envelope, PeerStatus, SequenceTracker};
use super::protocol::TableMessage;

/// Relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Envelope encoding failed.
    #[error("Envelope encoding failed: {0}")]
    Encoding(#[from] bincode::Error),

    /// No table for this peer.
    #[error("Unknown peer {0}")]
    UnknownPeer(PeerId),

    /// Local action rejected by the table.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid relay configuration.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Peer worker has shut down.
    #[error("Peer worker closed")]
    Closed,

    /// Condition not reached in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// A message some table rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFault {
    /// Table that rejected it.
    pub receiver: PeerId,
    /// Sender of the message.
    pub sender: PeerId,
    /// Message topic.
    pub topic: &'static str,
    /// Rejection reason.
    pub error: ProtocolError,
}

/// Outgoing sequence numbers per sender.
#[derive(Debug, Default)]
struct SeqCounter(BTreeMap<PeerId, u64>);

impl SeqCounter {
    fn next(&mut self, peer: PeerId) -> u64 {
        let seq = self.0.entry(peer).or_insert(0);
        let out = *seq;
        *seq += 1;
        out
    }
}

// =============================================================================
// MEMORY RELAY
// =============================================================================

/// Deterministic in-process relay.
pub struct MemoryRelay {
    tables: BTreeMap<PeerId, CardTable>,
    trackers: BTreeMap<PeerId, SequenceTracker>,
    seqs: SeqCounter,
    queue: VecDeque<Vec<u8>>,
    faults: Vec<RelayFault>,
    delivered: usize,
}

impl MemoryRelay {
    /// Connect the given tables.
    pub fn new(tables: Vec<CardTable>) -> Self {
        let tables: BTreeMap<PeerId, CardTable> = tables.into_iter().map(|t| (t.local(), t)).collect();
        let trackers = tables
            .keys()
            .map(|&receiver| {
                let mut tracker = SequenceTracker::new();
                for &peer in tables.keys() {
                    tracker.register(peer);
                }
                (receiver, tracker)
            })
            .collect();

        Self {
            tables,
            trackers,
            seqs: SeqCounter::default(),
            queue: VecDeque::new(),
            faults: Vec::new(),
            delivered: 0,
        }
    }

    /// Connected peers in id order.
    pub fn peers(&self) -> Vec<PeerId> {
        self.tables.keys().copied().collect()
    }

    /// A peer's table.
    pub fn table(&self, peer: &PeerId) -> Option<&CardTable> {
        self.tables.get(peer)
    }

    /// A peer's table, mutably.
    pub fn table_mut(&mut self, peer: &PeerId) -> Option<&mut CardTable> {
        self.tables.get_mut(peer)
    }

    /// Queue a message from `from`.
    pub fn submit(&mut self, from: PeerId, message: TableMessage) -> Result<(), RelayError> {
        if !self.tables.contains_key(&from) {
            return Err(RelayError::UnknownPeer(from));
        }
        let envelope = Envelope { from, seq: self.seqs.next(from), message };
        self.queue.push_back(envelope.to_bytes()?);
        Ok(())
    }

    /// Queue a raw envelope, bypassing sequence assignment.
    pub fn inject(&mut self, envelope: &Envelope) -> Result<(), RelayError> {
        self.queue.push_back(envelope.to_bytes()?);
        Ok(())
    }

    /// Messages waiting for delivery.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Total envelopes delivered.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Rejections recorded so far.
    pub fn faults(&self) -> &[RelayFault] {
        &self.faults
    }

    /// Drain recorded rejections.
    pub fn take_faults(&mut self) -> Vec<RelayFault> {
        std::mem::take(&mut self.faults)
    }

    /// Deliver until the queue is empty. Returns envelopes delivered.
    pub fn pump(&mut self) -> Result<usize, RelayError> {
        self.pump_with(|_| {})
    }

    /// Deliver until the queue is empty, letting `tamper` rewrite each
    /// envelope before any table sees it.
    pub fn pump_with<F: FnMut(&mut Envelope)>(&mut self, mut tamper: F) -> Result<usize, RelayError> {
        let mut count = 0;
        while self.step_with(&mut tamper)? {
            count += 1;
        }
        Ok(count)
    }

    /// Deliver one envelope. Returns `false` if the queue was empty.
    pub fn step(&mut self) -> Result<bool, RelayError> {
        self.step_with(|_| {})
    }

    fn step_with<F: FnMut(&mut Envelope)>(&mut self, mut tamper: F) -> Result<bool, RelayError> {
        let Some(bytes) = self.queue.pop_front() else {
            return Ok(false);
        };
        let mut envelope = Envelope::from_bytes(&bytes)?;
        tamper(&mut envelope);

        trace_envelope(&envelope);

        let topic = envelope.message.topic();
        let mut outbound = Vec::new();
        for (&receiver, table) in self.tables.iter_mut() {
            let status = match self.trackers.get_mut(&receiver) {
                Some(tracker) => tracker.check(envelope.from, envelope.seq),
                None => PeerStatus { peer: envelope.from, valid: false, seq: envelope.seq },
            };
            match table.handle_message(&status, envelope.message.clone()) {
                Ok(replies) => outbound.extend(replies.into_iter().map(|m| (receiver, m))),
                Err(error) => self.faults.push(RelayFault {
                    receiver,
                    sender: envelope.from,
                    topic,
                    error,
                }),
            }
        }

        for (from, message) in outbound {
            self.submit(from, message)?;
        }
        self.delivered += 1;
        Ok(true)
    }
}

#[cfg(feature = "debug-tracing")]
fn trace_envelope(envelope: &Envelope) {
    if let Ok(json) = envelope.message.to_json() {
        tracing::trace!(from = %envelope.from, seq = envelope.seq, %json, "Relaying");
    }
}

#[cfg(not(feature = "debug-tracing"))]
fn trace_envelope(_: &Envelope) {}

// =============================================================================
// ASYNC HUB
// =============================================================================

type Reply<T> = oneshot::Sender<T>;

/// Commands a [`TableHandle`] sends to its worker.
#[derive(Debug)]
pub enum PeerCommand {
    /// Propose a shuffle; a random order over all peers if `order` is `None`.
    Propose {
        /// Explicit order.
        order: Option<Vec<PeerId>>,
        /// Deck size.
        size: usize,
        /// Result.
        reply: Reply<Result<(), ProtocolError>>,
    },
    /// Draw a card for `dest`.
    Draw {
        /// Recipient.
        dest: PeerId,
        /// Specific card, or random.
        card: Option<Name>,
        /// Result.
        reply: Reply<Result<(), ProtocolError>>,
    },
    /// Reveal a held card.
    Reveal {
        /// Card to reveal.
        card: Name,
        /// Result.
        reply: Reply<Result<(), ProtocolError>>,
    },
    /// Query hands.
    Hands {
        /// Hands by owner.
        reply: Reply<BTreeMap<PeerId, Vec<HeldCard>>>,
    },
    /// Query deck readiness.
    Ready {
        /// Whether a final deck exists.
        reply: Reply<bool>,
    },
    /// Query cheat counts.
    Cheaters {
        /// Counts per peer.
        reply: Reply<BTreeMap<PeerId, u32>>,
    },
}

/// Client side of one peer worker.
///
/// Every request fails with [`RelayError::Closed`] once the worker has
/// stopped, whether from shutdown or from falling behind the bus.
#[derive(Debug, Clone)]
pub struct TableHandle {
    peer: PeerId,
    commands: mpsc::Sender<PeerCommand>,
}

impl TableHandle {
    /// Peer this handle drives.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> PeerCommand) -> Result<T, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(build(tx)).await.map_err(|_| RelayError::Closed)?;
        rx.await.map_err(|_| RelayError::Closed)
    }

    /// Propose a shuffle.
    pub async fn propose(&self, order: Option<Vec<PeerId>>, size: usize) -> Result<(), RelayError> {
        self.request(|reply| PeerCommand::Propose { order, size, reply }).await??;
        Ok(())
    }

    /// Draw a card for `dest`.
    pub async fn draw(&self, dest: PeerId, card: Option<Name>) -> Result<(), RelayError> {
        self.request(|reply| PeerCommand::Draw { dest, card, reply }).await??;
        Ok(())
    }

    /// Reveal a held card.
    pub async fn reveal(&self, card: Name) -> Result<(), RelayError> {
        self.request(|reply| PeerCommand::Reveal { card, reply }).await??;
        Ok(())
    }

    /// Dealt cards by owner, as this peer sees them.
    pub async fn hands(&self) -> Result<BTreeMap<PeerId, Vec<HeldCard>>, RelayError> {
        self.request(|reply| PeerCommand::Hands { reply }).await
    }

    /// Whether this peer holds a final deck.
    pub async fn is_ready(&self) -> Result<bool, RelayError> {
        self.request(|reply| PeerCommand::Ready { reply }).await
    }

    /// Cheat counts recorded by this peer.
    pub async fn cheaters(&self) -> Result<BTreeMap<PeerId, u32>, RelayError> {
        self.request(|reply| PeerCommand::Cheaters { reply }).await
    }

    /// Wait until the deck is final.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), RelayError> {
        self.wait_hands(timeout, |_| true).await?;
        Ok(())
    }

    /// Wait until the deck is final and `predicate` holds for the hands.
    pub async fn wait_hands<F>(
        &self,
        timeout: Duration,
        predicate: F,
    ) -> Result<BTreeMap<PeerId, Vec<HeldCard>>, RelayError>
    where
        F: Fn(&BTreeMap<PeerId, Vec<HeldCard>>) -> bool,
    {
        let poll = async {
            loop {
                if self.is_ready().await? {
                    let hands = self.hands().await?;
                    if predicate(&hands) {
                        return Ok::<_, RelayError>(hands);
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| RelayError::Timeout(timeout))?
    }
}

/// Async relay running one worker per peer.
pub struct TableHub {
    handles: BTreeMap<PeerId, TableHandle>,
    workers: Vec<JoinHandle<()>>,
}

impl TableHub {
    /// Spawn a worker for each table on a shared bus.
    pub fn start(config: RelayConfig, tables: Vec<CardTable>) -> Result<Self, RelayError> {
        if config.channel_capacity == 0 {
            return Err(ConfigError::ChannelCapacity.into());
        }
        // pass 0, n shuffle passes, n rekey passes
        let min = 2 * tables.len() + 1;
        if config.channel_capacity < min {
            return Err(ConfigError::CapacityBelowRound { capacity: config.channel_capacity, min }.into());
        }
        let (bus, _) = broadcast::channel(config.channel_capacity);
        let roster: Vec<PeerId> = tables.iter().map(CardTable::local).collect();

        let mut handles = BTreeMap::new();
        let mut workers = Vec::new();
        for table in tables {
            let peer = table.local();
            let (tx, rx) = mpsc::channel(config.channel_capacity);
            let mut tracker = SequenceTracker::new();
            for &p in &roster {
                tracker.register(p);
            }

            let worker = PeerWorker {
                table,
                tracker,
                roster: roster.clone(),
                seq: 0,
                bus: bus.clone(),
            };
            let inbound = bus.subscribe();
            workers.push(tokio::spawn(worker.run(rx, inbound)));
            handles.insert(peer, TableHandle { peer, commands: tx });
        }

        info!(peers = roster.len(), "Table hub started");
        Ok(Self { handles, workers })
    }

    /// Handle for one peer.
    pub fn handle(&self, peer: &PeerId) -> Result<TableHandle, RelayError> {
        self.handles.get(peer).cloned().ok_or(RelayError::UnknownPeer(*peer))
    }

    /// Handles for all peers, in id order.
    pub fn handles(&self) -> Vec<TableHandle> {
        self.handles.values().cloned().collect()
    }

    /// Stop every worker.
    pub async fn shutdown(self) {
        drop(self.handles);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!("Peer worker ended abnormally: {}", e);
            }
        }
        info!("Table hub stopped");
    }
}

struct PeerWorker {
    table: CardTable,
    tracker: SequenceTracker,
    roster: Vec<PeerId>,
    seq: u64,
    bus: broadcast::Sender<Arc<Vec<u8>>>,
}

impl PeerWorker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<PeerCommand>,
        mut inbound: broadcast::Receiver<Arc<Vec<u8>>>,
    ) {
        let peer = self.table.local();
        debug!(peer = %peer, "Peer worker running");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                bytes = inbound.recv() => match bytes {
                    Ok(bytes) => self.on_envelope(&bytes),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // skipped envelopes break every later sequence check
                        error!(peer = %peer, missed, "Peer worker lagged behind the bus, stopping");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!(peer = %peer, "Peer worker stopped");
    }

    fn on_command(&mut self, command: PeerCommand) {
        match command {
            PeerCommand::Propose { order, size, reply } => {
                let result = match order {
                    Some(order) => self.table.propose_shuffle(order, size),
                    None => {
                        let roster = self.roster.clone();
                        self.table.propose_shuffle_random(&roster, size)
                    }
                };
                let _ = reply.send(result.map(|m| self.publish(m)));
            }
            PeerCommand::Draw { dest, card, reply } => {
                let result = self.table.draw_card(dest, card);
                let _ = reply.send(result.map(|m| self.publish(m)));
            }
            PeerCommand::Reveal { card, reply } => {
                let result = self.table.reveal_card(&card);
                let _ = reply.send(result.map(|m| self.publish(m)));
            }
            PeerCommand::Hands { reply } => {
                let _ = reply.send(self.table.hands_by_owner());
            }
            PeerCommand::Ready { reply } => {
                let _ = reply.send(self.table.is_ready());
            }
            PeerCommand::Cheaters { reply } => {
                let _ = reply.send(self.table.cheaters().clone());
            }
        }
    }

    fn on_envelope(&mut self, bytes: &[u8]) {
        let envelope = match Envelope::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Undecodable envelope: {}", e);
                return;
            }
        };

        let status = self.tracker.check(envelope.from, envelope.seq);
        // rejections are logged and counted inside the table
        if let Ok(replies) = self.table.handle_message(&status, envelope.message) {
            for reply in replies {
                self.publish(reply);
            }
        }
    }

    fn publish(&mut self, message: TableMessage) {
        let envelope = Envelope { from: self.table.local(), seq: self.seq, message };
        match envelope.to_bytes() {
            Ok(bytes) => {
                self.seq += 1;
                if self.bus.send(Arc::new(bytes)).is_err() {
                    warn!("No peers listening on the bus");
                }
            }
            Err(e) => warn!("Failed to encode envelope: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::core::seeded_rng;

    fn tables(n: u8) -> Vec<CardTable> {
        (1..=n)
            .map(|i| {
                let config = TableConfig { key_bits: 128, ..TableConfig::with_deck_size(4) };
                CardTable::with_rng(PeerId::new([i; 32]), config, seeded_rng(i as u64)).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_submit_unknown_peer() {
        let mut relay = MemoryRelay::new(tables(2));
        let stranger = PeerId::new([9; 32]);
        let msg = relay.table_mut(&PeerId::new([1; 32])).unwrap().propose_shuffle(
            vec![PeerId::new([1; 32])],
            4,
        );
        assert!(matches!(
            relay.submit(stranger, msg.unwrap()),
            Err(RelayError::UnknownPeer(_))
        ));
    }

    #[test]
    fn test_memory_relay_shuffles() {
        let mut relay = MemoryRelay::new(tables(2));
        let peers = relay.peers();
        let msg = relay.table_mut(&peers[0]).unwrap().propose_shuffle(peers.clone(), 4).unwrap();
        relay.submit(peers[0], msg).unwrap();

        // pass 0, two shuffle passes, two rekey passes
        assert_eq!(relay.pump().unwrap(), 5);
        assert!(relay.faults().is_empty());
        for peer in &peers {
            assert!(relay.table(peer).unwrap().is_ready());
        }
    }

    #[test]
    fn test_replayed_envelope_rejected() {
        let mut relay = MemoryRelay::new(tables(1));
        let peer = relay.peers()[0];
        let msg = relay.table_mut(&peer).unwrap().propose_shuffle(vec![peer], 4).unwrap();
        relay.submit(peer, msg.clone()).unwrap();
        relay.step().unwrap();

        relay.inject(&Envelope { from: peer, seq: 0, message: msg }).unwrap();
        relay.pump().unwrap();
        assert!(relay
            .faults()
            .iter()
            .any(|f| f.error == ProtocolError::Unauthenticated(peer)));
    }

    #[tokio::test]
    async fn test_hub_reaches_final_deck() {
        let hub = TableHub::start(RelayConfig::default(), tables(2)).unwrap();
        let handles = hub.handles();

        handles[0].propose(None, 4).await.unwrap();
        for handle in &handles {
            handle.wait_ready(Duration::from_secs(10)).await.unwrap();
        }
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_hub_rejects_capacity_below_round() {
        let result = TableHub::start(RelayConfig { channel_capacity: 1 }, tables(3));
        assert!(matches!(
            result,
            Err(RelayError::Config(ConfigError::CapacityBelowRound { capacity: 1, min: 7 }))
        ));
    }

    #[tokio::test]
    async fn test_lagged_worker_stops() {
        let table = tables(1).remove(0);
        let peer = table.local();
        let mut tracker = SequenceTracker::new();
        tracker.register(peer);

        let (bus, inbound) = broadcast::channel(1);
        let worker = PeerWorker { table, tracker, roster: vec![peer], seq: 0, bus: bus.clone() };
        for _ in 0..3 {
            bus.send(Arc::new(Vec::new())).unwrap();
        }

        let (tx, rx) = mpsc::channel(4);
        let handle = TableHandle { peer, commands: tx };
        let task = tokio::spawn(worker.run(rx, inbound));

        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(matches!(handle.is_ready().await, Err(RelayError::Closed)));
        assert!(matches!(
            handle.wait_ready(Duration::from_secs(1)).await,
            Err(RelayError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_hub_rejects_zero_capacity() {
        let result = TableHub::start(RelayConfig { channel_capacity: 0 }, tables(1));
        assert!(matches!(result, Err(RelayError::Config(ConfigError::ChannelCapacity))));
    }
}
