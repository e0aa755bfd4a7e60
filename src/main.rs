//! Secret Cards Demo Table
//!
//! Runs three peers on an in-process hub: shuffle, deal one card to
//! each peer, then have every holder reveal its card.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use secret_cards::{
    core::{rng::derive_peer_seed, seeded_rng, PeerId},
    CardTable, RelayConfig, TableConfig, TableHub, VERSION,
};

const TABLE_SEED: u64 = 12345;
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Secret Cards v{}", VERSION);

    let table_config = TableConfig::from_env().context("invalid table config")?;
    let relay_config = RelayConfig::from_env().context("invalid relay config")?;
    info!(
        "Deck: {} cards, {}-bit keys",
        table_config.deck_size, table_config.key_bits
    );

    demo_table(table_config, relay_config).await
}

async fn demo_table(table_config: TableConfig, relay_config: RelayConfig) -> Result<()> {
    info!("=== Starting Demo Table ===");

    let peers: Vec<PeerId> = (0u8..3)
        .map(|i| PeerId::from_public_key(&[i; 32]))
        .collect();

    let mut tables = Vec::with_capacity(peers.len());
    for peer in &peers {
        let rng = seeded_rng(derive_peer_seed(TABLE_SEED, peer));
        tables.push(CardTable::with_rng(*peer, table_config.clone(), rng)?);
        info!("Seated peer {}", hex::encode(&peer.0[..4]));
    }

    let hub = TableHub::start(relay_config, tables)?;
    let handles = hub.handles();
    let dealer = hub.handle(&peers[0])?;

    dealer.propose(Some(peers.clone()), table_config.deck_size).await?;
    for handle in &handles {
        handle.wait_ready(STEP_TIMEOUT).await?;
    }
    info!("Deck shuffled by {} peers", peers.len());

    // one card per peer, one draw at a time
    for (dealt, peer) in peers.iter().enumerate() {
        dealer.draw(*peer, None).await?;
        let target = dealt + 1;
        dealer
            .wait_hands(STEP_TIMEOUT, |hands| hands.values().map(Vec::len).sum::<usize>() == target)
            .await?;
        // the holder learns its card after the last unseal
        hub.handle(peer)?
            .wait_hands(STEP_TIMEOUT, |hands| {
                hands.get(peer).map_or(false, |cards| cards.iter().all(|c| c.card.is_some()))
            })
            .await?;
    }

    for handle in &handles {
        let hands = handle.hands().await?;
        let own = hands.get(&handle.peer()).cloned().unwrap_or_default();
        for held in own {
            let index = held.card.map(|c| c.index);
            info!(
                "Peer {} holds {} (card {:?})",
                hex::encode(&handle.peer().0[..4]),
                held.final_name,
                index
            );
            handle.reveal(held.final_name).await?;
        }
    }

    let total = peers.len();
    let hands = dealer
        .wait_hands(STEP_TIMEOUT, |hands| {
            hands.values().flatten().filter(|c| c.revealed).count() == total
        })
        .await?;

    info!("=== Revealed Hands ===");
    for (owner, cards) in &hands {
        let indices: Vec<Option<u32>> = cards.iter().map(|c| c.card.map(|raw| raw.index)).collect();
        info!("{}: {:?}", hex::encode(&owner.0[..4]), indices);
    }

    let cheaters = dealer.cheaters().await?;
    if cheaters.is_empty() {
        info!("No cheating detected");
    } else {
        info!("Cheat counts: {:?}", cheaters);
    }

    drop((dealer, handles));
    hub.shutdown().await;
    info!("=== Demo Complete ===");
    Ok(())
}
