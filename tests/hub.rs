//! Full games on the async hub.

use std::time::Duration;

use secret_cards::core::rng::derive_peer_seed;
use secret_cards::core::{seeded_rng, PeerId};
use secret_cards::{CardTable, RelayConfig, TableConfig, TableHub};

const TIMEOUT: Duration = Duration::from_secs(20);

fn tables(n: u8, cards: usize) -> (Vec<CardTable>, Vec<PeerId>) {
    let order: Vec<PeerId> = (0..n).map(|i| PeerId::from_public_key(&[i; 33])).collect();
    let config = TableConfig { key_bits: 128, ..TableConfig::with_deck_size(cards) };
    let tables = order
        .iter()
        .map(|p| CardTable::with_rng(*p, config.clone(), seeded_rng(derive_peer_seed(7, p))).unwrap())
        .collect();
    (tables, order)
}

#[tokio::test]
async fn test_hub_deals_and_reveals() {
    let (tables, order) = tables(3, 6);
    let hub = TableHub::start(RelayConfig::default(), tables).unwrap();
    let first = hub.handle(&order[0]).unwrap();

    first.propose(Some(order.clone()), 6).await.unwrap();
    for handle in hub.handles() {
        handle.wait_ready(TIMEOUT).await.unwrap();
    }

    for (dealt, dest) in order.iter().enumerate() {
        let from = hub.handle(&order[(dealt + 1) % order.len()]).unwrap();
        from.draw(*dest, None).await.unwrap();
        hub.handle(dest)
            .unwrap()
            .wait_hands(TIMEOUT, |hands| {
                hands.get(dest).map_or(false, |cards| cards.iter().all(|c| c.card.is_some()))
            })
            .await
            .unwrap();
    }

    // every peer reveals what it holds
    for dest in &order {
        let handle = hub.handle(dest).unwrap();
        let hands = handle.hands().await.unwrap();
        assert_eq!(hands[dest].len(), 1);
        handle.reveal(hands[dest][0].final_name).await.unwrap();
    }

    let hands = first
        .wait_hands(TIMEOUT, |hands| hands.values().flatten().filter(|c| c.revealed).count() == 3)
        .await
        .unwrap();
    let mut indices: Vec<u32> = hands.values().flatten().filter_map(|c| c.card.map(|r| r.index)).collect();
    indices.sort_unstable();
    indices.dedup();
    assert_eq!(indices.len(), 3);
    assert!(indices.iter().all(|&i| i < 6));

    assert!(first.cheaters().await.unwrap().is_empty());
    drop(first);
    hub.shutdown().await;
}

#[tokio::test]
async fn test_hub_rejects_draw_before_shuffle() {
    let (tables, order) = tables(2, 4);
    let hub = TableHub::start(RelayConfig::default(), tables).unwrap();
    let handle = hub.handle(&order[0]).unwrap();

    assert!(!handle.is_ready().await.unwrap());
    assert!(handle.draw(order[1], None).await.is_err());
    drop(handle);
    hub.shutdown().await;
}
