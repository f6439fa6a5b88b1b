//! Protocol convergence tests for till-sync
//!
//! Multiple terminals on one storefront must end up agreeing on the
//! degraded flag and the pending set, whatever order they start in and
//! whatever the transport delivers.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use till_sync::{Storefront, SyncConfig, SyncMessage, Terminal};
use till_vault::StorageMedium;

fn storefront() -> Storefront {
    Storefront::new(SyncConfig {
        origin: "shop.example".into(),
        scramble_gate: Duration::from_millis(50),
        settle_delay: Duration::from_millis(100),
        relay_cleanup: Duration::from_millis(30),
        ..SyncConfig::default()
    })
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

async fn park_one_sale(till: &Terminal, amount: f64) -> u64 {
    let id = till.execute_transaction(amount, "parked sale").unwrap();
    // Past the gate, so the start announcement is out; degraded mode
    // keeps it from ever settling.
    tokio::time::sleep(Duration::from_millis(80)).await;
    id
}

// ============================================================================
// Late Joiner Adoption
// ============================================================================

#[tokio::test]
async fn late_joiner_adopts_the_running_state() {
    let shop = storefront();
    let till_a = shop.open("till-a");

    till_a.set_degraded(true);
    let parked = park_one_sale(&till_a, 9.50).await;

    // A second till opens mid-shift, asks who is alive, and adopts the
    // snapshot that comes back.
    let till_b = shop.open("till-b");
    settle().await;

    assert!(till_b.degraded());
    assert_eq!(till_b.pending_ids(), BTreeSet::from([parked]));
}

#[tokio::test]
async fn late_joiner_hears_nothing_from_an_idle_storefront() {
    let shop = storefront();
    let _till_a = shop.open("till-a");

    let till_b = shop.open("till-b");
    settle().await;

    // Nothing to report means no snapshot: the joiner keeps its defaults.
    assert!(!till_b.degraded());
    assert!(till_b.pending_ids().is_empty());
}

#[tokio::test]
async fn late_joiner_merges_snapshot_with_its_own_recovered_ids() {
    let shop = storefront();
    let till_a = shop.open("till-a");
    till_a.set_degraded(true);
    let from_a = park_one_sale(&till_a, 3.00).await;

    // A crashed till left a record behind; the joiner recovers it during
    // startup, then unions in the snapshot from the running till.
    let orphan_key = shop.config().record_key(777);
    let bootstrap = shop.medium().attach("crashed-till");
    bootstrap.set(&orphan_key, "sealed").unwrap();

    let till_b = shop.open("till-b");
    settle().await;

    assert_eq!(till_b.pending_ids(), BTreeSet::from([from_a, 777]));
}

// ============================================================================
// Concurrent Activity
// ============================================================================

#[tokio::test]
async fn terminals_converge_on_the_union_of_parked_sales() {
    let shop = storefront();
    let till_a = shop.open("till-a");
    let till_b = shop.open("till-b");

    till_a.set_degraded(true);
    settle().await;
    assert!(till_b.degraded());

    let from_a = park_one_sale(&till_a, 4.00).await;
    let from_b = park_one_sale(&till_b, 6.00).await;

    let expected = BTreeSet::from([from_a, from_b]);
    assert_eq!(till_a.pending_ids(), expected);
    assert_eq!(till_b.pending_ids(), expected);
}

#[tokio::test]
async fn duplicate_announcements_are_harmless() {
    let shop = storefront();
    let till_a = shop.open("till-a");

    // A flaky peer repeats itself on the raw channel.
    let (peer, _rx) = shop.switchboard().join(&shop.config().channel_name).unwrap();
    peer.send(&SyncMessage::TransactionStarted { id: 42 });
    peer.send(&SyncMessage::TransactionStarted { id: 42 });
    settle().await;
    assert_eq!(till_a.pending_ids(), BTreeSet::from([42]));

    peer.send(&SyncMessage::TransactionFinished { id: 42 });
    peer.send(&SyncMessage::TransactionFinished { id: 42 });
    settle().await;
    assert!(till_a.pending_ids().is_empty());
}

#[tokio::test]
async fn snapshot_merges_commute_on_the_pending_set() {
    let snapshots = [
        BTreeSet::from([1u64, 2]),
        BTreeSet::from([2u64, 3]),
        BTreeSet::from([5u64]),
    ];

    let forward = storefront();
    let till_fwd = forward.open("till");
    let (peer, _rx) = forward
        .switchboard()
        .join(&forward.config().channel_name)
        .unwrap();
    for pending in snapshots.iter() {
        peer.send(&SyncMessage::StateSnapshot {
            degraded: false,
            pending: pending.clone(),
        });
    }

    let backward = storefront();
    let till_bwd = backward.open("till");
    let (peer, _rx) = backward
        .switchboard()
        .join(&backward.config().channel_name)
        .unwrap();
    for pending in snapshots.iter().rev() {
        peer.send(&SyncMessage::StateSnapshot {
            degraded: false,
            pending: pending.clone(),
        });
    }

    settle().await;
    assert_eq!(till_fwd.pending_ids(), till_bwd.pending_ids());
    assert_eq!(till_fwd.pending_ids(), BTreeSet::from([1, 2, 3, 5]));
}

// ============================================================================
// Recovery and Reset
// ============================================================================

#[tokio::test]
async fn recovery_purges_the_backlog_on_every_terminal() {
    let shop = storefront();
    let till_a = shop.open("till-a");
    let till_b = shop.open("till-b");

    till_a.set_degraded(true);
    settle().await;
    let from_a = park_one_sale(&till_a, 4.00).await;
    let from_b = park_one_sale(&till_b, 6.00).await;

    till_b.set_degraded(false);
    settle().await;

    assert!(!till_a.degraded());
    assert!(till_a.pending_ids().is_empty());
    assert!(till_b.pending_ids().is_empty());
    // The purge went through the shared medium, so both records are gone
    // from both tills' view.
    for id in [from_a, from_b] {
        let key = shop.config().record_key(id);
        assert_eq!(till_a.store().get(&key), None);
        assert_eq!(till_b.store().get(&key), None);
    }
}

#[tokio::test]
async fn crashed_terminal_backlog_is_recovered_by_the_next_shift() {
    let shop = storefront();

    let till_a = shop.open("till-a");
    till_a.set_degraded(true);
    let parked = park_one_sale(&till_a, 8.00).await;
    till_a.close();

    // Next morning: a fresh till finds the record, not the flag. The
    // degraded flag is session state and died with till-a.
    let till_c = shop.open("till-c");
    settle().await;
    assert!(!till_c.degraded());
    assert_eq!(till_c.pending_ids(), BTreeSet::from([parked]));

    till_c.set_degraded(false);
    assert!(till_c.pending_ids().is_empty());
    assert_eq!(till_c.store().get(&shop.config().record_key(parked)), None);
}

#[tokio::test]
async fn global_reset_wipes_every_terminal_and_notifies() {
    let shop = storefront();
    let till_a = shop.open("till-a");
    let till_b = shop.open("till-b");

    till_a.set_degraded(true);
    let _parked = park_one_sale(&till_a, 2.00).await;
    till_a.store().set("loyalty_counter", "17");

    let notices = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&notices);
    let _sub_a = till_a.on_reset(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });
    let sink = Arc::clone(&notices);
    let _sub_b = till_b.on_reset(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });

    till_b.request_global_reset();
    settle().await;

    assert!(shop.medium().is_empty());
    assert_eq!(notices.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Origin Scoping
// ============================================================================

#[tokio::test]
async fn envelopes_stamped_with_a_foreign_origin_are_dropped() {
    use till_sync::{Switchboard, SyncCoordinator, Transport};
    use till_vault::{ResilientStore, SharedMedium};

    // A misconfigured host: the switchboard belongs to some other shop,
    // so every envelope it delivers carries the wrong origin stamp.
    let config = SyncConfig {
        origin: "shop.example".into(),
        ..SyncConfig::default()
    };
    let medium = SharedMedium::new(&config.origin);
    let board = Switchboard::new("other-shop.example");

    let attachment = medium.attach("till-a");
    let store = ResilientStore::new_shared(Box::new(attachment.clone()));
    let (transport, receiver) = Transport::connect(&board, &store, &attachment, &config);
    let till_a = SyncCoordinator::start(store, transport, receiver, config.clone());

    let (peer, _rx) = board.join(&config.channel_name).unwrap();
    peer.send(&SyncMessage::TransactionStarted { id: 42 });
    settle().await;

    assert!(till_a.pending_ids().is_empty());
}
