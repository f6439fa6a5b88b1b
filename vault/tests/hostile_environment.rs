//! Hostile-environment tests for till-vault
//!
//! These tests drive the store through the failure sequences a real
//! storefront produces: quotas tripping mid-shift, restricted contexts,
//! and terminals observing each other through the shared medium.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use till_vault::{
    AlertTrigger, ChangeEvent, Origin, ResilientStore, SharedMedium, StorageMode,
};

fn event_sink(store: &ResilientStore) -> (till_vault::Subscription, Arc<Mutex<Vec<ChangeEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sub = store.subscribe(move |event| {
        sink.lock().unwrap().push(event.clone());
    });
    (sub, seen)
}

// ============================================================================
// Quota Exhaustion Mid-Shift
// ============================================================================

#[test]
fn quota_exhaustion_mid_shift_keeps_selling() {
    let medium = SharedMedium::new("shop.example");
    let store = ResilientStore::new(Box::new(medium.attach("till-1")));

    let alerts = Arc::new(AtomicUsize::new(0));
    let alert_count = Arc::clone(&alerts);
    let _alert_sub = store.on_air_gap(move |alert| {
        assert_eq!(alert.trigger, AlertTrigger::Write);
        alert_count.fetch_add(1, Ordering::SeqCst);
    });

    // A healthy morning: three sales land on disk.
    for n in 1..=3u32 {
        store.set(&format!("till_tx_{n}"), "sealed");
    }
    assert_eq!(medium.len(), 3);

    // The disk fills up. Selling continues without a single error.
    medium.fail_writes_after(0);
    for n in 4..=6u32 {
        store.set(&format!("till_tx_{n}"), "sealed");
    }

    assert_eq!(store.mode(), StorageMode::AirGapped);
    assert_eq!(alerts.load(Ordering::SeqCst), 1);

    // Post-flip writes are served from memory; pre-flip writes stay on disk
    // but are no longer visible through the store.
    for n in 4..=6u32 {
        assert_eq!(store.get(&format!("till_tx_{n}")).as_deref(), Some("sealed"));
    }
    assert_eq!(medium.len(), 3);
    assert_eq!(store.stats().memory_item_count, 3);

    // Lifting the quota afterwards changes nothing: the flip is one-way.
    medium.lift_write_limit();
    store.set("till_tx_7", "sealed");
    assert_eq!(store.mode(), StorageMode::AirGapped);
    assert_eq!(medium.len(), 3);
}

// ============================================================================
// Restricted Context at Boot
// ============================================================================

#[test]
fn restricted_context_boots_straight_into_air_gap() {
    let medium = SharedMedium::new("shop.example");
    medium.simulate_private_mode(true);

    let store = ResilientStore::new(Box::new(medium.attach("till-1")));
    assert_eq!(store.mode(), StorageMode::AirGapped);

    let (_sub, seen) = event_sink(&store);
    store.set("till_tx_1", "sealed");
    store.remove("till_tx_1");
    store.set("till_tx_2", "sealed");

    assert_eq!(store.get("till_tx_2").as_deref(), Some("sealed"));
    assert_eq!(store.get("till_tx_1"), None);
    assert!(medium.is_empty());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|event| event.air_gapped));

    let stats = store.stats();
    assert_eq!(stats.mode, StorageMode::AirGapped);
    assert_eq!(stats.memory_item_count, 1);
}

// ============================================================================
// Two Terminals on One Medium
// ============================================================================

#[test]
fn second_terminal_observes_remote_mutations() {
    let medium = SharedMedium::new("shop.example");

    let till_a = ResilientStore::new(Box::new(medium.attach("till-a")));
    let till_b = ResilientStore::new_shared(Box::new(medium.attach("till-b")));

    // Wire terminal B the way an embedder would: medium-level notifications
    // republished through B's own store.
    let attachment_b = medium.attach("till-b-watch");
    let till_b_events = Arc::clone(&till_b);
    let _watch = attachment_b.on_remote_change(move |change| {
        till_b_events.publish_remote(&change.key, change.new_value.clone());
    });

    let (_sub, seen_b) = event_sink(&till_b);

    till_a.set("till_tx_9", "sealed");
    till_a.remove("till_tx_9");

    let seen = seen_b.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].origin, Origin::Remote);
    assert_eq!(seen[0].new_value.as_deref(), Some("sealed"));
    assert_eq!(seen[1].new_value, None);
}

#[test]
fn air_gapped_terminal_is_invisible_to_peers() {
    let medium = SharedMedium::new("shop.example");

    let till_a = ResilientStore::new(Box::new(medium.attach("till-a")));
    let observer = medium.attach("till-b");
    let observed = Arc::new(AtomicUsize::new(0));
    let observed_count = Arc::clone(&observed);
    let _watch = observer.on_remote_change(move |_| {
        observed_count.fetch_add(1, Ordering::SeqCst);
    });

    till_a.set("till_tx_1", "sealed");
    assert_eq!(observed.load(Ordering::SeqCst), 1);

    // Once A is air-gapped its writes stay process-local: peers see nothing.
    medium.fail_writes_after(0);
    till_a.set("till_tx_2", "sealed");
    till_a.set("till_tx_3", "sealed");

    assert_eq!(till_a.mode(), StorageMode::AirGapped);
    assert_eq!(observed.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Property Tests
// ============================================================================

mod property_tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum HostileOp {
        Set(usize, String),
        Remove(usize),
        TripQuota,
        EnterPrivateMode,
        LiftQuota,
    }

    fn arb_op() -> impl Strategy<Value = HostileOp> {
        prop_oneof![
            4 => (0usize..5, "[a-z]{0,8}").prop_map(|(k, v)| HostileOp::Set(k, v)),
            2 => (0usize..5).prop_map(HostileOp::Remove),
            1 => Just(HostileOp::TripQuota),
            1 => Just(HostileOp::EnterPrivateMode),
            1 => Just(HostileOp::LiftQuota),
        ]
    }

    proptest! {
        #[test]
        fn degradation_is_one_way_and_writes_always_read_back(
            ops in proptest::collection::vec(arb_op(), 1..40)
        ) {
            let medium = SharedMedium::new("shop.example");
            let store = ResilientStore::new(Box::new(medium.attach("till-1")));

            let alerts = Arc::new(AtomicUsize::new(0));
            let alert_count = Arc::clone(&alerts);
            let _alert_sub = store.on_air_gap(move |_| {
                alert_count.fetch_add(1, Ordering::SeqCst);
            });
            let events = Arc::new(AtomicUsize::new(0));
            let event_count = Arc::clone(&events);
            let _event_sub = store.subscribe(move |_| {
                event_count.fetch_add(1, Ordering::SeqCst);
            });

            let mut mutations = 0usize;
            let mut was_air_gapped = false;

            for op in ops {
                match op {
                    HostileOp::Set(k, v) => {
                        let key = format!("k{k}");
                        store.set(&key, &v);
                        mutations += 1;
                        // A write is always immediately readable, whatever
                        // medium it landed in.
                        prop_assert_eq!(store.get(&key), Some(v));
                    }
                    HostileOp::Remove(k) => {
                        let key = format!("k{k}");
                        store.remove(&key);
                        mutations += 1;
                        prop_assert_eq!(store.get(&key), None);
                    }
                    HostileOp::TripQuota => medium.fail_writes_after(0),
                    HostileOp::EnterPrivateMode => medium.simulate_private_mode(true),
                    HostileOp::LiftQuota => medium.lift_write_limit(),
                }

                let air_gapped = store.mode() == StorageMode::AirGapped;
                prop_assert!(!(was_air_gapped && !air_gapped), "mode recovered");
                was_air_gapped = air_gapped;
            }

            // Exactly one event per mutation, at most one alert ever.
            prop_assert_eq!(events.load(Ordering::SeqCst), mutations);
            prop_assert!(alerts.load(Ordering::SeqCst) <= 1);
        }
    }
}
