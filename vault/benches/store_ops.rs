//! Performance benchmarks for till-vault

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use till_vault::{MemoryMedium, ResilientStore, SharedMedium};

fn bench_store_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_operations");

    // Benchmark a healthy write path
    group.bench_function("set_normal", |b| {
        let store = ResilientStore::new(Box::new(MemoryMedium::new()));
        let mut id = 0u64;
        b.iter(|| {
            id += 1;
            store.set(black_box(&format!("till_tx_{id}")), black_box("sealed"));
        })
    });

    // Benchmark the memory-fallback write path
    group.bench_function("set_air_gapped", |b| {
        let medium = SharedMedium::new("bench");
        medium.simulate_private_mode(true);
        let store = ResilientStore::new(Box::new(medium.attach("till")));
        let mut id = 0u64;
        b.iter(|| {
            id += 1;
            store.set(black_box(&format!("till_tx_{id}")), black_box("sealed"));
        })
    });

    // Benchmark reads against a populated store
    group.bench_function("get_normal", |b| {
        let store = ResilientStore::new(Box::new(MemoryMedium::new()));
        for id in 0..1000u64 {
            store.set(&format!("till_tx_{id}"), "sealed");
        }
        b.iter(|| store.get(black_box("till_tx_500")))
    });

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for listeners in [1usize, 10, 100].iter() {
        group.bench_with_input(
            BenchmarkId::new("set_with_listeners", listeners),
            listeners,
            |b, &listeners| {
                let store = ResilientStore::new(Box::new(MemoryMedium::new()));
                let subs: Vec<_> = (0..listeners)
                    .map(|_| store.subscribe(|event| {
                        black_box(&event.key);
                    }))
                    .collect();
                let mut id = 0u64;
                b.iter(|| {
                    id += 1;
                    store.set(black_box(&format!("till_tx_{id}")), black_box("sealed"));
                });
                drop(subs);
            },
        );
    }

    group.finish();
}

fn bench_prefix_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("prefix_scan");

    for size in [100usize, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("keys_with_prefix", size), size, |b, &size| {
            let store = ResilientStore::new(Box::new(MemoryMedium::new()));
            for id in 0..size {
                store.set(&format!("till_tx_{id}"), "sealed");
                store.set(&format!("other_{id}"), "noise");
            }
            b.iter(|| store.keys_with_prefix(black_box("till_tx_")))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_store_operations, bench_fan_out, bench_prefix_scan);
criterion_main!(benches);
