//! Benchmarks for the round cache

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use beacon_client::ArcCache;
use beacon_test::mock_beacon;

fn bench_cache_hit(c: &mut Criterion) {
    let cache = ArcCache::new(1024).unwrap();
    for round in 1..=1024 {
        cache.insert(round, mock_beacon(round));
    }

    c.bench_function("arc_cache_hit", |b| {
        b.iter(|| black_box(cache.get(black_box(&512))))
    });
}

fn bench_cache_miss(c: &mut Criterion) {
    let cache = ArcCache::new(1024).unwrap();
    for round in 1..=1024 {
        cache.insert(round, mock_beacon(round));
    }

    c.bench_function("arc_cache_miss", |b| {
        b.iter(|| black_box(cache.get(black_box(&4096))))
    });
}

fn bench_cache_insert_evict(c: &mut Criterion) {
    let cache = ArcCache::new(256).unwrap();
    let beacon = mock_beacon(1);
    let mut round = 0u64;

    c.bench_function("arc_cache_insert_evict", |b| {
        b.iter(|| {
            round += 1;
            cache.insert(black_box(round), beacon.clone());
        })
    });
}

criterion_group!(
    benches,
    bench_cache_hit,
    bench_cache_miss,
    bench_cache_insert_evict,
);
criterion_main!(benches);
