//! Throughput benchmarks: fresco vs Moka vs QuickCache.
//!
//! The workloads are pixmap-shaped: every value is a 16×16 RGBA image
//! (1 KB of pixels behind a shared allocation), and fresco's capacity is
//! expressed in KB so one unit of capacity holds one benchmark image in
//! every cache. Moka and QuickCache are entry-count-bounded general caches;
//! the comparison is indicative, not apples-to-apples — neither tracks key
//! leases nor runs idle decay.
//!
//! Run with:
//!     cargo bench --bench throughput

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use fresco::{CacheBuilder, Pixmap, PixmapCache};
use moka::sync::Cache as MokaCache;
use quick_cache::sync::Cache as QuickCache;

/// Number of entries each cache is pre-filled with and its logical capacity.
const CAP: u64 = 10_000;

/// Operations executed per criterion iteration (hot-loop size).
const OPS: u64 = 1_000;

#[derive(Clone)]
struct Px {
    width: u32,
    height: u32,
    data: Arc<Vec<u8>>,
}

impl Px {
    fn unit(seed: u8) -> Self {
        Px {
            width: 16,
            height: 16,
            data: Arc::new(vec![seed; 16 * 16 * 4]),
        }
    }
}

impl Pixmap for Px {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn depth(&self) -> u32 {
        32
    }
}

fn name(i: u64) -> String {
    format!("px-{i}")
}

// ---------------------------------------------------------------------------
// Group 1: find_hit
// ---------------------------------------------------------------------------
// All keys are present → measures pure read throughput with no eviction.

fn bench_find_hit(c: &mut Criterion) {
    let fresco: PixmapCache<Px> = CacheBuilder::new().cache_limit_kb(CAP).build();
    for i in 0..CAP {
        fresco.insert(&name(i), Px::unit(i as u8));
    }

    let moka: MokaCache<String, Px> = MokaCache::new(CAP);
    for i in 0..CAP {
        moka.insert(name(i), Px::unit(i as u8));
    }

    let qc: QuickCache<String, Px> = QuickCache::new(CAP as usize);
    for i in 0..CAP {
        qc.insert(name(i), Px::unit(i as u8));
    }

    let mut group = c.benchmark_group("find_hit");
    group.throughput(Throughput::Elements(OPS));

    group.bench_function("fresco", |b| {
        b.iter(|| {
            for i in 0..OPS {
                black_box(fresco.find(black_box(&name(i))));
            }
        })
    });

    group.bench_function("moka", |b| {
        b.iter(|| {
            for i in 0..OPS {
                black_box(moka.get(black_box(&name(i))));
            }
        })
    });

    group.bench_function("quick_cache", |b| {
        b.iter(|| {
            for i in 0..OPS {
                black_box(qc.get(black_box(&name(i))));
            }
        })
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Group 2: find_hit_keyed
// ---------------------------------------------------------------------------
// fresco-only: the lease API exists precisely to skip string hashing on
// repeated lookups, so measure what the indirection buys.

fn bench_find_hit_keyed(c: &mut Criterion) {
    let fresco: PixmapCache<Px> = CacheBuilder::new().cache_limit_kb(CAP).build();
    let keys: Vec<fresco::Key> = (0..OPS).map(|i| fresco.insert_keyed(Px::unit(i as u8))).collect();

    let mut group = c.benchmark_group("find_hit_keyed");
    group.throughput(Throughput::Elements(OPS));

    group.bench_function("fresco", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(fresco.find_keyed(black_box(key)));
            }
        })
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Group 3: insert_evicting
// ---------------------------------------------------------------------------
// Sequential inserts of always-new names — the cache must evict on every
// insert once warm.

fn bench_insert_evicting(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_evicting");
    group.throughput(Throughput::Elements(OPS));

    group.bench_function("fresco", |b| {
        let cache: PixmapCache<Px> = CacheBuilder::new().cache_limit_kb(CAP).build();
        let mut next = 0u64;
        b.iter(|| {
            for _ in 0..OPS {
                cache.insert(&name(next), Px::unit(next as u8));
                next += 1;
            }
        })
    });

    group.bench_function("moka", |b| {
        let cache: MokaCache<String, Px> = MokaCache::new(CAP);
        let mut next = 0u64;
        b.iter(|| {
            for _ in 0..OPS {
                cache.insert(name(next), Px::unit(next as u8));
                next += 1;
            }
        })
    });

    group.bench_function("quick_cache", |b| {
        let cache: QuickCache<String, Px> = QuickCache::new(CAP as usize);
        let mut next = 0u64;
        b.iter(|| {
            for _ in 0..OPS {
                cache.insert(name(next), Px::unit(next as u8));
                next += 1;
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_find_hit,
    bench_find_hit_keyed,
    bench_insert_evicting
);
criterion_main!(benches);
