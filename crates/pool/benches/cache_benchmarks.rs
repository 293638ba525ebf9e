use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use docindex_pool::KeyedResourceCache;
use std::sync::Arc;

/// Stand-in for an expensive client handle.
struct Handle {
    _path: String,
}

fn build(key: &str) -> docindex_core::CoreResult<Arc<Handle>> {
    Ok(Arc::new(Handle {
        _path: key.to_string(),
    }))
}

fn bench_cache_hits(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_hits");

    for capacity in [1usize, 3, 16, 64] {
        let cache = KeyedResourceCache::<Handle>::new("bench", capacity);
        let keys: Vec<String> = (0..capacity).map(|i| format!("/data/index-{i}")).collect();
        for key in &keys {
            cache.get(key, || build(key)).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(capacity), &keys, |b, keys| {
            let mut i = 0;
            b.iter(|| {
                let key = &keys[i % keys.len()];
                i += 1;
                black_box(cache.get(key, || build(key)).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_cache_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_churn");

    // every lookup misses and evicts
    for capacity in [3usize, 16, 64] {
        let cache = KeyedResourceCache::<Handle>::new("bench", capacity);
        let keys: Vec<String> = (0..capacity * 2).map(|i| format!("/data/index-{i}")).collect();

        group.bench_with_input(BenchmarkId::from_parameter(capacity), &keys, |b, keys| {
            let mut i = 0;
            b.iter(|| {
                let key = &keys[i % keys.len()];
                i += 1;
                black_box(cache.get(key, || build(key)).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cache_hits, bench_cache_churn);
criterion_main!(benches);
