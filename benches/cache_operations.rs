//! Benchmarks for the Local cache backend's get/set path.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ea_core::cache::local::{LocalCache, LocalCacheConfig};
use ea_core::cache::{CacheBackend, CacheEntry};
use serde_json::json;
use std::time::Duration;
use tokio::runtime::Runtime;

fn entry(size_bytes: usize) -> CacheEntry {
    CacheEntry {
        value: json!({"data": "x".repeat(size_bytes)}),
        status_code: 200,
        written_at: ea_core::time::now_ms(),
        provider_indicated_time: None,
        max_age_ms: 60_000,
    }
}

fn bench_cache_set(c: &mut Criterion) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("failed to create runtime"));
    let cache = LocalCache::new(LocalCacheConfig { max_capacity: 100_000 });

    let mut group = c.benchmark_group("cache_set");
    for size in &[100, 1024, 10_240] {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let key = format!("bench:set:{}", rand::random::<u32>());
                    cache
                        .set(&key, black_box(entry(size)), Duration::from_secs(60))
                        .await
                        .unwrap_or_else(|_| panic!("failed to set cache"));
                });
            });
        });
    }
    group.finish();
}

fn bench_cache_hit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("failed to create runtime"));
    let cache = LocalCache::new(LocalCacheConfig { max_capacity: 100_000 });

    rt.block_on(async {
        for i in 0..100 {
            let key = format!("bench:hit:{i}");
            cache.set(&key, entry(1024), Duration::from_secs(60)).await.unwrap();
        }
    });

    c.bench_function("cache_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:hit:{}", rand::random::<u8>() % 100);
                black_box(cache.get(&key).await.unwrap_or_else(|_| panic!("failed to get cache")));
            });
        });
    });
}

fn bench_cache_miss(c: &mut Criterion) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("failed to create runtime"));
    let cache = LocalCache::new(LocalCacheConfig { max_capacity: 100_000 });

    c.bench_function("cache_miss", |b| {
        b.iter(|| {
            rt.block_on(async {
                let key = format!("bench:miss:{}", rand::random::<u32>());
                black_box(cache.get(&key).await.unwrap_or_else(|_| panic!("failed to get cache")));
            });
        });
    });
}

criterion_group!(benches, bench_cache_set, bench_cache_hit, bench_cache_miss);
criterion_main!(benches);
