// Benchmarks for lock engine throughput against the in-process store
// Measures uncontended acquire/release cycles and state queries

use std::sync::Arc;
use std::time::Duration;

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use locket_core::LockClient;
use locket_store::MemoryStore;

fn client() -> LockClient {
    let store = MemoryStore::new();
    LockClient::new(Arc::new(store.clone()), Arc::new(store))
}

fn bench_acquire_release_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let client = client();
    let lock = client.mutex("bench/mutex");

    c.bench_function("mutex_acquire_release", |b| {
        b.to_async(&rt).iter(|| async {
            lock.acquire_with_lease(Duration::from_secs(30)).await.unwrap();
            lock.release().await.unwrap();
        })
    });
}

fn bench_reentrant_depth(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let client = client();
    let mut group = c.benchmark_group("mutex_reentrant");

    for depth in [1u32, 4, 16] {
        let lock = client.mutex("bench/reentrant");
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.to_async(&rt).iter(|| async {
                for _ in 0..depth {
                    lock.acquire_with_lease(Duration::from_secs(30)).await.unwrap();
                }
                for _ in 0..depth {
                    lock.release().await.unwrap();
                }
            })
        });
    }
    group.finish();
}

fn bench_read_lock_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let client = client();
    let read = client.read_write("bench/rw").read();

    c.bench_function("read_acquire_release", |b| {
        b.to_async(&rt).iter(|| async {
            read.acquire_with_lease(Duration::from_secs(30)).await.unwrap();
            read.release().await.unwrap();
        })
    });
}

fn bench_is_locked(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let client = client();
    let lock = client.mutex("bench/state");
    rt.block_on(async {
        lock.acquire_with_lease(Duration::from_secs(300)).await.unwrap();
    });

    c.bench_function("is_locked", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(lock.is_locked().await.unwrap()) })
    });
}

criterion_group!(
    benches,
    bench_acquire_release_cycle,
    bench_reentrant_depth,
    bench_read_lock_cycle,
    bench_is_locked
);
criterion_main!(benches);
