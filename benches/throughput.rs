//! Throughput Benchmark for kvttl
//!
//! Measures the cost the expiry layer adds on top of a plain store: writes
//! with and without a TTL, re-arming, and sweeping a backlog of expired keys.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use kvttl::store::{BatchOp, MemoryStore, OrderedStore};
use kvttl::ttl::{TtlDb, TtlOptions, WriteOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Opens a database whose background sweeper never fires during a run.
fn open(rt: &Runtime) -> (Arc<MemoryStore>, TtlDb) {
    let store = Arc::new(MemoryStore::new());
    let db = rt
        .block_on(async {
            TtlDb::new(
                store.clone(),
                TtlOptions::default().with_check_frequency(Duration::from_secs(3600)),
            )
        })
        .unwrap();
    (store, db)
}

/// Benchmark plain store writes against writes through the expiry layer
fn bench_put(c: &mut Criterion) {
    let rt = runtime();

    let mut group = c.benchmark_group("put");
    group.throughput(Throughput::Elements(1));

    group.bench_function("store_direct", |b| {
        let store = MemoryStore::new();
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            rt.block_on(store.put(key, Bytes::from("value"))).unwrap();
            i += 1;
        });
    });

    group.bench_function("no_ttl", |b| {
        let (_store, db) = open(&rt);
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            rt.block_on(db.put(key, Bytes::from("value"), WriteOptions::default()))
                .unwrap();
            i += 1;
        });
    });

    group.bench_function("with_ttl", |b| {
        let (_store, db) = open(&rt);
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            rt.block_on(db.put(
                key,
                Bytes::from("value"),
                WriteOptions::ttl(Duration::from_secs(3600)),
            ))
            .unwrap();
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark re-arming keys that already carry an expiry
fn bench_rearm(c: &mut Criterion) {
    let rt = runtime();
    let (_store, db) = open(&rt);

    rt.block_on(async {
        for i in 0..10_000 {
            let key = Bytes::from(format!("rearm:{}", i));
            db.put(
                key,
                Bytes::from("value"),
                WriteOptions::ttl(Duration::from_secs(3600)),
            )
            .await
            .unwrap();
        }
    });

    let mut group = c.benchmark_group("rearm");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_ttl_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("rearm:{}", i % 10_000));
            rt.block_on(db.set_ttl(key, Duration::from_secs(3600)))
                .unwrap();
            i += 1;
        });
    });

    // Single key (high contention on one lock)
    group.bench_function("set_ttl_single_key", |b| {
        let key = Bytes::from("rearm:0");
        b.iter(|| {
            rt.block_on(db.set_ttl(key.clone(), Duration::from_secs(3600)))
                .unwrap();
        });
    });

    group.finish();
}

/// Benchmark batch writes with a TTL
fn bench_batch(c: &mut Criterion) {
    let rt = runtime();
    let (_store, db) = open(&rt);

    let mut group = c.benchmark_group("batch");
    group.throughput(Throughput::Elements(100));

    group.bench_function("100_puts_with_ttl", |b| {
        let mut round = 0u64;
        b.iter(|| {
            let ops = (0..100)
                .map(|i| {
                    BatchOp::put(
                        Bytes::from(format!("batch:{}:{}", round, i)),
                        Bytes::from("value"),
                    )
                })
                .collect();
            rt.block_on(db.batch(ops, WriteOptions::ttl(Duration::from_secs(3600))))
                .unwrap();
            round += 1;
        });
    });

    group.finish();
}

/// Benchmark sweeping a backlog of expired keys
fn bench_sweep(c: &mut Criterion) {
    let rt = runtime();

    let mut group = c.benchmark_group("sweep");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);
    group.throughput(Throughput::Elements(1_000));

    group.bench_function("1000_expired", |b| {
        b.iter_batched(
            || {
                let (store, db) = open(&rt);
                rt.block_on(async {
                    for i in 0..1_000 {
                        let key = Bytes::from(format!("sweep:{}", i));
                        db.put(
                            key,
                            Bytes::from("value"),
                            WriteOptions::ttl(Duration::from_millis(1)),
                        )
                        .await
                        .unwrap();
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                });
                (store, db)
            },
            |(store, db)| {
                black_box(rt.block_on(db.sweep()).unwrap());
                black_box(store.len());
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_put, bench_rearm, bench_batch, bench_sweep);

criterion_main!(benches);
