//! Storage engine throughput benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use emberkv::storage::Store;
use std::sync::Arc;
use std::time::Duration;

fn bench_set(c: &mut Criterion) {
    let store = Store::new();

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            store.set(
                Bytes::from(format!("key:{}", i)),
                Bytes::from_static(b"small_value"),
                None,
            );
            i += 1;
        });
    });

    group.bench_function("set_1k", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024));
        b.iter(|| {
            store.set(Bytes::from(format!("key:{}", i)), value.clone(), None);
            i += 1;
        });
    });

    group.bench_function("set_with_ttl", |b| {
        let mut i = 0u64;
        b.iter(|| {
            store.set(
                Bytes::from(format!("key:{}", i)),
                Bytes::from_static(b"value"),
                Some(Duration::from_secs(3600)),
            );
            i += 1;
        });
    });

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let store = Store::new();
    for i in 0..100_000 {
        store.set(
            Bytes::from(format!("key:{}", i)),
            Bytes::from(format!("value:{}", i)),
            None,
        );
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(store.get(key.as_bytes()));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(store.get(key.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

fn bench_hash_ops(c: &mut Criterion) {
    let store = Store::new();
    for i in 0..10_000 {
        store.hset(
            Bytes::from_static(b"bench"),
            vec![(
                Bytes::from(format!("field:{}", i)),
                Bytes::from(format!("value:{}", i)),
            )],
            None,
        );
    }

    let mut group = c.benchmark_group("hash");
    group.throughput(Throughput::Elements(1));

    group.bench_function("hset_overwrite", |b| {
        let mut i = 0u64;
        b.iter(|| {
            store.hset(
                Bytes::from_static(b"bench"),
                vec![(
                    Bytes::from(format!("field:{}", i % 10_000)),
                    Bytes::from_static(b"updated"),
                )],
                None,
            );
            i += 1;
        });
    });

    group.bench_function("hget_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let field = format!("field:{}", i % 10_000);
            black_box(store.hget(b"bench", field.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

fn bench_mixed(c: &mut Criterion) {
    let store = Store::new();
    for i in 0..10_000 {
        store.set(
            Bytes::from(format!("key:{}", i)),
            Bytes::from(format!("value:{}", i)),
            None,
        );
    }

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            if i % 5 == 0 {
                store.set(
                    Bytes::from(format!("new:{}", i)),
                    Bytes::from_static(b"value"),
                    None,
                );
            } else {
                let key = format!("key:{}", i % 10_000);
                black_box(store.get(key.as_bytes()));
            }
            i += 1;
        });
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let store = Arc::new(Store::new());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = Bytes::from(format!("key:{}:{}", t, i));
                            store.set(key.clone(), Bytes::from_static(b"value"), None);
                            store.get(&key);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(store.len());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_hash_ops,
    bench_mixed,
    bench_concurrent,
);

criterion_main!(benches);
