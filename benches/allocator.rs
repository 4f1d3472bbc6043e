//! Benchmarks for the resource pool and message decoding
//!
//! Target: allocate + release well under 1µs uncontended

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use facility_alloc::core::{Capacity, Request, ResourcePool};
use facility_alloc::protocol::Message;
use std::sync::Arc;
use std::thread;

fn bench_allocate_release(c: &mut Criterion) {
    let pool = ResourcePool::new(Capacity::new(380, 60));

    c.bench_function("allocate_release_exact", |b| {
        b.iter(|| {
            let outcome = pool.allocate(black_box(5), black_box(2));
            let _ = pool.release(black_box(&outcome));
        })
    });

    c.bench_function("allocate_release_conversion", |b| {
        b.iter(|| {
            let outcome = pool.allocate(black_box(5), black_box(80));
            let _ = pool.release(black_box(&outcome));
        })
    });

    c.bench_function("allocate_denied", |b| {
        b.iter(|| pool.allocate(black_box(1_000), black_box(1_000)))
    });
}

fn bench_contended(c: &mut Criterion) {
    let pool = Arc::new(ResourcePool::new(Capacity::new(380, 60)));

    c.bench_function("allocate_release_4_threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let pool = Arc::clone(&pool);
                    thread::spawn(move || {
                        for _ in 0..100 {
                            let outcome = pool.allocate(3, 1);
                            let _ = pool.release(&outcome);
                        }
                    })
                })
                .collect();
            for handle in handles {
                let _ = handle.join();
            }
        })
    });
}

fn bench_decode(c: &mut Criterion) {
    let request = Message::Request(Request::new("Ingenieria", "Sistemas", 1, 5, 2))
        .encode()
        .unwrap();

    c.bench_function("decode_request", |b| {
        b.iter(|| Message::decode(black_box(&request)))
    });

    c.bench_function("decode_heartbeat", |b| {
        b.iter(|| Message::decode(black_box("HEARTBEAT")))
    });
}

criterion_group!(benches, bench_allocate_release, bench_contended, bench_decode);
criterion_main!(benches);
