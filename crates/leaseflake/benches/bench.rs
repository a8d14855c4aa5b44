use core::{hint::black_box, time::Duration};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use leaseflake::{BitLayout, DEFAULT_EPOCH, Encoder, Generator, MemoryStore, MonotonicClock};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};
use tokio::runtime::Builder;

// Number of IDs generated per benchmark iteration (per-thread for
// multi-threaded).
const TOTAL_IDS: usize = 4096;

const TIME_UNIT: Duration = Duration::from_millis(10);

fn encoder(machine_id: u64) -> Encoder<MonotonicClock> {
    Encoder::new(
        machine_id,
        DEFAULT_EPOCH,
        TIME_UNIT,
        BitLayout::default(),
        MonotonicClock::new(),
    )
    .unwrap()
}

/// Benchmarks a single thread minting IDs. With 256 IDs per 10ms unit this
/// mostly measures how long the encoder waits for the next unit.
fn benchmark_sequential_encoder(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoder/sequential");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let encoder = encoder(1);
                for _ in 0..TOTAL_IDS {
                    black_box(encoder.next_id().unwrap());
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmarks a 1ms unit, where the per-unit sequence is rarely exhausted.
fn benchmark_sequential_encoder_fine_unit(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoder/sequential_1ms");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let encoder = Encoder::new(
                    1,
                    DEFAULT_EPOCH,
                    Duration::from_millis(1),
                    BitLayout::new(12, 10).unwrap(),
                    MonotonicClock::new(),
                )
                .unwrap();
                for _ in 0..TOTAL_IDS {
                    black_box(encoder.next_id().unwrap());
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmarks threads contending on one shared encoder.
fn benchmark_contended_encoder(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoder/contended");

    for threads in [2, 4, 8] {
        let total = TOTAL_IDS * threads;
        group.throughput(Throughput::Elements(total as u64));
        group.bench_function(format!("threads/{threads}/elems/{total}"), |b| {
            b.iter_custom(|iters| {
                let mut elapsed = Duration::ZERO;
                for _ in 0..iters {
                    let encoder = Arc::new(encoder(1));
                    let barrier = Arc::new(Barrier::new(threads + 1));

                    let start = scope(|s| {
                        for _ in 0..threads {
                            let encoder = Arc::clone(&encoder);
                            let barrier = Arc::clone(&barrier);
                            s.spawn(move || {
                                barrier.wait();
                                for _ in 0..TOTAL_IDS {
                                    black_box(encoder.next_id().unwrap());
                                }
                            });
                        }
                        barrier.wait();
                        Instant::now()
                    });
                    elapsed += start.elapsed();
                }
                elapsed
            });
        });
    }

    group.finish();
}

/// Benchmarks the leased generator, whose renewal task runs alongside.
fn benchmark_leased_generator(c: &mut Criterion) {
    let runtime = Builder::new_multi_thread()
        .worker_threads(num_cpus::get().min(4))
        .enable_all()
        .build()
        .unwrap();
    let store = MemoryStore::new();
    let generator = runtime
        .block_on(Generator::new(store.repo()))
        .unwrap();

    let mut group = c.benchmark_group("generator/leased");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));
    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter(|| {
            for _ in 0..TOTAL_IDS {
                black_box(generator.next_id().unwrap());
            }
        });
    });
    group.finish();

    runtime.block_on(generator.stop()).unwrap();
}

criterion_group!(
    benches,
    benchmark_sequential_encoder,
    benchmark_sequential_encoder_fine_unit,
    benchmark_contended_encoder,
    benchmark_leased_generator,
);
criterion_main!(benches);
