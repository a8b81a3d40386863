//! Durable log benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use raftwal_core::{ConfState, DurableLog, Entry, HardState, Snapshot};
use rand::Rng;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Generate random data of the specified size.
fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

fn open_log() -> (TempDir, DurableLog) {
    let dir = TempDir::new().unwrap();
    let log = DurableLog::open(dir.path()).unwrap();
    (dir, log)
}

/// Open a log holding `count` entries of `size` bytes.
fn populated_log(count: u64, size: usize) -> (TempDir, DurableLog) {
    let (dir, log) = open_log();
    let data = random_data(size);
    for start in (1..=count).step_by(1000) {
        let end = (start + 1000).min(count + 1);
        let batch: Vec<Entry> = (start..end).map(|i| Entry::new(1, i, data.clone())).collect();
        log.append(&batch).unwrap();
    }
    (dir, log)
}

/// Benchmark appending one entry at a time.
fn bench_single_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_append");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let data = random_data(size);

            b.iter_custom(|iters| {
                let (_dir, log) = open_log();
                let start = Instant::now();
                for index in 1..=iters {
                    log.append(&[Entry::new(1, index, black_box(data.clone()))])
                        .unwrap();
                }
                start.elapsed()
            });
        });
    }
    group.finish();
}

/// Benchmark a full save round: batch, hard state, optional sync.
fn bench_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("save");
    group.sample_size(20);

    for (name, sync) in [("batch_100", false), ("batch_100_sync", true)] {
        group.throughput(Throughput::Elements(100));
        group.bench_function(name, |b| {
            let data = random_data(256);

            b.iter_custom(|iters| {
                let (_dir, log) = open_log();
                let start = Instant::now();
                for round in 0..iters {
                    let first = round * 100 + 1;
                    let batch: Vec<Entry> = (first..first + 100)
                        .map(|i| Entry::new(1, i, data.clone()))
                        .collect();
                    log.save(
                        &HardState::new(1, 1, first + 99),
                        black_box(&batch),
                        &Snapshot::default(),
                    )
                    .unwrap();
                    if sync {
                        log.sync().unwrap();
                    }
                }
                start.elapsed()
            });
        });
    }
    group.finish();
}

/// Benchmark random single-entry reads from a populated log.
fn bench_random_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_read");

    for count in [1_000u64, 10_000, 50_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let (_dir, log) = populated_log(count, 256);
            let mut rng = rand::thread_rng();

            b.iter(|| {
                let index = rng.gen_range(1..=count);
                let result = log.entries(black_box(index), index + 1, None).unwrap();
                black_box(result);
            });
        });
    }
    group.finish();
}

/// Benchmark range reads, with and without a byte budget.
fn bench_range_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_read");
    let (_dir, log) = populated_log(40_000, 256);

    for len in [10u64, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*len));
        group.bench_with_input(BenchmarkId::new("unbounded", len), len, |b, &len| {
            // Crosses the segment boundary at 30000.
            let lo = 30_000 - len / 2;
            b.iter(|| {
                let result = log.entries(black_box(lo), lo + len, None).unwrap();
                black_box(result);
            });
        });
    }

    group.bench_function("max_size_64k", |b| {
        b.iter(|| {
            let result = log.entries(black_box(1), 40_001, Some(64 * 1024)).unwrap();
            black_box(result);
        });
    });

    group.bench_function("term", |b| {
        let mut rng = rand::thread_rng();
        b.iter(|| {
            let index = rng.gen_range(1..=40_000u64);
            black_box(log.term(black_box(index)).unwrap());
        });
    });

    group.finish();
}

/// Benchmark taking a snapshot that compacts a full segment.
fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    group.sample_size(10);

    for size in [1024usize, 64 * 1024, 1024 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("create", size), size, |b, &size| {
            let data = random_data(size);

            b.iter_custom(|iters| {
                let mut total = Duration::ZERO;
                for _ in 0..iters {
                    let (_dir, log) = populated_log(31_000, 16);
                    let start = Instant::now();
                    let snapshot = log
                        .create_snapshot(30_500, ConfState::with_voters([1, 2, 3]), data.clone())
                        .unwrap();
                    total += start.elapsed();
                    black_box(snapshot);
                }
                total
            });
        });
    }

    group.bench_function("read_1mb", |b| {
        let (_dir, log) = populated_log(10, 16);
        log.create_snapshot(5, ConfState::with_voters([1]), random_data(1024 * 1024))
            .unwrap();
        b.iter(|| {
            black_box(log.snapshot().unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_append,
    bench_save,
    bench_random_read,
    bench_range_read,
    bench_snapshot,
);

criterion_main!(benches);
