//! Performance benchmarks for confcenter.
//!
//! These benchmarks cover the read path consumers hit on every lookup:
//! - Typed key lookup against a parsed snapshot
//! - First lookup after a replace (parse cost)
//! - Concurrent readers while content is being replaced
//! - Registry lookups of an already-built document

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use confcenter::prelude::*;
use confcenter::store::{MemoryStore, publish};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn sample_content(entries: usize) -> Vec<u8> {
    let mut text = String::from("# generated\n");
    for i in 0..entries {
        text.push_str(&format!("key.{i} = {i}\n"));
    }
    text.into_bytes()
}

/// Benchmark single-threaded typed lookups
fn benchmark_read_latency(c: &mut Criterion) {
    let doc = Document::with_content("bench.ini", sample_content(100));
    doc.get_int("key.0", 0);

    let mut group = c.benchmark_group("read_latency");
    group.bench_function("get_int", |b| {
        b.iter(|| black_box(doc.get_int(black_box("key.50"), 0)));
    });
    group.bench_function("get_missing", |b| {
        b.iter(|| black_box(doc.get_int(black_box("missing"), 7)));
    });
    group.bench_function("snapshot", |b| {
        b.iter(|| black_box(doc.snapshot()));
    });
    group.finish();
}

/// Benchmark the lazy parse triggered by the first lookup after a replace
fn benchmark_parse_after_replace(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_after_replace");
    for entries in [10, 100, 1000] {
        let content = sample_content(entries);
        group.throughput(Throughput::Elements(entries as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &content, |b, content| {
            let doc = Document::new("bench.ini");
            b.iter(|| {
                doc.replace(content.clone());
                black_box(doc.get_int("key.0", 0));
            });
        });
    }
    group.finish();
}

/// Benchmark concurrent reads with varying thread counts
fn benchmark_concurrent_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_reads");

    for num_threads in [1, 2, 4, 8, 16] {
        group.throughput(Throughput::Elements(num_threads as u64 * 1000));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_threads", num_threads)),
            &num_threads,
            |b, &num_threads| {
                let doc = Arc::new(Document::with_content("bench.ini", sample_content(100)));
                let barrier = Arc::new(Barrier::new(num_threads + 1));

                b.iter_custom(|iters| {
                    let mut handles = vec![];
                    let start_barrier = Arc::clone(&barrier);

                    for _ in 0..num_threads {
                        let doc = Arc::clone(&doc);
                        let b = Arc::clone(&barrier);

                        let handle = thread::spawn(move || {
                            // Wait for all threads to be ready
                            b.wait();

                            let start = std::time::Instant::now();
                            for _ in 0..iters {
                                black_box(doc.get_int("key.50", 0));
                            }
                            start.elapsed()
                        });

                        handles.push(handle);
                    }

                    start_barrier.wait();

                    let total_duration: Duration =
                        handles.into_iter().map(|h| h.join().unwrap()).sum();

                    // Return average duration across threads
                    total_duration / num_threads as u32
                });
            },
        );
    }

    group.finish();
}

/// Benchmark offers under load: readers never block while content is replaced
fn benchmark_offer_under_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("offer_under_load");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("offer_with_8_readers", |b| {
        b.iter_custom(|iters| {
            let doc = Arc::new(Document::with_content("bench.ini", sample_content(100)));
            let keep_running = Arc::new(AtomicBool::new(true));
            let reads_completed = Arc::new(AtomicUsize::new(0));

            let readers: Vec<_> = (0..8)
                .map(|_| {
                    let doc = Arc::clone(&doc);
                    let running = Arc::clone(&keep_running);
                    let counter = Arc::clone(&reads_completed);
                    thread::spawn(move || {
                        while running.load(Ordering::Relaxed) {
                            black_box(doc.get_int("key.50", 0));
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                    })
                })
                .collect();

            let start = std::time::Instant::now();
            for i in 0..iters {
                doc.offer(format!("key.50 = {i}\n").into_bytes());
            }
            let duration = start.elapsed();

            keep_running.store(false, Ordering::Relaxed);
            for reader in readers {
                reader.join().unwrap();
            }

            let total_reads = reads_completed.load(Ordering::Relaxed);
            println!("  Completed {} reads during {} offers", total_reads, iters);

            duration
        });
    });

    group.finish();
}

/// Benchmark registry lookups of built documents
fn benchmark_registry_lookup(c: &mut Criterion) {
    let store = Arc::new(MemoryStore::new());
    publish(store.as_ref(), "/cms/config/a.ini", "test", b"a=1").unwrap();
    publish(store.as_ref(), "/cms/config/b.ini", "test", b"b=1").unwrap();
    let registry = ConfigRegistry::builder().with_store(store).build().unwrap();
    registry.get_config("a.ini");
    registry.get_config("a.ini,b.ini");

    let mut group = c.benchmark_group("registry_lookup");
    group.bench_function("single", |b| {
        b.iter(|| black_box(registry.get_config(black_box("a.ini"))));
    });
    group.bench_function("composite", |b| {
        b.iter(|| black_box(registry.get_config(black_box("a.ini,b.ini"))));
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_read_latency,
    benchmark_parse_after_replace,
    benchmark_concurrent_reads,
    benchmark_offer_under_load,
    benchmark_registry_lookup,
);
criterion_main!(benches);
