//! Scheduling throughput benchmarks.
//!
//! Measures fan-out throughput and fork/join latency under imbalanced
//! workloads, where work stealing has to rebalance heavy jobs.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use framejob::{JobSystem, JobSystemConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn fibonacci(n: u64) -> u64 {
    let mut a = 0u64;
    let mut b = 1u64;
    for _ in 0..n {
        let next = a.wrapping_add(b);
        a = b;
        b = next;
    }
    a
}

fn bench_fan_out(c: &mut Criterion) {
    let system = JobSystem::with_config(JobSystemConfig {
        worker_count: Some(num_cpus::get()),
        ..JobSystemConfig::default()
    });

    let mut group = c.benchmark_group("scheduling");
    group.sample_size(10);

    for total_jobs in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(total_jobs as u64));

        group.bench_function(BenchmarkId::new("imbalanced_fan_out", total_jobs), |b| {
            b.iter(|| {
                let completed = Arc::new(AtomicUsize::new(0));
                let comp = Arc::clone(&completed);

                let root = system
                    .spawn(move |ctx| {
                        let mut i = 0usize;
                        while i < total_jobs {
                            let comp = Arc::clone(&comp);
                            let spawned = ctx.spawn_child(move |_| {
                                // Imbalanced: every 10th job is heavy.
                                let work = if i % 10 == 0 { 1_000 } else { 10 };
                                std::hint::black_box(fibonacci(work));
                                comp.fetch_add(1, Ordering::Relaxed);
                            });
                            match spawned {
                                Ok(_) => i += 1,
                                Err(_) => {
                                    ctx.help();
                                }
                            }
                        }
                        ctx.wait_for_children();
                    })
                    .unwrap();

                system.wait_for(&root);
                std::hint::black_box(completed.load(Ordering::Relaxed));
            })
        });
    }

    group.finish();
}

fn bench_fork_join_tree(c: &mut Criterion) {
    fn split(ctx: &framejob::JobContext<'_>, depth: u32) {
        if depth == 0 {
            std::hint::black_box(fibonacci(64));
            return;
        }
        let left = ctx.spawn_child(move |ctx| split(ctx, depth - 1)).unwrap();
        let right = ctx.spawn_child(move |ctx| split(ctx, depth - 1)).unwrap();
        ctx.wait_for(&left);
        ctx.wait_for(&right);
    }

    let system = JobSystem::with_config(JobSystemConfig {
        worker_count: Some(num_cpus::get()),
        ..JobSystemConfig::default()
    });

    let mut group = c.benchmark_group("fork_join");
    group.sample_size(10);

    for depth in [8u32, 12] {
        group.bench_function(BenchmarkId::new("binary_tree", depth), |b| {
            b.iter(|| {
                let root = system.spawn(move |ctx| split(ctx, depth)).unwrap();
                system.wait_for(&root);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fan_out, bench_fork_join_tree);
criterion_main!(benches);
