//! Benchmarks for the operation scheduler.
//!
//! Benchmarks cover:
//! - Submission and result delivery through the manager
//! - Mixed-priority, mixed-class workloads
//! - Batch strategies

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use opsched::{
    BatchMember, BatchOptions, BatchStrategy, ManagerConfig, OperationClass, OperationManager,
    OperationOptions, Priority,
};

use tokio::runtime::Runtime;

// ============================================================================
// Helper Functions
// ============================================================================

fn bench_config() -> ManagerConfig {
    ManagerConfig {
        read_capacity: 25,
        write_capacity: 10,
        transaction_capacity: 5,
        max_queue_depth: 10_000,
        default_timeout_secs: 60,
        cleanup_enabled: false,
        cleanup_interval_secs: 60,
        retention_secs: 3600,
        history_capacity: 1024,
    }
}

fn priority_for(i: u64) -> Priority {
    match i % 10 {
        0..=1 => Priority::Critical, // 20% critical
        2..=4 => Priority::High,     // 30% high
        5..=7 => Priority::Normal,   // 30% normal
        _ => Priority::Low,          // 20% low
    }
}

// ============================================================================
// Manager Benchmarks
// ============================================================================

fn bench_execute_async_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute_async_throughput");

    for count in [50, 100, 200] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.to_async(Runtime::new().unwrap()).iter(|| async move {
                let manager = OperationManager::new(bench_config()).unwrap();
                let handles: Vec<_> = (0..count)
                    .map(|i| {
                        manager
                            .submit(
                                async move { Ok::<_, anyhow::Error>(i) },
                                OperationOptions::new(OperationClass::Read),
                            )
                            .unwrap()
                    })
                    .collect();
                for handle in handles {
                    black_box(handle.wait().await.unwrap());
                }
                manager.shutdown().await;
            });
        });
    }
    group.finish();
}

fn bench_mixed_priority_workload(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_priority_workload");

    group.bench_function("realistic_workload", |b| {
        b.to_async(Runtime::new().unwrap()).iter(|| async {
            let manager = OperationManager::new(bench_config()).unwrap();

            // Mix of classes and priorities, all completing immediately.
            let handles: Vec<_> = (0..150u64)
                .map(|i| {
                    let class = match i % 5 {
                        0..=2 => OperationClass::Read,
                        3 => OperationClass::Write,
                        _ => OperationClass::Transaction,
                    };
                    manager
                        .submit(
                            async move { Ok::<_, anyhow::Error>(i) },
                            OperationOptions::new(class).with_priority(priority_for(i)),
                        )
                        .unwrap()
                })
                .collect();
            for handle in handles {
                black_box(handle.wait().await.unwrap());
            }
            manager.shutdown().await;
        });
    });
    group.finish();
}

// ============================================================================
// Batch Benchmarks
// ============================================================================

fn bench_batch_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_strategies");

    for strategy in [
        BatchStrategy::Parallel,
        BatchStrategy::Sequential,
        BatchStrategy::Mixed,
    ] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{strategy:?}")),
            &strategy,
            |b, &strategy| {
                b.to_async(Runtime::new().unwrap()).iter(|| async move {
                    let manager = OperationManager::new(bench_config()).unwrap();
                    let members: Vec<BatchMember<u64>> = (0..32u64)
                        .map(|i| {
                            let class = if i % 2 == 0 {
                                OperationClass::Read
                            } else {
                                OperationClass::Write
                            };
                            BatchMember::new(class, async move { Ok(i) })
                        })
                        .collect();
                    let record = manager
                        .execute_batch(
                            members,
                            BatchOptions::new(strategy).with_max_concurrency(8),
                        )
                        .await
                        .unwrap();
                    black_box(record.success_count());
                    manager.shutdown().await;
                });
            },
        );
    }
    group.finish();
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(
    manager_benches,
    bench_execute_async_throughput,
    bench_mixed_priority_workload
);

criterion_group!(batch_benches, bench_batch_strategies);

criterion_main!(manager_benches, batch_benches);
