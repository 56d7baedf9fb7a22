//! Integration tests for the batch execution strategies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use opsched::{
    BatchMember, BatchOptions, BatchStrategy, ManagerConfig, OperationClass, OperationManager,
    SchedulerError,
};

fn test_config() -> ManagerConfig {
    opsched::util::init_tracing();
    ManagerConfig {
        read_capacity: 8,
        write_capacity: 8,
        transaction_capacity: 2,
        max_queue_depth: 128,
        default_timeout_secs: 5,
        cleanup_enabled: false,
        cleanup_interval_secs: 60,
        retention_secs: 3600,
        history_capacity: 64,
    }
}

/// Tracks the highest number of members in flight at once.
struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn parallel_batch_collects_all_results() {
    let manager = OperationManager::new(test_config()).unwrap();

    let members: Vec<BatchMember<u32>> = (0..6u32)
        .map(|i| BatchMember::new(OperationClass::Read, async move { Ok(i * 10) }))
        .collect();
    let record = manager
        .execute_batch(members, BatchOptions::new(BatchStrategy::Parallel))
        .await
        .unwrap();

    assert_eq!(record.success_count(), 6);
    assert_eq!(record.failure_count(), 0);
    assert_eq!(record.member_ids.len(), 6);
    let mut results = record.results.clone();
    results.sort_unstable();
    assert_eq!(results, vec![0, 10, 20, 30, 40, 50]);

    manager.shutdown().await;
}

#[tokio::test]
async fn parallel_batch_honors_its_concurrency_cap() {
    let manager = OperationManager::new(test_config()).unwrap();
    let gauge = ConcurrencyGauge::new();

    let members: Vec<BatchMember<()>> = (0..8)
        .map(|_| {
            let gauge = Arc::clone(&gauge);
            BatchMember::new(OperationClass::Read, async move {
                gauge.enter();
                tokio::time::sleep(Duration::from_millis(40)).await;
                gauge.exit();
                Ok(())
            })
        })
        .collect();
    let record = manager
        .execute_batch(
            members,
            BatchOptions::new(BatchStrategy::Parallel).with_max_concurrency(2),
        )
        .await
        .unwrap();

    assert_eq!(record.success_count(), 8);
    // The batch cap binds even though the pool allows more.
    assert!(gauge.peak() <= 2, "peak concurrency {}", gauge.peak());

    manager.shutdown().await;
}

#[tokio::test]
async fn parallel_member_failures_never_abort_siblings() {
    let manager = OperationManager::new(test_config()).unwrap();

    let members = vec![
        BatchMember::new(OperationClass::Read, async { Ok(1u32) }),
        BatchMember::new(OperationClass::Read, async {
            Err(anyhow::anyhow!("bad row"))
        }),
        BatchMember::new(OperationClass::Read, async { Ok(3u32) }),
    ];
    let record = manager
        .execute_batch(members, BatchOptions::new(BatchStrategy::Parallel))
        .await
        .unwrap();

    assert_eq!(record.success_count(), 2);
    assert_eq!(record.failure_count(), 1);
    assert!(record
        .errors
        .iter()
        .any(|e| e.to_string().contains("bad row")));

    manager.shutdown().await;
}

#[tokio::test]
async fn sequential_batch_runs_in_order() {
    let manager = OperationManager::new(test_config()).unwrap();
    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let in_flight = ConcurrencyGauge::new();

    let members: Vec<BatchMember<u32>> = (0..4u32)
        .map(|i| {
            let order = Arc::clone(&order);
            let in_flight = Arc::clone(&in_flight);
            BatchMember::new(OperationClass::Write, async move {
                in_flight.enter();
                tokio::time::sleep(Duration::from_millis(10)).await;
                order.lock().push(i);
                in_flight.exit();
                Ok(i)
            })
        })
        .collect();
    let record = manager
        .execute_batch(members, BatchOptions::new(BatchStrategy::Sequential))
        .await
        .unwrap();

    assert_eq!(record.results, vec![0, 1, 2, 3]);
    assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    // Strictly one member at a time.
    assert_eq!(in_flight.peak(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn stop_on_error_skips_later_members() {
    let manager = OperationManager::new(test_config()).unwrap();
    let third_ran = Arc::new(AtomicUsize::new(0));

    let ran = Arc::clone(&third_ran);
    let members = vec![
        BatchMember::new(OperationClass::Write, async { Ok(1u32) }),
        BatchMember::new(OperationClass::Write, async {
            Err(anyhow::anyhow!("constraint violation"))
        }),
        BatchMember::new(OperationClass::Write, async move {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(3u32)
        }),
    ];
    let record = manager
        .execute_batch(
            members,
            BatchOptions::new(BatchStrategy::Sequential).with_stop_on_error(true),
        )
        .await
        .unwrap();

    assert_eq!(record.results, vec![1]);
    // One real failure plus one skipped member recorded as cancelled.
    assert_eq!(record.failure_count(), 2);
    assert!(matches!(record.errors[1], SchedulerError::Cancelled));
    assert_eq!(third_ran.load(Ordering::SeqCst), 0);

    manager.shutdown().await;
}

#[tokio::test]
async fn without_stop_on_error_all_members_run() {
    let manager = OperationManager::new(test_config()).unwrap();

    let members = vec![
        BatchMember::new(OperationClass::Write, async { Ok(1u32) }),
        BatchMember::new(OperationClass::Write, async {
            Err(anyhow::anyhow!("constraint violation"))
        }),
        BatchMember::new(OperationClass::Write, async { Ok(3u32) }),
    ];
    let record = manager
        .execute_batch(members, BatchOptions::new(BatchStrategy::Sequential))
        .await
        .unwrap();

    assert_eq!(record.results, vec![1, 3]);
    assert_eq!(record.failure_count(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn mixed_batch_runs_reads_first_then_writes_in_order() {
    let manager = OperationManager::new(test_config()).unwrap();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let mut members = Vec::new();
    for label in ["write-a", "write-b"] {
        let order = Arc::clone(&order);
        members.push(BatchMember::new(OperationClass::Write, async move {
            order.lock().push(label);
            Ok(label.to_owned())
        }));
    }
    for label in ["read-a", "read-b"] {
        let order = Arc::clone(&order);
        members.push(BatchMember::new(OperationClass::Read, async move {
            order.lock().push(label);
            Ok(label.to_owned())
        }));
    }

    let record = manager
        .execute_batch(members, BatchOptions::new(BatchStrategy::Mixed))
        .await
        .unwrap();

    assert_eq!(record.success_count(), 4);
    // Read results come first; writes keep their relative order after.
    assert_eq!(&record.results[2..], &["write-a", "write-b"]);
    let order = order.lock().clone();
    assert!(order.iter().position(|l| l.starts_with("read")).unwrap() < 2);
    assert_eq!(&order[2..], &["write-a", "write-b"]);

    manager.shutdown().await;
}

#[tokio::test]
async fn batch_summary_is_retained_for_lookup() {
    let manager = OperationManager::new(test_config()).unwrap();

    let members = vec![
        BatchMember::new(OperationClass::Read, async { Ok(1u32) }),
        BatchMember::new(OperationClass::Read, async {
            Err(anyhow::anyhow!("nope"))
        }),
    ];
    let record = manager
        .execute_batch(members, BatchOptions::new(BatchStrategy::Parallel))
        .await
        .unwrap();

    let summary = manager.batch_status(record.id).unwrap();
    assert_eq!(summary.member_count, 2);
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.failure_count, 1);
    assert!(summary.completed_at_ms >= summary.created_at_ms);
    assert!(manager.batch_status(uuid::Uuid::new_v4()).is_none());

    manager.shutdown().await;
}

#[tokio::test]
async fn gate_wait_is_not_charged_against_member_timeouts() {
    let manager = OperationManager::new(test_config()).unwrap();

    // Three 60ms members serialized through a cap of one: each spends up
    // to 120ms waiting for the gate, yet none may time out, because the
    // 100ms deadline covers execution only.
    let members: Vec<BatchMember<()>> = (0..3)
        .map(|_| {
            BatchMember::new(OperationClass::Read, async {
                tokio::time::sleep(Duration::from_millis(60)).await;
                Ok(())
            })
        })
        .collect();
    let started = Instant::now();
    let record = manager
        .execute_batch(
            members,
            BatchOptions::new(BatchStrategy::Parallel)
                .with_max_concurrency(1)
                .with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap();

    assert_eq!(record.failure_count(), 0, "errors: {:?}", record.errors);
    assert_eq!(record.success_count(), 3);
    // The gate really serialized them.
    assert!(started.elapsed() >= Duration::from_millis(180));

    manager.shutdown().await;
}

#[tokio::test]
async fn member_timeout_override_applies() {
    let manager = OperationManager::new(test_config()).unwrap();

    let members = vec![
        BatchMember::new(OperationClass::Read, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }),
        BatchMember::new(OperationClass::Read, async { Ok(()) }),
    ];
    let record = manager
        .execute_batch(
            members,
            BatchOptions::new(BatchStrategy::Parallel).with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    assert_eq!(record.success_count(), 1);
    assert!(matches!(record.errors[0], SchedulerError::TimedOut(_)));

    manager.shutdown().await;
}
