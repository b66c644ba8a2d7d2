use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use undertow_core::{Payload, WorkCategory, WorkItem, WorkResult};
use undertow_dispatch::{DispatchConfig, HandlerOutput, HandlerTable, WorkerPool};

fn id_echo_handlers() -> HandlerTable {
    HandlerTable::new().register_fn(WorkCategory::Analysis, |payload| async move {
        Ok(HandlerOutput::from(payload))
    })
}

async fn collect(results: &mut mpsc::UnboundedReceiver<WorkResult>, n: usize) -> Vec<WorkResult> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        match tokio::time::timeout(Duration::from_secs(5), results.recv()).await {
            Ok(Some(r)) => out.push(r),
            _ => break,
        }
    }
    out
}

#[tokio::test]
async fn single_worker_completes_in_priority_order() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = DispatchConfig {
        workers: 1,
        dispatch_capacity: 16,
        admission_tick_ms: 50,
        ..DispatchConfig::default()
    };
    let (pool, mut results) = WorkerPool::start(&config, id_echo_handlers(), shutdown_rx).unwrap();

    // Everything lands in the queue before the first admission tick.
    let mut ids = Vec::new();
    for priority in [3u8, 9, 3, 9, 5] {
        let item = WorkItem::new(WorkCategory::Analysis, priority, Payload::Empty);
        ids.push(item.id);
        pool.submit(item).unwrap();
    }

    let out = collect(&mut results, 5).await;
    let priorities: Vec<u8> = out.iter().map(|r| r.priority).collect();
    assert_eq!(priorities, vec![9, 9, 5, 3, 3]);
    assert!(out.iter().all(|r| r.success));

    // Equal priorities finish in submission order.
    assert_eq!(out[0].id, ids[1]);
    assert_eq!(out[1].id, ids[3]);
    assert_eq!(out[3].id, ids[0]);
    assert_eq!(out[4].id, ids[2]);

    shutdown_tx.send(true).unwrap();
    pool.join().await;
}

#[tokio::test]
async fn every_item_yields_exactly_one_result() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = DispatchConfig {
        workers: 4,
        dispatch_capacity: 4,
        admission_tick_ms: 5,
        throttle_window_ms: 0,
        ..DispatchConfig::default()
    };
    let handlers = id_echo_handlers()
        .register_fn(WorkCategory::Prediction, |_| async move {
            Err(undertow_dispatch::HandlerError::new("model unavailable"))
        })
        .register_fn(WorkCategory::Diagnostic, |_| async move {
            panic!("diagnostic handler bug");
        });
    let (pool, mut results) = WorkerPool::start(&config, handlers, shutdown_rx).unwrap();

    let categories = [
        WorkCategory::Analysis,
        WorkCategory::Prediction,
        WorkCategory::Diagnostic,
        WorkCategory::Optimization,
    ];
    let mut submitted = HashSet::new();
    for i in 0..40u8 {
        let item = WorkItem::new(categories[i as usize % 4], i % 10 + 1, i64::from(i));
        submitted.insert(item.id);
        pool.submit(item).unwrap();
    }

    let out = collect(&mut results, 40).await;
    assert_eq!(out.len(), 40);
    let returned: HashSet<_> = out.iter().map(|r| r.id).collect();
    assert_eq!(returned, submitted);

    let unrecognized = out
        .iter()
        .filter(|r| r.category == WorkCategory::Optimization)
        .all(|r| !r.success && r.error.as_deref() == Some("unrecognized category: optimization"));
    assert!(unrecognized);

    let stats = pool.stats();
    assert_eq!(stats.completed, 10);
    assert_eq!(stats.failed, 30);

    shutdown_tx.send(true).unwrap();
    pool.join().await;
    assert_eq!(pool.stats().settled(), pool.stats().submitted);
}

#[tokio::test]
async fn submitting_faster_than_workers_never_blocks() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = DispatchConfig {
        workers: 1,
        dispatch_capacity: 1,
        admission_tick_ms: 1,
        throttle_window_ms: 0,
        ..DispatchConfig::default()
    };
    let handlers = HandlerTable::new().register_fn(WorkCategory::Validation, |p| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(HandlerOutput::from(p))
    });
    let (pool, mut results) = WorkerPool::start(&config, handlers, shutdown_rx).unwrap();

    let started = std::time::Instant::now();
    for i in 0..200 {
        pool.submit(WorkItem::new(WorkCategory::Validation, 5, i64::from(i))).unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(500));

    tokio::time::sleep(Duration::from_millis(60)).await;
    shutdown_tx.send(true).unwrap();
    pool.join().await;

    let mut produced = 0u64;
    while results.recv().await.is_some() {
        produced += 1;
    }

    let stats = pool.stats();
    assert_eq!(stats.submitted, 200);
    assert!(stats.discarded > 0);
    assert_eq!(produced, stats.completed + stats.failed);
    assert_eq!(stats.settled(), 200);
}

#[tokio::test]
async fn shutdown_discards_queue_and_notifies_callbacks() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = DispatchConfig {
        workers: 1,
        admission_tick_ms: 60_000,
        ..DispatchConfig::default()
    };
    let (pool, mut results) = WorkerPool::start(&config, id_echo_handlers(), shutdown_rx).unwrap();

    let failures = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let f = failures.clone();
        let item = WorkItem::new(WorkCategory::Analysis, 4, Payload::Empty).on_complete(move |r| {
            if !r.success {
                f.fetch_add(1, Ordering::SeqCst);
            }
        });
        pool.submit(item).unwrap();
    }

    shutdown_tx.send(true).unwrap();
    pool.join().await;

    assert_eq!(failures.load(Ordering::SeqCst), 3);
    assert_eq!(pool.stats().discarded, 3);
    assert!(results.recv().await.is_none());
}

#[tokio::test]
async fn high_priority_bypasses_queue_and_callback_sees_result() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let config = DispatchConfig {
        workers: 1,
        admission_tick_ms: 60_000,
        ..DispatchConfig::default()
    };
    let (pool, mut results) = WorkerPool::start(&config, id_echo_handlers(), shutdown_rx).unwrap();

    pool.submit(WorkItem::new(WorkCategory::Analysis, 9, "queued")).unwrap();

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let urgent = WorkItem::new(WorkCategory::Analysis, 1, "urgent").on_complete(move |r| {
        let _ = done_tx.send(r.clone());
    });
    pool.submit_high_priority(urgent).unwrap();

    let first = collect(&mut results, 1).await;
    assert_eq!(first[0].priority, 10);
    assert_eq!(first[0].payload, Some(Payload::Text("urgent".into())));

    let via_callback = tokio::time::timeout(Duration::from_secs(5), done_rx).await.unwrap().unwrap();
    assert_eq!(via_callback.id, first[0].id);

    // The ordinary item is still waiting for an admission tick.
    assert_eq!(pool.queue_depth(), 1);

    shutdown_tx.send(true).unwrap();
    pool.join().await;
}
