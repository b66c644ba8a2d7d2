use std::time::Duration;

use undertow_broadcast::Filter;
use undertow_core::{Payload, Update, WorkCategory, WorkItem};
use undertow_dispatch::{DispatchError, HandlerOutput, HandlerTable};
use undertow_pipeline::{Pipeline, PipelineConfig, PipelineError};

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.dispatch.admission_tick_ms = 10;
    config.dispatch.throttle_window_ms = 0;
    config.broadcast.flush_interval_ms = 20;
    config.pipeline.stats_interval_ms = 20;
    config
}

fn echo_handlers() -> HandlerTable {
    WorkCategory::ALL.into_iter().fold(HandlerTable::new(), |table, category| {
        table.register_fn(category, |p| async move { Ok(HandlerOutput::from(p)) })
    })
}

async fn next_update(handle: &mut undertow_broadcast::SubscriptionHandle) -> Update {
    tokio::time::timeout(Duration::from_secs(2), handle.recv())
        .await
        .expect("no update within 2s")
        .expect("subscription closed")
}

#[tokio::test]
async fn result_is_cached_then_announced() {
    let pipeline = Pipeline::start(fast_config(), echo_handlers()).unwrap();
    let mut ui = pipeline.subscribe("ui", vec![], 16).unwrap();

    let item = WorkItem::new(WorkCategory::Analysis, 6, Payload::Text("pods".into()))
        .with_cache_key("analysis/pods", Duration::from_secs(30));
    let id = item.id;
    pipeline.submit(item).unwrap();

    let update = next_update(&mut ui).await;
    assert_eq!(update.id, id);
    assert_eq!(update.payload, Payload::Text("pods".into()));
    assert_eq!(update.invalidate_keys, vec!["analysis/pods".to_string()]);

    assert_eq!(
        pipeline.get("analysis/pods", WorkCategory::Analysis),
        Some(Payload::Text("pods".into()))
    );
    let stats = pipeline.stats();
    assert_eq!(stats.routing.results_routed, 1);
    assert_eq!(stats.routing.results_cached, 1);
    assert_eq!(stats.pool.completed, 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn failed_results_are_announced_but_not_cached() {
    let handlers = HandlerTable::new().register_fn(WorkCategory::Validation, |_| async move {
        Err(undertow_dispatch::HandlerError::new("schema mismatch"))
    });
    let pipeline = Pipeline::start(fast_config(), handlers).unwrap();
    let mut ui = pipeline.subscribe("ui", vec![], 16).unwrap();

    let item = WorkItem::new(WorkCategory::Validation, 5, Payload::Empty)
        .with_cache_key("validation/deploy", Duration::from_secs(30));
    pipeline.submit(item).unwrap();

    let update = next_update(&mut ui).await;
    assert_eq!(update.payload, Payload::Text("handler error: schema mismatch".into()));
    assert!(!pipeline.cache().contains("validation/deploy"));
    assert_eq!(pipeline.stats().pool.failed, 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn invalidation_reaches_subscribers() {
    let pipeline = Pipeline::start(fast_config(), echo_handlers()).unwrap();
    let mut diag = pipeline
        .subscribe("diag", vec![Filter::Category(WorkCategory::Diagnostic)], 16)
        .unwrap();

    let ttl = Duration::from_secs(30);
    pipeline.set("diag/a", Payload::Number(1), WorkCategory::Diagnostic, ttl);
    pipeline.set("diag/b", Payload::Number(2), WorkCategory::Diagnostic, ttl);
    pipeline.set("other", Payload::Number(3), WorkCategory::Diagnostic, ttl);

    assert_eq!(pipeline.invalidate("diag/*"), 2);
    assert!(pipeline.get("diag/a", WorkCategory::Diagnostic).is_none());
    assert!(pipeline.get("other", WorkCategory::Diagnostic).is_some());

    let update = next_update(&mut diag).await;
    let mut keys = update.invalidate_keys.clone();
    keys.sort();
    assert_eq!(keys, vec!["diag/a".to_string(), "diag/b".to_string()]);
    assert_eq!(update.priority, pipeline.config().pipeline.invalidation_priority);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn miss_prefetches_correlated_key_into_cache() {
    let pipeline = Pipeline::start(fast_config(), echo_handlers()).unwrap();
    pipeline.cache().prefetch_engine().record_correlation("root", "dep");

    assert!(pipeline.get("root", WorkCategory::Prediction).is_none());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !pipeline.cache().contains("dep") {
        assert!(tokio::time::Instant::now() < deadline, "prefetched key never cached");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stats = pipeline.stats();
    assert_eq!(stats.pool.prefetch_accepted, 1);
    assert_eq!(stats.cache.prefetch_submitted, 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn history_collects_periodic_snapshots() {
    let mut config = fast_config();
    config.pipeline.history_capacity = 3;
    let pipeline = Pipeline::start(config, echo_handlers()).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let history = pipeline.history();
    assert_eq!(history.len(), 3);
    assert!(history.windows(2).all(|w| w[0].elapsed_secs <= w[1].elapsed_secs));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn shutdown_settles_every_item_and_closes_streams() {
    let mut config = fast_config();
    config.dispatch.workers = 1;
    let handlers = HandlerTable::new().register_fn(WorkCategory::Optimization, |p| async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(HandlerOutput::from(p))
    });
    let pipeline = Pipeline::start(config, handlers).unwrap();
    let mut ui = pipeline.subscribe("ui", vec![], 64).unwrap();

    for i in 0..20 {
        pipeline
            .submit(WorkItem::new(WorkCategory::Optimization, 5, Payload::Number(i)))
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    pipeline.shutdown().await;

    let stats = pipeline.stats();
    assert_eq!(stats.pool.submitted, 20);
    assert_eq!(stats.pool.settled(), 20);
    assert!(stats.pool.discarded > 0);

    // Updates already delivered are still readable, then the stream ends.
    while ui.try_recv().is_some() {}
    assert!(ui.recv().await.is_none());

    let err = pipeline
        .submit(WorkItem::new(WorkCategory::Optimization, 5, Payload::Empty))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Dispatch(DispatchError::ShutDown)));
    assert!(pipeline.subscribe("late", vec![], 4).is_err());

    // A second call is a no-op.
    pipeline.shutdown().await;
}

#[tokio::test]
async fn invalid_config_fails_before_spawning() {
    let mut config = PipelineConfig::default();
    config.cache.warm_ttl_scale = 0.5;
    let err = Pipeline::start(config, HandlerTable::new()).err().unwrap();
    assert!(matches!(err, PipelineError::Cache(_)));
}
