//! undertow-worker: runs a pipeline with demo handlers and logs what flows through it.
//!
//! # Usage
//!
//! ```bash
//! # Defaults, env overrides only
//! undertow-worker
//!
//! # From a config file, submitting a burst of demo work
//! undertow-worker --config undertow.toml --demo-items 200
//!
//! # Via environment variables
//! UNDERTOW_CONFIG=undertow.toml UNDERTOW_DISPATCH_WORKERS=8 undertow-worker
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use undertow_core::{ContextSummary, Payload, WorkCategory, WorkItem};
use undertow_dispatch::{HandlerError, HandlerOutput, HandlerTable};
use undertow_pipeline::{Pipeline, PipelineConfig};

/// Background dispatch, tiered cache and throttled broadcast in one process.
#[derive(Parser, Debug)]
#[command(name = "undertow-worker", version, about)]
struct Cli {
    /// TOML config file. Without one, defaults plus `UNDERTOW_*` overrides are used.
    #[arg(long, env = "UNDERTOW_CONFIG")]
    config: Option<PathBuf>,

    /// Number of demo work items to submit at startup.
    #[arg(long, env = "UNDERTOW_DEMO_ITEMS", default_value_t = 0)]
    demo_items: usize,

    /// Interval in seconds between stats log lines (0 = disabled).
    #[arg(long, env = "UNDERTOW_STATS_INTERVAL", default_value_t = 10)]
    stats_interval: u64,

    /// Print the final stats as JSON on exit.
    #[arg(long)]
    json_stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(?cli, "starting undertow-worker");

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::from_env()?,
    };
    let pipeline = Pipeline::start(config, demo_handlers())?;

    // Log every update that reaches the demo subscriber.
    let mut updates = pipeline.subscribe("log", Vec::new(), 0)?;
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            tracing::debug!(
                id = %update.id,
                category = %update.category,
                priority = update.priority,
                invalidates = update.invalidate_keys.len(),
                "update"
            );
        }
    });

    for i in 0..cli.demo_items {
        let category = WorkCategory::ALL[i % WorkCategory::ALL.len()];
        let priority = (i % 10) as u8 + 1;
        let item = WorkItem::new(category, priority, Payload::Text(format!("subject-{i}")))
            .with_cache_key(format!("{category}/subject-{i}"), Duration::from_secs(60))
            .with_timeout(Duration::from_secs(30));
        pipeline.submit(item)?;
    }

    if cli.stats_interval > 0 {
        let interval = Duration::from_secs(cli.stats_interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        let signal = shutdown_signal();
        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = pipeline.stats();
                    tracing::info!(
                        submitted = stats.pool.submitted,
                        completed = stats.pool.completed,
                        failed = stats.pool.failed,
                        queue_depth = stats.pool.queue_depth,
                        hit_ratio = stats.cache_hit_ratio(),
                        dropped_updates = stats.dropped_updates(),
                        subscribers = stats.active_subscribers(),
                        "pipeline stats"
                    );
                }
                res = &mut signal => {
                    res?;
                    break;
                }
            }
        }
    } else {
        shutdown_signal().await?;
    }

    tracing::info!("shutdown signal received");
    pipeline.shutdown().await;

    if cli.json_stats {
        println!("{}", serde_json::to_string_pretty(&pipeline.stats())?);
    }

    tracing::info!("undertow-worker exited cleanly");
    Ok(())
}

/// Handlers that answer with a category-shaped payload after a short delay.
fn demo_handlers() -> HandlerTable {
    HandlerTable::new()
        .register_fn(WorkCategory::Analysis, analyze)
        .register_fn(WorkCategory::Prediction, predict)
        .register_fn(WorkCategory::Validation, validate)
        .register_fn(WorkCategory::Optimization, optimize)
        .register_fn(WorkCategory::Diagnostic, diagnose)
}

async fn analyze(payload: Payload) -> Result<HandlerOutput, HandlerError> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    let subject = subject_of(&payload)?;
    Ok(HandlerOutput::new(
        Payload::Analysis {
            subject,
            findings: vec!["no anomalies".into()],
        },
        0.9,
    ))
}

async fn predict(payload: Payload) -> Result<HandlerOutput, HandlerError> {
    tokio::time::sleep(Duration::from_millis(30)).await;
    let subject = subject_of(&payload)?;
    Ok(HandlerOutput::new(
        Payload::Prediction {
            subject,
            horizon_secs: 300,
            score: 0.42,
        },
        0.6,
    ))
}

async fn validate(payload: Payload) -> Result<HandlerOutput, HandlerError> {
    let subject = subject_of(&payload)?;
    Ok(HandlerOutput::new(
        Payload::Validation {
            subject,
            passed: true,
            messages: Vec::new(),
        },
        1.0,
    ))
}

async fn optimize(payload: Payload) -> Result<HandlerOutput, HandlerError> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    let subject = subject_of(&payload)?;
    Ok(HandlerOutput::new(
        Payload::Optimization {
            subject,
            suggestions: vec!["raise replica count".into()],
        },
        0.7,
    ))
}

async fn diagnose(payload: Payload) -> Result<HandlerOutput, HandlerError> {
    let namespace = subject_of(&payload)?;
    Ok(HandlerOutput::new(
        Payload::Context(ContextSummary {
            namespace,
            ..ContextSummary::default()
        }),
        0.8,
    ))
}

fn subject_of(payload: &Payload) -> Result<String, HandlerError> {
    match payload {
        Payload::Text(s) => Ok(s.clone()),
        Payload::Prefetch { key } => Ok(key.clone()),
        other => Err(HandlerError::new(format!("unsupported demo payload: {other:?}"))),
    }
}

/// Wait for SIGINT or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
