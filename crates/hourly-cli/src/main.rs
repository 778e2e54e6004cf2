use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use hourly_core::domain::{TaskId, TrackedTask};
use hourly_core::impls::{ChannelContext, InMemoryTaskRepository, InMemoryTimeLogRepository};
use hourly_core::{AggregateCache, RunnerConfig, TaskRunner, cancellation_requested};
use tracing_subscriber::EnvFilter;

/// `hourly-cli [config.json]`
fn load_config() -> Result<RunnerConfig, Box<dyn Error>> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(RunnerConfig::default_v1());
    };
    let raw = std::fs::read_to_string(&path).map_err(|e| format!("read {path}: {e}"))?;
    let config = serde_json::from_str(&raw).map_err(|e| format!("parse {path}: {e}"))?;
    Ok(config)
}

/// デモ用のレコード（本番はデータベースから読む）
fn seed() -> Result<(InMemoryTaskRepository, InMemoryTimeLogRepository), Box<dyn Error>> {
    let tasks = InMemoryTaskRepository::with_tasks([
        TrackedTask::new(1, 10),
        TrackedTask::new(2, 10),
        TrackedTask::new(3, 20),
    ]);
    let logs = InMemoryTimeLogRepository::new();
    logs.log_hours(TaskId(1), 2.5)?;
    logs.log_hours(TaskId(2), 3.0)?;
    logs.log_hours(TaskId(3), 1.0)?;
    Ok((tasks, logs))
}

/// Submit "compute report" to the runner; the result is printed on the
/// callback loop.
fn request_report(runner: &TaskRunner, cache: &Arc<AggregateCache>, label: &'static str) -> Result<(), Box<dyn Error>> {
    let cache = Arc::clone(cache);
    runner.submit(
        move || cache.get_report(),
        move |report| {
            let json = serde_json::to_string(&report).unwrap_or_default();
            println!("[{label}] hours per project: {json} (total {:.1})", report.total_hours());
        },
        move |err| eprintln!("[{label}] report failed: {err}"),
    )?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // (A) 設定・リポジトリ・キャッシュを用意
    let config = load_config()?;
    tracing::info!(pool_size = config.pool_size, "starting hourly demo");
    let (tasks, logs) = seed()?;
    let tasks = Arc::new(tasks);
    let logs = Arc::new(logs);
    let cache = Arc::new(AggregateCache::new(tasks.clone(), logs.clone()));

    // (B) runner を起動。コールバックはこのタスク（= UI スレッド役）で実行する
    let (context, mut callbacks) = ChannelContext::new();
    let runner = TaskRunner::start(config.clone(), Arc::new(context));

    // (C) 投入
    request_report(&runner, &cache, "initial")?;
    request_report(&runner, &cache, "cached")?;

    runner.submit_with_timeout(
        || {
            std::thread::sleep(Duration::from_millis(300));
            Ok::<_, String>("slow export finished")
        },
        Duration::from_millis(100),
        |msg| println!("[export] {msg}"),
        |err| eprintln!("[export] {err}"),
    )?;

    let abandoned = runner.submit(
        || {
            while !cancellation_requested() {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err::<(), _>("stopped early")
        },
        |_| println!("[sync] finished"),
        |err| eprintln!("[sync] {err}"),
    )?;
    runner.cancel(&abandoned);

    // (D) initial / cached / export の 3 件を待つ（cancel したものは何も届かない）
    for _ in 0..3 {
        if !callbacks.next().await {
            break;
        }
    }

    // (E) 記録が増えたらキャッシュを捨てて再計算
    tasks.insert(TrackedTask::new(4, 30));
    logs.log_hours(TaskId(4), 4.0)?;
    cache.clear_cache();
    request_report(&runner, &cache, "after clear")?;
    callbacks.next().await;

    // (F) 後始末
    runner.shutdown(config.drain_timeout()).await;
    callbacks.run_pending();

    println!("runner: {}", serde_json::to_string(&runner.counts())?);
    println!("cache: {}", serde_json::to_string(&cache.stats())?);
    Ok(())
}
