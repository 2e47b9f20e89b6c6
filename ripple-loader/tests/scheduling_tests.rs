//! Loaders driven by the scheduler: `start`, `try_start` and the
//! watermark-reset cron.

use std::sync::Arc;
use std::time::Duration;

use ripple_loader::{VersionLoader, WatermarkLoader};
use ripple_scheduler::{SchedulerConfig, Trigger};
use ripple_test_utils::fixtures::two_rows;
use ripple_test_utils::{
    init_tracing, ConfigRow, FeatureDef, ScriptedProcessor, ScriptedVersionSource,
    ScriptedWatermarkSource,
};
use tokio::sync::watch;
use tokio::time::sleep;

fn watermark_loader(
    period_secs: u64,
) -> (Arc<ScriptedWatermarkSource>, Arc<WatermarkLoader<ConfigRow>>) {
    init_tracing();
    let source = Arc::new(ScriptedWatermarkSource::with_rows(two_rows()));
    let loader: WatermarkLoader<ConfigRow> = WatermarkLoader::new(
        "config_rows",
        Trigger::every(Duration::from_secs(period_secs)).unwrap(),
        source.clone(),
        Arc::new(ScriptedProcessor::new()),
    )
    .with_scheduler_config(SchedulerConfig::development());
    (source, Arc::new(loader))
}

#[tokio::test(start_paused = true)]
async fn test_try_start_failure_schedules_nothing() {
    let (source, loader) = watermark_loader(10);
    source.set_failing(true);
    let (_tx, rx) = watch::channel(false);

    let result = loader.try_start(rx).await;

    assert!(result.is_err());
    sleep(Duration::from_secs(60)).await;
    assert_eq!(source.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_try_start_runs_once_then_waits_a_period() {
    let (source, loader) = watermark_loader(10);
    let (tx, rx) = watch::channel(false);

    let handle = loader.try_start(rx).await.unwrap();
    assert_eq!(loader.time_offset(), 20);
    assert_eq!(source.requests(), vec![0]);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(source.requests().len(), 1);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(source.requests(), vec![0, 20]);

    tx.send(true).unwrap();
    let metrics = handle.await.unwrap().snapshot();
    assert_eq!(metrics.cycles, 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_retries_after_failures() {
    let (source, loader) = watermark_loader(10);
    source.set_failing(true);
    let (tx, rx) = watch::channel(false);

    let handle = loader.start(rx);
    sleep(Duration::from_secs(15)).await;
    assert_eq!(loader.time_offset(), 0);

    source.set_failing(false);
    sleep(Duration::from_secs(10)).await;
    assert_eq!(loader.time_offset(), 20);

    tx.send(true).unwrap();
    let metrics = handle.await.unwrap().snapshot();
    assert_eq!(metrics.cycles, 3);
    assert_eq!(metrics.failures, 2);
    assert_eq!(metrics.records_applied, 2);
}

#[tokio::test(start_paused = true)]
async fn test_version_loader_start() {
    init_tracing();
    let source = Arc::new(ScriptedVersionSource::new());
    source.upsert(FeatureDef::new("search", "v1"));
    let loader: Arc<VersionLoader<FeatureDef>> = Arc::new(VersionLoader::new(
        "features",
        Trigger::parse("@every 30s").unwrap(),
        source.clone(),
    ));
    let (tx, rx) = watch::channel(false);

    let handle = loader.start(rx);
    sleep(Duration::from_secs(1)).await;
    assert!(loader.get("search").is_some());

    source.upsert(FeatureDef::new("search", "v2"));
    sleep(Duration::from_secs(30)).await;
    assert_eq!(loader.get("search").unwrap().payload, "v2");

    tx.send(true).unwrap();
    let metrics = handle.await.unwrap().snapshot();
    assert_eq!(metrics.cycles, 2);
    assert_eq!(metrics.records_applied, 2);
}

#[tokio::test]
async fn test_cron_reset_zeroes_watermark() {
    let (_source, loader) = watermark_loader(3600);
    loader.refresh().await.unwrap();
    assert_eq!(loader.time_offset(), 20);
    let (tx, rx) = watch::channel(false);

    let handle = loader.reset_watermark_with_cron("* * * * * *", rx).unwrap();
    sleep(Duration::from_millis(2500)).await;

    assert_eq!(loader.time_offset(), 0);
    tx.send(true).unwrap();
    assert!(handle.await.unwrap() >= 1);
}
