//! BucketDB demo - walks the time-series engine end to end
//!
//! Creates a default collection and a compressed one, inserts documents,
//! reads them back through the merged cache/backing read path, and prints
//! what the backing collection looks like from the host store's side.

use anyhow::Result;
use bucketdb_core::monitor::{CacheMonitor, DEFAULT_SWEEP_INTERVAL};
use bucketdb_core::store::{BucketStore, MemoryStore};
use bucketdb_core::{Document, FieldValue, Query, TimeSeriesEngine};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!("Starting BucketDB demo (v{})", bucketdb_core::VERSION);

    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(TimeSeriesEngine::new(store.clone()));
    let monitor = CacheMonitor::start(engine.clone(), DEFAULT_SWEEP_INTERVAL)?;

    // A collection with all-default configuration: 1s windows, cache of 4
    let test = engine.create("test", &serde_json::json!(true))?;
    for i in 0..1000i64 {
        test.insert(
            Document::new()
                .with("_id", FieldValue::Time(i * 100))
                .with("val", i * 100),
        )?;
    }

    let stats = test.stats();
    info!(
        inserts = stats.inserts,
        resident = stats.resident,
        flushes = stats.flushes,
        "test collection after load"
    );

    // Point read, same shape as the insert
    let query = Query::all().with_eq("_id", FieldValue::Time(8200));
    for doc in test.find(&query)? {
        info!("found: {}", doc?);
    }

    // The backing collection is an ordinary collection in the host store
    info!(
        backing = test.backing_name(),
        records = store.collection_len(test.backing_name()),
        "backing collection is directly visible"
    );
    let backing = BucketStore::new(store.clone(), test.backing_name());
    if let Some(record) = backing.scan(i64::MIN, i64::MAX)?.next().transpose()? {
        info!(
            id = record.id,
            count = record.count,
            min = %format_millis(record.min_time),
            max = %format_millis(record.max_time),
            compressed = record.compressed,
            bytes = record.payload.len(),
            "first persisted bucket record"
        );
    }

    // Now use compression
    let example = engine.create(
        "example",
        &serde_json::json!({"compressed": true, "cache_size": 2}),
    )?;
    for ts in [2665i64, 2664, 2663, 3663, 1663, 2662, 1662, 3662] {
        example.insert(
            Document::new()
                .with("_id", FieldValue::Time(ts))
                .with("val", ts),
        )?;
    }

    // Reads merge resident buckets with flushed ones
    let docs: Vec<Document> = example
        .find(&Query::all())?
        .collect::<bucketdb_core::Result<_>>()?;
    info!(count = docs.len(), "example collection contents, time-ascending");
    for doc in &docs {
        info!("  {}", doc);
    }

    engine.flush_all()?;
    info!(
        records = store.collection_len(example.backing_name()),
        "example backing collection after flush"
    );

    monitor.stop();
    info!("done");

    Ok(())
}

fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}
