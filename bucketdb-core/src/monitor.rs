//! Background cache monitor
//!
//! Periodically sweeps every registered collection and flushes buckets
//! that have gone quiet, so historical windows leave memory even when no
//! insert arrives to trigger eviction.

use crate::engine::TimeSeriesEngine;
use crate::{Result, TsError};
use crossbeam_channel::{bounded, select, tick, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

/// Default interval between idle sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to the background sweep thread
pub struct CacheMonitor {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl CacheMonitor {
    /// Spawn the monitor thread sweeping `engine` every `interval`
    pub fn start(engine: Arc<TimeSeriesEngine>, interval: Duration) -> Result<Self> {
        let (shutdown, signal) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("bucketdb-cache-monitor".into())
            .spawn(move || {
                let ticker = tick(interval);
                info!(interval_ms = interval.as_millis() as u64, "cache monitor running");
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let flushed = engine.sweep_idle();
                            if flushed > 0 {
                                debug!(flushed, "sweep complete");
                            }
                        }
                        recv(signal) -> _ => break,
                    }
                }
                info!("cache monitor stopped");
            })
            .map_err(|e| TsError::Store(format!("failed to spawn cache monitor: {}", e)))?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CacheMonitor {
    fn drop(&mut self) {
        // Detached shutdown; stop() joins explicitly
        let _ = self.shutdown.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::{Document, FieldValue};
    use serde_json::json;

    #[test]
    fn test_monitor_flushes_idle_buckets() {
        let engine = Arc::new(TimeSeriesEngine::new(Arc::new(MemoryStore::new())));
        let coll = engine.create("tsv", &json!(true)).unwrap();
        for ts in [100i64, 1100] {
            coll.insert(Document::new().with("_id", FieldValue::Time(ts)))
                .unwrap();
        }

        let monitor =
            CacheMonitor::start(engine.clone(), Duration::from_millis(5)).unwrap();

        // Two sweeps are enough: the first resets activity, the second
        // flushes. Poll rather than sleep a fixed amount.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while coll.stats().resident > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        monitor.stop();

        assert_eq!(coll.stats().resident, 0);
        assert_eq!(coll.stats().flushes, 2);
    }
}
