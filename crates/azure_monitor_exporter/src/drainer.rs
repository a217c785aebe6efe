//! Background drain of the retry storage.
//!
//! Successful exports already drain one stored batch each. When traffic is
//! sparse that is not enough to empty the storage, so [`StorageDrainer`]
//! drains one record per tick on its own task. Both paths claim records
//! through the storage, so they never deliver the same record concurrently.

use crate::exporter::{AzureMonitorSpanExporter, DrainOutcome};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Shortest interval between drain ticks.
pub const MIN_DRAIN_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the background drainer
#[derive(Debug, Clone)]
pub struct DrainerConfig {
    /// Time between drain attempts. Values below [`MIN_DRAIN_INTERVAL`]
    /// are raised to it.
    ///
    /// Default: 30s
    pub interval: Duration,
    /// Records to drain per tick before waiting again. A tick stops early
    /// when the storage has nothing eligible.
    ///
    /// Default: 1
    pub records_per_tick: usize,
}

impl Default for DrainerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            records_per_tick: 1,
        }
    }
}

impl DrainerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_DRAIN_INTERVAL);
        self
    }

    pub fn with_records_per_tick(mut self, records: usize) -> Self {
        self.records_per_tick = records.max(1);
        self
    }
}

#[derive(Debug, Error)]
pub enum DrainerError {
    #[error("drainer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Handle to a running background drain task.
pub struct StorageDrainer {
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl StorageDrainer {
    /// Spawns the drain loop on the current tokio runtime.
    pub fn spawn(exporter: Arc<AzureMonitorSpanExporter>, config: DrainerConfig) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.interval.max(MIN_DRAIN_INTERVAL));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for _ in 0..config.records_per_tick {
                            match exporter.drain_once().await {
                                DrainOutcome::Delivered { envelopes } => {
                                    debug!(envelopes, "background drain delivered a batch");
                                }
                                DrainOutcome::Empty | DrainOutcome::Deferred => break,
                            }
                        }
                    }

                    _ = &mut shutdown_rx => {
                        info!("storage drainer stopped");
                        break;
                    }
                }
            }
        });

        Self {
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Stops the loop and waits for the task to finish. A drain in progress
    /// completes first.
    pub async fn shutdown(mut self) -> Result<(), DrainerError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }
}

impl Drop for StorageDrainer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExporterOptions, StorageOptions};
    use crate::exporter::test_support::{ScriptedTransport, Step};
    use crate::exporter::SpanExportResult;
    use crate::span::{Span, SpanContext, SpanKind, Status};
    use crate::transport::ExportResult;
    use tempfile::TempDir;

    const KEY: &str = "1234abcd-5678-4efa-8abc-1234567890ab";

    #[tokio::test]
    async fn test_drainer_empties_storage() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new(
            [
                Step::Reply(ExportResult::FailedRetryable),
                Step::Reply(ExportResult::FailedRetryable),
            ],
            Step::Reply(ExportResult::Success),
        ));
        let options = ExporterOptions::new(KEY)
            .with_storage_path(dir.path())
            .with_storage(StorageOptions::default().with_minimum_retry_interval(Duration::ZERO));
        let exporter = Arc::new(AzureMonitorSpanExporter::new(options, transport.clone()).unwrap());

        for id in 1..=2 {
            let mut span = Span::new(SpanContext::new(1, id), None, "op", SpanKind::Internal);
            span.finish(Status::default());
            assert_eq!(exporter.export_spans(&[Some(span)]).await, SpanExportResult::Failure);
        }
        assert_eq!(exporter.storage().len().await.unwrap(), 2);

        let drainer = StorageDrainer::spawn(
            Arc::clone(&exporter),
            DrainerConfig::default()
                .with_interval(Duration::from_millis(10))
                .with_records_per_tick(4),
        );

        let mut remaining = 2;
        for _ in 0..100 {
            remaining = exporter.storage().len().await.unwrap();
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drainer.shutdown().await.unwrap();

        assert_eq!(remaining, 0);
        assert_eq!(exporter.metrics().batches_drained(), 2);
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_drainer() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::replying(ExportResult::Success));
        let options = ExporterOptions::new(KEY).with_storage_path(dir.path());
        let exporter = Arc::new(AzureMonitorSpanExporter::new(options, transport).unwrap());

        let drainer = StorageDrainer::spawn(Arc::clone(&exporter), DrainerConfig::default());
        drainer.shutdown().await.unwrap();
        // the first tick fires immediately
        assert!(exporter.metrics().drain_attempts() <= 1);
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let config = DrainerConfig::default().with_interval(Duration::ZERO);
        assert_eq!(config.interval, MIN_DRAIN_INTERVAL);

        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::replying(ExportResult::Success));
        let options = ExporterOptions::new(KEY).with_storage_path(dir.path());
        let exporter = Arc::new(AzureMonitorSpanExporter::new(options, transport).unwrap());

        // a zero interval set directly on the field must not kill the task
        let config = DrainerConfig {
            interval: Duration::ZERO,
            records_per_tick: 1,
        };
        let drainer = StorageDrainer::spawn(Arc::clone(&exporter), config);
        tokio::time::sleep(Duration::from_millis(20)).await;
        drainer.shutdown().await.unwrap();
        assert!(exporter.metrics().drain_attempts() >= 1);
    }
}
