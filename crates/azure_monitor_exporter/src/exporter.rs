//! Export Orchestrator
//!
//! [`AzureMonitorSpanExporter`] turns a batch of spans into envelopes, hands
//! them to the [`Transport`](crate::Transport) and decides what happens next
//! based on the classified outcome:
//!
//! | transport outcome      | action                                   | result    |
//! |------------------------|------------------------------------------|-----------|
//! | `Success`              | drain one record from retry storage      | `Success` |
//! | `FailedRetryable`      | persist the batch to retry storage       | `Failure` |
//! | `FailedNotRetryable`   | drop the batch                           | `Failure` |
//! | error or panic         | log it, persist nothing                  | `Failure` |
//!
//! Nothing escapes `export` as an error or a panic.

use crate::builder::EnvelopeBuilder;
use crate::config::ExporterOptions;
use crate::envelope::Envelope;
use crate::error::ExporterError;
use crate::span::{Span, SpanBatch};
use crate::storage::LocalFileStorage;
use crate::transport::{ExportResult, TransportBoxed};
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome reported to the caller of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanExportResult {
    Success,
    Failure,
}

impl SpanExportResult {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Trait for exporting span batches to a telemetry backend.
///
/// Uses native async fn in traits instead of `#[async_trait]`.
pub trait SpanExporter: Send + Sync {
    /// Exports a batch of finished spans. Never fails with an error; failures
    /// are reported as [`SpanExportResult::Failure`].
    fn export(&self, batch: SpanBatch) -> impl Future<Output = SpanExportResult> + Send;

    /// Returns the exporter name for debugging.
    fn name(&self) -> &str;
}

/// Thread-safe export counters (uses atomics)
#[derive(Debug, Default)]
pub struct ExportMetrics {
    /// Batches the backend accepted on first transmission
    pub batches_exported: AtomicU64,
    /// Envelopes in those batches
    pub envelopes_exported: AtomicU64,
    /// Batches written to retry storage
    pub batches_persisted: AtomicU64,
    /// Batches lost: permanent failure or a failed write to storage
    pub batches_dropped: AtomicU64,
    /// Transmissions that ended in an error or a panic
    pub transport_errors: AtomicU64,
    /// Drain invocations
    pub drain_attempts: AtomicU64,
    /// Stored batches delivered and deleted
    pub batches_drained: AtomicU64,
}

impl ExportMetrics {
    pub fn batches_exported(&self) -> u64 {
        self.batches_exported.load(Ordering::Relaxed)
    }

    pub fn envelopes_exported(&self) -> u64 {
        self.envelopes_exported.load(Ordering::Relaxed)
    }

    pub fn batches_persisted(&self) -> u64 {
        self.batches_persisted.load(Ordering::Relaxed)
    }

    pub fn batches_dropped(&self) -> u64 {
        self.batches_dropped.load(Ordering::Relaxed)
    }

    pub fn transport_errors(&self) -> u64 {
        self.transport_errors.load(Ordering::Relaxed)
    }

    pub fn drain_attempts(&self) -> u64 {
        self.drain_attempts.load(Ordering::Relaxed)
    }

    pub fn batches_drained(&self) -> u64 {
        self.batches_drained.load(Ordering::Relaxed)
    }

    fn record_export(&self, envelope_count: u64) {
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
        self.envelopes_exported.fetch_add(envelope_count, Ordering::Relaxed);
    }

    fn record(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Result of a single drain invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// No record was eligible.
    Empty,
    /// A record was retransmitted and deleted.
    Delivered { envelopes: usize },
    /// A record was claimed but not delivered; its lease will lapse.
    Deferred,
}

/// Span exporter for Azure Monitor with local retry storage.
pub struct AzureMonitorSpanExporter {
    builder: EnvelopeBuilder,
    transport: Arc<dyn TransportBoxed>,
    storage: Arc<LocalFileStorage>,
    metrics: Arc<ExportMetrics>,
    shut_down: AtomicBool,
}

impl AzureMonitorSpanExporter {
    /// Validates `options`, opens the retry storage and builds the exporter.
    pub fn new(
        options: ExporterOptions,
        transport: Arc<dyn TransportBoxed>,
    ) -> Result<Self, ExporterError> {
        options.validate()?;
        let storage = LocalFileStorage::new(&options.storage_path, options.storage)?;
        info!(
            transport = transport.name(),
            storage = %storage.path().display(),
            "azure monitor exporter ready"
        );
        Ok(Self {
            builder: EnvelopeBuilder::new(options.instrumentation_key, options.result_codes),
            transport,
            storage: Arc::new(storage),
            metrics: Arc::new(ExportMetrics::default()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Exports a sequence of possibly absent spans.
    ///
    /// Absent spans are skipped. An empty sequence succeeds without touching
    /// the transport or the storage.
    pub async fn export_spans(&self, spans: &[Option<Span>]) -> SpanExportResult {
        let envelopes = spans
            .iter()
            .filter_map(|span| self.builder.span_to_envelope(span.as_ref()))
            .collect();
        self.export_envelopes(envelopes).await
    }

    /// Claims at most one record from retry storage and retransmits it.
    pub async fn drain_once(&self) -> DrainOutcome {
        self.metrics.record(&self.metrics.drain_attempts);

        let batch = match self.storage.get().await {
            Ok(Some(batch)) => batch,
            Ok(None) => return DrainOutcome::Empty,
            Err(error) => {
                warn!(%error, "failed to read retry storage");
                return DrainOutcome::Deferred;
            }
        };

        match self.transmit(batch.envelopes()).await {
            Some(ExportResult::Success) => {
                if let Err(error) = self.storage.delete(&batch).await {
                    // the lease lapses and the batch is sent again
                    warn!(record = batch.name(), %error, "failed to delete delivered batch");
                    return DrainOutcome::Deferred;
                }
                self.metrics.record(&self.metrics.batches_drained);
                info!(record = batch.name(), envelopes = batch.len(), "redelivered stored batch");
                DrainOutcome::Delivered {
                    envelopes: batch.len(),
                }
            }
            outcome => {
                debug!(record = batch.name(), ?outcome, "stored batch left for a later retry");
                DrainOutcome::Deferred
            }
        }
    }

    /// Stops accepting exports. Later calls to `export` return `Failure`
    /// without transmitting.
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            info!("azure monitor exporter shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Returns the envelope builder.
    pub fn builder(&self) -> &EnvelopeBuilder {
        &self.builder
    }

    /// Returns the retry storage, shareable with a [`StorageDrainer`](crate::StorageDrainer).
    pub fn storage(&self) -> &Arc<LocalFileStorage> {
        &self.storage
    }

    /// Returns export metrics
    pub fn metrics(&self) -> &Arc<ExportMetrics> {
        &self.metrics
    }

    async fn export_envelopes(&self, envelopes: Vec<Envelope>) -> SpanExportResult {
        if envelopes.is_empty() {
            return SpanExportResult::Success;
        }
        if self.is_shut_down() {
            warn!(envelopes = envelopes.len(), "export called after shutdown");
            return SpanExportResult::Failure;
        }

        match self.transmit(&envelopes).await {
            Some(ExportResult::Success) => {
                self.metrics.record_export(envelopes.len() as u64);
                self.drain_once().await;
                SpanExportResult::Success
            }
            Some(ExportResult::FailedRetryable) => {
                match self.storage.put(&envelopes).await {
                    Ok(record) => {
                        self.metrics.record(&self.metrics.batches_persisted);
                        info!(
                            %record,
                            envelopes = envelopes.len(),
                            "transmission failed, batch stored for retry"
                        );
                    }
                    Err(error) => {
                        self.metrics.record(&self.metrics.batches_dropped);
                        error!(
                            %error,
                            envelopes = envelopes.len(),
                            "failed to store batch for retry, batch lost"
                        );
                    }
                }
                SpanExportResult::Failure
            }
            Some(ExportResult::FailedNotRetryable) => {
                self.metrics.record(&self.metrics.batches_dropped);
                warn!(envelopes = envelopes.len(), "transmission rejected, batch dropped");
                SpanExportResult::Failure
            }
            None => SpanExportResult::Failure,
        }
    }

    /// Runs the transport, turning errors and panics into `None`.
    async fn transmit(&self, envelopes: &[Envelope]) -> Option<ExportResult> {
        let attempt = AssertUnwindSafe(async { self.transport.transmit_boxed(envelopes).await });
        match attempt.catch_unwind().await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(error)) => {
                self.metrics.record(&self.metrics.transport_errors);
                error!(
                    transport = self.transport.name(),
                    envelopes = envelopes.len(),
                    %error,
                    "transmission failed"
                );
                None
            }
            Err(payload) => {
                self.metrics.record(&self.metrics.transport_errors);
                error!(
                    transport = self.transport.name(),
                    envelopes = envelopes.len(),
                    panic = panic_message(payload.as_ref()),
                    "transport panicked"
                );
                None
            }
        }
    }
}

impl SpanExporter for AzureMonitorSpanExporter {
    async fn export(&self, batch: SpanBatch) -> SpanExportResult {
        let envelopes = batch
            .spans
            .iter()
            .filter_map(|span| self.builder.span_to_envelope(Some(span)))
            .collect();
        self.export_envelopes(envelopes).await
    }

    fn name(&self) -> &str {
        "azure_monitor"
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Transport double that replays a script of outcomes and records every batch
#[cfg(test)]
pub(crate) mod test_support {
    use crate::envelope::Envelope;
    use crate::error::TransportError;
    use crate::transport::{ExportResult, Transport};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy)]
    pub enum Step {
        Reply(ExportResult),
        Fail,
        Panic,
    }

    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Step>>,
        fallback: Step,
        sent: Mutex<Vec<Vec<Envelope>>>,
    }

    impl ScriptedTransport {
        /// Replays `script`, then answers `fallback` forever.
        pub fn new(script: impl IntoIterator<Item = Step>, fallback: Step) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                fallback,
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn always(step: Step) -> Self {
            Self::new([], step)
        }

        pub fn replying(outcome: ExportResult) -> Self {
            Self::always(Step::Reply(outcome))
        }

        pub fn calls(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        pub fn sent(&self) -> Vec<Vec<Envelope>> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        async fn transmit(&self, envelopes: &[Envelope]) -> Result<ExportResult, TransportError> {
            self.sent.lock().unwrap().push(envelopes.to_vec());
            let step = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
            match step {
                Step::Reply(outcome) => Ok(outcome),
                Step::Fail => Err(TransportError::Network("connection reset".to_string())),
                Step::Panic => panic!("transport exploded"),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{ScriptedTransport, Step};
    use super::*;
    use crate::config::StorageOptions;
    use crate::error::ConfigError;
    use crate::span::{SpanContext, SpanKind, Status};
    use std::time::Duration;
    use tempfile::TempDir;

    const KEY: &str = "1234abcd-5678-4efa-8abc-1234567890ab";

    fn span(id: u64) -> Span {
        let context = SpanContext::new(7, id);
        let mut span = Span::new(context, None, format!("op-{id}"), SpanKind::Client);
        span.finish(Status::default());
        span
    }

    fn exporter_with(
        dir: &TempDir,
        storage: StorageOptions,
        transport: Arc<ScriptedTransport>,
    ) -> AzureMonitorSpanExporter {
        let options = ExporterOptions::new(KEY)
            .with_storage_path(dir.path())
            .with_storage(storage);
        AzureMonitorSpanExporter::new(options, transport).unwrap()
    }

    fn exporter(dir: &TempDir, transport: Arc<ScriptedTransport>) -> AzureMonitorSpanExporter {
        exporter_with(dir, StorageOptions::default(), transport)
    }

    #[tokio::test]
    async fn test_empty_input_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::replying(ExportResult::FailedRetryable));
        let exporter = exporter(&dir, Arc::clone(&transport));

        assert_eq!(exporter.export_spans(&[]).await, SpanExportResult::Success);
        assert_eq!(exporter.export_spans(&[None, None]).await, SpanExportResult::Success);
        assert_eq!(exporter.export(SpanBatch::new()).await, SpanExportResult::Success);

        assert_eq!(transport.calls(), 0);
        assert_eq!(exporter.metrics().drain_attempts(), 0);
        assert!(exporter.storage().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_success_drains_exactly_once() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::replying(ExportResult::Success));
        let exporter = exporter(&dir, Arc::clone(&transport));

        let result = exporter.export_spans(&[Some(span(1)), None, Some(span(2))]).await;
        assert_eq!(result, SpanExportResult::Success);
        assert_eq!(transport.calls(), 1);
        assert_eq!(transport.sent()[0].len(), 2);
        assert_eq!(exporter.metrics().drain_attempts(), 1);
        assert_eq!(exporter.metrics().batches_exported(), 1);
        assert_eq!(exporter.metrics().envelopes_exported(), 2);
    }

    #[tokio::test]
    async fn test_retryable_failure_persists_batch() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::replying(ExportResult::FailedRetryable));
        let exporter = exporter(&dir, transport);

        let result = exporter.export(SpanBatch::with_spans(vec![span(1), span(2)])).await;
        assert_eq!(result, SpanExportResult::Failure);
        assert_eq!(exporter.storage().len().await.unwrap(), 1);
        // cooldown keeps it out of reach
        assert!(exporter.storage().get().await.unwrap().is_none());
        assert_eq!(exporter.metrics().batches_persisted(), 1);
        assert_eq!(exporter.metrics().drain_attempts(), 0);
    }

    #[tokio::test]
    async fn test_not_retryable_failure_drops_batch() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::replying(ExportResult::FailedNotRetryable));
        let exporter = exporter(&dir, transport);

        assert_eq!(exporter.export_spans(&[Some(span(1))]).await, SpanExportResult::Failure);
        assert!(exporter.storage().is_empty().await.unwrap());
        assert_eq!(exporter.metrics().batches_dropped(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_contained() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Step::Fail));
        let exporter = exporter(&dir, transport);

        assert_eq!(exporter.export_spans(&[Some(span(1))]).await, SpanExportResult::Failure);
        assert!(exporter.storage().is_empty().await.unwrap());
        assert_eq!(exporter.metrics().transport_errors(), 1);
    }

    #[tokio::test]
    async fn test_transport_panic_is_contained() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::always(Step::Panic));
        let exporter = exporter(&dir, transport);

        assert_eq!(exporter.export_spans(&[Some(span(1))]).await, SpanExportResult::Failure);
        assert!(exporter.storage().is_empty().await.unwrap());
        assert_eq!(exporter.metrics().transport_errors(), 1);
    }

    #[tokio::test]
    async fn test_successful_export_redelivers_stored_batch() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new(
            [Step::Reply(ExportResult::FailedRetryable)],
            Step::Reply(ExportResult::Success),
        ));
        let storage = StorageOptions::default().with_minimum_retry_interval(Duration::ZERO);
        let exporter = exporter_with(&dir, storage, Arc::clone(&transport));

        assert_eq!(exporter.export_spans(&[Some(span(1))]).await, SpanExportResult::Failure);
        assert_eq!(exporter.storage().len().await.unwrap(), 1);

        assert_eq!(exporter.export_spans(&[Some(span(2))]).await, SpanExportResult::Success);
        assert!(exporter.storage().is_empty().await.unwrap());
        assert_eq!(exporter.metrics().batches_drained(), 1);

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2], sent[0]);
    }

    #[tokio::test]
    async fn test_failed_drain_leaves_record() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new(
            [
                Step::Reply(ExportResult::FailedRetryable),
                Step::Reply(ExportResult::Success),
                Step::Reply(ExportResult::FailedNotRetryable),
            ],
            Step::Reply(ExportResult::Success),
        ));
        let storage = StorageOptions::default().with_minimum_retry_interval(Duration::ZERO);
        let exporter = exporter_with(&dir, storage, Arc::clone(&transport));

        exporter.export_spans(&[Some(span(1))]).await;
        assert_eq!(exporter.export_spans(&[Some(span(2))]).await, SpanExportResult::Success);

        assert_eq!(transport.calls(), 3);
        assert_eq!(exporter.storage().len().await.unwrap(), 1);
        assert_eq!(exporter.metrics().batches_drained(), 0);
        // still leased by the failed drain
        assert_eq!(exporter.drain_once().await, DrainOutcome::Empty);
    }

    #[tokio::test]
    async fn test_drain_once_on_empty_storage() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::replying(ExportResult::Success));
        let exporter = exporter(&dir, Arc::clone(&transport));

        assert_eq!(exporter.drain_once().await, DrainOutcome::Empty);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_export_after_shutdown_fails() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::replying(ExportResult::Success));
        let exporter = exporter(&dir, Arc::clone(&transport));

        exporter.shutdown();
        exporter.shutdown();
        assert!(exporter.is_shut_down());
        assert_eq!(exporter.export_spans(&[Some(span(1))]).await, SpanExportResult::Failure);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_export_after_shutdown_succeeds() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::replying(ExportResult::Success));
        let exporter = exporter(&dir, Arc::clone(&transport));

        exporter.shutdown();
        assert_eq!(exporter.export_spans(&[]).await, SpanExportResult::Success);
        assert_eq!(exporter.export_spans(&[None]).await, SpanExportResult::Success);
        assert_eq!(exporter.export(SpanBatch::new()).await, SpanExportResult::Success);
        assert_eq!(transport.calls(), 0);
        assert!(exporter.storage().is_empty().await.unwrap());
    }

    #[test]
    fn test_new_rejects_invalid_options() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::replying(ExportResult::Success));
        let options = ExporterOptions::new("not-a-key").with_storage_path(dir.path());
        let result = AzureMonitorSpanExporter::new(options, transport);
        assert!(matches!(
            result,
            Err(ExporterError::Config(ConfigError::InvalidInstrumentationKey(_)))
        ));
    }
}
