//! Azure Monitor Span Exporter
//!
//! Exports finished distributed-tracing spans to Azure Monitor / Application
//! Insights. Each span becomes one envelope: server and consumer spans are
//! reported as requests, everything else as remote dependencies. Batches the
//! backend could not take right now are parked in a directory-backed retry
//! queue and redelivered after a cooldown.
//!
//! ```text
//!  spans ─► EnvelopeBuilder ─► Transport ──► Success ──► drain one stored batch
//!                                   │
//!                                   ├─► FailedRetryable ──► LocalFileStorage::put
//!                                   └─► FailedNotRetryable / error ──► dropped
//! ```
//!
//! Network I/O lives behind the [`Transport`] trait; this crate decides what
//! to send and what to do with the outcome.
//!
//! # Async Traits
//!
//! Uses native async traits (no `#[async_trait]` macro). [`TransportBoxed`]
//! is the object-safe twin used for dynamic dispatch.

pub mod builder;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod drainer;
pub mod envelope;
pub mod error;
pub mod exporter;
pub mod logging;
pub mod span;
pub mod storage;
pub mod transport;

// Re-export main types
pub use builder::EnvelopeBuilder;
pub use config::{ExporterOptions, ResultCodeTable, StorageOptions, INSTRUMENTATION_KEY_ENV};
pub use drainer::{DrainerConfig, DrainerError, StorageDrainer};
pub use envelope::{Data, Envelope, LinkEntry, RemoteDependencyData, RequestData};
pub use error::{ConfigError, ExporterError, StorageError, TransportError};
pub use exporter::{
    AzureMonitorSpanExporter, DrainOutcome, ExportMetrics, SpanExportResult, SpanExporter,
};
pub use logging::{init_logging, LoggingError};
pub use span::{AttributeValue, CanonicalCode, Link, Span, SpanBatch, SpanContext, SpanKind, Status};
pub use storage::{LocalFileStorage, PendingBatch};
pub use transport::{
    classify_status, ExportResult, NullTransport, StdoutTransport, Transport, TransportBoxed,
};
