//! The network delivery seam.
//!
//! The exporter never performs network I/O itself. A [`Transport`] delivers
//! one batch of envelopes and classifies the outcome; timeouts and connection
//! handling are the transport's concern.

use crate::envelope::Envelope;
use crate::error::TransportError;
use std::future::Future;
use std::pin::Pin;

/// Outcome of one transmission attempt, as classified by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportResult {
    /// The backend accepted the batch.
    Success,
    /// Delivery failed but the same batch may succeed later.
    FailedRetryable,
    /// Delivery failed and resending the batch would not help.
    FailedNotRetryable,
}

/// Classifies a backend HTTP status code.
///
/// Partial acceptance (206), throttling and transient server errors are
/// retryable; every other non-200 status is not.
pub fn classify_status(status: u16) -> ExportResult {
    match status {
        200 => ExportResult::Success,
        206 | 408 | 429 | 500 | 503 => ExportResult::FailedRetryable,
        _ => ExportResult::FailedNotRetryable,
    }
}

/// Trait for delivering envelope batches to the ingestion endpoint.
///
/// Uses native async fn in traits instead of `#[async_trait]`. For dynamic
/// dispatch use [`TransportBoxed`], which every `Transport` implements.
pub trait Transport: Send + Sync {
    /// Sends one batch. `Err` stands for a failure the transport could not
    /// classify; the exporter reports it and does not persist the batch.
    fn transmit(
        &self,
        envelopes: &[Envelope],
    ) -> impl Future<Output = Result<ExportResult, TransportError>> + Send;

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of [`Transport`].
pub trait TransportBoxed: Send + Sync {
    /// Sends one batch (boxed future for object safety).
    fn transmit_boxed<'a>(
        &'a self,
        envelopes: &'a [Envelope],
    ) -> Pin<Box<dyn Future<Output = Result<ExportResult, TransportError>> + Send + 'a>>;

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// Blanket implementation: any Transport can be used as TransportBoxed
impl<T: Transport> TransportBoxed for T {
    fn transmit_boxed<'a>(
        &'a self,
        envelopes: &'a [Envelope],
    ) -> Pin<Box<dyn Future<Output = Result<ExportResult, TransportError>> + Send + 'a>> {
        Box::pin(self.transmit(envelopes))
    }

    fn name(&self) -> &str {
        Transport::name(self)
    }
}

/// Prints envelopes as JSON lines, for local debugging.
pub struct StdoutTransport {
    verbose: bool,
}

impl StdoutTransport {
    /// Creates a new stdout transport
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Transport for StdoutTransport {
    async fn transmit(&self, envelopes: &[Envelope]) -> Result<ExportResult, TransportError> {
        if self.verbose {
            println!("=== Transmitting {} envelopes ===", envelopes.len());
            for envelope in envelopes {
                let line = serde_json::to_string(envelope)
                    .map_err(|e| TransportError::Serialization(e.to_string()))?;
                println!("{line}");
            }
            println!("=== Transmission complete ===\n");
        }
        Ok(ExportResult::Success)
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Accepts and discards every batch.
pub struct NullTransport;

impl NullTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for NullTransport {
    async fn transmit(&self, _envelopes: &[Envelope]) -> Result<ExportResult, TransportError> {
        Ok(ExportResult::Success)
    }

    fn name(&self) -> &str {
        "null"
    }
}
