//! # Azure Monitor Exporter Demo
//!
//! Drives the exporter against a simulated ingestion endpoint that throttles,
//! rejects and drops requests at random, then shows how the retry storage
//! absorbs the transient failures and redelivers them.
//!
//! ## Features Demonstrated
//!
//! - A custom `Transport` using native async traits (`SimulatedIngestion`)
//! - HTTP status classification with `classify_status`
//! - Request and dependency envelopes built from HTTP, messaging and
//!   in-process spans
//! - Retry storage with a short cooldown plus a background `StorageDrainer`
//! - Export metrics and graceful shutdown
//!
//! ## Running
//!
//! ```bash
//! # Quick mode (2 services, 10 batches each)
//! cargo run -p azure_monitor_exporter --bin demo -- --quick
//!
//! # Print every envelope the endpoint accepts
//! cargo run -p azure_monitor_exporter --bin demo -- --verbose
//!
//! # More detail from the exporter itself
//! RUST_LOG=azure_monitor_exporter=debug cargo run -p azure_monitor_exporter --bin demo
//! ```

use azure_monitor_exporter::{
    classify_status, init_logging, AttributeValue, AzureMonitorSpanExporter, CanonicalCode,
    DrainerConfig, Envelope, ExportResult, ExporterOptions, Link, Span, SpanBatch, SpanContext,
    SpanExporter, SpanKind, Status, StorageDrainer, StorageOptions, Transport, TransportError,
};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const DEMO_INSTRUMENTATION_KEY: &str = "00000000-0000-4000-8000-000000000000";

// =============================================================================
// SIMULATED INGESTION ENDPOINT
// =============================================================================

/// An ingestion endpoint that answers with a random HTTP status.
struct SimulatedIngestion {
    /// Probability of a retryable answer (429/503)
    throttle_rate: f64,
    /// Probability of a permanent rejection (400)
    reject_rate: f64,
    /// Probability of a connection error
    error_rate: f64,
    latency: Duration,
    verbose: bool,
    attempts: AtomicU64,
    accepted_envelopes: AtomicU64,
}

impl SimulatedIngestion {
    fn new(
        throttle_rate: f64,
        reject_rate: f64,
        error_rate: f64,
        latency: Duration,
        verbose: bool,
    ) -> Self {
        Self {
            throttle_rate,
            reject_rate,
            error_rate,
            latency,
            verbose,
            attempts: AtomicU64::new(0),
            accepted_envelopes: AtomicU64::new(0),
        }
    }

    fn roll_status(&self) -> Result<u16, TransportError> {
        let roll: f64 = rand::thread_rng().gen();
        if roll < self.error_rate {
            return Err(TransportError::Network("simulated connection reset".to_string()));
        }
        let roll = roll - self.error_rate;
        if roll < self.throttle_rate {
            return Ok(if roll < self.throttle_rate / 2.0 { 429 } else { 503 });
        }
        if roll - self.throttle_rate < self.reject_rate {
            return Ok(400);
        }
        Ok(200)
    }
}

impl Transport for SimulatedIngestion {
    async fn transmit(&self, envelopes: &[Envelope]) -> Result<ExportResult, TransportError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;

        let outcome = classify_status(self.roll_status()?);
        if outcome == ExportResult::Success {
            self.accepted_envelopes
                .fetch_add(envelopes.len() as u64, Ordering::Relaxed);
            if self.verbose {
                for envelope in envelopes {
                    let line = serde_json::to_string(envelope)
                        .map_err(|e| TransportError::Serialization(e.to_string()))?;
                    println!("  ← {line}");
                }
            }
        }
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "simulated_ingestion"
    }
}

// =============================================================================
// SPAN GENERATION
// =============================================================================

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// One inbound request with an outbound HTTP call and an in-process step.
fn generate_trace(service: usize, seq: usize) -> Vec<Span> {
    let mut rng = rand::thread_rng();
    let trace_id: u128 = rng.gen();
    let start = now_nanos();

    let root_context = SpanContext::new(trace_id, rng.gen());
    let mut server = Span::new(root_context, None, "GET /orders/{id}", SpanKind::Server)
        .with_start_time(start);
    server.set_attribute("component", "http");
    server.set_attribute("http.method", "GET");
    server.set_attribute("http.route", "/orders/{id}");
    server.set_attribute("http.url", format!("https://shop.example.com/orders/{seq}"));
    server.set_attribute("service.instance", service as i64);

    let mut client = Span::new(
        SpanContext::new(trace_id, rng.gen()),
        Some(root_context.span_id),
        "inventory lookup",
        SpanKind::Client,
    )
    .with_start_time(start + 1_000_000);
    client.set_attribute("component", "http");
    client.set_attribute("http.method", "GET");
    client.set_attribute(
        "http.url",
        format!("https://inventory.internal:8443/items/{seq}?fields=stock"),
    );

    let mut internal = Span::new(
        SpanContext::new(trace_id, rng.gen()),
        Some(root_context.span_id),
        "price calculation",
        SpanKind::Internal,
    )
    .with_start_time(start + 2_000_000);
    internal.set_attribute("cache.hit", rng.gen_bool(0.7));

    let failed = rng.gen_bool(0.1);
    let client_status = if failed {
        client.set_attribute("http.status_code", 503_i64);
        Status {
            canonical_code: CanonicalCode::Unavailable,
            description: Some("inventory unavailable".to_string()),
        }
    } else {
        client.set_attribute("http.status_code", 200_i64);
        Status::default()
    };
    server.set_attribute("http.status_code", if failed { 502_i64 } else { 200_i64 });

    client.finish_at(start + rng.gen_range(3_000_000..40_000_000), client_status);
    internal.finish_at(start + 2_500_000, Status::default());
    server.finish_at(
        start + 45_000_000,
        if failed {
            Status::new(CanonicalCode::Internal)
        } else {
            Status::default()
        },
    );

    if rng.gen_bool(0.2) {
        // follow-up work triggered by this request
        let mut producer = Span::new(
            SpanContext::new(rng.gen(), rng.gen()),
            None,
            "publish order.viewed",
            SpanKind::Producer,
        )
        .with_start_time(start + 46_000_000);
        producer.add_link(Link::new(root_context));
        producer.set_attribute("messaging.system", AttributeValue::from("servicebus"));
        producer.finish_at(start + 47_000_000, Status::default());
        return vec![server, client, internal, producer];
    }

    vec![server, client, internal]
}

async fn run_service(
    service: usize,
    exporter: Arc<AzureMonitorSpanExporter>,
    batches: usize,
    traces_per_batch: usize,
) -> (usize, usize) {
    let mut succeeded = 0;
    let mut failed = 0;
    for seq in 0..batches {
        let mut batch = SpanBatch::new();
        for trace in 0..traces_per_batch {
            for span in generate_trace(service, seq * traces_per_batch + trace) {
                batch.add(span);
            }
        }
        if exporter.export(batch).await.is_success() {
            succeeded += 1;
        } else {
            failed += 1;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    (succeeded, failed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging()?;

    let args: Vec<String> = std::env::args().collect();
    let verbose = args.contains(&"--verbose".to_string());
    let quick = args.contains(&"--quick".to_string());

    let (services, batches, traces_per_batch) = if quick { (2, 10, 3) } else { (4, 40, 5) };

    print_banner();

    let storage_path =
        std::env::temp_dir().join(format!("azure-monitor-demo-{}", std::process::id()));
    let options = ExporterOptions::new(DEMO_INSTRUMENTATION_KEY)
        .with_storage_path(&storage_path)
        .with_storage(
            StorageOptions::default()
                .with_minimum_retry_interval(Duration::from_millis(200))
                .with_claim_lease(Duration::from_secs(2)),
        );

    let ingestion = Arc::new(SimulatedIngestion::new(
        0.25,
        0.05,
        0.05,
        Duration::from_millis(5),
        verbose,
    ));
    let exporter = Arc::new(AzureMonitorSpanExporter::new(options, ingestion.clone())?);
    let drainer = StorageDrainer::spawn(
        Arc::clone(&exporter),
        DrainerConfig::default()
            .with_interval(Duration::from_millis(100))
            .with_records_per_tick(4),
    );

    println!("Storage:   {}", storage_path.display());
    println!("Services:  {services} × {batches} batches × {traces_per_batch} traces\n");

    let started = Instant::now();
    let mut handles = Vec::new();
    for service in 0..services {
        let exporter = Arc::clone(&exporter);
        handles.push(tokio::spawn(run_service(service, exporter, batches, traces_per_batch)));
    }

    let mut succeeded = 0;
    let mut failed = 0;
    for handle in handles {
        let (ok, err) = handle.await?;
        succeeded += ok;
        failed += err;
    }

    // let the drainer work through the backlog
    let settle_deadline = Instant::now() + Duration::from_secs(5);
    while !exporter.storage().is_empty().await? && Instant::now() < settle_deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    drainer.shutdown().await?;
    exporter.shutdown();

    let pending = exporter.storage().len().await?;
    let metrics = exporter.metrics();
    let elapsed = started.elapsed();

    println!("\n═══════════════════════════════════════════════════════");
    println!("                     FINAL STATISTICS");
    println!("═══════════════════════════════════════════════════════");
    println!("  Export calls:           {:>8} ok / {:>4} failed", succeeded, failed);
    println!("  Transmission attempts:  {:>8}", ingestion.attempts.load(Ordering::Relaxed));
    println!(
        "  Envelopes accepted:     {:>8}",
        ingestion.accepted_envelopes.load(Ordering::Relaxed)
    );
    println!("  Batches exported:       {:>8}", metrics.batches_exported());
    println!("  Batches persisted:      {:>8}", metrics.batches_persisted());
    println!("  Batches redelivered:    {:>8}", metrics.batches_drained());
    println!("  Batches dropped:        {:>8}", metrics.batches_dropped());
    println!("  Transport errors:       {:>8}", metrics.transport_errors());
    println!("  Drain attempts:         {:>8}", metrics.drain_attempts());
    println!("  Still in storage:       {:>8}", pending);
    println!("  Elapsed:                {:>8.2?}", elapsed);
    println!("═══════════════════════════════════════════════════════");

    if pending == 0 {
        std::fs::remove_dir_all(&storage_path)?;
    } else {
        println!("\nUndelivered batches remain in {}", storage_path.display());
    }

    Ok(())
}

fn print_banner() {
    println!("╔═══════════════════════════════════════════════════════╗");
    println!("║          Azure Monitor Span Exporter Demo             ║");
    println!("║   flaky ingestion endpoint + local retry storage      ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");
}
