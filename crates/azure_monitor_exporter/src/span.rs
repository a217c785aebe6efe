use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Identity of a span within a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanContext {
    /// Trace identifier (128-bit)
    pub trace_id: u128,
    /// Span identifier (64-bit)
    pub span_id: u64,
    /// True when the context was propagated from another process
    pub is_remote: bool,
}

impl SpanContext {
    pub fn new(trace_id: u128, span_id: u64) -> Self {
        Self {
            trace_id,
            span_id,
            is_remote: false,
        }
    }
}

/// A finished span as handed over by the tracing SDK.
///
/// The exporter never mutates spans; the setters below exist for the SDK glue
/// and for tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Identity of this span
    pub context: SpanContext,
    /// Parent span identifier, `None` for a root span
    pub parent_span_id: Option<u64>,
    /// Operation name
    pub name: String,
    /// Span kind
    pub kind: SpanKind,
    /// Span start time (Unix nanoseconds)
    pub start_time: u64,
    /// Span end time (Unix nanoseconds), unset until the span completes
    pub end_time: Option<u64>,
    /// Span status
    pub status: Status,
    /// Span attributes, ordered by key
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Links to other spans
    pub links: Vec<Link>,
}

/// Scalar attribute values carried by a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl AttributeValue {
    /// Borrows the value if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of the value. Strings holding a decimal integer qualify.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Canonical outcome codes (the gRPC status registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

/// Span execution status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub canonical_code: CanonicalCode,
    pub description: Option<String>,
}

impl Status {
    pub fn new(canonical_code: CanonicalCode) -> Self {
        Self {
            canonical_code,
            description: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.canonical_code == CanonicalCode::Ok
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new(CanonicalCode::Ok)
    }
}

/// Span kind according to OpenTelemetry specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    /// Internal operation span
    Internal,
    /// Server-side RPC span
    Server,
    /// Client-side RPC span
    Client,
    /// Producer span (messaging)
    Producer,
    /// Consumer span (messaging)
    Consumer,
}

/// A reference from one span to another span's context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub context: SpanContext,
}

impl Link {
    pub fn new(context: SpanContext) -> Self {
        Self { context }
    }
}

/// Batch of spans handed to the exporter in one call
#[derive(Debug, Clone)]
pub struct SpanBatch {
    /// All spans in this batch
    pub spans: Vec<Span>,
    /// Batch creation timestamp
    pub timestamp: SystemTime,
}

fn unix_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

impl Span {
    /// Creates a started, not yet ended span.
    pub fn new(
        context: SpanContext,
        parent_span_id: Option<u64>,
        name: impl Into<String>,
        kind: SpanKind,
    ) -> Self {
        Self {
            context,
            parent_span_id,
            name: name.into(),
            kind,
            start_time: unix_nanos_now(),
            end_time: None,
            status: Status::default(),
            attributes: BTreeMap::new(),
            links: Vec::new(),
        }
    }

    /// Overrides the start timestamp.
    pub fn with_start_time(mut self, start_time: u64) -> Self {
        self.start_time = start_time;
        self
    }

    /// Marks the span as completed now with the given status
    pub fn finish(&mut self, status: Status) {
        self.end_time = Some(unix_nanos_now().max(self.start_time));
        self.status = status;
    }

    /// Marks the span as completed at an explicit timestamp.
    pub fn finish_at(&mut self, end_time: u64, status: Status) {
        self.end_time = Some(end_time);
        self.status = status;
    }

    /// Adds an attribute to the span
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Adds a link to another span
    pub fn add_link(&mut self, link: Link) {
        self.links.push(link);
    }

    /// Duration of the span in nanoseconds; zero while the span is open.
    pub fn duration_nanos(&self) -> u64 {
        self.end_time
            .map_or(0, |end| end.saturating_sub(self.start_time))
    }
}

impl SpanBatch {
    /// Creates a new empty span batch
    pub fn new() -> Self {
        Self {
            spans: Vec::new(),
            timestamp: SystemTime::now(),
        }
    }

    /// Creates a batch with the given spans
    pub fn with_spans(spans: Vec<Span>) -> Self {
        Self {
            spans,
            timestamp: SystemTime::now(),
        }
    }

    /// Adds a span to the batch
    pub fn add(&mut self, span: Span) {
        self.spans.push(span);
    }

    /// Returns the number of spans in the batch
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Returns true if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

impl Default for SpanBatch {
    fn default() -> Self {
        Self::new()
    }
}
