//! Span to envelope mapping.
//!
//! `Server` and `Consumer` spans become `RequestData`; every other kind
//! becomes `RemoteDependencyData`. Classification is best effort: attributes
//! that cannot be interpreted leave the corresponding fields unset instead of
//! failing the span.

use crate::classifier::{generic_properties, url_target, HttpAttributes};
use crate::codec::{format_duration, format_time, span_id_hex, trace_id_hex};
use crate::config::ResultCodeTable;
use crate::envelope::{
    Data, Envelope, LinkEntry, RemoteDependencyData, RequestData, LINKS_PROPERTY,
    OPERATION_ID_TAG, OPERATION_NAME_TAG, OPERATION_PARENT_ID_TAG, REMOTE_DEPENDENCY_ENVELOPE_NAME,
    REQUEST_ENVELOPE_NAME, REQUEST_NAME_PROPERTY, REQUEST_URL_PROPERTY,
};
use crate::span::{Link, Span, SpanKind};
use std::collections::BTreeMap;

const DATA_VERSION: i32 = 2;
const HTTP_DEPENDENCY_TYPE: &str = "HTTP";
const IN_PROC_DEPENDENCY_TYPE: &str = "InProc";

/// Builds envelopes for one instrumentation key.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    instrumentation_key: String,
    result_codes: ResultCodeTable,
}

impl EnvelopeBuilder {
    pub fn new(instrumentation_key: impl Into<String>, result_codes: ResultCodeTable) -> Self {
        Self {
            instrumentation_key: instrumentation_key.into(),
            result_codes,
        }
    }

    /// Maps a span to its envelope. `None` yields no envelope.
    pub fn span_to_envelope(&self, span: Option<&Span>) -> Option<Envelope> {
        let span = span?;

        let mut tags = BTreeMap::new();
        tags.insert(OPERATION_ID_TAG.to_string(), trace_id_hex(span.context.trace_id));
        if let Some(parent_span_id) = span.parent_span_id {
            tags.insert(OPERATION_PARENT_ID_TAG.to_string(), span_id_hex(parent_span_id));
        }

        let http = HttpAttributes::classify(&span.attributes);
        let mut properties = generic_properties(&span.attributes);
        if let Some(links) = links_property(&span.links) {
            properties.insert(LINKS_PROPERTY.to_string(), links);
        }

        let (envelope_name, data) = match span.kind {
            SpanKind::Server | SpanKind::Consumer => {
                let request = self.request_data(span, &http, properties);
                if let Some(name) = request.name.as_ref().filter(|name| !name.is_empty()) {
                    tags.insert(OPERATION_NAME_TAG.to_string(), name.clone());
                }
                (REQUEST_ENVELOPE_NAME, Data::Request(request))
            }
            SpanKind::Client | SpanKind::Internal | SpanKind::Producer => {
                let dependency = self.remote_dependency_data(span, &http, properties);
                (REMOTE_DEPENDENCY_ENVELOPE_NAME, Data::RemoteDependency(dependency))
            }
        };

        Some(Envelope::new(
            envelope_name,
            format_time(span.start_time),
            self.instrumentation_key.clone(),
            tags,
            data,
        ))
    }

    fn request_data(
        &self,
        span: &Span,
        http: &HttpAttributes<'_>,
        mut properties: BTreeMap<String, String>,
    ) -> RequestData {
        if let Some(request_name) = http.request_property_name() {
            properties.insert(REQUEST_NAME_PROPERTY.to_string(), request_name);
        }
        if let Some(url) = http.url {
            properties.insert(REQUEST_URL_PROPERTY.to_string(), url.to_string());
        }

        RequestData {
            ver: DATA_VERSION,
            id: span_id_hex(span.context.span_id),
            duration: format_duration(span.duration_nanos()),
            response_code: http.result_code(&span.status, &self.result_codes),
            success: http.is_success(&span.status),
            name: http.request_name(),
            url: http.url.map(str::to_string),
            properties,
        }
    }

    fn remote_dependency_data(
        &self,
        span: &Span,
        http: &HttpAttributes<'_>,
        properties: BTreeMap<String, String>,
    ) -> RemoteDependencyData {
        let type_ = if http.is_http() {
            Some(HTTP_DEPENDENCY_TYPE.to_string())
        } else if span.kind == SpanKind::Internal {
            Some(IN_PROC_DEPENDENCY_TYPE.to_string())
        } else {
            None
        };

        let target = http.parsed_url().as_ref().and_then(url_target);

        RemoteDependencyData {
            ver: DATA_VERSION,
            name: http.dependency_name().unwrap_or_else(|| span.name.clone()),
            id: span_id_hex(span.context.span_id),
            result_code: http.result_code(&span.status, &self.result_codes),
            duration: format_duration(span.duration_nanos()),
            success: http.is_success(&span.status),
            data: http.url.map(str::to_string),
            target,
            type_,
            properties,
        }
    }
}

/// JSON array describing the span's links, `None` when there are none.
fn links_property(links: &[Link]) -> Option<String> {
    if links.is_empty() {
        return None;
    }
    let entries: Vec<LinkEntry> = links
        .iter()
        .map(|link| LinkEntry {
            operation_id: trace_id_hex(link.context.trace_id),
            id: span_id_hex(link.context.span_id),
        })
        .collect();
    match serde_json::to_string(&entries) {
        Ok(json) => Some(json),
        Err(error) => {
            tracing::warn!(%error, "failed to encode span links, omitting {LINKS_PROPERTY}");
            None
        }
    }
}
