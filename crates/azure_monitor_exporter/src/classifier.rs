//! HTTP semantic-convention attribute recognition.
//!
//! The five `http.*` keys below are consumed to compute envelope fields and
//! never reach the property bag. Every other attribute, `component` included,
//! is copied through as a string.

use crate::config::ResultCodeTable;
use crate::span::{AttributeValue, Status};
use std::collections::BTreeMap;
use url::Url;

pub const COMPONENT: &str = "component";
pub const HTTP_METHOD: &str = "http.method";
pub const HTTP_URL: &str = "http.url";
pub const HTTP_STATUS_CODE: &str = "http.status_code";
pub const HTTP_PATH: &str = "http.path";
pub const HTTP_ROUTE: &str = "http.route";

const HTTP_COMPONENT: &str = "http";

const CONSUMED_KEYS: [&str; 5] = [HTTP_METHOD, HTTP_URL, HTTP_STATUS_CODE, HTTP_PATH, HTTP_ROUTE];

/// Returns true for attribute keys that feed computed fields instead of the
/// property bag.
fn is_consumed(key: &str) -> bool {
    CONSUMED_KEYS.contains(&key)
}

/// Copies every non-consumed attribute into a string property bag.
pub fn generic_properties(
    attributes: &BTreeMap<String, AttributeValue>,
) -> BTreeMap<String, String> {
    attributes
        .iter()
        .filter(|(key, _)| !is_consumed(key))
        .map(|(key, value)| (key.clone(), value.to_string()))
        .collect()
}

/// The recognized HTTP attributes of one span.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpAttributes<'a> {
    pub component: Option<&'a str>,
    /// Uppercased request method
    pub method: Option<String>,
    pub url: Option<&'a str>,
    pub status_code: Option<i64>,
    pub path: Option<&'a str>,
    pub route: Option<&'a str>,
}

impl<'a> HttpAttributes<'a> {
    /// Extracts the recognized keys. Values of an unexpected type are ignored.
    pub fn classify(attributes: &'a BTreeMap<String, AttributeValue>) -> Self {
        let text = |key: &str| attributes.get(key).and_then(AttributeValue::as_str);
        Self {
            component: text(COMPONENT),
            method: text(HTTP_METHOD).map(str::to_uppercase),
            url: text(HTTP_URL),
            status_code: attributes.get(HTTP_STATUS_CODE).and_then(AttributeValue::as_i64),
            path: text(HTTP_PATH),
            route: text(HTTP_ROUTE),
        }
    }

    /// True when the `component` attribute marks the span as HTTP.
    pub fn is_http(&self) -> bool {
        self.component
            .is_some_and(|c| c.eq_ignore_ascii_case(HTTP_COMPONENT))
    }

    /// Parsed `http.url`, if present and well formed.
    pub fn parsed_url(&self) -> Option<Url> {
        self.url.and_then(|raw| Url::parse(raw).ok())
    }

    /// `<METHOD>/<url path>` for outbound calls.
    pub fn dependency_name(&self) -> Option<String> {
        let method = self.method.as_deref()?;
        let url = self.parsed_url()?;
        Some(format!("{method}/{}", url.path()))
    }

    /// `<METHOD> <ROUTE>`, or `<METHOD>` alone when no route is known.
    pub fn request_name(&self) -> Option<String> {
        let method = self.method.as_deref()?;
        Some(match self.route {
            Some(route) => format!("{method} {route}"),
            None => method.to_string(),
        })
    }

    /// `<METHOD> <ROUTE-or-PATH>` for the `request.name` property.
    pub fn request_property_name(&self) -> Option<String> {
        let method = self.method.as_deref()?;
        let target = self.route.or(self.path)?;
        Some(format!("{method} {target}"))
    }

    /// Result code reported to the backend: the HTTP status code when known,
    /// otherwise the mapping of the canonical status.
    pub fn result_code(&self, status: &Status, table: &ResultCodeTable) -> String {
        match self.status_code {
            Some(code) => code.to_string(),
            None => table.lookup(status.canonical_code),
        }
    }

    /// A call succeeded when its status is `Ok` and no HTTP error code was seen.
    pub fn is_success(&self, status: &Status) -> bool {
        status.is_ok() && self.status_code.map_or(true, |code| code < 400)
    }
}

/// Network location of a URL: host, plus the port when it is not the
/// scheme's default. An explicit default port is dropped, so
/// `https://example.com:443/a/b` gives `example.com`. A relative `http.url`
/// never parses, so such a span has no target and keeps its own name.
pub fn url_target(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
