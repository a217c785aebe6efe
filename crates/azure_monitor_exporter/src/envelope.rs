//! Wire types of the Application Insights ingestion schema.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Envelope name for outbound-call telemetry.
pub const REMOTE_DEPENDENCY_ENVELOPE_NAME: &str = "Microsoft.ApplicationInsights.RemoteDependency";
/// Envelope name for inbound-request telemetry.
pub const REQUEST_ENVELOPE_NAME: &str = "Microsoft.ApplicationInsights.Request";

pub const REMOTE_DEPENDENCY_BASE_TYPE: &str = "RemoteDependencyData";
pub const REQUEST_BASE_TYPE: &str = "RequestData";

pub const OPERATION_ID_TAG: &str = "ai.operation.id";
pub const OPERATION_PARENT_ID_TAG: &str = "ai.operation.parentId";
pub const OPERATION_NAME_TAG: &str = "ai.operation.name";

/// Property holding the JSON-encoded span links.
pub const LINKS_PROPERTY: &str = "_MS.links";
pub const REQUEST_NAME_PROPERTY: &str = "request.name";
pub const REQUEST_URL_PROPERTY: &str = "request.url";

const ENVELOPE_VERSION: i32 = 1;
const DATA_VERSION: i32 = 2;

fn envelope_version() -> i32 {
    ENVELOPE_VERSION
}

fn data_version() -> i32 {
    DATA_VERSION
}

/// One unit of telemetry sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "envelope_version")]
    pub ver: i32,
    /// Envelope type discriminator
    pub name: String,
    /// Start time, `YYYY-MM-DDTHH:MM:SS.ffffffZ`
    pub time: String,
    /// Instrumentation key
    #[serde(rename = "iKey")]
    pub ikey: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub data: Data,
}

impl Envelope {
    pub fn new(
        name: &str,
        time: String,
        ikey: String,
        tags: BTreeMap<String, String>,
        data: Data,
    ) -> Self {
        Self {
            ver: ENVELOPE_VERSION,
            name: name.to_string(),
            time,
            ikey,
            tags,
            data,
        }
    }
}

/// Typed payload of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "baseType", content = "baseData")]
pub enum Data {
    #[serde(rename = "RemoteDependencyData")]
    RemoteDependency(RemoteDependencyData),
    #[serde(rename = "RequestData")]
    Request(RequestData),
}

impl Data {
    /// The `baseType` discriminator of this payload.
    pub fn base_type(&self) -> &'static str {
        match self {
            Self::RemoteDependency(_) => REMOTE_DEPENDENCY_BASE_TYPE,
            Self::Request(_) => REQUEST_BASE_TYPE,
        }
    }

    pub fn as_remote_dependency(&self) -> Option<&RemoteDependencyData> {
        match self {
            Self::RemoteDependency(data) => Some(data),
            Self::Request(_) => None,
        }
    }

    pub fn as_request(&self) -> Option<&RequestData> {
        match self {
            Self::Request(data) => Some(data),
            Self::RemoteDependency(_) => None,
        }
    }

    /// Property bag of either payload.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        match self {
            Self::RemoteDependency(data) => &data.properties,
            Self::Request(data) => &data.properties,
        }
    }
}

/// Outbound call telemetry (client, producer and in-process spans).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDependencyData {
    #[serde(default = "data_version")]
    pub ver: i32,
    pub name: String,
    pub id: String,
    pub result_code: String,
    /// `<days>.<HH>:<MM>:<SS>.<fff>`
    pub duration: String,
    pub success: bool,
    /// Command or URL of the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Network location of the callee
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Dependency type, `HTTP` or `InProc`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// Inbound request telemetry (server and consumer spans).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    #[serde(default = "data_version")]
    pub ver: i32,
    pub id: String,
    pub duration: String,
    pub response_code: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// One entry of the `_MS.links` property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub operation_id: String,
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_envelope() -> Envelope {
        let mut tags = BTreeMap::new();
        tags.insert(OPERATION_ID_TAG.to_string(), "1bbd944a73a05d89eab5d3740a213ee7".to_string());
        Envelope::new(
            REQUEST_ENVELOPE_NAME,
            "2019-12-04T21:18:36.027613Z".to_string(),
            "12345678-1234-5678-abcd-12345678abcd".to_string(),
            tags,
            Data::Request(RequestData {
                ver: 2,
                id: "a6f5d48acb4d31d9".to_string(),
                duration: "0.00:00:01.001".to_string(),
                response_code: "200".to_string(),
                success: true,
                name: Some("GET /wiki/Rabbit".to_string()),
                url: None,
                properties: BTreeMap::new(),
            }),
        )
    }

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(request_envelope()).unwrap();
        assert_eq!(
            value,
            json!({
                "ver": 1,
                "name": "Microsoft.ApplicationInsights.Request",
                "time": "2019-12-04T21:18:36.027613Z",
                "iKey": "12345678-1234-5678-abcd-12345678abcd",
                "tags": {"ai.operation.id": "1bbd944a73a05d89eab5d3740a213ee7"},
                "data": {
                    "baseType": "RequestData",
                    "baseData": {
                        "ver": 2,
                        "id": "a6f5d48acb4d31d9",
                        "duration": "0.00:00:01.001",
                        "responseCode": "200",
                        "success": true,
                        "name": "GET /wiki/Rabbit"
                    }
                }
            })
        );
    }

    #[test]
    fn test_dependency_type_field_name() {
        let data = Data::RemoteDependency(RemoteDependencyData {
            ver: 2,
            name: "test".to_string(),
            id: "a6f5d48acb4d31d9".to_string(),
            result_code: "0".to_string(),
            duration: "0.00:00:00.000".to_string(),
            success: true,
            data: None,
            target: None,
            type_: Some("InProc".to_string()),
            properties: BTreeMap::new(),
        });
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["baseType"], "RemoteDependencyData");
        assert_eq!(value["baseData"]["type"], "InProc");
        assert_eq!(value["baseData"]["resultCode"], "0");
        assert!(value["baseData"].get("target").is_none());
        assert_eq!(data.base_type(), REMOTE_DEPENDENCY_BASE_TYPE);
    }
}
