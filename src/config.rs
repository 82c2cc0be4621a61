//! Session configuration and provider settings.
//!
//! The session configuration is fetched once per session from the config endpoint and is
//! read-only afterwards. Classification attributes are modelled as the four well-known typed
//! fields plus an open-ended map of string/number extension attributes.

use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::collections::BTreeMap;
use typed_builder::TypedBuilder;

/// Where the session configuration lives unless the settings say otherwise.
pub const DEFAULT_CONFIG_URL: &str = "https://www.fastly-insights.com/api/v1/config";

/// Reported in beacons as `test_lib_version` unless overridden.
pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Settings the site owner initialises the provider with.
///
/// Empty strings count as unset, so a blank `config_url` still falls back to
/// [`DEFAULT_CONFIG_URL`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct ProviderSettings {
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    pub config_url: Option<String>,
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    pub library_version: Option<String>,
}

impl ProviderSettings {
    pub fn config_url(&self) -> &str {
        non_empty(self.config_url.as_deref()).unwrap_or(DEFAULT_CONFIG_URL)
    }

    pub fn library_version(&self) -> &str {
        non_empty(self.library_version.as_deref()).unwrap_or(LIBRARY_VERSION)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// A classification attribute value: attributes are either strings or numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(Number),
    Text(String),
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a == b,
                _ => a.as_f64() == b.as_f64(),
            },
            _ => false,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

/// The live client's own classification attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub country_code: String,
    pub asn: u32,
    pub connection_type: String,
    pub device_type: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, AttributeValue>,
}

impl Client {
    /// Look up an attribute by name, well-known or extension.
    pub fn attribute(&self, name: &str) -> Option<AttributeValue> {
        match name {
            "country_code" => Some(self.country_code.as_str().into()),
            "asn" => Some(self.asn.into()),
            "connection_type" => Some(self.connection_type.as_str().into()),
            "device_type" => Some(self.device_type.as_str().into()),
            other => self.extra.get(other).cloned(),
        }
    }
}

/// Per-attribute allow-lists. An attribute that is absent (or `null`) is unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskClassification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Option<Vec<AttributeValue>>>,
}

impl TaskClassification {
    /// Every constrained attribute with its allow-list.
    pub fn constraints(&self) -> Vec<(&str, Vec<AttributeValue>)> {
        let mut constraints = Vec::new();
        if let Some(values) = &self.country_code {
            constraints.push(("country_code", text_values(values)));
        }
        if let Some(values) = &self.asn {
            constraints.push(("asn", values.iter().map(|v| (*v).into()).collect()));
        }
        if let Some(values) = &self.connection_type {
            constraints.push(("connection_type", text_values(values)));
        }
        if let Some(values) = &self.device_type {
            constraints.push(("device_type", text_values(values)));
        }
        for (name, values) in &self.extra {
            if let Some(values) = values {
                constraints.push((name.as_str(), values.clone()));
            }
        }
        constraints
    }
}

fn text_values(values: &[String]) -> Vec<AttributeValue> {
    values.iter().map(|v| v.as_str().into()).collect()
}

/// One measurement task in the session catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct TaskDefinition {
    #[builder(setter(into))]
    pub id: String,
    #[builder(setter(into))]
    #[serde(rename = "type")]
    pub kind: String,
    /// URL template, may embed `<%TOKEN%>` placeholders.
    #[builder(setter(into))]
    pub resource: String,
    #[builder(default = 1.0)]
    pub weight: f64,
    #[builder(default)]
    #[serde(default)]
    pub classification: TaskClassification,
    #[builder(default, setter(into))]
    #[serde(default)]
    pub req_header: String,
    #[builder(default, setter(into))]
    #[serde(default)]
    pub resp_header: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hosts {
    /// Beacon host.
    pub host: String,
    /// Client-info lookup host.
    pub lookup: String,
}

/// Datacenter descriptor, opaque to the agent apart from being echoed in beacons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub datacenter: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub max_tasks: usize,
    pub report_errors: bool,
    /// Reserved; not consumed by task selection.
    pub sample_rate: f64,
    pub token: String,
    #[serde(default)]
    pub config_url: Option<String>,
    #[serde(default)]
    pub library_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Test {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub client: Client,
    pub hosts: Hosts,
    pub server: Server,
    /// Session token.
    pub session: String,
    pub settings: Settings,
    pub tasks: Vec<TaskDefinition>,
    pub test: Test,
}

impl SessionConfig {
    pub fn client_info_url(&self) -> String {
        format!("https://{}.{}/l", self.test.id, self.hosts.lookup)
    }

    pub fn beacon_url(&self) -> String {
        format!(
            "https://{}/b?k={}&s={}",
            self.hosts.host, self.settings.token, self.session
        )
    }
}
