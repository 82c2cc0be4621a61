//! Beacon state, result bundles and payload assembly.
//!
//! Everything here is a pure data transformation: no I/O, no clocks. The provider gathers
//! the inputs (client info, timing entry, response, session metadata) and these functions
//! decide the shape of the payload.
//!
//! # Payload shape
//!
//! A successful task produces beacon data with:
//! - `task_client_data`: a JSON *string* holding the network hint under `client_connection`
//!   and every subject field (`subject_id`, `subject_attempted_id`, `subject_<timing field>`);
//! - every [`ClientInfo`] field.
//!
//! Before sending, [`merge_beacon_data`] layers that data over the session metadata from
//! [`beacon_defaults`]. On a key collision the task data wins.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    Record,
    client_info::ClientInfo,
    config::{SessionConfig, TaskDefinition},
    error::Result,
    macros::record,
    timing::NormalizedTiming,
};

pub const SCHEMA_VERSION: &str = "0.0.0";
/// Filled in server-side when the beacon is received.
pub const SERVER_DATA_PLACEHOLDER: &str = "<% SERVER_DATA %>";
pub const SUBJECT_PREFIX: &str = "subject_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeaconState {
    Success,
    Failure,
}

impl BeaconState {
    pub fn from_ok(ok: bool) -> Self {
        if ok { Self::Success } else { Self::Failure }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconData {
    pub state: BeaconState,
    /// Absent when the task never produced a result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    pub test_config: TaskDefinition,
}

impl BeaconData {
    /// The beacon for a task that produced no result: failure state and no data.
    pub fn failure(task: &TaskDefinition) -> Self {
        Self {
            state: BeaconState::Failure,
            data: None,
            test_config: task.clone(),
        }
    }
}

/// What the provider hands back to the host framework for one executed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultBundle {
    pub provider_name: String,
    pub beacon_data: Option<BeaconData>,
    pub test_type: String,
    pub data: Vec<BeaconData>,
    /// Opaque value from the host's setup phase, passed through untouched.
    pub setup_result: Value,
}

impl TestResultBundle {
    pub fn completed(provider_name: &str, beacon: BeaconData, setup_result: Value) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            test_type: beacon.test_config.kind.clone(),
            beacon_data: Some(beacon.clone()),
            data: vec![beacon],
            setup_result,
        }
    }

    pub fn failed(provider_name: &str, task: &TaskDefinition, setup_result: Value) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            beacon_data: None,
            test_type: task.kind.clone(),
            data: Vec::new(),
            setup_result,
        }
    }
}

/// The client-side view of one task run, stringified into `task_client_data`.
#[record]
pub struct TaskClientData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_connection: Option<Value>,
    #[serde(flatten)]
    pub subject: Map<String, Value>,
}

impl TaskClientData {
    /// `subject_id` names the backend that served the resource; `subject_attempted_id` the
    /// task that was meant to be measured. Timing fields override both on collision.
    pub fn new(
        subject_id: &str,
        task: &TaskDefinition,
        timing: NormalizedTiming,
        client_connection: Option<Value>,
    ) -> Self {
        let mut subject = Map::new();
        subject.insert("id".into(), subject_id.into());
        subject.insert("attempted_id".into(), task.id.clone().into());
        subject.extend(timing.into_inner());
        Self {
            client_connection,
            subject: prefix_keys(subject, SUBJECT_PREFIX),
        }
    }
}

pub fn prefix_keys(fields: Map<String, Value>, prefix: &str) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(key, value)| (format!("{prefix}{key}"), value))
        .collect()
}

/// Data for a completed task: the stringified client data plus every client-info field.
pub fn task_result_data(
    client_data: &TaskClientData,
    client_info: &ClientInfo,
) -> Result<Map<String, Value>> {
    let mut data = Map::new();
    data.insert(
        "task_client_data".into(),
        Value::String(serde_json::to_string(client_data)?),
    );
    data.extend(client_info.to_fields());
    Ok(data)
}

/// Session and task metadata every beacon carries unless the task data says otherwise.
pub fn beacon_defaults(
    session: &SessionConfig,
    task: &TaskDefinition,
    library_version: &str,
    timestamp: i64,
) -> Result<Map<String, Value>> {
    let mut defaults = Map::new();
    defaults.insert("test_id".into(), session.test.id.clone().into());
    defaults.insert("test_api_key".into(), session.settings.token.clone().into());
    defaults.insert("test_lib_version".into(), library_version.into());
    defaults.insert(
        "test_server".into(),
        serde_json::to_string(&session.server)?.into(),
    );
    defaults.insert("test_timestamp".into(), timestamp.into());
    defaults.insert("task_type".into(), task.kind.clone().into());
    defaults.insert("task_id".into(), task.id.clone().into());
    defaults.insert("task_schema_version".into(), SCHEMA_VERSION.into());
    defaults.insert("task_server_data".into(), SERVER_DATA_PLACEHOLDER.into());
    Ok(defaults)
}

pub fn merge_beacon_data(
    defaults: Map<String, Value>,
    task_data: Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = defaults;
    merged.extend(task_data);
    merged
}

/// The wire form of a beacon: its `data` field as JSON. A beacon without data encodes as `{}`.
pub fn encode(beacon: &BeaconData) -> Result<String> {
    match &beacon.data {
        Some(data) => Ok(serde_json::to_string(data)?),
        None => Ok(serde_json::to_string(&Map::new())?),
    }
}
