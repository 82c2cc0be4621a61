//! Shared test fixtures, the same documents the integration tests load.

use serde_json::{Map, Value};

use crate::{ClientInfo, SessionConfig};

pub const CONFIG: &str = include_str!("../tests/fixtures/config.json");
pub const CLIENT_INFO: &str = include_str!("../tests/fixtures/client_info.json");
pub const ENTRY: &str = include_str!("../tests/fixtures/entry.json");

pub fn session_config() -> SessionConfig {
    serde_json::from_str(CONFIG).unwrap()
}

pub fn client_info() -> ClientInfo {
    serde_json::from_str(CLIENT_INFO).unwrap()
}

pub fn entry() -> Map<String, Value> {
    serde_json::from_str(ENTRY).unwrap()
}
