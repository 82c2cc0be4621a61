#![allow(dead_code)]

use async_trait::async_trait;
use insight::{FetchError, Fetcher, SessionConfig};
use serde_json::{Map, Value};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

pub const CONFIG: &str = include_str!("../fixtures/config.json");
pub const CLIENT_INFO: &str = include_str!("../fixtures/client_info.json");
pub const ENTRY: &str = include_str!("../fixtures/entry.json");

pub const CONFIG_URL: &str = "https://config.example.com/api/v1/config";
pub const CLIENT_INFO_URL: &str =
    "https://42c91a26-c33f-482a-9ac9-353cd615c0a9.eu.u.test.fastly-insights.com/l";

pub fn json(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap()
}

pub fn session_config() -> SessionConfig {
    serde_json::from_str(CONFIG).unwrap()
}

pub fn entry() -> Map<String, Value> {
    serde_json::from_str(ENTRY).unwrap()
}

/// In-memory [`Fetcher`] that replays scripted responses per URL and counts requests.
///
/// Each URL has a queue of responses; the last one repeats once the queue is down to it.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    inner: Arc<Mutex<Script>>,
}

#[derive(Default)]
struct Script {
    responses: HashMap<String, VecDeque<Result<Value, FetchError>>>,
    calls: HashMap<String, usize>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, url: &str, response: Result<Value, FetchError>) -> Self {
        self.inner
            .lock()
            .unwrap()
            .responses
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn fail(self, url: &str, status: u16) -> Self {
        let error = FetchError::Status {
            url: url.to_string(),
            status,
        };
        self.respond(url, Err(error))
    }

    pub fn calls(&self, url: &str) -> usize {
        self.inner.lock().unwrap().calls.get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let mut script = self.inner.lock().unwrap();
        *script.calls.entry(url.to_string()).or_default() += 1;
        let queue = script.responses.get_mut(url);
        match queue {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
