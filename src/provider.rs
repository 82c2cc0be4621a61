//! The provider hook surface and its implementation.
//!
//! A host test framework drives a session through a [`Provider`]: it asks whether to run,
//! fetches and stores the session configuration, expands it into executable tasks, runs them,
//! and hands each observation back for beacon assembly. [`InsightsProvider`] is the one
//! implementation in this crate; every collaborator it uses can be swapped through its builder.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, OnceLock},
};
use typed_builder::TypedBuilder;

use crate::{
    beacon::{
        BeaconData, BeaconState, TaskClientData, TestResultBundle, beacon_defaults, encode,
        merge_beacon_data, task_result_data,
    },
    classification::filter_tasks,
    client_info::{ClientInfoResolver, FailurePolicy},
    config::{ProviderSettings, SessionConfig, TaskDefinition},
    error::{Error, Result},
    fetch::{Fetcher, HttpFetcher, decode},
    retry::Retry,
    selection::TaskSelector,
    template::{TemplateEngine, TokenTemplate},
    timing::{TimingEntry, normalize_entry},
};

pub const DEFAULT_PROVIDER_NAME: &str = "insight";

/// Response header naming the datacenter that served a task's resource.
pub const DATACENTER_HEADER: &str = "X-Datacenter";

/// Where in the session an error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SessionConfig,
    TaskExecution,
    ResultMapping,
    Beacon,
}

/// A selected task paired with the session it belongs to, ready for the host to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTask {
    pub session: Arc<SessionConfig>,
    pub definition: TaskDefinition,
}

impl FetchTask {
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn kind(&self) -> &str {
        &self.definition.kind
    }
}

/// The parts of a resource response that beacon assembly looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResourceResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Whether the status is in the 2xx range.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of the header `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl From<&reqwest::Response> for ResourceResponse {
    fn from(response: &reqwest::Response) -> Self {
        Self {
            status: response.status().as_u16(),
            headers: response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_string(), value.to_string()))
                })
                .collect(),
        }
    }
}

/// Source of beacon timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Opaque network-quality hint attached to every beacon as `client_connection`.
pub trait NetworkInformation: Send + Sync {
    fn connection(&self) -> Option<Value>;
}

/// No network information API on this client.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

impl NetworkInformation for Unavailable {
    fn connection(&self) -> Option<Value> {
        None
    }
}

impl<F> NetworkInformation for F
where
    F: Fn() -> Option<Value> + Send + Sync,
{
    fn connection(&self) -> Option<Value> {
        self()
    }
}

/// Lifecycle hooks the host framework calls during a measurement session.
///
/// Hooks that need the session configuration fail with [`Error::SessionNotLoaded`] until
/// [`Provider::set_session_config`] has been called.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this provider takes part in the session at all.
    fn should_run(&self) -> bool;

    /// Retrieve the session configuration. Failure is fatal to the session.
    async fn fetch_session_config(&self) -> Result<SessionConfig>;

    /// Store the configuration every later hook works against.
    fn set_session_config(&self, config: SessionConfig) -> Result<Arc<SessionConfig>>;

    /// The tasks this client should run, at most `max_tasks` of them.
    fn expand_tasks(&self) -> Result<Vec<FetchTask>>;

    /// Turn one executed task into a result bundle.
    async fn create_fetch_test_result(
        &self,
        entry: &TimingEntry,
        response: &ResourceResponse,
        task: &TaskDefinition,
        setup_result: Value,
    ) -> Result<TestResultBundle>;

    /// Extra headers to send with every task request.
    fn resource_request_headers(&self) -> BTreeMap<String, String>;

    /// The concrete URL a task should fetch.
    fn resource_url(&self, task: &TaskDefinition) -> Result<String>;

    /// Observe an error raised anywhere in the session. Never fails.
    fn handle_error(&self, kind: ErrorKind, error: &dyn std::error::Error);

    /// The beacon for one task. `result` is `None` when the task produced no result.
    fn make_beacon_data(
        &self,
        task: &TaskDefinition,
        result: Option<&TestResultBundle>,
    ) -> Result<BeaconData>;

    fn encode_beacon_data(&self, task: &TaskDefinition, beacon: &BeaconData) -> Result<String>;

    fn make_beacon_url(&self) -> Result<String>;
}

/// The insights [`Provider`].
///
/// One instance serves one session: the session configuration is set once, and the
/// client-info and resource-URL caches live as long as the instance.
///
/// # Example
/// ```rust,no_run
/// use insight::{InsightsProvider, Provider, ProviderSettings};
///
/// # async fn run() -> insight::Result<()> {
/// let provider = InsightsProvider::builder()
///     .settings(ProviderSettings::builder().library_version("3.0.0").build())
///     .build();
///
/// let config = provider.fetch_session_config().await?;
/// provider.set_session_config(config)?;
/// for task in provider.expand_tasks()? {
///     println!("{}", provider.resource_url(&task.definition)?);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(TypedBuilder)]
pub struct InsightsProvider {
    #[builder(default)]
    settings: ProviderSettings,
    #[builder(default = DEFAULT_PROVIDER_NAME.to_string(), setter(into))]
    name: String,
    #[builder(default = Arc::new(HttpFetcher::default()))]
    fetcher: Arc<dyn Fetcher>,
    #[builder(default)]
    retry: Retry,
    #[builder(default)]
    selector: TaskSelector,
    #[builder(
        default = Box::new(TokenTemplate),
        setter(transform = |engine: impl TemplateEngine + 'static| Box::new(engine) as Box<dyn TemplateEngine>)
    )]
    template: Box<dyn TemplateEngine>,
    #[builder(
        default = Box::new(SystemClock),
        setter(transform = |clock: impl Clock + 'static| Box::new(clock) as Box<dyn Clock>)
    )]
    clock: Box<dyn Clock>,
    #[builder(
        default = Box::new(Unavailable),
        setter(transform = |network: impl NetworkInformation + 'static| Box::new(network) as Box<dyn NetworkInformation>)
    )]
    network: Box<dyn NetworkInformation>,
    #[builder(default)]
    failure_policy: FailurePolicy,
    #[builder(default = ClientInfoResolver::with_policy(Arc::clone(&fetcher), failure_policy), setter(skip))]
    client_info: ClientInfoResolver,
    #[builder(default, setter(skip))]
    session: OnceLock<Arc<SessionConfig>>,
    #[builder(default, setter(skip))]
    resource_cache: Mutex<HashMap<String, String>>,
}

impl InsightsProvider {
    /// A provider with default collaborators.
    pub fn new(settings: ProviderSettings) -> Self {
        Self::builder().settings(settings).build()
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn client_info(&self) -> &ClientInfoResolver {
        &self.client_info
    }

    /// The stored session configuration.
    pub fn session(&self) -> Result<Arc<SessionConfig>> {
        self.session.get().cloned().ok_or(Error::SessionNotLoaded)
    }

    /// Fetch the session configuration and store it.
    pub async fn load_session(&self) -> Result<Arc<SessionConfig>> {
        let config = self.fetch_session_config().await?;
        self.set_session_config(config)
    }

    /// Forget every templated resource URL.
    pub fn clear_resource_cache(&self) {
        self.resource_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl Provider for InsightsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn should_run(&self) -> bool {
        true
    }

    async fn fetch_session_config(&self) -> Result<SessionConfig> {
        let url = self.settings.config_url();
        let fetcher = &self.fetcher;
        tracing::info!(url, "Fetching session config");
        self.retry
            .run(|| async move {
                let value = fetcher.get_json(url).await?;
                decode::<SessionConfig>(url, value)
            })
            .await
            .map_err(|source| Error::SessionConfig {
                attempts: self.retry.attempts.max(1),
                source,
            })
    }

    fn set_session_config(&self, config: SessionConfig) -> Result<Arc<SessionConfig>> {
        let config = Arc::new(config);
        self.session
            .set(Arc::clone(&config))
            .map_err(|_| Error::SessionAlreadyLoaded)?;
        tracing::info!(
            test = %config.test.id,
            tasks = config.tasks.len(),
            max_tasks = config.settings.max_tasks,
            "Session config loaded"
        );
        Ok(config)
    }

    fn expand_tasks(&self) -> Result<Vec<FetchTask>> {
        let session = self.session()?;
        let candidates = filter_tasks(&session.tasks, &session.client);
        let selected = self
            .selector
            .choose(candidates, session.settings.max_tasks);
        tracing::info!(tasks = selected.len(), "Expanded session into tasks");
        Ok(selected
            .into_iter()
            .map(|definition| FetchTask {
                session: Arc::clone(&session),
                definition,
            })
            .collect())
    }

    async fn create_fetch_test_result(
        &self,
        entry: &TimingEntry,
        response: &ResourceResponse,
        task: &TaskDefinition,
        setup_result: Value,
    ) -> Result<TestResultBundle> {
        let session = self.session()?;
        let client_info = self
            .client_info
            .get(&session.client_info_url())
            .await
            .map_err(Error::ClientInfo)?;

        let subject_id = response.header(DATACENTER_HEADER).unwrap_or_default();
        let client_data = TaskClientData::new(
            subject_id,
            task,
            normalize_entry(entry),
            self.network.connection(),
        );
        let beacon = BeaconData {
            state: BeaconState::from_ok(response.ok()),
            data: Some(task_result_data(&client_data, &client_info)?),
            test_config: task.clone(),
        };
        tracing::debug!(task = %task.id, subject = subject_id, state = ?beacon.state, "Task result ready");
        Ok(TestResultBundle::completed(&self.name, beacon, setup_result))
    }

    fn resource_request_headers(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn resource_url(&self, task: &TaskDefinition) -> Result<String> {
        let session = self.session()?;
        let mut cache = self.resource_cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(url) = cache.get(&task.resource) {
            return Ok(url.clone());
        }
        let url = self.template.render(&task.resource, &session);
        cache.insert(task.resource.clone(), url.clone());
        Ok(url)
    }

    fn handle_error(&self, kind: ErrorKind, error: &dyn std::error::Error) {
        let report = self
            .session
            .get()
            .is_some_and(|session| session.settings.report_errors);
        if report {
            tracing::warn!(?kind, %error, "Session error (not beaconed)");
        } else {
            tracing::debug!(?kind, %error, "Session error");
        }
    }

    fn make_beacon_data(
        &self,
        task: &TaskDefinition,
        result: Option<&TestResultBundle>,
    ) -> Result<BeaconData> {
        let Some(beacon) = result.and_then(|result| result.beacon_data.as_ref()) else {
            return Ok(BeaconData::failure(task));
        };
        let session = self.session()?;
        let defaults = beacon_defaults(
            &session,
            task,
            self.settings.library_version(),
            self.clock.now().timestamp(),
        )?;
        Ok(BeaconData {
            state: beacon.state,
            data: Some(merge_beacon_data(
                defaults,
                beacon.data.clone().unwrap_or_default(),
            )),
            test_config: beacon.test_config.clone(),
        })
    }

    fn encode_beacon_data(&self, _task: &TaskDefinition, beacon: &BeaconData) -> Result<String> {
        encode(beacon)
    }

    fn make_beacon_url(&self) -> Result<String> {
        Ok(self.session()?.beacon_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FetchError, fixtures};
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves the fixture documents by URL.
    struct Fixtures;

    #[async_trait]
    impl Fetcher for Fixtures {
        async fn get_json(&self, url: &str) -> std::result::Result<Value, FetchError> {
            let body = if url.ends_with("/l") {
                fixtures::CLIENT_INFO
            } else {
                fixtures::CONFIG
            };
            serde_json::from_str(body).map_err(|e| FetchError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })
        }
    }

    struct CountingTemplate(Arc<AtomicUsize>);

    impl TemplateEngine for CountingTemplate {
        fn render(&self, raw: &str, session: &SessionConfig) -> String {
            self.0.fetch_add(1, Ordering::SeqCst);
            TokenTemplate.render(raw, session)
        }
    }

    fn loaded() -> InsightsProvider {
        let provider = InsightsProvider::builder()
            .fetcher(Arc::new(Fixtures))
            .clock(FixedClock(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()))
            .selector(TaskSelector::seeded(crate::WeightedShuffle, 5))
            .build();
        provider.set_session_config(fixtures::session_config()).unwrap();
        provider
    }

    fn lcy() -> TaskDefinition {
        fixtures::session_config().tasks[1].clone()
    }

    #[test]
    fn defaults() {
        let provider = InsightsProvider::new(ProviderSettings::default());
        assert_eq!(provider.name(), "insight");
        assert!(provider.should_run());
        assert!(provider.resource_request_headers().is_empty());
        assert_eq!(provider.settings().config_url(), crate::config::DEFAULT_CONFIG_URL);
    }

    #[test]
    fn hooks_need_a_session() {
        let provider = InsightsProvider::new(ProviderSettings::default());
        assert!(matches!(provider.expand_tasks(), Err(Error::SessionNotLoaded)));
        assert!(matches!(provider.make_beacon_url(), Err(Error::SessionNotLoaded)));
        assert!(matches!(provider.resource_url(&lcy()), Err(Error::SessionNotLoaded)));
    }

    #[test]
    fn session_is_set_once() {
        let provider = loaded();
        assert!(matches!(
            provider.set_session_config(fixtures::session_config()),
            Err(Error::SessionAlreadyLoaded)
        ));
    }

    #[test]
    fn resource_url_is_templated_once_per_resource() {
        let renders = Arc::new(AtomicUsize::new(0));
        let provider = InsightsProvider::builder()
            .template(CountingTemplate(Arc::clone(&renders)))
            .build();
        provider.set_session_config(fixtures::session_config()).unwrap();

        let task = TaskDefinition::builder()
            .id("t")
            .kind("pop")
            .resource("https://<%TEST_ID%>.example.com/o.svg?id=<%TEST_ID%>")
            .build();
        let first = provider.resource_url(&task).unwrap();
        let second = provider.resource_url(&task).unwrap();

        assert_eq!(first, second);
        assert_eq!(renders.load(Ordering::SeqCst), 1);

        provider.clear_resource_cache();
        provider.resource_url(&task).unwrap();
        assert_eq!(renders.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn expanded_tasks_share_the_session() {
        let provider = loaded();
        let tasks = provider.expand_tasks().unwrap();
        assert_eq!(tasks.len(), 3);
        let session = provider.session().unwrap();
        assert!(tasks.iter().all(|task| Arc::ptr_eq(&task.session, &session)));
    }

    #[tokio::test]
    async fn failed_responses_produce_failure_beacons_with_data() {
        let provider = loaded();
        let result = provider
            .create_fetch_test_result(&fixtures::entry(), &ResourceResponse::new(503), &lcy(), json!({}))
            .await
            .unwrap();

        let beacon = result.beacon_data.unwrap();
        assert_eq!(beacon.state, BeaconState::Failure);
        let client_data: Value =
            serde_json::from_str(beacon.data.unwrap()["task_client_data"].as_str().unwrap()).unwrap();
        assert_eq!(client_data["subject_id"], "");
    }

    #[tokio::test]
    async fn network_hint_is_attached_when_available() {
        let provider = InsightsProvider::builder()
            .fetcher(Arc::new(Fixtures))
            .network(|| Some(json!({ "effectiveType": "4g", "rtt": 50 })))
            .build();
        provider.set_session_config(fixtures::session_config()).unwrap();

        let result = provider
            .create_fetch_test_result(&fixtures::entry(), &ResourceResponse::new(200), &lcy(), Value::Null)
            .await
            .unwrap();
        let data = result.beacon_data.unwrap().data.unwrap();
        let client_data: Value = serde_json::from_str(data["task_client_data"].as_str().unwrap()).unwrap();
        assert_eq!(client_data["client_connection"]["rtt"], 50);
    }

    #[test]
    fn missing_result_makes_a_bare_failure_beacon() {
        let provider = loaded();
        let failed = TestResultBundle::failed("insight", &lcy(), Value::Null);

        for result in [None, Some(&failed)] {
            let beacon = provider.make_beacon_data(&lcy(), result).unwrap();
            assert_eq!(beacon.state, BeaconState::Failure);
            assert!(beacon.data.is_none());
            assert_eq!(beacon.test_config, lcy());
            assert_eq!(provider.encode_beacon_data(&lcy(), &beacon).unwrap(), "{}");
        }
    }

    #[test]
    fn result_fields_override_defaults() {
        let provider = loaded();
        let mut data = serde_json::Map::new();
        data.insert("test_id".into(), "T2".into());
        let beacon = BeaconData {
            state: BeaconState::Success,
            data: Some(data),
            test_config: lcy(),
        };
        let result = TestResultBundle::completed("insight", beacon, Value::Null);

        let merged = provider.make_beacon_data(&lcy(), Some(&result)).unwrap();
        let data = merged.data.unwrap();
        assert_eq!(data["test_id"], "T2");
        assert_eq!(data["test_timestamp"], 1609459200);
        assert_eq!(data["task_id"], "LCY");
    }

    #[test]
    fn handle_error_is_inert() {
        let provider = loaded();
        let error = Error::SessionNotLoaded;
        provider.handle_error(ErrorKind::TaskExecution, &error);
        InsightsProvider::new(ProviderSettings::default()).handle_error(ErrorKind::Beacon, &error);
    }

    #[test]
    fn headers_are_matched_case_insensitively() {
        let response = ResourceResponse::new(204).with_header("x-datacenter", "MAD");
        assert_eq!(response.header(DATACENTER_HEADER), Some("MAD"));
        assert!(response.ok());
        assert!(!ResourceResponse::new(404).ok());
        assert_eq!(response.header("x-missing"), None);
    }
}
