use std::time::Instant;

use insight::{
    ErrorKind, InsightsProvider, Provider, ProviderSettings, provider::ResourceResponse,
    timing::TimingEntry,
};
use reqwest::Client;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Point it somewhere else with INSIGHT_CONFIG_URL
    let mut settings = ProviderSettings::default();
    if let Ok(url) = std::env::var("INSIGHT_CONFIG_URL") {
        settings.config_url = Some(url);
    }
    let provider = InsightsProvider::new(settings);
    if !provider.should_run() {
        return;
    }

    if let Err(e) = provider.load_session().await {
        provider.handle_error(ErrorKind::SessionConfig, &e);
        eprintln!("No session: {e}");
        return;
    }

    let client = Client::new();
    let epoch = Instant::now();
    for task in provider.expand_tasks().unwrap() {
        let url = provider.resource_url(&task.definition).unwrap();

        let mut request = client.get(&url);
        for (name, value) in provider.resource_request_headers() {
            request = request.header(name, value);
        }

        let start = epoch.elapsed().as_secs_f64() * 1000.0;
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                provider.handle_error(ErrorKind::TaskExecution, &e);
                let beacon = provider.make_beacon_data(&task.definition, None).unwrap();
                println!("{} failed: {}", task.id(), provider.encode_beacon_data(&task.definition, &beacon).unwrap());
                continue;
            }
        };
        let response_start = epoch.elapsed().as_secs_f64() * 1000.0;
        let observed = ResourceResponse::from(&response);
        let body = response.bytes().await.map(|b| b.len()).unwrap_or(0);
        let end = epoch.elapsed().as_secs_f64() * 1000.0;

        // Roughly what a browser would report for the same load
        let entry: TimingEntry = match json!({
            "name": url,
            "entryType": "resource",
            "initiatorType": "fetch",
            "startTime": start,
            "fetchStart": start,
            "requestStart": start,
            "responseStart": response_start,
            "responseEnd": end,
            "duration": end - start,
            "decodedBodySize": body,
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        let result = match provider
            .create_fetch_test_result(&entry, &observed, &task.definition, Value::Null)
            .await
        {
            Ok(result) => Some(result),
            Err(e) => {
                provider.handle_error(ErrorKind::ResultMapping, &e);
                None
            }
        };
        let beacon = provider
            .make_beacon_data(&task.definition, result.as_ref())
            .unwrap();
        println!(
            "{} -> {}\n{}",
            task.id(),
            provider.make_beacon_url().unwrap(),
            provider.encode_beacon_data(&task.definition, &beacon).unwrap()
        );
    }
}
