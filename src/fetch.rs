use async_trait::async_trait;
use serde_json::Value;

use crate::error::FetchError;

/// Single-shot JSON retrieval over HTTP(S) GET.
///
/// The provider reaches the network only through this trait, which keeps retries and
/// memoization testable without a server.
///
/// # Example
/// ```rust
/// use async_trait::async_trait;
/// use insight::{FetchError, Fetcher};
/// use serde_json::{Value, json};
///
/// struct Canned;
///
/// #[async_trait]
/// impl Fetcher for Canned {
///     async fn get_json(&self, _url: &str) -> Result<Value, FetchError> {
///         Ok(json!({ "ok": true }))
///     }
/// }
/// ```
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError>;
}

/// [`Fetcher`] backed by a shared `reqwest` client.
///
/// Non-2xx responses and bodies that are not JSON are failures.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        tracing::debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// Decode a fetched document into `T`, reporting failures against `url`.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(url: &str, value: Value) -> Result<T, FetchError> {
    serde_json::from_value(value).map_err(|e| FetchError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}
