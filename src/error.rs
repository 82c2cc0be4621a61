use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A failed HTTP retrieval.
///
/// Cloneable so that one failed lookup can be handed to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("invalid response body from {url}: {message}")]
    Decode { url: String, message: String },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            Self::Transport { url, .. } | Self::Status { url, .. } | Self::Decode { url, .. } => url,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Session configuration could not be retrieved; no session can start.
    #[error("session config unavailable after {attempts} attempt(s)")]
    SessionConfig {
        attempts: u32,
        #[source]
        source: FetchError,
    },
    #[error("client info lookup failed: {0}")]
    ClientInfo(#[source] FetchError),
    #[error("session config has not been loaded")]
    SessionNotLoaded,
    #[error("session config is already loaded")]
    SessionAlreadyLoaded,
    #[error("failed to encode beacon data: {0}")]
    Encode(#[from] serde_json::Error),
}
