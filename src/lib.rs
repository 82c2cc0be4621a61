//! Insight: the decision-and-assembly core of a client-side network measurement agent.
//!
//! A host test framework owns task execution: it asks a [`Provider`] which tasks to run,
//! runs them, and hands every completed observation back to the provider to be turned into
//! an outbound beacon. This crate is the provider side of that contract.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`Retry`]: fixed-delay retry wrapper used to harden session-configuration retrieval.
//! - [`ClientInfoResolver`]: fetches client/resolver network attributes once per endpoint and
//!   shares the in-flight lookup with every concurrent caller.
//! - [`timing::normalize_entry`]: flattens a raw resource-timing observation into a serializable
//!   record with underscore-separated keys.
//! - [`classification::filter_tasks`] and [`TaskSelector`]: decide which tasks from the session
//!   catalog this client runs.
//! - [`TemplateEngine`]: expands `<%TOKEN%>` placeholders in task resource URLs.
//! - [`beacon`]: the beacon state, result bundle and payload assembly rules.
//! - [`InsightsProvider`]: the [`Provider`] implementation that glues everything together and
//!   owns the per-session caches.
//!
//! # Flow
//!
//! 1. `fetch_session_config` retrieves the [`SessionConfig`] (retried), and the host stores it
//!    with `set_session_config`.
//! 2. `expand_tasks` filters the catalog by the client's classification and picks at most
//!    `max_tasks` of them.
//! 3. The host resolves each task's URL with `resource_url`, runs it, and calls
//!    `create_fetch_test_result` with the timing entry and response.
//! 4. `make_beacon_data`, `encode_beacon_data` and `make_beacon_url` produce the payload and its
//!    destination. Sending it is the host's job.
//!
//! # Where to start
//!
//! - Read the docs for [`Provider`] and [`InsightsProvider`].
//! - See `demos/session.rs` for a runnable session against a live endpoint.

extern crate self as insight;

/// Beacon state, result bundles and payload assembly
pub mod beacon;
/// Task filtering by client classification
pub mod classification;
/// Memoized client-info lookups
pub mod client_info;
/// Session configuration and provider settings
pub mod config;
/// Error types
pub mod error;
/// HTTP transport used for configuration and client-info retrieval
pub mod fetch;
/// The provider hook surface and its implementation
pub mod provider;
/// Beacon data records
pub mod record;
/// Fixed-delay retries
pub mod retry;
/// Weighted task selection
pub mod selection;
/// Resource URL templating
pub mod template;
/// Resource timing normalization
pub mod timing;

#[cfg(test)]
mod fixtures;

pub use beacon::{BeaconData, BeaconState, TestResultBundle};
pub use client_info::{ClientInfo, ClientInfoResolver, FailurePolicy};
pub use config::{ProviderSettings, SessionConfig, TaskDefinition};
pub use error::{Error, FetchError, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use provider::{ErrorKind, FetchTask, InsightsProvider, Provider, ResourceResponse};
pub use record::Record;
pub use retry::Retry;
pub use selection::{SelectionPolicy, TaskSelector, UniformShuffle, WeightedShuffle};
pub use template::{TemplateEngine, TokenTemplate};

/// Attribute macros for declaring data records
pub mod macros {
    pub use insight_macros::*;
}
