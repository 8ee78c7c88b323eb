//! Health-signal sources
//!
//! A metrics source yields named numeric samples for a point in time. The
//! controller only depends on the trait; the HTTP implementation wraps the
//! external health-check endpoints the loop polls each tick.

mod http;

pub use http::HttpMetricsSource;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use async_trait::async_trait;

/// Default per-endpoint fetch timeout
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;

/// One polled health-check endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Stable endpoint name, used in logs and ordering
    pub name: String,
    /// URL returning a flat JSON object of numeric signals
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Trait for metrics source implementations
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Fetch the current value of every signal the endpoint exposes
    ///
    /// A failed fetch is a tick-level error for the caller, never a crash.
    async fn fetch(&self, endpoint: &EndpointConfig) -> Result<BTreeMap<String, f64>>;
}
