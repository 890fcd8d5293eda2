//! Engine configuration.
//!
//! Plain data with a `Default` impl. Loading it from a file or environment is
//! up to the host; the `Deserialize` derive lets any serde format feed it.

use std::time::Duration;

use serde::Deserialize;

/// Default number of dedicated transfer threads.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default cap on parsed header fields per response head.
pub const DEFAULT_MAX_HEADER_COUNT: usize = 100;

/// Default native body read limit (10 MB).
pub const DEFAULT_MAX_RESPONSE_BODY: u64 = 10 * 1024 * 1024;

/// Configuration shared by every request an engine instance executes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of threads that run blocking native transfers.
    pub worker_threads: usize,
    /// Name prefix for the transfer threads.
    pub thread_name: String,
    /// Whole-transfer timeout in milliseconds. Per-request options override it.
    pub request_timeout_ms: Option<u64>,
    /// Native connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Redirects the native transport follows on its own.
    pub max_redirects: u32,
    /// Verify TLS certificates.
    pub ssl_verify: bool,
    /// Proxy URL, e.g. `http://proxy.local:3128`.
    pub proxy: Option<String>,
    /// `User-Agent` inserted when a request does not carry one.
    pub user_agent: Option<String>,
    /// Maximum header fields accepted per response head.
    pub max_header_count: usize,
    /// Maximum body bytes read from the native transport.
    pub max_response_body: u64,
    /// Depth of the channel between the body producer and the reader.
    pub body_channel_capacity: usize,
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            thread_name: "transfer-worker".to_string(),
            request_timeout_ms: None,
            connect_timeout_ms: None,
            max_redirects: 0,
            ssl_verify: true,
            proxy: None,
            user_agent: None,
            max_header_count: DEFAULT_MAX_HEADER_COUNT,
            max_response_body: DEFAULT_MAX_RESPONSE_BODY,
            body_channel_capacity: 1,
        }
    }
}
