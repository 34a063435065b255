use std::collections::{HashMap, HashSet};
use std::time::Duration;

use schema::RequestType;

use crate::stream::DEFAULT_STREAM_BUFFER_SIZE;

/// Network configuration for one provider instance.
///
/// Passed by value at construction; the provider owns its copy, so later
/// mutation of the caller's config cannot alias into a live adapter.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Override for the provider's default endpoint. Required for providers
    /// without one (Ollama). Trailing slashes are trimmed.
    pub base_url: Option<String>,

    /// Outbound concurrency cap, applied to the unary client's connection
    /// pool. The streaming client is uncapped.
    pub concurrency: usize,

    /// Capacity of the stream delivery channel.
    pub stream_buffer_size: usize,

    /// Total-request timeout for unary calls. Streaming calls only bound the
    /// connect phase.
    pub request_timeout: Duration,

    /// Headers added to every outbound request. `Authorization` is never
    /// taken from here, and an existing header is never overwritten.
    pub extra_headers: HashMap<String, String>,

    /// Attach the decoded upstream body to each response.
    pub send_back_raw_response: bool,

    pub proxy: Option<ProxyConfig>,

    /// When set, operations outside this set fail with
    /// `UnsupportedOperation` before any work.
    pub allowed_requests: Option<HashSet<RequestType>>,

    /// Key allow-lists match by substring instead of exact equality.
    pub substring_model_match: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            concurrency: 10,
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            request_timeout: Duration::from_secs(60),
            extra_headers: HashMap::new(),
            send_back_raw_response: false,
            proxy: None,
            allowed_requests: None,
            substring_model_match: true,
        }
    }
}

/// Outbound proxy selection.
#[derive(Debug, Clone)]
pub enum ProxyConfig {
    Http { url: String },
    Socks5 { url: String },
    /// Honor `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY`.
    Environment,
}
