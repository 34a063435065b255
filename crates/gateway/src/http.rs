//! HTTP client construction and header policy shared by all adapters.

use std::collections::HashMap;
use std::time::Duration;

use http::header::{AUTHORIZATION, CACHE_CONTROL, CONNECTION};
use http::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Proxy};
use schema::GatewayError;

use crate::config::{ProviderConfig, ProxyConfig};

/// Base URLs are right-trimmed of trailing slashes before path joining.
pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn base_builder(config: &ProviderConfig) -> Result<reqwest::ClientBuilder, Box<GatewayError>> {
    let mut headers = HeaderMap::new();
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    // Pool idle timeout of 5s picks up DNS changes; hyper exposes no
    // per-host connection cap, so the configured concurrency bounds the idle
    // pool instead.
    let mut builder = Client::builder()
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .pool_max_idle_per_host(config.concurrency)
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers);

    builder = match &config.proxy {
        Some(ProxyConfig::Http { url }) | Some(ProxyConfig::Socks5 { url }) => {
            let proxy = Proxy::all(url).map_err(|e| {
                Box::new(GatewayError::configuration(format!("invalid proxy url `{url}`: {e}")))
            })?;
            builder.proxy(proxy)
        }
        // reqwest reads the proxy environment variables by default.
        Some(ProxyConfig::Environment) => builder,
        None => builder.no_proxy(),
    };

    Ok(builder)
}

/// Connection-pooled client for unary calls, bounded by the total-request
/// timeout.
pub(crate) fn build_client(config: &ProviderConfig) -> Result<Client, Box<GatewayError>> {
    base_builder(config)?
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| Box::new(GatewayError::configuration(format!("failed to build HTTP client: {e}"))))
}

/// Client for streaming calls: no total-request timeout, a stream lives as
/// long as the model generates. Only the connect phase is bounded.
pub(crate) fn build_streaming_client(config: &ProviderConfig) -> Result<Client, Box<GatewayError>> {
    base_builder(config)?
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| {
            Box::new(GatewayError::configuration(format!(
                "failed to build streaming HTTP client: {e}"
            )))
        })
}

/// Headers every SSE request carries.
pub(crate) fn sse_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::ACCEPT, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers
}

/// Merge user-configured extra headers into a request's header map.
///
/// `Authorization` is never sourced from extras, and a header already present
/// on the request is never overwritten. Idempotent by construction.
pub(crate) fn merge_extra_headers(headers: &mut HeaderMap, extras: &HashMap<String, String>) {
    for (name, value) in extras {
        if name.eq_ignore_ascii_case(AUTHORIZATION.as_str()) {
            continue;
        }

        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            log::warn!("skipping extra header with invalid name `{name}`");
            continue;
        };

        if headers.contains_key(&name) {
            continue;
        }

        let Ok(value) = HeaderValue::from_str(value) else {
            log::warn!("skipping extra header `{name}` with non-ASCII value");
            continue;
        };

        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extras(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn authorization_is_never_sourced_from_extras() {
        let mut headers = HeaderMap::new();
        merge_extra_headers(&mut headers, &extras(&[("Authorization", "Bearer stolen")]));
        assert!(headers.get(AUTHORIZATION).is_none());

        merge_extra_headers(&mut headers, &extras(&[("authorization", "Bearer stolen")]));
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn existing_headers_are_never_overwritten() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace", HeaderValue::from_static("original"));

        merge_extra_headers(&mut headers, &extras(&[("x-trace", "replacement"), ("x-team", "infra")]));

        assert_eq!(headers.get("x-trace").unwrap(), "original");
        assert_eq!(headers.get("x-team").unwrap(), "infra");
    }

    #[test]
    fn repeated_merges_are_idempotent() {
        let mut headers = HeaderMap::new();
        let extras = extras(&[("x-team", "infra"), ("x-env", "prod")]);

        merge_extra_headers(&mut headers, &extras);
        let first = headers.clone();
        merge_extra_headers(&mut headers, &extras);

        assert_eq!(headers, first);
    }

    #[test]
    fn base_urls_are_right_trimmed() {
        assert_eq!(trim_base_url("https://api.openai.com/"), "https://api.openai.com");
        assert_eq!(trim_base_url("https://api.openai.com"), "https://api.openai.com");
        assert_eq!(trim_base_url("http://host//"), "http://host");
    }
}
