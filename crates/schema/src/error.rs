//! The canonical error shape.
//!
//! Every failure in the gateway, whether caller-, provider-, or
//! gateway-originated, is represented as a [`GatewayError`] value. Unary
//! operations return it directly; streaming operations deliver it through the
//! same channel as responses, wrapped in a stream envelope.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::response::ResponseExtra;

/// Classification of a gateway error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The provider does not expose the requested operation.
    UnsupportedOperation,
    /// Required per-provider configuration is missing.
    Configuration,
    /// The request context was cancelled before or after dispatch.
    RequestCancelled,
    /// Deadline, read, or write timeout.
    ProviderRequestTimedOut,
    /// Transport-level failure talking to the provider.
    ProviderRequest,
    /// Non-2xx response from the provider.
    ProviderApiError,
    /// The provider's response body failed to parse.
    ProviderResponseUnmarshal,
    /// The outbound request body failed to serialize.
    ProviderJsonMarshaling,
    /// Generic internal operation error.
    Operation,
}

/// Stream-control directives a post-hook may attach to an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamControl {
    /// Drop the current chunk without delivering it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_stream: Option<bool>,
    /// Log the dropped chunk when skipping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_error: Option<bool>,
}

/// The inner error body, shaped like provider error envelopes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<Value>,
    /// Stringified underlying cause, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayError {
    /// True when the fault originated inside the gateway rather than from the
    /// caller or the provider.
    #[serde(default)]
    pub internal: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    pub error: ErrorBody,

    /// Whether the router may escalate to the fallback list. Absent means
    /// allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_fallbacks: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_control: Option<StreamControl>,

    #[serde(default, skip_serializing_if = "ResponseExtra::is_empty")]
    pub extra: ResponseExtra,
}

impl GatewayError {
    fn with_kind(kind: ErrorKind, internal: bool, message: impl Into<String>) -> Self {
        Self {
            internal,
            kind: Some(kind),
            error: ErrorBody {
                message: message.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Generic internal operation error, e.g. a missing request payload.
    pub fn operation(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Operation, true, message)
    }

    /// Missing or invalid per-provider configuration.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Configuration, false, message)
    }

    /// The provider does not expose the requested operation.
    pub fn unsupported(provider: impl fmt::Display, operation: impl fmt::Display) -> Self {
        Self::with_kind(
            ErrorKind::UnsupportedOperation,
            false,
            format!("provider {provider} does not support {operation} requests"),
        )
    }

    /// The request context was cancelled. Fallbacks are denied: the caller
    /// walked away, retrying elsewhere would be wasted work.
    pub fn cancelled() -> Self {
        let mut error = Self::with_kind(ErrorKind::RequestCancelled, false, "request cancelled");
        error.allow_fallbacks = Some(false);
        error
    }

    pub fn timed_out(source: impl fmt::Display) -> Self {
        let mut error =
            Self::with_kind(ErrorKind::ProviderRequestTimedOut, false, "provider request timed out");
        error.error.source = Some(source.to_string());
        error
    }

    pub fn transport(source: impl fmt::Display) -> Self {
        let mut error = Self::with_kind(ErrorKind::ProviderRequest, false, "provider request failed");
        error.error.source = Some(source.to_string());
        error
    }

    /// Non-2xx upstream response.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        let mut error = Self::with_kind(ErrorKind::ProviderApiError, false, message);
        error.status_code = Some(status);
        error
    }

    /// Response-body parse failure. Internal: the provider answered, the
    /// gateway could not decode it.
    pub fn unmarshal(source: impl fmt::Display) -> Self {
        let mut error = Self::with_kind(
            ErrorKind::ProviderResponseUnmarshal,
            true,
            "failed to decode provider response",
        );
        error.error.source = Some(source.to_string());
        error
    }

    /// Outbound-body marshal failure.
    pub fn marshaling(source: impl fmt::Display) -> Self {
        let mut error = Self::with_kind(
            ErrorKind::ProviderJsonMarshaling,
            true,
            "failed to encode provider request",
        );
        error.error.source = Some(source.to_string());
        error
    }

    /// Whether the router may try the fallback list after this error.
    pub fn fallbacks_allowed(&self) -> bool {
        self.allow_fallbacks.unwrap_or(true)
    }

    /// A "truly empty" error: no message, cause, status, or type. Post-hooks
    /// signal recovery by returning one of these in place of a real error.
    pub fn is_recovered(&self) -> bool {
        self.error.message.is_empty()
            && self.error.source.is_none()
            && self.status_code.is_none()
            && self.kind.is_none()
            && self.error.error_type.is_none()
    }

    /// Whether a post-hook asked the engine to drop the current chunk.
    pub fn skips_stream(&self) -> bool {
        self.stream_control
            .as_ref()
            .and_then(|control| control.skip_stream)
            .unwrap_or(false)
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.status_code) {
            (Some(kind), Some(status)) => {
                write!(f, "{kind:?} ({status}): {}", self.error.message)
            }
            (Some(kind), None) => write!(f, "{kind:?}: {}", self.error.message),
            _ => f.write_str(&self.error.message),
        }
    }
}

impl std::error::Error for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallbacks_default_to_allowed() {
        assert!(GatewayError::api(500, "boom").fallbacks_allowed());
        assert!(GatewayError::operation("bad input").fallbacks_allowed());
    }

    #[test]
    fn cancellation_denies_fallbacks() {
        assert!(!GatewayError::cancelled().fallbacks_allowed());
    }

    #[test]
    fn only_truly_empty_errors_count_as_recovered() {
        assert!(GatewayError::default().is_recovered());

        let mut with_status = GatewayError::default();
        with_status.status_code = Some(200);
        assert!(!with_status.is_recovered());

        assert!(!GatewayError::operation("x").is_recovered());
    }

    #[test]
    fn skip_stream_requires_explicit_flag() {
        let mut error = GatewayError::default();
        assert!(!error.skips_stream());

        error.stream_control = Some(StreamControl {
            skip_stream: Some(true),
            log_error: None,
        });
        assert!(error.skips_stream());
    }
}
