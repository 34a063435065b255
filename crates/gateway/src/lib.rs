//! Provider dispatch and streaming engine.
//!
//! This crate owns everything between the canonical request model and the
//! provider wire: the [`Provider`](provider::Provider) contract and its
//! adapters, HTTP client construction, credential selection, the SSE and
//! AWS-EventStream streaming state machines, and the post-hook pipeline that
//! every streamed chunk passes through.
//!
//! The public HTTP transport and the router that picks a provider live
//! outside this crate; they hand in a [`RequestContext`], a selected
//! [`Key`](schema::Key), and a typed [`Request`](schema::Request).

mod config;
mod context;
mod hooks;
mod http;
mod keys;

pub mod provider;
pub mod stream;

pub use config::{ProviderConfig, ProxyConfig};
pub use context::RequestContext;
pub use hooks::{HookContext, NoopHooks, PostHookRunner};
pub use keys::{KeySelector, select_key, weighted_random_key};
pub use stream::DEFAULT_STREAM_BUFFER_SIZE;

use schema::{GatewayError, StreamEnvelope};

/// Result type for provider operations. Errors are boxed: the canonical
/// error shape is large and travels far.
pub type ProviderResult<T> = Result<T, Box<GatewayError>>;

/// The consumer half of a streaming call. The producer closes the channel
/// after the terminal envelope; callers must drain it or cancel the context,
/// otherwise the producer parks on a full buffer.
pub type ResponseStream = tokio::sync::mpsc::Receiver<StreamEnvelope>;
