//! The post-hook pipeline as seen from the streaming engine.
//!
//! Multi-plugin composition, ordering, and recovery policy live in the
//! router; the engine only knows a single runner it must call for every
//! chunk.

use async_trait::async_trait;
use schema::{GatewayError, ProviderId, RequestType, Response};

/// Per-stream context visible to post-hooks.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub provider: ProviderId,
    /// The operation this stream belongs to; the one discriminator plugins
    /// can rely on.
    pub request_type: RequestType,
    /// Set on the final envelope, before the hook runs on it. Hooks use it to
    /// flush per-stream aggregators.
    pub stream_end: bool,
}

/// A user-supplied transformation applied to every emitted response or error.
///
/// A hook may turn a success into another success, a success into an error,
/// an error into a success, or return an error whose
/// [`StreamControl::skip_stream`](schema::StreamControl) asks the engine to
/// drop the chunk silently.
#[async_trait]
pub trait PostHookRunner: Send + Sync {
    async fn run(
        &self,
        ctx: &HookContext,
        response: Option<Response>,
        error: Option<GatewayError>,
    ) -> (Option<Response>, Option<GatewayError>);
}

/// Pass-through runner used when no plugins are configured.
pub struct NoopHooks;

#[async_trait]
impl PostHookRunner for NoopHooks {
    async fn run(
        &self,
        _ctx: &HookContext,
        response: Option<Response>,
        error: Option<GatewayError>,
    ) -> (Option<Response>, Option<GatewayError>) {
        (response, error)
    }
}
