use std::sync::Arc;

use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use crate::hooks::{NoopHooks, PostHookRunner};

/// Runtime context handed in by the router for one request.
///
/// The cancellation token is the only abort primitive: unary operations race
/// the outbound call against it, stream producers check it on every send.
#[derive(Clone)]
pub struct RequestContext {
    pub token: CancellationToken,

    /// Post-hook pipeline applied to every streamed chunk.
    pub hooks: Arc<dyn PostHookRunner>,

    /// Bearer token override for providers that accept caller-supplied OAuth
    /// tokens (Azure).
    pub bearer_token: Option<SecretString>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            token: CancellationToken::new(),
            hooks: Arc::new(NoopHooks),
            bearer_token: None,
        }
    }
}

impl RequestContext {
    pub fn with_hooks(hooks: Arc<dyn PostHookRunner>) -> Self {
        Self {
            hooks,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("cancelled", &self.token.is_cancelled())
            .field("bearer_token", &self.bearer_token.is_some())
            .finish()
    }
}
