//! Responses support for providers that only expose a chat endpoint.
//!
//! Unary: route through the provider's chat completion and rewrite the result
//! in place. Streaming: wrap the post-hook pipeline with a converter that
//! rewrites each chat chunk into a Responses event before any plugin sees it,
//! and emit the synthetic `response.created` / `response.in_progress` head
//! events that the native Responses stream would open with.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use schema::{
    GatewayError, Request, RequestPayload, RequestType, Response, ResponseData,
    ResponsesEventType, ResponsesStreamEvent,
};

use crate::context::RequestContext;
use crate::hooks::{HookContext, PostHookRunner};
use crate::stream::{Delivery, StreamProducer};
use crate::ProviderResult;

/// How a chat stream should present itself: natively, or as a Responses
/// stream riding the chat endpoint.
pub(crate) struct StreamShape {
    pub request_type: RequestType,
    pub hooks: Arc<dyn PostHookRunner>,
    pub emit_head: bool,
}

impl StreamShape {
    pub(crate) fn chat(ctx: &RequestContext) -> Self {
        Self {
            request_type: RequestType::ChatCompletionStream,
            hooks: ctx.hooks.clone(),
            emit_head: false,
        }
    }

    pub(crate) fn responses(ctx: &RequestContext) -> Self {
        Self {
            request_type: RequestType::ResponsesStream,
            hooks: Arc::new(ResponsesStreamAdapter::new(ctx.hooks.clone())),
            emit_head: true,
        }
    }
}

/// Project the Responses payload onto a bare chat request, for adapters that
/// drive their chat pipeline directly.
pub(crate) fn chat_from_responses(
    request: &Request,
    request_type: RequestType,
) -> ProviderResult<schema::ChatRequest> {
    Ok(super::util::responses_input(request, request_type)?.to_chat())
}

fn bridge_request(request: &Request, request_type: RequestType) -> ProviderResult<Request> {
    let chat = chat_from_responses(request, request_type)?;

    Ok(Request {
        provider: request.provider,
        model: request.model.clone(),
        fallbacks: Vec::new(),
        payload: RequestPayload::Chat(chat),
    })
}

/// Project a Responses request onto the chat surface for a unary call.
pub(crate) fn chat_request_from_responses(request: &Request) -> ProviderResult<Request> {
    bridge_request(request, RequestType::Responses)
}

/// Same projection for the streaming path.
pub(crate) fn chat_request_from_responses_stream(request: &Request) -> ProviderResult<Request> {
    bridge_request(request, RequestType::ResponsesStream)
}

fn head_event(sequence_number: u64, event_type: ResponsesEventType) -> Response {
    Response {
        object: "response".to_string(),
        data: ResponseData::ResponsesStream {
            event: ResponsesStreamEvent {
                event_type,
                sequence_number,
                ..Default::default()
            },
        },
        ..Default::default()
    }
}

/// Open a bridged stream the way the native API would: `response.created` at
/// sequence 0, `response.in_progress` at sequence 1.
pub(crate) async fn emit_head_events(producer: &mut StreamProducer) -> Delivery {
    for (sequence, event_type) in [
        (0, ResponsesEventType::Created),
        (1, ResponsesEventType::InProgress),
    ] {
        if producer.send(head_event(sequence, event_type).into()).await == Delivery::Closed {
            return Delivery::Closed;
        }
    }

    Delivery::Delivered
}

/// Post-hook wrapper that converts chat-shaped chunks into Responses events
/// before the inner pipeline runs, so plugins only ever observe
/// Responses-shaped chunks on a Responses stream.
pub(crate) struct ResponsesStreamAdapter {
    inner: Arc<dyn PostHookRunner>,
    // Head events own sequences 0 and 1.
    sequence: AtomicU64,
}

impl ResponsesStreamAdapter {
    pub(crate) fn new(inner: Arc<dyn PostHookRunner>) -> Self {
        Self {
            inner,
            sequence: AtomicU64::new(2),
        }
    }
}

#[async_trait]
impl PostHookRunner for ResponsesStreamAdapter {
    async fn run(
        &self,
        ctx: &HookContext,
        response: Option<Response>,
        error: Option<GatewayError>,
    ) -> (Option<Response>, Option<GatewayError>) {
        let response = response.map(|mut chunk| {
            if matches!(chunk.data, ResponseData::Chat { .. }) {
                let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
                chunk.to_responses_stream(sequence);
            }
            chunk
        });

        self.inner.run(ctx, response, error).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopHooks;
    use schema::{ChatDelta, Choice, ProviderId, Usage};

    fn hook_ctx() -> HookContext {
        HookContext {
            provider: ProviderId::Anthropic,
            request_type: RequestType::ResponsesStream,
            stream_end: false,
        }
    }

    #[tokio::test]
    async fn adapter_rewrites_chat_chunks_into_responses_events() {
        let adapter = ResponsesStreamAdapter::new(Arc::new(NoopHooks));

        let chunk = Response {
            data: ResponseData::Chat {
                choices: vec![Choice {
                    delta: Some(ChatDelta {
                        content: Some("hi".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
            },
            ..Default::default()
        };

        let (response, _) = adapter.run(&hook_ctx(), Some(chunk), None).await;
        let response = response.unwrap();

        let ResponseData::ResponsesStream { event } = &response.data else {
            panic!("expected a responses stream event");
        };
        assert_eq!(event.event_type, ResponsesEventType::OutputTextDelta);
        // Head events own 0 and 1.
        assert_eq!(event.sequence_number, 2);
    }

    #[tokio::test]
    async fn adapter_sequences_increase_and_skip_head_slots() {
        let adapter = ResponsesStreamAdapter::new(Arc::new(NoopHooks));

        for expected in [2u64, 3, 4] {
            let chunk = Response {
                data: ResponseData::Chat {
                    choices: vec![Choice {
                        delta: Some(ChatDelta {
                            content: Some("x".into()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                },
                ..Default::default()
            };

            let (response, _) = adapter.run(&hook_ctx(), Some(chunk), None).await;
            let ResponseData::ResponsesStream { event } = response.unwrap().data else {
                panic!("expected a responses stream event");
            };
            assert_eq!(event.sequence_number, expected);
        }
    }

    #[tokio::test]
    async fn terminal_chat_chunk_becomes_completed_with_usage() {
        let adapter = ResponsesStreamAdapter::new(Arc::new(NoopHooks));

        let terminal = Response {
            usage: Some(Usage::new(2, 3, 5)),
            data: ResponseData::Chat {
                choices: vec![Choice {
                    delta: Some(ChatDelta::default()),
                    finish_reason: Some("stop".into()),
                    ..Default::default()
                }],
            },
            ..Default::default()
        };

        let (response, _) = adapter.run(&hook_ctx(), Some(terminal), None).await;
        let ResponseData::ResponsesStream { event } = response.unwrap().data else {
            panic!("expected a responses stream event");
        };

        assert_eq!(event.event_type, ResponsesEventType::Completed);
        let usage = event.response.as_ref().unwrap().usage.as_ref().unwrap();
        assert_eq!(usage.input_tokens, Some(2));
        assert_eq!(usage.output_tokens, Some(3));
    }

    #[tokio::test]
    async fn already_converted_events_pass_through_untouched() {
        let adapter = ResponsesStreamAdapter::new(Arc::new(NoopHooks));

        let head = head_event(0, ResponsesEventType::Created);
        let (response, _) = adapter.run(&hook_ctx(), Some(head), None).await;

        let ResponseData::ResponsesStream { event } = response.unwrap().data else {
            panic!("expected a responses stream event");
        };
        assert_eq!(event.event_type, ResponsesEventType::Created);
        assert_eq!(event.sequence_number, 0);
        // No sequence slot consumed.
        assert_eq!(adapter.sequence.load(Ordering::Relaxed), 2);
    }
}
