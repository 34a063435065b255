//! The streaming engine's delivery discipline.
//!
//! Every stream is a producer task feeding a bounded channel. Each envelope
//! passes through the post-hook pipeline, gets its chunk index and latency
//! stamped, and is sent with a `select` against the cancellation token so a
//! slow consumer back-pressures the producer and a cancelled caller releases
//! it.

pub(crate) mod event_stream;

use std::sync::Arc;
use std::time::Instant;

use schema::{GatewayError, ProviderId, RequestType, StreamEnvelope};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::hooks::{HookContext, PostHookRunner};

/// Capacity of the stream delivery channel.
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 5000;

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// A post-hook vetoed the chunk; nothing was sent and no index consumed.
    Skipped,
    /// The consumer is gone or the context was cancelled; the producer must
    /// return.
    Closed,
}

/// Producer half of a stream. Owns the sender: dropping the producer closes
/// the channel, which is how every exit path, success or error, terminates
/// the stream for the consumer.
pub(crate) struct StreamProducer {
    tx: mpsc::Sender<StreamEnvelope>,
    token: CancellationToken,
    hooks: Arc<dyn PostHookRunner>,
    hook_ctx: HookContext,
    next_index: u32,
    started: Instant,
}

impl StreamProducer {
    pub(crate) fn new(
        ctx: &RequestContext,
        hooks: Arc<dyn PostHookRunner>,
        provider: ProviderId,
        request_type: RequestType,
        buffer_size: usize,
    ) -> (Self, mpsc::Receiver<StreamEnvelope>) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));

        let producer = Self {
            tx,
            token: ctx.token.clone(),
            hooks,
            hook_ctx: HookContext {
                provider,
                request_type,
                stream_end: false,
            },
            next_index: 0,
            started: Instant::now(),
        };

        (producer, rx)
    }

    /// Deliver one mid-stream envelope.
    pub(crate) async fn send(&mut self, envelope: StreamEnvelope) -> Delivery {
        self.dispatch(envelope, false).await
    }

    /// Mark the stream end, deliver the terminal envelope, and close the
    /// channel by consuming the producer.
    pub(crate) async fn finish(mut self, envelope: StreamEnvelope) {
        let _ = self.dispatch(envelope, true).await;
    }

    /// Synthesize an error envelope, run it through the hooks, deliver, and
    /// close.
    pub(crate) async fn fail(self, error: GatewayError) {
        log::error!(
            "{} {} stream failed: {error}",
            self.hook_ctx.provider,
            self.hook_ctx.request_type
        );
        self.finish(StreamEnvelope::from(error)).await;
    }

    async fn dispatch(&mut self, mut envelope: StreamEnvelope, end: bool) -> Delivery {
        if end {
            // The indicator is visible to the hook that runs on the terminal
            // envelope, so per-stream aggregators can flush.
            self.hook_ctx.stream_end = true;
        }

        self.stamp(&mut envelope);

        let (response, error) = match envelope {
            StreamEnvelope::Response(response) => (Some(*response), None),
            StreamEnvelope::Error(error) => (None, Some(*error)),
        };

        let (response, error) = self.hooks.run(&self.hook_ctx, response, error).await;

        let mut envelope = match (response, error) {
            (_, Some(error)) if error.skips_stream() => {
                if error
                    .stream_control
                    .as_ref()
                    .and_then(|control| control.log_error)
                    .unwrap_or(false)
                {
                    log::warn!("post-hook dropped stream chunk: {error}");
                }
                return Delivery::Skipped;
            }
            (Some(response), None) => StreamEnvelope::from(response),
            (Some(response), Some(error)) if error.is_recovered() => StreamEnvelope::from(response),
            (_, Some(error)) => StreamEnvelope::from(error),
            (None, None) => return Delivery::Skipped,
        };

        // Re-stamp: the hook may have replaced the envelope wholesale.
        self.stamp(&mut envelope);

        tokio::select! {
            sent = self.tx.send(envelope) => {
                if sent.is_err() {
                    return Delivery::Closed;
                }
                self.next_index += 1;
                Delivery::Delivered
            }
            _ = self.token.cancelled() => Delivery::Closed,
        }
    }

    fn stamp(&self, envelope: &mut StreamEnvelope) {
        let latency = self.started.elapsed().as_millis() as u64;
        let index = self.next_index;

        match envelope {
            StreamEnvelope::Response(response) => {
                response.extra.provider = Some(self.hook_ctx.provider);
                response.extra.request_type = Some(self.hook_ctx.request_type);
                response.extra.chunk_index = Some(index);
                response.extra.latency_ms = Some(latency);
            }
            StreamEnvelope::Error(error) => {
                error.extra.provider = Some(self.hook_ctx.provider);
                error.extra.request_type = Some(self.hook_ctx.request_type);
                error.extra.chunk_index = Some(index);
                error.extra.latency_ms = Some(latency);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use schema::{Response, StreamControl};

    fn response_chunk() -> StreamEnvelope {
        StreamEnvelope::from(Response::default())
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEnvelope>) -> Vec<StreamEnvelope> {
        let mut collected = Vec::new();
        while let Some(envelope) = rx.recv().await {
            collected.push(envelope);
        }
        collected
    }

    #[tokio::test]
    async fn chunk_indices_increase_strictly_and_terminal_is_last() {
        let ctx = RequestContext::default();
        let (mut producer, rx) =
            StreamProducer::new(&ctx, ctx.hooks.clone(), ProviderId::OpenAi, RequestType::ChatCompletionStream, 16);

        for _ in 0..3 {
            assert_eq!(producer.send(response_chunk()).await, Delivery::Delivered);
        }
        producer.finish(response_chunk()).await;

        let envelopes = drain(rx).await;
        assert_eq!(envelopes.len(), 4);

        let indices: Vec<u32> = envelopes.iter().filter_map(StreamEnvelope::chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn channel_closes_after_error_terminal() {
        let ctx = RequestContext::default();
        let (producer, rx) =
            StreamProducer::new(&ctx, ctx.hooks.clone(), ProviderId::Cohere, RequestType::ChatCompletionStream, 4);

        producer.fail(GatewayError::api(429, "slow down")).await;

        let envelopes = drain(rx).await;
        assert_eq!(envelopes.len(), 1);

        let error = envelopes[0].error().unwrap();
        assert_eq!(error.status_code, Some(429));
        assert_eq!(error.extra.provider, Some(ProviderId::Cohere));
        assert_eq!(error.extra.request_type, Some(RequestType::ChatCompletionStream));
    }

    struct SkipEveryOther;

    #[async_trait]
    impl PostHookRunner for SkipEveryOther {
        async fn run(
            &self,
            _ctx: &HookContext,
            response: Option<Response>,
            error: Option<GatewayError>,
        ) -> (Option<Response>, Option<GatewayError>) {
            let Some(response) = response else {
                return (response, error);
            };

            if response.extra.chunk_index.unwrap_or(0) % 2 == 0 {
                (Some(response), None)
            } else {
                let mut veto = GatewayError::default();
                veto.stream_control = Some(StreamControl {
                    skip_stream: Some(true),
                    log_error: None,
                });
                (None, Some(veto))
            }
        }
    }

    #[tokio::test]
    async fn skipped_chunks_consume_no_index() {
        let ctx = RequestContext::default();
        let hooks: Arc<dyn PostHookRunner> = Arc::new(SkipEveryOther);
        let (mut producer, rx) =
            StreamProducer::new(&ctx, hooks, ProviderId::OpenAi, RequestType::ChatCompletionStream, 16);

        // The hook skips odd indices, but since skipped chunks do not consume
        // an index, every chunk after the first is seen as index 1 and
        // dropped until the producer finishes.
        assert_eq!(producer.send(response_chunk()).await, Delivery::Delivered);
        assert_eq!(producer.send(response_chunk()).await, Delivery::Skipped);
        assert_eq!(producer.send(response_chunk()).await, Delivery::Skipped);
        drop(producer);

        let envelopes = drain(rx).await;
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].chunk_index(), Some(0));
    }

    struct RecordStreamEnd {
        seen: std::sync::Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl PostHookRunner for RecordStreamEnd {
        async fn run(
            &self,
            ctx: &HookContext,
            response: Option<Response>,
            error: Option<GatewayError>,
        ) -> (Option<Response>, Option<GatewayError>) {
            self.seen.lock().unwrap().push(ctx.stream_end);
            (response, error)
        }
    }

    #[tokio::test]
    async fn stream_end_is_set_before_the_final_hook_invocation() {
        let ctx = RequestContext::default();
        let recorder = Arc::new(RecordStreamEnd {
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let (mut producer, rx) = StreamProducer::new(
            &ctx,
            recorder.clone(),
            ProviderId::OpenAi,
            RequestType::ChatCompletionStream,
            16,
        );

        producer.send(response_chunk()).await;
        producer.send(response_chunk()).await;
        producer.finish(response_chunk()).await;

        drain(rx).await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec![false, false, true]);
    }

    #[tokio::test]
    async fn cancellation_releases_a_blocked_producer() {
        let ctx = RequestContext::default();
        let (mut producer, rx) =
            StreamProducer::new(&ctx, ctx.hooks.clone(), ProviderId::OpenAi, RequestType::ChatCompletionStream, 1);

        // Fill the single-slot buffer; the consumer never reads.
        assert_eq!(producer.send(response_chunk()).await, Delivery::Delivered);

        let token = ctx.token.clone();
        let blocked = tokio::spawn(async move { producer.send(response_chunk()).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        token.cancel();
        assert_eq!(blocked.await.unwrap(), Delivery::Closed);

        drop(rx);
    }

    struct RecoverErrors;

    #[async_trait]
    impl PostHookRunner for RecoverErrors {
        async fn run(
            &self,
            _ctx: &HookContext,
            _response: Option<Response>,
            _error: Option<GatewayError>,
        ) -> (Option<Response>, Option<GatewayError>) {
            // Recovery: a response plus a truly empty error.
            (Some(Response::default()), Some(GatewayError::default()))
        }
    }

    #[tokio::test]
    async fn a_hook_can_recover_an_error_into_a_response() {
        let ctx = RequestContext::default();
        let hooks: Arc<dyn PostHookRunner> = Arc::new(RecoverErrors);
        let (producer, rx) =
            StreamProducer::new(&ctx, hooks, ProviderId::OpenAi, RequestType::ChatCompletionStream, 4);

        producer.fail(GatewayError::api(500, "boom")).await;

        let envelopes = drain(rx).await;
        assert_eq!(envelopes.len(), 1);
        assert!(envelopes[0].response().is_some());
    }
}
