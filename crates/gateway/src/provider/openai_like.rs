//! Shared implementation for every OpenAI-compatible surface.
//!
//! OpenAI, Groq, Ollama, OpenRouter, Mistral, Cerebras, Parasail, SGL, Azure,
//! and Gemini's compat endpoints all speak the same chat wire format; they
//! differ only in base URL, paths, and authentication. The canonical model in
//! the `schema` crate is deliberately field-compatible with this format, so
//! request bodies flatten canonical parameters directly and responses decode
//! into the canonical envelope without a per-field translation table.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::HeaderMap;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use schema::{
    ChatDelta, ChatMessage, ChatRequest, ChatRole, Choice, GatewayError, Key, Parameters,
    ProviderId, Request, RequestType, Response, ResponseData, TextCompletionInput, Usage,
};
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::context::RequestContext;
use crate::http::{build_client, build_streaming_client, merge_extra_headers, sse_headers, trim_base_url};
use crate::provider::responses_bridge::{self, StreamShape};
use crate::provider::{Provider, util};
use crate::stream::{Delivery, StreamProducer};
use crate::{ProviderResult, ResponseStream};

const GROQ_API_URL: &str = "https://api.groq.com/openai";
const OPENROUTER_API_URL: &str = "https://openrouter.ai/api";
const MISTRAL_API_URL: &str = "https://api.mistral.ai";
const CEREBRAS_API_URL: &str = "https://api.cerebras.ai";

/// The shared engine for OpenAI-shaped providers.
pub(crate) struct OpenAiCompatCore {
    pub provider: ProviderId,
    pub base_url: String,
    pub chat_path: &'static str,
    pub text_path: &'static str,
    pub embedding_path: &'static str,
    pub client: Client,
    pub stream_client: Client,
    pub config: ProviderConfig,
    pub keyless: bool,
}

impl OpenAiCompatCore {
    pub(crate) fn new(
        provider: ProviderId,
        config: ProviderConfig,
        default_base: Option<&str>,
    ) -> ProviderResult<Self> {
        let base_url = match config.base_url.as_deref().or(default_base) {
            Some(url) => trim_base_url(url),
            None => {
                return Err(Box::new(GatewayError::configuration(format!(
                    "provider {provider} requires a base_url"
                ))));
            }
        };

        Ok(Self {
            provider,
            base_url,
            chat_path: "/v1/chat/completions",
            text_path: "/v1/completions",
            embedding_path: "/v1/embeddings",
            client: build_client(&config)?,
            stream_client: build_streaming_client(&config)?,
            keyless: provider.is_keyless(),
            config,
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Request headers: JSON content type, Bearer auth unless keyless, SSE
    /// accept headers for streams, then the configured extras.
    pub(crate) fn headers(&self, key: &Key, sse: bool) -> ProviderResult<HeaderMap> {
        let mut headers = if sse { sse_headers() } else { HeaderMap::new() };
        headers.insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json"));

        match key.secret() {
            Some(secret) => {
                let mut value = http::HeaderValue::from_str(&format!("Bearer {secret}"))
                    .map_err(|_| {
                        Box::new(GatewayError::configuration("API key contains invalid header characters"))
                    })?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            None if self.keyless => {}
            None => {
                return Err(Box::new(GatewayError::configuration(format!(
                    "no API key value configured for provider {}",
                    self.provider
                ))));
            }
        }

        merge_extra_headers(&mut headers, &self.config.extra_headers);
        Ok(headers)
    }

    pub(crate) async fn chat_completion(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let request_type = util::begin(&self.config, self.provider, request, false)?;
        let chat = util::chat_input(request, request_type)?;

        let body = encode_body(
            self.provider,
            request_type,
            &ChatBody::new(&request.model, chat, None),
        )?;
        let builder = self
            .client
            .post(self.url(self.chat_path))
            .headers(self.headers(key, false)?)
            .body(body);

        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, self.provider, request_type, None))?;

        if !(200..300).contains(&dispatched.status) {
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                self.provider,
                request_type,
                Some(dispatched.latency_ms),
            ));
        }

        let mut response: Response = sonic_rs::from_slice(&dispatched.body).map_err(|e| {
            util::stamp_error(GatewayError::unmarshal(e), self.provider, request_type, None)
        })?;

        util::stamp_response(
            &mut response,
            self.provider,
            request_type,
            &request.model,
            dispatched.latency_ms,
            util::raw_value(self.config.send_back_raw_response, &dispatched.body),
        );

        Ok(response)
    }

    pub(crate) async fn chat_completion_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
        shape: StreamShape,
    ) -> ProviderResult<ResponseStream> {
        util::ensure_allowed(&self.config, self.provider, shape.request_type)?;
        let chat = util::chat_input(request, shape.request_type)?;

        let body = encode_body(
            self.provider,
            shape.request_type,
            &ChatBody::new(&request.model, chat, Some(true)),
        )?;
        let builder = self
            .stream_client
            .post(self.url(self.chat_path))
            .headers(self.headers(key, true)?)
            .body(body);

        let upstream = self.open_stream(ctx, builder, shape.request_type).await?;

        Ok(spawn_chat_sse_stream(
            ctx,
            shape,
            SseStreamParams {
                provider: self.provider,
                model_requested: request.model.clone(),
                buffer_size: self.config.stream_buffer_size,
                send_raw: self.config.send_back_raw_response,
            },
            upstream,
        ))
    }

    pub(crate) async fn text_completion(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let request_type = util::begin(&self.config, self.provider, request, false)?;
        let text = util::text_input(request, request_type)?;

        let body = encode_body(
            self.provider,
            request_type,
            &TextBody {
                model: &request.model,
                prompt: &text.input,
                params: &text.params,
                stream: None,
            },
        )?;
        let builder = self
            .client
            .post(self.url(self.text_path))
            .headers(self.headers(key, false)?)
            .body(body);

        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, self.provider, request_type, None))?;

        if !(200..300).contains(&dispatched.status) {
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                self.provider,
                request_type,
                Some(dispatched.latency_ms),
            ));
        }

        let wire: TextCompletionWire = sonic_rs::from_slice(&dispatched.body).map_err(|e| {
            util::stamp_error(GatewayError::unmarshal(e), self.provider, request_type, None)
        })?;

        let mut response = wire.into_response();
        response.to_text_completion();
        util::stamp_response(
            &mut response,
            self.provider,
            request_type,
            &request.model,
            dispatched.latency_ms,
            util::raw_value(self.config.send_back_raw_response, &dispatched.body),
        );

        Ok(response)
    }

    pub(crate) async fn text_completion_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        let request_type = util::begin(&self.config, self.provider, request, true)?;
        let text = util::text_input(request, request_type)?;

        let body = encode_body(
            self.provider,
            request_type,
            &TextBody {
                model: &request.model,
                prompt: &text.input,
                params: &text.params,
                stream: Some(true),
            },
        )?;
        let builder = self
            .stream_client
            .post(self.url(self.text_path))
            .headers(self.headers(key, true)?)
            .body(body);

        let upstream = self.open_stream(ctx, builder, request_type).await?;

        Ok(spawn_text_sse_stream(
            ctx,
            SseStreamParams {
                provider: self.provider,
                model_requested: request.model.clone(),
                buffer_size: self.config.stream_buffer_size,
                send_raw: self.config.send_back_raw_response,
            },
            upstream,
        ))
    }

    pub(crate) async fn embedding(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        util::ensure_allowed(&self.config, self.provider, RequestType::Embedding)?;
        let embedding = util::embedding_input(request)?;

        let body = encode_body(
            self.provider,
            RequestType::Embedding,
            &EmbeddingBody {
                model: &request.model,
                input: &embedding.input,
                params: &embedding.params,
            },
        )?;
        let builder = self
            .client
            .post(self.url(self.embedding_path))
            .headers(self.headers(key, false)?)
            .body(body);

        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, self.provider, RequestType::Embedding, None))?;

        if !(200..300).contains(&dispatched.status) {
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                self.provider,
                RequestType::Embedding,
                Some(dispatched.latency_ms),
            ));
        }

        let mut response: Response = sonic_rs::from_slice(&dispatched.body).map_err(|e| {
            util::stamp_error(GatewayError::unmarshal(e), self.provider, RequestType::Embedding, None)
        })?;

        util::stamp_response(
            &mut response,
            self.provider,
            RequestType::Embedding,
            &request.model,
            dispatched.latency_ms,
            util::raw_value(self.config.send_back_raw_response, &dispatched.body),
        );

        Ok(response)
    }

    /// Send a streaming request and fail fast on a non-2xx status before
    /// handing the body to the scanner.
    pub(crate) async fn open_stream(
        &self,
        ctx: &RequestContext,
        builder: reqwest::RequestBuilder,
        request_type: RequestType,
    ) -> ProviderResult<reqwest::Response> {
        let response = util::send_with_cancellation(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, self.provider, request_type, None))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(util::stamp_error(
                util::error_from_body(status.as_u16(), &body),
                self.provider,
                request_type,
                None,
            ));
        }

        Ok(response)
    }
}

pub(crate) fn encode_body<T: Serialize>(
    provider: ProviderId,
    request_type: RequestType,
    body: &T,
) -> ProviderResult<Vec<u8>> {
    sonic_rs::to_vec(body)
        .map_err(|e| util::stamp_error(GatewayError::marshaling(e), provider, request_type, None))
}

/// Chat completion request body. Canonical messages and parameters are
/// already in this wire vocabulary; parameters flatten in, extra params last.
#[derive(Serialize)]
pub(crate) struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(flatten)]
    params: Parameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

impl<'a> ChatBody<'a> {
    pub(crate) fn new(model: &'a str, chat: &'a ChatRequest, stream: Option<bool>) -> Self {
        let mut params = chat.params.clone();
        if stream == Some(true) {
            // Ask for the usage chunk so the reducer has numbers to aggregate.
            let mut options = params.stream_options.unwrap_or_default();
            options.include_usage = Some(true);
            params.stream_options = Some(options);
        }

        Self {
            model,
            messages: &chat.input,
            params,
            stream,
        }
    }
}

#[derive(Serialize)]
struct TextBody<'a> {
    model: &'a str,
    prompt: &'a TextCompletionInput,
    #[serde(flatten)]
    params: &'a Parameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct EmbeddingBody<'a> {
    model: &'a str,
    input: &'a schema::EmbeddingInput,
    #[serde(flatten)]
    params: &'a schema::EmbeddingParameters,
}

/// Legacy text-completion responses carry `text` choices instead of messages.
#[derive(Deserialize)]
struct TextCompletionWire {
    #[serde(default)]
    id: String,
    #[serde(default)]
    created: u64,
    #[serde(default)]
    model: String,
    choices: Vec<TextChoiceWire>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct TextChoiceWire {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    text: String,
    #[serde(default)]
    finish_reason: Option<String>,
}

impl TextCompletionWire {
    fn into_response(self) -> Response {
        Response {
            id: self.id,
            object: "text_completion".to_string(),
            created: self.created,
            model: self.model,
            usage: self.usage,
            data: ResponseData::Chat {
                choices: self
                    .choices
                    .into_iter()
                    .map(|choice| Choice {
                        index: choice.index,
                        message: Some(ChatMessage::text(ChatRole::Assistant, choice.text)),
                        finish_reason: choice.finish_reason,
                        ..Default::default()
                    })
                    .collect(),
            },
            ..Default::default()
        }
    }
}

/// Streaming usage reducer.
///
/// Usage may arrive before, with, or after the final content chunk, and some
/// providers repeat it; keep the largest seen value per field and derive the
/// total when none was reported. The max matches observed provider behavior
/// rather than any documented contract.
#[derive(Default)]
pub(crate) struct UsageAccumulator {
    prompt: u32,
    completion: u32,
    total: u32,
    details: Option<Usage>,
}

impl UsageAccumulator {
    pub(crate) fn observe(&mut self, usage: &Usage) {
        self.prompt = self
            .prompt
            .max(usage.prompt_tokens)
            .max(usage.input_tokens.unwrap_or(0));
        self.completion = self
            .completion
            .max(usage.completion_tokens)
            .max(usage.output_tokens.unwrap_or(0));
        self.total = self.total.max(usage.total_tokens);

        if usage.input_tokens_details.is_some() || usage.output_tokens_details.is_some() {
            self.details = Some(usage.clone());
        }
    }

    pub(crate) fn finalize(&self) -> Usage {
        let mut usage = Usage::new(
            self.prompt,
            self.completion,
            self.total.max(self.prompt + self.completion),
        );

        if let Some(details) = &self.details {
            usage.input_tokens_details = details.input_tokens_details.clone();
            usage.output_tokens_details = details.output_tokens_details.clone();
        }

        usage
    }

}

pub(crate) struct SseStreamParams {
    pub provider: ProviderId,
    pub model_requested: String,
    pub buffer_size: usize,
    pub send_raw: bool,
}

/// The OpenAI-family chat streaming loop.
///
/// `data: [DONE]` terminates; usage is max-reduced across chunks; the finish
/// reason is captured from the last choice that reports one; only chunks
/// carrying content or tool-call deltas are forwarded (pure role/usage/finish
/// chunks are absorbed); one synthetic terminal chunk carries the aggregated
/// usage and finish reason before the channel closes.
pub(crate) fn spawn_chat_sse_stream(
    ctx: &RequestContext,
    shape: StreamShape,
    params: SseStreamParams,
    upstream: reqwest::Response,
) -> ResponseStream {
    let (mut producer, rx) = StreamProducer::new(
        ctx,
        shape.hooks,
        params.provider,
        shape.request_type,
        params.buffer_size,
    );

    tokio::spawn(async move {
        if shape.emit_head
            && responses_bridge::emit_head_events(&mut producer).await == Delivery::Closed
        {
            return;
        }

        let mut events = upstream.bytes_stream().eventsource();
        let mut usage = UsageAccumulator::default();
        let mut finish_reason: Option<String> = None;
        let mut stream_id = String::new();
        let mut model = String::new();
        let mut created = 0u64;
        let mut fingerprint: Option<String> = None;

        loop {
            let Some(event) = events.next().await else { break };

            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    producer.fail(GatewayError::transport(e)).await;
                    return;
                }
            };

            if event.data == "[DONE]" {
                break;
            }

            let mut chunk: Response = match sonic_rs::from_str(&event.data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    log::warn!("skipping undecodable {} stream chunk: {e}", params.provider);
                    continue;
                }
            };

            if !chunk.id.is_empty() {
                stream_id = chunk.id.clone();
            }
            if !chunk.model.is_empty() {
                model = chunk.model.clone();
            }
            if chunk.created != 0 {
                created = chunk.created;
            }
            if chunk.system_fingerprint.is_some() {
                fingerprint = chunk.system_fingerprint.clone();
            }
            if let Some(chunk_usage) = &chunk.usage {
                usage.observe(chunk_usage);
            }

            let mut has_output = false;
            if let Some(choices) = chunk.data.choices() {
                for choice in choices {
                    if let Some(reason) = &choice.finish_reason {
                        finish_reason = Some(reason.clone());
                    }
                    if choice.delta.as_ref().is_some_and(ChatDelta::has_output) {
                        has_output = true;
                    }
                }
            }

            // Pure usage/finish/role chunks are absorbed into the terminal.
            if !has_output {
                continue;
            }

            if params.send_raw {
                chunk.extra.raw_response = util::raw_value(true, event.data.as_bytes());
            }
            chunk.extra.model_requested = Some(params.model_requested.clone());

            if producer.send(chunk.into()).await == Delivery::Closed {
                return;
            }
        }

        let mut terminal = Response {
            id: stream_id,
            object: "chat.completion.chunk".to_string(),
            created,
            model,
            system_fingerprint: fingerprint,
            usage: Some(usage.finalize()),
            data: ResponseData::Chat {
                choices: vec![Choice {
                    index: 0,
                    delta: Some(ChatDelta::default()),
                    finish_reason,
                    ..Default::default()
                }],
            },
            ..Default::default()
        };
        terminal.extra.model_requested = Some(params.model_requested);

        producer.finish(terminal.into()).await;
    });

    rx
}

/// Streaming loop for legacy text completions: `text` fragments become
/// content deltas, everything else follows the chat loop's discipline.
pub(crate) fn spawn_text_sse_stream(
    ctx: &RequestContext,
    params: SseStreamParams,
    upstream: reqwest::Response,
) -> ResponseStream {
    let (mut producer, rx) = StreamProducer::new(
        ctx,
        ctx.hooks.clone(),
        params.provider,
        RequestType::TextCompletionStream,
        params.buffer_size,
    );

    tokio::spawn(async move {
        let mut events = upstream.bytes_stream().eventsource();
        let mut usage = UsageAccumulator::default();
        let mut finish_reason: Option<String> = None;
        let mut stream_id = String::new();
        let mut model = String::new();

        loop {
            let Some(event) = events.next().await else { break };

            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    producer.fail(GatewayError::transport(e)).await;
                    return;
                }
            };

            if event.data == "[DONE]" {
                break;
            }

            let wire: TextStreamChunkWire = match sonic_rs::from_str(&event.data) {
                Ok(wire) => wire,
                Err(e) => {
                    log::warn!("skipping undecodable {} text stream chunk: {e}", params.provider);
                    continue;
                }
            };

            if !wire.id.is_empty() {
                stream_id = wire.id.clone();
            }
            if !wire.model.is_empty() {
                model = wire.model.clone();
            }
            if let Some(chunk_usage) = &wire.usage {
                usage.observe(chunk_usage);
            }

            let mut text = String::new();
            for choice in &wire.choices {
                if let Some(reason) = &choice.finish_reason {
                    finish_reason = Some(reason.clone());
                }
                text.push_str(&choice.text);
            }

            if text.is_empty() {
                continue;
            }

            let mut chunk = Response {
                id: wire.id,
                object: "text_completion".to_string(),
                created: wire.created,
                model: wire.model,
                data: ResponseData::Chat {
                    choices: vec![Choice {
                        index: 0,
                        delta: Some(ChatDelta {
                            content: Some(text),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                },
                ..Default::default()
            };
            if params.send_raw {
                chunk.extra.raw_response = util::raw_value(true, event.data.as_bytes());
            }
            chunk.extra.model_requested = Some(params.model_requested.clone());

            if producer.send(chunk.into()).await == Delivery::Closed {
                return;
            }
        }

        let mut terminal = Response {
            id: stream_id,
            object: "text_completion".to_string(),
            model,
            usage: Some(usage.finalize()),
            data: ResponseData::Chat {
                choices: vec![Choice {
                    index: 0,
                    delta: Some(ChatDelta::default()),
                    finish_reason,
                    ..Default::default()
                }],
            },
            ..Default::default()
        };
        terminal.extra.model_requested = Some(params.model_requested);

        producer.finish(terminal.into()).await;
    });

    rx
}

#[derive(Deserialize)]
struct TextStreamChunkWire {
    #[serde(default)]
    id: String,
    #[serde(default)]
    created: u64,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<TextChoiceWire>,
    #[serde(default)]
    usage: Option<Usage>,
}

/// An OpenAI-compatible provider that differs from OpenAI only in endpoint
/// and authentication: Groq, Ollama, OpenRouter, Mistral, Cerebras, Parasail,
/// and SGL. Responses requests ride the chat endpoint through the bridge.
pub struct OpenAiCompatProvider {
    core: OpenAiCompatCore,
}

impl OpenAiCompatProvider {
    pub fn groq(config: ProviderConfig) -> ProviderResult<Self> {
        Self::with_default(ProviderId::Groq, config, Some(GROQ_API_URL))
    }

    pub fn open_router(config: ProviderConfig) -> ProviderResult<Self> {
        Self::with_default(ProviderId::OpenRouter, config, Some(OPENROUTER_API_URL))
    }

    pub fn mistral(config: ProviderConfig) -> ProviderResult<Self> {
        Self::with_default(ProviderId::Mistral, config, Some(MISTRAL_API_URL))
    }

    pub fn cerebras(config: ProviderConfig) -> ProviderResult<Self> {
        Self::with_default(ProviderId::Cerebras, config, Some(CEREBRAS_API_URL))
    }

    /// Ollama has no hosted default; a base URL is required configuration.
    pub fn ollama(config: ProviderConfig) -> ProviderResult<Self> {
        Self::with_default(ProviderId::Ollama, config, None)
    }

    pub fn parasail(config: ProviderConfig) -> ProviderResult<Self> {
        Self::with_default(ProviderId::Parasail, config, None)
    }

    pub fn sgl(config: ProviderConfig) -> ProviderResult<Self> {
        Self::with_default(ProviderId::Sgl, config, None)
    }

    fn with_default(
        provider: ProviderId,
        config: ProviderConfig,
        default_base: Option<&str>,
    ) -> ProviderResult<Self> {
        Ok(Self {
            core: OpenAiCompatCore::new(provider, config, default_base)?,
        })
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn id(&self) -> ProviderId {
        self.core.provider
    }

    async fn chat_completion(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        self.core.chat_completion(ctx, key, request).await
    }

    async fn chat_completion_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        self.core
            .chat_completion_stream(ctx, key, request, StreamShape::chat(ctx))
            .await
    }

    async fn text_completion(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        self.core.text_completion(ctx, key, request).await
    }

    async fn text_completion_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        self.core.text_completion_stream(ctx, key, request).await
    }

    async fn embedding(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        self.core.embedding(ctx, key, request).await
    }

    async fn responses(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let chat_request = responses_bridge::chat_request_from_responses(request)?;
        let mut response = self.core.chat_completion(ctx, key, &chat_request).await?;
        response.to_responses_only();
        Ok(response)
    }

    async fn responses_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        let chat_request = responses_bridge::chat_request_from_responses_stream(request)?;
        self.core
            .chat_completion_stream(ctx, key, &chat_request, StreamShape::responses(ctx))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_reduction_keeps_per_field_maxima() {
        let mut acc = UsageAccumulator::default();
        acc.observe(&Usage::new(10, 0, 0));
        acc.observe(&Usage::new(10, 25, 35));
        acc.observe(&Usage::new(3, 25, 0));

        let usage = acc.finalize();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 25);
        assert_eq!(usage.total_tokens, 35);
    }

    #[test]
    fn usage_total_is_derived_when_never_reported() {
        let mut acc = UsageAccumulator::default();
        acc.observe(&Usage::new(7, 9, 0));

        let usage = acc.finalize();
        assert_eq!(usage.total_tokens, 16);
    }

    #[test]
    fn chat_body_forces_include_usage_on_streams() {
        let chat = ChatRequest {
            input: vec![ChatMessage::text(ChatRole::User, "hi")],
            params: Parameters::default(),
        };

        let body = serde_json::to_value(ChatBody::new("gpt-4o", &chat, Some(true))).unwrap();
        assert_eq!(body["stream"], serde_json::json!(true));
        assert_eq!(body["stream_options"]["include_usage"], serde_json::json!(true));

        let unary = serde_json::to_value(ChatBody::new("gpt-4o", &chat, None)).unwrap();
        assert!(unary.get("stream").is_none());
        assert!(unary.get("stream_options").is_none());
    }

    #[test]
    fn missing_base_url_is_a_configuration_error() {
        let error = OpenAiCompatProvider::ollama(ProviderConfig::default()).err().unwrap();
        assert_eq!(error.kind, Some(schema::ErrorKind::Configuration));
    }
}
