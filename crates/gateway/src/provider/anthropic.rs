//! Anthropic adapter: native `/v1/messages` for chat, text completion mapped
//! through messages, Responses bridged through chat.

pub(crate) mod input;
pub(crate) mod output;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::HeaderMap;
use http::header::CONTENT_TYPE;
use reqwest::Client;
use schema::{
    ChatMessage, ChatRequest, ChatRole, GatewayError, Key, ProviderId, Request, Response,
    TextCompletionInput,
};

use self::input::AnthropicRequest;
use self::output::{AnthropicResponse, AnthropicStreamEvent, AnthropicStreamState, StreamStep};

use crate::config::ProviderConfig;
use crate::context::RequestContext;
use crate::http::{build_client, build_streaming_client, merge_extra_headers, sse_headers, trim_base_url};
use crate::provider::responses_bridge::{self, StreamShape};
use crate::provider::{Provider, util};
use crate::stream::{Delivery, StreamProducer};
use crate::{ProviderResult, ResponseStream};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    stream_client: Client,
    base_url: String,
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let base_url = trim_base_url(config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL));

        Ok(Self {
            client: build_client(&config)?,
            stream_client: build_streaming_client(&config)?,
            base_url,
            config,
        })
    }

    fn headers(&self, key: &Key, sse: bool) -> ProviderResult<HeaderMap> {
        let secret = key.secret().ok_or_else(|| {
            Box::new(GatewayError::configuration("no API key value configured for provider anthropic"))
        })?;

        let mut headers = if sse { sse_headers() } else { HeaderMap::new() };
        headers.insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
        headers.insert("anthropic-version", http::HeaderValue::from_static(ANTHROPIC_VERSION));

        let mut value = http::HeaderValue::from_str(secret).map_err(|_| {
            Box::new(GatewayError::configuration("API key contains invalid header characters"))
        })?;
        value.set_sensitive(true);
        headers.insert("x-api-key", value);

        merge_extra_headers(&mut headers, &self.config.extra_headers);
        Ok(headers)
    }

    async fn messages_call(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
        chat: &ChatRequest,
        request_type: schema::RequestType,
    ) -> ProviderResult<Response> {
        let anthropic_request = AnthropicRequest::from_chat(&request.model, chat, false)
            .map_err(|e| util::stamp_error(e, ProviderId::Anthropic, request_type, None))?;

        let body = sonic_rs::to_vec(&anthropic_request).map_err(|e| {
            util::stamp_error(GatewayError::marshaling(e), ProviderId::Anthropic, request_type, None)
        })?;

        let builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .headers(self.headers(key, false)?)
            .body(body);

        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Anthropic, request_type, None))?;

        if !(200..300).contains(&dispatched.status) {
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                ProviderId::Anthropic,
                request_type,
                Some(dispatched.latency_ms),
            ));
        }

        let parsed: AnthropicResponse = sonic_rs::from_slice(&dispatched.body).map_err(|e| {
            util::stamp_error(GatewayError::unmarshal(e), ProviderId::Anthropic, request_type, None)
        })?;

        let mut response = parsed.into_response();
        util::stamp_response(
            &mut response,
            ProviderId::Anthropic,
            request_type,
            &request.model,
            dispatched.latency_ms,
            util::raw_value(self.config.send_back_raw_response, &dispatched.body),
        );

        Ok(response)
    }

    async fn messages_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
        chat: &ChatRequest,
        shape: StreamShape,
    ) -> ProviderResult<ResponseStream> {
        let anthropic_request = AnthropicRequest::from_chat(&request.model, chat, true)
            .map_err(|e| util::stamp_error(e, ProviderId::Anthropic, shape.request_type, None))?;

        let body = sonic_rs::to_vec(&anthropic_request).map_err(|e| {
            util::stamp_error(
                GatewayError::marshaling(e),
                ProviderId::Anthropic,
                shape.request_type,
                None,
            )
        })?;

        let builder = self
            .stream_client
            .post(format!("{}/v1/messages", self.base_url))
            .headers(self.headers(key, true)?)
            .body(body);

        let upstream = util::send_with_cancellation(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Anthropic, shape.request_type, None))?;

        let status = upstream.status();
        if !status.is_success() {
            let body = upstream.bytes().await.unwrap_or_default();
            return Err(util::stamp_error(
                util::error_from_body(status.as_u16(), &body),
                ProviderId::Anthropic,
                shape.request_type,
                None,
            ));
        }

        let (mut producer, rx) = StreamProducer::new(
            ctx,
            shape.hooks,
            ProviderId::Anthropic,
            shape.request_type,
            self.config.stream_buffer_size,
        );
        let model_requested = request.model.clone();
        let send_raw = self.config.send_back_raw_response;
        let emit_head = shape.emit_head;

        tokio::spawn(async move {
            if emit_head && responses_bridge::emit_head_events(&mut producer).await == Delivery::Closed
            {
                return;
            }

            let mut events = upstream.bytes_stream().eventsource();
            let mut state = AnthropicStreamState::new();

            loop {
                let Some(event) = events.next().await else { break };

                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        producer.fail(GatewayError::transport(e)).await;
                        return;
                    }
                };

                let parsed: AnthropicStreamEvent = match sonic_rs::from_str(&event.data) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        log::warn!("skipping undecodable anthropic stream event: {e}");
                        continue;
                    }
                };

                match state.step(parsed) {
                    StreamStep::Continue => {}
                    StreamStep::Chunk(mut chunk) => {
                        if send_raw {
                            chunk.extra.raw_response = util::raw_value(true, event.data.as_bytes());
                        }
                        chunk.extra.model_requested = Some(model_requested.clone());

                        if producer.send(chunk.into()).await == Delivery::Closed {
                            return;
                        }
                    }
                    StreamStep::Done(mut terminal) => {
                        terminal.extra.model_requested = Some(model_requested.clone());
                        producer.finish(terminal.into()).await;
                        return;
                    }
                    StreamStep::Failed { error_type, message } => {
                        let error = GatewayError {
                            kind: Some(schema::ErrorKind::ProviderApiError),
                            error: schema::ErrorBody {
                                error_type: Some(error_type),
                                message,
                                ..Default::default()
                            },
                            ..Default::default()
                        };
                        producer.fail(error).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    /// Text completion has no native surface; a prompt is a one-message chat.
    fn chat_from_prompt(text: &schema::TextCompletionRequest) -> ChatRequest {
        let prompt = match &text.input {
            TextCompletionInput::Single(prompt) => prompt.clone(),
            TextCompletionInput::Batch(prompts) => prompts.join("\n"),
        };

        ChatRequest {
            input: vec![ChatMessage::text(ChatRole::User, prompt)],
            params: text.params.clone(),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    async fn chat_completion(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let request_type = util::begin(&self.config, ProviderId::Anthropic, request, false)?;
        let chat = util::chat_input(request, request_type)?;
        self.messages_call(ctx, key, request, chat, request_type).await
    }

    async fn chat_completion_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        let request_type = util::begin(&self.config, ProviderId::Anthropic, request, true)?;
        let chat = util::chat_input(request, request_type)?;
        self.messages_stream(ctx, key, request, chat, StreamShape::chat(ctx))
            .await
    }

    async fn text_completion(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let request_type = util::begin(&self.config, ProviderId::Anthropic, request, false)?;
        let text = util::text_input(request, request_type)?;

        let chat = Self::chat_from_prompt(text);
        let mut response = self.messages_call(ctx, key, request, &chat, request_type).await?;
        response.to_text_completion();
        Ok(response)
    }

    async fn responses(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        util::ensure_allowed(&self.config, ProviderId::Anthropic, schema::RequestType::Responses)?;
        let chat = responses_bridge::chat_from_responses(request, schema::RequestType::Responses)?;

        let mut response = self
            .messages_call(ctx, key, request, &chat, schema::RequestType::Responses)
            .await?;
        response.to_responses_only();
        Ok(response)
    }

    async fn responses_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        util::ensure_allowed(&self.config, ProviderId::Anthropic, schema::RequestType::ResponsesStream)?;
        let chat =
            responses_bridge::chat_from_responses(request, schema::RequestType::ResponsesStream)?;

        self.messages_stream(ctx, key, request, &chat, StreamShape::responses(ctx))
            .await
    }
}
