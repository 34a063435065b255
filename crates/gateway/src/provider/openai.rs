//! OpenAI adapter.
//!
//! Chat, text completion, and embeddings ride the shared OpenAI-compatible
//! core. Responses requests use the native `/v1/responses` endpoint when the
//! key opts in (`use_responses_api`), otherwise they bridge through chat like
//! every other provider. Speech and transcription use the audio endpoints,
//! including their SSE streaming variants.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::HeaderMap;
use http::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use schema::{
    AudioUsage, GatewayError, Key, ProviderId, Request, RequestType, Response, ResponseData,
    ResponsesEventType, ResponsesItem, ResponsesParameters, ResponsesResponse,
    ResponsesStreamEvent, SpeechRequest, SpeechResponse, TranscriptionRequest,
    TranscriptionResponse,
};
use serde::{Deserialize, Serialize};

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::context::RequestContext;
use crate::http::merge_extra_headers;
use crate::provider::openai_like::{OpenAiCompatCore, SseStreamParams, encode_body};
use crate::provider::responses_bridge::{self, StreamShape};
use crate::provider::{Provider, util};
use crate::stream::{Delivery, StreamProducer};
use crate::{ProviderResult, ResponseStream};

const OPENAI_API_URL: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    core: OpenAiCompatCore,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        Ok(Self {
            core: OpenAiCompatCore::new(ProviderId::OpenAi, config, Some(OPENAI_API_URL))?,
        })
    }

    fn use_responses_api(key: &Key) -> bool {
        key.openai
            .as_ref()
            .is_some_and(|config| config.use_responses_api)
    }

    /// Auth-only headers for multipart requests, where reqwest owns the
    /// content type.
    fn auth_headers(&self, key: &Key) -> ProviderResult<HeaderMap> {
        let secret = key.secret().ok_or_else(|| {
            Box::new(GatewayError::configuration("no API key value configured for provider openai"))
        })?;

        let mut headers = HeaderMap::new();
        let mut value = http::HeaderValue::from_str(&format!("Bearer {secret}"))
            .map_err(|_| Box::new(GatewayError::configuration("API key contains invalid header characters")))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);

        merge_extra_headers(&mut headers, &self.core.config.extra_headers);
        Ok(headers)
    }

    async fn native_responses(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let request_type = RequestType::Responses;
        let responses = util::responses_input(request, request_type)?;

        let body = encode_body(
            ProviderId::OpenAi,
            request_type,
            &ResponsesBody {
                model: &request.model,
                input: &responses.input,
                params: &responses.params,
                stream: None,
            },
        )?;
        let builder = self
            .core
            .client
            .post(self.core.url("/v1/responses"))
            .headers(self.core.headers(key, false)?)
            .body(body);

        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::OpenAi, request_type, None))?;

        if !(200..300).contains(&dispatched.status) {
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                ProviderId::OpenAi,
                request_type,
                Some(dispatched.latency_ms),
            ));
        }

        let block: ResponsesResponse = sonic_rs::from_slice(&dispatched.body).map_err(|e| {
            util::stamp_error(GatewayError::unmarshal(e), ProviderId::OpenAi, request_type, None)
        })?;

        let mut response = Response {
            id: block.id.clone(),
            object: "response".to_string(),
            created: block.created_at,
            model: block.model.clone(),
            usage: block.usage.clone(),
            data: ResponseData::Responses { response: block },
            ..Default::default()
        };
        util::stamp_response(
            &mut response,
            ProviderId::OpenAi,
            request_type,
            &request.model,
            dispatched.latency_ms,
            util::raw_value(self.core.config.send_back_raw_response, &dispatched.body),
        );

        Ok(response)
    }

    async fn native_responses_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        let request_type = RequestType::ResponsesStream;
        let responses = util::responses_input(request, request_type)?;

        let body = encode_body(
            ProviderId::OpenAi,
            request_type,
            &ResponsesBody {
                model: &request.model,
                input: &responses.input,
                params: &responses.params,
                stream: Some(true),
            },
        )?;
        let builder = self
            .core
            .stream_client
            .post(self.core.url("/v1/responses"))
            .headers(self.core.headers(key, true)?)
            .body(body);

        let upstream = self.core.open_stream(ctx, builder, request_type).await?;

        let (mut producer, rx) = StreamProducer::new(
            ctx,
            ctx.hooks.clone(),
            ProviderId::OpenAi,
            request_type,
            self.core.config.stream_buffer_size,
        );
        let model_requested = request.model.clone();
        let send_raw = self.core.config.send_back_raw_response;

        tokio::spawn(async move {
            let mut events = upstream.bytes_stream().eventsource();

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

                let stream_event: ResponsesStreamEvent = match sonic_rs::from_str(&event.data) {
                    Ok(stream_event) => stream_event,
                    Err(e) => {
                        log::warn!("skipping undecodable openai responses event: {e}");
                        continue;
                    }
                };

                let terminal = matches!(
                    stream_event.event_type,
                    ResponsesEventType::Completed
                        | ResponsesEventType::Incomplete
                        | ResponsesEventType::Failed
                );

                let mut chunk = Response {
                    object: "response".to_string(),
                    usage: stream_event
                        .response
                        .as_ref()
                        .and_then(|block| block.usage.clone()),
                    ..Default::default()
                };
                if let Some(block) = &stream_event.response {
                    chunk.id = block.id.clone();
                    chunk.model = block.model.clone();
                    chunk.created = block.created_at;
                }
                if send_raw {
                    chunk.extra.raw_response = util::raw_value(true, event.data.as_bytes());
                }
                chunk.extra.model_requested = Some(model_requested.clone());
                chunk.data = ResponseData::ResponsesStream { event: stream_event };

                if terminal {
                    producer.finish(chunk.into()).await;
                    return;
                }

                if producer.send(chunk.into()).await == Delivery::Closed {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

#[derive(Serialize)]
struct ResponsesBody<'a> {
    model: &'a str,
    input: &'a [ResponsesItem],
    #[serde(flatten)]
    params: &'a ResponsesParameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a schema::VoiceInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_format: Option<&'a str>,
}

impl<'a> SpeechBody<'a> {
    fn new(model: &'a str, speech: &'a SpeechRequest, stream: bool) -> Self {
        Self {
            model,
            input: &speech.input,
            voice: &speech.voice,
            instructions: speech.instructions.as_deref(),
            response_format: speech.response_format.as_deref(),
            stream_format: stream.then_some("sse"),
        }
    }
}

/// SSE payloads of the audio streaming endpoints.
#[derive(Deserialize)]
struct AudioStreamEventWire {
    #[serde(rename = "type")]
    event_type: String,
    /// Base64 audio on `speech.audio.delta`.
    #[serde(default)]
    audio: Option<String>,
    /// Text fragment on `transcript.text.delta`.
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    usage: Option<AudioUsage>,
}

fn transcription_form(model: &str, transcription: &TranscriptionRequest, stream: bool) -> Form {
    let file = Part::bytes(transcription.file.clone())
        .file_name(transcription.filename.clone().unwrap_or_else(|| "audio".to_string()));

    let mut form = Form::new().part("file", file).text("model", model.to_string());

    if let Some(language) = &transcription.language {
        form = form.text("language", language.clone());
    }
    if let Some(prompt) = &transcription.prompt {
        form = form.text("prompt", prompt.clone());
    }
    if let Some(format) = &transcription.response_format {
        form = form.text("response_format", format.clone());
    }
    if let Some(temperature) = transcription.temperature {
        form = form.text("temperature", temperature.to_string());
    }
    if stream {
        form = form.text("stream", "true");
    }

    form
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
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
        util::ensure_allowed(&self.core.config, ProviderId::OpenAi, RequestType::Responses)?;

        if Self::use_responses_api(key) {
            return self.native_responses(ctx, key, request).await;
        }

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
        util::ensure_allowed(&self.core.config, ProviderId::OpenAi, RequestType::ResponsesStream)?;

        if Self::use_responses_api(key) {
            return self.native_responses_stream(ctx, key, request).await;
        }

        let chat_request = responses_bridge::chat_request_from_responses_stream(request)?;
        self.core
            .chat_completion_stream(ctx, key, &chat_request, StreamShape::responses(ctx))
            .await
    }

    async fn speech(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let request_type = util::begin(&self.core.config, ProviderId::OpenAi, request, false)?;
        let speech = util::speech_input(request, request_type)?;

        let body = encode_body(
            ProviderId::OpenAi,
            request_type,
            &SpeechBody::new(&request.model, speech, false),
        )?;
        let builder = self
            .core
            .client
            .post(self.core.url("/v1/audio/speech"))
            .headers(self.core.headers(key, false)?)
            .body(body);

        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::OpenAi, request_type, None))?;

        if !(200..300).contains(&dispatched.status) {
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                ProviderId::OpenAi,
                request_type,
                Some(dispatched.latency_ms),
            ));
        }

        // The body is the audio itself, not JSON.
        let mut response = Response {
            object: "audio.speech".to_string(),
            model: request.model.clone(),
            data: ResponseData::Speech(SpeechResponse {
                audio: dispatched.body.to_vec(),
                usage: None,
            }),
            ..Default::default()
        };
        util::stamp_response(
            &mut response,
            ProviderId::OpenAi,
            request_type,
            &request.model,
            dispatched.latency_ms,
            None,
        );

        Ok(response)
    }

    async fn speech_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        let request_type = util::begin(&self.core.config, ProviderId::OpenAi, request, true)?;
        let speech = util::speech_input(request, request_type)?;

        let body = encode_body(
            ProviderId::OpenAi,
            request_type,
            &SpeechBody::new(&request.model, speech, true),
        )?;
        let builder = self
            .core
            .stream_client
            .post(self.core.url("/v1/audio/speech"))
            .headers(self.core.headers(key, true)?)
            .body(body);

        let upstream = self.core.open_stream(ctx, builder, request_type).await?;

        let (mut producer, rx) = StreamProducer::new(
            ctx,
            ctx.hooks.clone(),
            ProviderId::OpenAi,
            request_type,
            self.core.config.stream_buffer_size,
        );
        let params = SseStreamParams {
            provider: ProviderId::OpenAi,
            model_requested: request.model.clone(),
            buffer_size: self.core.config.stream_buffer_size,
            send_raw: self.core.config.send_back_raw_response,
        };

        tokio::spawn(async move {
            let mut events = upstream.bytes_stream().eventsource();
            let mut usage: Option<AudioUsage> = None;

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

                let wire: AudioStreamEventWire = match sonic_rs::from_str(&event.data) {
                    Ok(wire) => wire,
                    Err(e) => {
                        log::warn!("skipping undecodable openai speech event: {e}");
                        continue;
                    }
                };

                match wire.event_type.as_str() {
                    "speech.audio.delta" => {
                        let Some(encoded) = wire.audio else { continue };
                        let audio = match BASE64.decode(encoded.as_bytes()) {
                            Ok(audio) => audio,
                            Err(e) => {
                                log::warn!("skipping speech chunk with invalid base64 audio: {e}");
                                continue;
                            }
                        };

                        let mut chunk = Response {
                            object: "audio.speech.chunk".to_string(),
                            model: params.model_requested.clone(),
                            data: ResponseData::Speech(SpeechResponse { audio, usage: None }),
                            ..Default::default()
                        };
                        chunk.extra.model_requested = Some(params.model_requested.clone());

                        if producer.send(chunk.into()).await == Delivery::Closed {
                            return;
                        }
                    }
                    "speech.audio.done" => {
                        usage = wire.usage;
                        break;
                    }
                    other => {
                        log::debug!("ignoring openai speech event `{other}`");
                    }
                }
            }

            let mut terminal = Response {
                object: "audio.speech.chunk".to_string(),
                model: params.model_requested.clone(),
                data: ResponseData::Speech(SpeechResponse {
                    audio: Vec::new(),
                    usage,
                }),
                ..Default::default()
            };
            terminal.extra.model_requested = Some(params.model_requested.clone());

            producer.finish(terminal.into()).await;
        });

        Ok(rx)
    }

    async fn transcription(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let request_type = util::begin(&self.core.config, ProviderId::OpenAi, request, false)?;
        let transcription = util::transcription_input(request, request_type)?;

        let builder = self
            .core
            .client
            .post(self.core.url("/v1/audio/transcriptions"))
            .headers(self.auth_headers(key)?)
            .multipart(transcription_form(&request.model, transcription, false));

        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::OpenAi, request_type, None))?;

        if !(200..300).contains(&dispatched.status) {
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                ProviderId::OpenAi,
                request_type,
                Some(dispatched.latency_ms),
            ));
        }

        let transcript: TranscriptionResponse = sonic_rs::from_slice(&dispatched.body)
            .map_err(|e| {
                util::stamp_error(GatewayError::unmarshal(e), ProviderId::OpenAi, request_type, None)
            })?;

        let mut response = Response {
            object: "audio.transcription".to_string(),
            model: request.model.clone(),
            data: ResponseData::Transcription(transcript),
            ..Default::default()
        };
        util::stamp_response(
            &mut response,
            ProviderId::OpenAi,
            request_type,
            &request.model,
            dispatched.latency_ms,
            util::raw_value(self.core.config.send_back_raw_response, &dispatched.body),
        );

        Ok(response)
    }

    async fn transcription_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        let request_type = util::begin(&self.core.config, ProviderId::OpenAi, request, true)?;
        let transcription = util::transcription_input(request, request_type)?;

        let mut headers = self.auth_headers(key)?;
        for (name, value) in crate::http::sse_headers() {
            if let Some(name) = name {
                headers.insert(name, value);
            }
        }

        let builder = self
            .core
            .stream_client
            .post(self.core.url("/v1/audio/transcriptions"))
            .headers(headers)
            .multipart(transcription_form(&request.model, transcription, true));

        let upstream = self.core.open_stream(ctx, builder, request_type).await?;

        let (mut producer, rx) = StreamProducer::new(
            ctx,
            ctx.hooks.clone(),
            ProviderId::OpenAi,
            request_type,
            self.core.config.stream_buffer_size,
        );
        let model_requested = request.model.clone();

        tokio::spawn(async move {
            let mut events = upstream.bytes_stream().eventsource();
            let mut final_chunk = TranscriptionResponse::default();

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

                let wire: AudioStreamEventWire = match sonic_rs::from_str(&event.data) {
                    Ok(wire) => wire,
                    Err(e) => {
                        log::warn!("skipping undecodable openai transcription event: {e}");
                        continue;
                    }
                };

                match wire.event_type.as_str() {
                    "transcript.text.delta" => {
                        let Some(delta) = wire.delta else { continue };

                        let mut chunk = Response {
                            object: "audio.transcription.chunk".to_string(),
                            model: model_requested.clone(),
                            data: ResponseData::Transcription(TranscriptionResponse {
                                text: delta,
                                ..Default::default()
                            }),
                            ..Default::default()
                        };
                        chunk.extra.model_requested = Some(model_requested.clone());

                        if producer.send(chunk.into()).await == Delivery::Closed {
                            return;
                        }
                    }
                    "transcript.text.done" => {
                        final_chunk.text = wire.text.unwrap_or_default();
                        final_chunk.usage = wire.usage;
                        break;
                    }
                    other => {
                        log::debug!("ignoring openai transcription event `{other}`");
                    }
                }
            }

            let mut terminal = Response {
                object: "audio.transcription.chunk".to_string(),
                model: model_requested.clone(),
                data: ResponseData::Transcription(final_chunk),
                ..Default::default()
            };
            terminal.extra.model_requested = Some(model_requested);

            producer.finish(terminal.into()).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::HeaderMap as AxumHeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use indoc::indoc;
    use schema::{ChatMessage, ChatRequest, ChatRole, Parameters, RequestPayload};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct CaptureState {
        captured: Arc<Mutex<Option<(AxumHeaderMap, Value)>>>,
    }

    async fn handle_chat(
        State(state): State<CaptureState>,
        headers: AxumHeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        *state.captured.lock().unwrap() = Some((headers, body));

        Json(json!({
            "id": "r1",
            "object": "chat.completion",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        }))
    }

    async fn spawn_server(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}")
    }

    fn chat_request() -> Request {
        Request::new(
            ProviderId::OpenAi,
            "gpt-4o",
            RequestPayload::Chat(ChatRequest {
                input: vec![ChatMessage::text(ChatRole::User, "hi")],
                params: Parameters::default(),
            }),
        )
    }

    #[tokio::test]
    async fn chat_completion_round_trip_with_bearer_auth() {
        let state = CaptureState::default();
        let app = Router::new()
            .route("/v1/chat/completions", post(handle_chat))
            .with_state(state.clone());
        let base = spawn_server(app).await;

        let provider = OpenAiProvider::new(ProviderConfig {
            base_url: Some(base),
            ..Default::default()
        })
        .unwrap();

        let ctx = RequestContext::default();
        let key = Key::new("k1", "sk-x");
        let response = provider.chat_completion(&ctx, &key, &chat_request()).await.unwrap();

        let message = response.data.choices().unwrap()[0].message.as_ref().unwrap();
        assert_eq!(
            message.content,
            Some(schema::ChatContent::Text("hello".to_string()))
        );
        assert_eq!(response.usage.as_ref().unwrap().total_tokens, 2);
        assert_eq!(response.extra.provider, Some(ProviderId::OpenAi));
        assert_eq!(response.extra.request_type, Some(RequestType::ChatCompletion));
        assert_eq!(response.extra.model_requested.as_deref(), Some("gpt-4o"));
        assert!(response.extra.latency_ms.is_some());

        let (headers, body) = state.captured.lock().unwrap().clone().expect("captured request");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer sk-x");
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[tokio::test]
    async fn raw_response_is_attached_when_configured() {
        let state = CaptureState::default();
        let app = Router::new()
            .route("/v1/chat/completions", post(handle_chat))
            .with_state(state);
        let base = spawn_server(app).await;

        let provider = OpenAiProvider::new(ProviderConfig {
            base_url: Some(base),
            send_back_raw_response: true,
            ..Default::default()
        })
        .unwrap();

        let ctx = RequestContext::default();
        let key = Key::new("k1", "sk-x");
        let response = provider.chat_completion(&ctx, &key, &chat_request()).await.unwrap();

        let raw = response.extra.raw_response.as_ref().unwrap();
        assert_eq!(raw["id"], "r1");
        assert_eq!(raw["usage"]["total_tokens"], 2);
    }

    #[tokio::test]
    async fn upstream_errors_carry_status_and_provider_message() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    axum::http::StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({"error": {"message": "rate limited", "type": "rate_limit_error"}})),
                )
            }),
        );
        let base = spawn_server(app).await;

        let provider = OpenAiProvider::new(ProviderConfig {
            base_url: Some(base),
            ..Default::default()
        })
        .unwrap();

        let ctx = RequestContext::default();
        let key = Key::new("k1", "sk-x");
        let error = provider.chat_completion(&ctx, &key, &chat_request()).await.unwrap_err();

        assert_eq!(error.status_code, Some(429));
        assert_eq!(error.error.message, "rate limited");
        assert_eq!(error.extra.request_type, Some(RequestType::ChatCompletion));
    }

    #[tokio::test]
    async fn missing_input_fails_before_any_network_io() {
        // Deliberately unroutable base URL: validation must reject first.
        let provider = OpenAiProvider::new(ProviderConfig {
            base_url: Some("http://127.0.0.1:1".to_string()),
            ..Default::default()
        })
        .unwrap();

        let request = Request::new(
            ProviderId::OpenAi,
            "gpt-4o",
            RequestPayload::Chat(ChatRequest {
                input: vec![],
                params: Parameters::default(),
            }),
        );

        let ctx = RequestContext::default();
        let key = Key::new("k1", "sk-x");
        let error = provider.chat_completion(&ctx, &key, &request).await.unwrap_err();
        assert!(error.error.message.contains("input is not provided"));
    }

    #[tokio::test]
    async fn streaming_absorbs_bookkeeping_chunks_and_synthesizes_the_terminal() {
        let sse_body = indoc! {r#"
            data: {"id":"s1","object":"chat.completion.chunk","model":"gpt-4o","choices":[{"delta":{"role":"assistant"},"index":0}]}

            data: {"id":"s1","object":"chat.completion.chunk","model":"gpt-4o","choices":[{"delta":{"content":"hi"},"index":0}]}

            data: {"id":"s1","object":"chat.completion.chunk","model":"gpt-4o","choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":1,"completion_tokens":1,"total_tokens":2}}

            data: [DONE]

        "#};

        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let body = sse_body.to_string();
                async move {
                    (
                        [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
                        body,
                    )
                }
            }),
        );
        let base = spawn_server(app).await;

        let provider = OpenAiProvider::new(ProviderConfig {
            base_url: Some(base),
            ..Default::default()
        })
        .unwrap();

        let ctx = RequestContext::default();
        let key = Key::new("k1", "sk-x");
        let mut stream = provider
            .chat_completion_stream(&ctx, &key, &chat_request())
            .await
            .unwrap();

        let mut envelopes = Vec::new();
        while let Some(envelope) = stream.recv().await {
            envelopes.push(envelope);
        }

        // The role chunk is absorbed; one content chunk plus the synthetic
        // terminal remain, and the channel is closed.
        assert_eq!(envelopes.len(), 2);

        let content = envelopes[0].response().unwrap();
        let delta = content.data.choices().unwrap()[0].delta.as_ref().unwrap();
        assert_eq!(delta.content.as_deref(), Some("hi"));
        assert_eq!(content.extra.request_type, Some(RequestType::ChatCompletionStream));

        let terminal = envelopes[1].response().unwrap();
        let choice = &terminal.data.choices().unwrap()[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));

        let usage = terminal.usage.as_ref().unwrap();
        assert_eq!(usage.prompt_tokens, 1);
        assert_eq!(usage.completion_tokens, 1);
        assert_eq!(usage.total_tokens, 2);

        let indices: Vec<u32> = envelopes
            .iter()
            .filter_map(schema::StreamEnvelope::chunk_index)
            .collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn bridged_responses_stream_emits_head_events_and_converted_chunks() {
        let sse_body = indoc! {r#"
            data: {"id":"s1","object":"chat.completion.chunk","model":"gpt-4o","choices":[{"delta":{"content":"hi"},"index":0}]}

            data: {"id":"s1","object":"chat.completion.chunk","model":"gpt-4o","choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":1,"completion_tokens":1,"total_tokens":2}}

            data: [DONE]

        "#};

        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let body = sse_body.to_string();
                async move {
                    (
                        [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
                        body,
                    )
                }
            }),
        );
        let base = spawn_server(app).await;

        let provider = OpenAiProvider::new(ProviderConfig {
            base_url: Some(base),
            ..Default::default()
        })
        .unwrap();

        let ctx = RequestContext::default();
        let key = Key::new("k1", "sk-x");

        let request = Request::new(
            ProviderId::OpenAi,
            "gpt-4o",
            RequestPayload::Responses(schema::ResponsesRequest {
                input: vec![schema::ResponsesItem::Message(schema::MessagePayload {
                    id: None,
                    status: None,
                    role: Some(schema::ResponsesRole::User),
                    content: Some(schema::ResponsesContent::Text("hi".into())),
                })],
                params: schema::ResponsesParameters::default(),
            }),
        );

        let mut stream = provider.responses_stream(&ctx, &key, &request).await.unwrap();

        let mut events = Vec::new();
        while let Some(envelope) = stream.recv().await {
            let response = envelope.response().expect("no error expected").clone();
            let schema::ResponseData::ResponsesStream { event } = response.data else {
                panic!("expected responses stream events only");
            };
            events.push((event.event_type, event.sequence_number));
        }

        assert_eq!(
            events,
            vec![
                (schema::ResponsesEventType::Created, 0),
                (schema::ResponsesEventType::InProgress, 1),
                (schema::ResponsesEventType::OutputTextDelta, 2),
                (schema::ResponsesEventType::Completed, 3),
            ]
        );
    }
}
