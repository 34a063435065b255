//! AWS Bedrock adapter over raw HTTP.
//!
//! Chat uses the Converse API (`/model/{id}/converse` and `/converse-stream`);
//! text completion uses the per-model-family Invoke API. Streaming bodies are
//! the binary EventStream framing decoded in `stream::event_stream`.
//! Authentication is a bearer token when the key carries a value, otherwise
//! SigV4 with explicit credentials, a session token, or the default AWS
//! credential provider chain.

mod input;
mod output;

use std::time::SystemTime;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_credential_types::provider::ProvideCredentials;
use aws_sigv4::http_request::{SignableBody, SignableRequest, SigningSettings, sign};
use aws_sigv4::sign::v4;
use futures::StreamExt;
use http::HeaderMap;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HOST};
use reqwest::Client;
use schema::{BedrockKeyConfig, GatewayError, Key, ProviderId, Request, Response};
use secrecy::ExposeSecret;

use self::input::{ConverseRequest, InvokeTextBody};
use self::output::{
    AnthropicTextResponse, BedrockStreamState, ConverseResponse, MistralTextResponse, StreamStep,
    text_response,
};

use crate::config::ProviderConfig;
use crate::context::RequestContext;
use crate::http::{build_client, build_streaming_client, merge_extra_headers, trim_base_url};
use crate::provider::responses_bridge::{self, StreamShape};
use crate::provider::{Provider, util};
use crate::stream::event_stream::FrameDecoder;
use crate::stream::{Delivery, StreamProducer};
use crate::{ProviderResult, ResponseStream};

const DEFAULT_REGION: &str = "us-east-1";

pub struct BedrockProvider {
    client: Client,
    stream_client: Client,
    config: ProviderConfig,
}

impl BedrockProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        Ok(Self {
            client: build_client(&config)?,
            stream_client: build_streaming_client(&config)?,
            config,
        })
    }

    fn region(key: &Key) -> String {
        key.bedrock
            .as_ref()
            .and_then(|bedrock| bedrock.region.clone())
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }

    fn base_url(&self, key: &Key) -> String {
        match &self.config.base_url {
            Some(url) => trim_base_url(url),
            None => format!("https://bedrock-runtime.{}.amazonaws.com", Self::region(key)),
        }
    }

    /// Model path segment: an inference-profile ARN mapped for this model (or
    /// the key-wide default) is URL-escaped into a single segment.
    fn model_path(key: &Key, model: &str) -> String {
        let profile = key.bedrock.as_ref().and_then(|bedrock| {
            bedrock
                .deployments
                .get(model)
                .cloned()
                .or_else(|| bedrock.arn.clone())
        });

        match profile {
            Some(arn) => urlencoding::encode(&arn).into_owned(),
            None => model.to_string(),
        }
    }

    async fn resolve_credentials(
        bedrock: Option<&BedrockKeyConfig>,
        region: &str,
    ) -> ProviderResult<Credentials> {
        if let Some(config) = bedrock
            && let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key)
        {
            return Ok(Credentials::new(
                access_key.expose_secret(),
                secret_key.expose_secret(),
                config
                    .session_token
                    .as_ref()
                    .map(|token| token.expose_secret().to_string()),
                None,
                "bedrock_key",
            ));
        }

        // Default provider chain: environment, profile, IMDS.
        let sdk_config = aws_config::from_env()
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        let provider = sdk_config.credentials_provider().ok_or_else(|| {
            Box::new(GatewayError::configuration(
                "no AWS credentials configured and none resolvable from the environment",
            ))
        })?;

        provider.provide_credentials().await.map_err(|e| {
            Box::new(GatewayError::configuration(format!(
                "failed to resolve AWS credentials: {e}"
            )))
        })
    }

    /// Bearer when the key has a value, SigV4 otherwise.
    async fn auth_headers(&self, key: &Key, url: &str, body: &[u8]) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json"));

        if let Some(secret) = key.secret() {
            let mut value = http::HeaderValue::from_str(&format!("Bearer {secret}"))
                .map_err(|_| Box::new(GatewayError::configuration("API key contains invalid header characters")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);

            merge_extra_headers(&mut headers, &self.config.extra_headers);
            return Ok(headers);
        }

        let region = Self::region(key);
        let credentials = Self::resolve_credentials(key.bedrock.as_ref(), &region).await?;

        let host = url::Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_string))
            .ok_or_else(|| Box::new(GatewayError::configuration(format!("invalid bedrock url `{url}`"))))?;
        headers.insert(
            HOST,
            http::HeaderValue::from_str(&host)
                .map_err(|_| Box::new(GatewayError::configuration("invalid bedrock host")))?,
        );

        let identity = credentials.into();
        let params: aws_sigv4::http_request::SigningParams<'_> = v4::SigningParams::builder()
            .identity(&identity)
            .region(&region)
            .name("bedrock")
            .time(SystemTime::now())
            .settings(SigningSettings::default())
            .build()
            .map_err(|e| Box::new(GatewayError::configuration(format!("failed to build signing parameters: {e}"))))?
            .into();

        let signable_headers: Vec<(String, String)> = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        let signable = SignableRequest::new(
            "POST",
            url,
            signable_headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
            SignableBody::Bytes(body),
        )
        .map_err(|e| Box::new(GatewayError::configuration(format!("failed to build signable request: {e}"))))?;

        let (instructions, _signature) = sign(signable, &params)
            .map_err(|e| Box::new(GatewayError::configuration(format!("request signing failed: {e}"))))?
            .into_parts();

        let mut signed = http::Request::builder()
            .method(http::Method::POST)
            .uri(url)
            .body(())
            .map_err(|e| Box::new(GatewayError::configuration(format!("invalid bedrock url: {e}"))))?;
        *signed.headers_mut() = headers;
        instructions.apply_to_request_http1x(&mut signed);

        let (parts, _) = signed.into_parts();
        let mut headers = parts.headers;

        merge_extra_headers(&mut headers, &self.config.extra_headers);
        Ok(headers)
    }
}

#[async_trait]
impl Provider for BedrockProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Bedrock
    }

    async fn chat_completion(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let request_type = util::begin(&self.config, ProviderId::Bedrock, request, false)?;
        let chat = util::chat_input(request, request_type)?;

        let url = format!(
            "{}/model/{}/converse",
            self.base_url(key),
            Self::model_path(key, &request.model)
        );

        let body = sonic_rs::to_vec(&ConverseRequest::from_chat(chat)).map_err(|e| {
            util::stamp_error(GatewayError::marshaling(e), ProviderId::Bedrock, request_type, None)
        })?;

        let headers = self.auth_headers(key, &url, &body).await?;
        let builder = self.client.post(&url).headers(headers).body(body);

        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Bedrock, request_type, None))?;

        if !(200..300).contains(&dispatched.status) {
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                ProviderId::Bedrock,
                request_type,
                Some(dispatched.latency_ms),
            ));
        }

        let parsed: ConverseResponse = sonic_rs::from_slice(&dispatched.body).map_err(|e| {
            util::stamp_error(GatewayError::unmarshal(e), ProviderId::Bedrock, request_type, None)
        })?;

        let mut response = parsed.into_response(&request.model);
        util::stamp_response(
            &mut response,
            ProviderId::Bedrock,
            request_type,
            &request.model,
            dispatched.latency_ms,
            util::raw_value(self.config.send_back_raw_response, &dispatched.body),
        );

        Ok(response)
    }

    async fn chat_completion_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        self.converse_stream(ctx, key, request, StreamShape::chat(ctx)).await
    }

    async fn text_completion(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let request_type = util::begin(&self.config, ProviderId::Bedrock, request, false)?;
        let text = util::text_input(request, request_type)?;

        let Some(invoke) = InvokeTextBody::build(&request.model, &text.input, &text.params) else {
            return Err(util::stamp_error(
                GatewayError::unsupported(ProviderId::Bedrock, request_type),
                ProviderId::Bedrock,
                request_type,
                None,
            ));
        };

        let url = format!(
            "{}/model/{}/invoke",
            self.base_url(key),
            Self::model_path(key, &request.model)
        );

        let body = sonic_rs::to_vec(invoke.body()).map_err(|e| {
            util::stamp_error(GatewayError::marshaling(e), ProviderId::Bedrock, request_type, None)
        })?;

        let headers = self.auth_headers(key, &url, &body).await?;
        let builder = self.client.post(&url).headers(headers).body(body);

        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Bedrock, request_type, None))?;

        if !(200..300).contains(&dispatched.status) {
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                ProviderId::Bedrock,
                request_type,
                Some(dispatched.latency_ms),
            ));
        }

        let mut response = match invoke {
            InvokeTextBody::Anthropic(_) => {
                let parsed: AnthropicTextResponse =
                    sonic_rs::from_slice(&dispatched.body).map_err(|e| {
                        util::stamp_error(
                            GatewayError::unmarshal(e),
                            ProviderId::Bedrock,
                            request_type,
                            None,
                        )
                    })?;
                text_response(&request.model, parsed.completion, parsed.stop_reason)
            }
            InvokeTextBody::Mistral(_) => {
                let parsed: MistralTextResponse =
                    sonic_rs::from_slice(&dispatched.body).map_err(|e| {
                        util::stamp_error(
                            GatewayError::unmarshal(e),
                            ProviderId::Bedrock,
                            request_type,
                            None,
                        )
                    })?;
                let output = parsed.outputs.into_iter().next().unwrap_or(
                    output::MistralTextOutput {
                        text: String::new(),
                        stop_reason: None,
                    },
                );
                text_response(&request.model, output.text, output.stop_reason)
            }
        };

        util::stamp_response(
            &mut response,
            ProviderId::Bedrock,
            request_type,
            &request.model,
            dispatched.latency_ms,
            util::raw_value(self.config.send_back_raw_response, &dispatched.body),
        );

        Ok(response)
    }

    async fn responses(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let chat_request = responses_bridge::chat_request_from_responses(request)?;
        let mut response = self.chat_completion(ctx, key, &chat_request).await?;
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
        self.converse_stream(ctx, key, &chat_request, StreamShape::responses(ctx))
            .await
    }
}

impl BedrockProvider {
    async fn converse_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
        shape: StreamShape,
    ) -> ProviderResult<ResponseStream> {
        util::ensure_allowed(&self.config, ProviderId::Bedrock, shape.request_type)?;
        let chat = util::chat_input(request, shape.request_type)?;

        let url = format!(
            "{}/model/{}/converse-stream",
            self.base_url(key),
            Self::model_path(key, &request.model)
        );

        let body = sonic_rs::to_vec(&ConverseRequest::from_chat(chat)).map_err(|e| {
            util::stamp_error(
                GatewayError::marshaling(e),
                ProviderId::Bedrock,
                shape.request_type,
                None,
            )
        })?;

        let headers = self.auth_headers(key, &url, &body).await?;
        let builder = self.stream_client.post(&url).headers(headers).body(body);

        let upstream = util::send_with_cancellation(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Bedrock, shape.request_type, None))?;

        let status = upstream.status();
        if !status.is_success() {
            let body = upstream.bytes().await.unwrap_or_default();
            return Err(util::stamp_error(
                util::error_from_body(status.as_u16(), &body),
                ProviderId::Bedrock,
                shape.request_type,
                None,
            ));
        }

        let (mut producer, rx) = StreamProducer::new(
            ctx,
            shape.hooks,
            ProviderId::Bedrock,
            shape.request_type,
            self.config.stream_buffer_size,
        );
        let model_requested = request.model.clone();
        let send_raw = self.config.send_back_raw_response;
        let emit_head = shape.emit_head;
        let model = request.model.clone();

        tokio::spawn(async move {
            if emit_head && responses_bridge::emit_head_events(&mut producer).await == Delivery::Closed
            {
                return;
            }

            let mut body = upstream.bytes_stream();
            let mut decoder = FrameDecoder::new();
            let mut state = BedrockStreamState::new(model);

            loop {
                let Some(bytes) = body.next().await else { break };

                let bytes = match bytes {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        producer.fail(GatewayError::transport(e)).await;
                        return;
                    }
                };
                decoder.extend(&bytes);

                loop {
                    let frame = match decoder.next_frame() {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(e) => {
                            producer.fail(GatewayError::unmarshal(e)).await;
                            return;
                        }
                    };

                    match frame.message_type() {
                        Some("event") => {
                            let event_type = frame.event_type().unwrap_or_default().to_string();

                            match state.step(&event_type, &frame.payload) {
                                Ok(StreamStep::Continue) => {}
                                Ok(StreamStep::Chunk(mut chunk)) => {
                                    if send_raw {
                                        chunk.extra.raw_response =
                                            util::raw_value(true, &frame.payload);
                                    }
                                    chunk.extra.model_requested = Some(model_requested.clone());

                                    if producer.send(chunk.into()).await == Delivery::Closed {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    log::warn!("skipping undecodable bedrock `{event_type}` event: {e}");
                                }
                            }
                        }
                        other => {
                            // Exception and error frames terminate the stream.
                            let exception = frame
                                .exception_type()
                                .or(other)
                                .unwrap_or("unknown")
                                .to_string();
                            let detail = String::from_utf8_lossy(&frame.payload);

                            producer
                                .fail(GatewayError::api(
                                    424,
                                    format!("bedrock stream {exception}: {detail}"),
                                ))
                                .await;
                            return;
                        }
                    }
                }
            }

            let mut terminal = state.terminal();
            terminal.extra.model_requested = Some(model_requested);
            producer.finish(terminal.into()).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::event_stream::encode_frame;
    use axum::body::Body;
    use axum::http::header;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::Router;
    use schema::{ChatMessage, ChatRequest, ChatRole, Parameters, RequestPayload};
    use tokio::net::TcpListener;

    fn chat_request(model: &str) -> Request {
        Request::new(
            ProviderId::Bedrock,
            model,
            RequestPayload::Chat(ChatRequest {
                input: vec![ChatMessage::text(ChatRole::User, "hi")],
                params: Parameters::default(),
            }),
        )
    }

    #[test]
    fn model_path_escapes_inference_profiles() {
        let mut key = Key::new("k", "token");
        key.bedrock = Some(BedrockKeyConfig {
            deployments: [(
                "claude".to_string(),
                "arn:aws:bedrock:us-east-1:123:application-inference-profile/p1".to_string(),
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        });

        let path = BedrockProvider::model_path(&key, "claude");
        assert!(!path.contains('/'));
        assert!(path.contains("application-inference-profile%2Fp1"));

        assert_eq!(BedrockProvider::model_path(&key, "other"), "other");
    }

    async fn serve_stream(frames: Vec<Vec<u8>>) -> String {
        let app = Router::new().route(
            "/model/{model}/converse-stream",
            post(move || {
                let bytes: Vec<u8> = frames.iter().flatten().copied().collect();
                async move {
                    (
                        [(header::CONTENT_TYPE, "application/vnd.amazon.eventstream")],
                        Body::from(bytes),
                    )
                        .into_response()
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{address}")
    }

    #[tokio::test]
    async fn converse_stream_delivers_events_and_terminal_usage() {
        let frames = vec![
            encode_frame(
                &[(":message-type", "event"), (":event-type", "messageStart")],
                br#"{"role":"assistant"}"#,
            ),
            encode_frame(
                &[(":message-type", "event"), (":event-type", "contentBlockDelta")],
                br#"{"contentBlockIndex":0,"delta":{"text":"Hello"}}"#,
            ),
            encode_frame(
                &[(":message-type", "event"), (":event-type", "messageStop")],
                br#"{"stopReason":"end_turn"}"#,
            ),
            encode_frame(
                &[(":message-type", "event"), (":event-type", "metadata")],
                br#"{"usage":{"inputTokens":3,"outputTokens":4,"totalTokens":7}}"#,
            ),
        ];

        let base = serve_stream(frames).await;
        let provider = BedrockProvider::new(ProviderConfig {
            base_url: Some(base),
            ..Default::default()
        })
        .unwrap();

        let ctx = RequestContext::default();
        let key = Key::new("k", "bearer-token");
        let mut stream = provider
            .chat_completion_stream(&ctx, &key, &chat_request("claude"))
            .await
            .unwrap();

        let mut envelopes = Vec::new();
        while let Some(envelope) = stream.recv().await {
            envelopes.push(envelope);
        }

        // Role chunk, content chunk, terminal.
        assert_eq!(envelopes.len(), 3);

        let content = envelopes[1].response().unwrap();
        let delta = content.data.choices().unwrap()[0].delta.as_ref().unwrap();
        assert_eq!(delta.content.as_deref(), Some("Hello"));

        let terminal = envelopes[2].response().unwrap();
        assert_eq!(terminal.usage.as_ref().unwrap().total_tokens, 7);
        assert_eq!(
            terminal.data.choices().unwrap()[0].finish_reason.as_deref(),
            Some("stop")
        );

        let indices: Vec<u32> = envelopes
            .iter()
            .filter_map(schema::StreamEnvelope::chunk_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn mid_stream_exception_becomes_an_error_envelope() {
        let frames = vec![
            encode_frame(
                &[(":message-type", "event"), (":event-type", "messageStart")],
                br#"{"role":"assistant"}"#,
            ),
            encode_frame(
                &[(":message-type", "event"), (":event-type", "contentBlockDelta")],
                br#"{"contentBlockIndex":0,"delta":{"text":"Hel"}}"#,
            ),
            encode_frame(
                &[
                    (":message-type", "exception"),
                    (":exception-type", "throttlingException"),
                ],
                br#"{"message":"Too many requests"}"#,
            ),
        ];

        let base = serve_stream(frames).await;
        let provider = BedrockProvider::new(ProviderConfig {
            base_url: Some(base),
            ..Default::default()
        })
        .unwrap();

        let ctx = RequestContext::default();
        let key = Key::new("k", "bearer-token");
        let mut stream = provider
            .chat_completion_stream(&ctx, &key, &chat_request("claude"))
            .await
            .unwrap();

        let mut envelopes = Vec::new();
        while let Some(envelope) = stream.recv().await {
            envelopes.push(envelope);
        }

        // Two content-bearing events, then the exception; channel closed.
        assert_eq!(envelopes.len(), 3);
        assert!(envelopes[0].response().is_some());
        assert!(envelopes[1].response().is_some());

        let error = envelopes[2].error().unwrap();
        assert!(
            error
                .error
                .message
                .starts_with("bedrock stream throttlingException:")
        );
    }
}
