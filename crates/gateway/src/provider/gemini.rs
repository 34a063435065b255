//! Google Gemini adapter.
//!
//! Chat, embeddings, and bridged Responses ride the OpenAI-compatible
//! endpoints under `/openai`. Speech and transcription use the native
//! `generateContent` surface: audio travels base64-encoded in
//! `inlineData` parts, concatenated per chunk on the streaming path.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::HeaderMap;
use http::header::CONTENT_TYPE;
use schema::{
    AudioUsage, GatewayError, Key, ProviderId, Request, RequestType, Response, ResponseData,
    SpeechRequest, SpeechResponse, TranscriptionRequest, TranscriptionResponse, VoiceInput,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::ProviderConfig;
use crate::context::RequestContext;
use crate::http::{merge_extra_headers, sse_headers};
use crate::provider::openai_like::OpenAiCompatCore;
use crate::provider::responses_bridge::{self, StreamShape};
use crate::provider::{Provider, util};
use crate::stream::{Delivery, StreamProducer};
use crate::{ProviderResult, ResponseStream};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    core: OpenAiCompatCore,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let mut core = OpenAiCompatCore::new(ProviderId::Gemini, config, Some(GEMINI_API_URL))?;
        core.chat_path = "/openai/chat/completions";
        core.embedding_path = "/openai/embeddings";

        Ok(Self { core })
    }

    /// Native endpoints authenticate with `x-goog-api-key`.
    fn native_headers(&self, key: &Key, sse: bool) -> ProviderResult<HeaderMap> {
        let secret = key.secret().ok_or_else(|| {
            Box::new(GatewayError::configuration("no API key value configured for provider gemini"))
        })?;

        let mut headers = if sse { sse_headers() } else { HeaderMap::new() };
        headers.insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json"));

        let mut value = http::HeaderValue::from_str(secret).map_err(|_| {
            Box::new(GatewayError::configuration("API key contains invalid header characters"))
        })?;
        value.set_sensitive(true);
        headers.insert("x-goog-api-key", value);

        merge_extra_headers(&mut headers, &self.core.config.extra_headers);
        Ok(headers)
    }

    fn speech_body(speech: &SpeechRequest) -> Value {
        let voice = match &speech.voice {
            VoiceInput::Voice(name) => name.clone(),
            VoiceInput::MultiVoice(configs) => configs
                .first()
                .map(|config| config.voice.clone())
                .unwrap_or_default(),
        };

        let text = match &speech.instructions {
            Some(instructions) => format!("{instructions}\n{}", speech.input),
            None => speech.input.clone(),
        };

        json!({
            "contents": [{"parts": [{"text": text}]}],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": voice}}
                }
            }
        })
    }

    fn transcription_body(transcription: &TranscriptionRequest) -> Value {
        let mime = transcription
            .filename
            .as_deref()
            .and_then(|name| name.rsplit('.').next())
            .map(|extension| format!("audio/{extension}"))
            .unwrap_or_else(|| "audio/mp3".to_string());

        let parts = vec![
            json!({
                "text": transcription
                    .prompt
                    .clone()
                    .unwrap_or_else(|| "Generate a transcript of the speech.".to_string())
            }),
            json!({
                "inlineData": {
                    "mimeType": mime,
                    "data": BASE64.encode(&transcription.file),
                }
            }),
        ];

        json!({"contents": [{"parts": parts}]})
    }

    async fn generate_content(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
        body: &Value,
        request_type: RequestType,
    ) -> ProviderResult<(GenerateContentResponse, u64, Option<Value>)> {
        let url = format!("{}/models/{}:generateContent", self.core.base_url, request.model);

        let body = sonic_rs::to_vec(body).map_err(|e| {
            util::stamp_error(GatewayError::marshaling(e), ProviderId::Gemini, request_type, None)
        })?;

        let builder = self
            .core
            .client
            .post(&url)
            .headers(self.native_headers(key, false)?)
            .body(body);

        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Gemini, request_type, None))?;

        if !(200..300).contains(&dispatched.status) {
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                ProviderId::Gemini,
                request_type,
                Some(dispatched.latency_ms),
            ));
        }

        let parsed: GenerateContentResponse = sonic_rs::from_slice(&dispatched.body).map_err(|e| {
            util::stamp_error(GatewayError::unmarshal(e), ProviderId::Gemini, request_type, None)
        })?;

        let raw = util::raw_value(self.core.config.send_back_raw_response, &dispatched.body);
        Ok((parsed, dispatched.latency_ms, raw))
    }

    async fn open_native_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
        body: &Value,
        request_type: RequestType,
    ) -> ProviderResult<reqwest::Response> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.core.base_url, request.model
        );

        let body = sonic_rs::to_vec(body).map_err(|e| {
            util::stamp_error(GatewayError::marshaling(e), ProviderId::Gemini, request_type, None)
        })?;

        let builder = self
            .core
            .stream_client
            .post(&url)
            .headers(self.native_headers(key, true)?)
            .body(body);

        self.core.open_stream(ctx, builder, request_type).await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    #[serde(default)]
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl UsageMetadata {
    fn to_audio_usage(&self) -> AudioUsage {
        AudioUsage {
            input_tokens: self.prompt_token_count,
            output_tokens: self.candidates_token_count,
            total_tokens: self
                .total_token_count
                .max(self.prompt_token_count + self.candidates_token_count),
            input_token_details: None,
        }
    }
}

impl GenerateContentResponse {
    /// Base64 audio across all parts, decoded and concatenated.
    fn decoded_audio(&self) -> Vec<u8> {
        let mut audio = Vec::new();

        for candidate in &self.candidates {
            let Some(content) = &candidate.content else { continue };
            for part in &content.parts {
                let Some(inline) = &part.inline_data else { continue };
                match BASE64.decode(inline.data.as_bytes()) {
                    Ok(bytes) => audio.extend_from_slice(&bytes),
                    Err(e) => log::warn!("skipping gemini audio part with invalid base64: {e}"),
                }
            }
        }

        audio
    }

    fn joined_text(&self) -> String {
        self.candidates
            .iter()
            .filter_map(|candidate| candidate.content.as_ref())
            .flat_map(|content| content.parts.iter())
            .filter_map(|part| part.text.as_deref())
            .collect()
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
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

    async fn speech(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let request_type = util::begin(&self.core.config, ProviderId::Gemini, request, false)?;
        let speech = util::speech_input(request, request_type)?;

        let body = Self::speech_body(speech);
        let (parsed, latency_ms, raw) = self
            .generate_content(ctx, key, request, &body, request_type)
            .await?;

        let mut response = Response {
            object: "audio.speech".to_string(),
            model: request.model.clone(),
            data: ResponseData::Speech(SpeechResponse {
                audio: parsed.decoded_audio(),
                usage: parsed
                    .usage_metadata
                    .as_ref()
                    .map(UsageMetadata::to_audio_usage),
            }),
            ..Default::default()
        };
        util::stamp_response(
            &mut response,
            ProviderId::Gemini,
            request_type,
            &request.model,
            latency_ms,
            raw,
        );

        Ok(response)
    }

    async fn speech_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        let request_type = util::begin(&self.core.config, ProviderId::Gemini, request, true)?;
        let speech = util::speech_input(request, request_type)?;

        let body = Self::speech_body(speech);
        let upstream = self
            .open_native_stream(ctx, key, request, &body, request_type)
            .await?;

        let (mut producer, rx) = StreamProducer::new(
            ctx,
            ctx.hooks.clone(),
            ProviderId::Gemini,
            request_type,
            self.core.config.stream_buffer_size,
        );
        let model_requested = request.model.clone();
        let send_raw = self.core.config.send_back_raw_response;

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

                let parsed: GenerateContentResponse = match sonic_rs::from_str(&event.data) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        log::warn!("skipping undecodable gemini speech chunk: {e}");
                        continue;
                    }
                };

                if let Some(metadata) = &parsed.usage_metadata {
                    usage = Some(metadata.to_audio_usage());
                }

                let audio = parsed.decoded_audio();
                if audio.is_empty() {
                    continue;
                }

                let mut chunk = Response {
                    object: "audio.speech.chunk".to_string(),
                    model: model_requested.clone(),
                    data: ResponseData::Speech(SpeechResponse { audio, usage: None }),
                    ..Default::default()
                };
                if send_raw {
                    chunk.extra.raw_response = util::raw_value(true, event.data.as_bytes());
                }
                chunk.extra.model_requested = Some(model_requested.clone());

                if producer.send(chunk.into()).await == Delivery::Closed {
                    return;
                }
            }

            let mut terminal = Response {
                object: "audio.speech.chunk".to_string(),
                model: model_requested.clone(),
                data: ResponseData::Speech(SpeechResponse {
                    audio: Vec::new(),
                    usage,
                }),
                ..Default::default()
            };
            terminal.extra.model_requested = Some(model_requested);

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
        let request_type = util::begin(&self.core.config, ProviderId::Gemini, request, false)?;
        let transcription = util::transcription_input(request, request_type)?;

        let body = Self::transcription_body(transcription);
        let (parsed, latency_ms, raw) = self
            .generate_content(ctx, key, request, &body, request_type)
            .await?;

        let mut response = Response {
            object: "audio.transcription".to_string(),
            model: request.model.clone(),
            data: ResponseData::Transcription(TranscriptionResponse {
                text: parsed.joined_text(),
                language: transcription.language.clone(),
                duration: None,
                usage: parsed
                    .usage_metadata
                    .as_ref()
                    .map(UsageMetadata::to_audio_usage),
            }),
            ..Default::default()
        };
        util::stamp_response(
            &mut response,
            ProviderId::Gemini,
            request_type,
            &request.model,
            latency_ms,
            raw,
        );

        Ok(response)
    }

    async fn transcription_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        let request_type = util::begin(&self.core.config, ProviderId::Gemini, request, true)?;
        let transcription = util::transcription_input(request, request_type)?;

        let body = Self::transcription_body(transcription);
        let upstream = self
            .open_native_stream(ctx, key, request, &body, request_type)
            .await?;

        let (mut producer, rx) = StreamProducer::new(
            ctx,
            ctx.hooks.clone(),
            ProviderId::Gemini,
            request_type,
            self.core.config.stream_buffer_size,
        );
        let model_requested = request.model.clone();
        let send_raw = self.core.config.send_back_raw_response;

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

                let parsed: GenerateContentResponse = match sonic_rs::from_str(&event.data) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        log::warn!("skipping undecodable gemini transcription chunk: {e}");
                        continue;
                    }
                };

                if let Some(metadata) = &parsed.usage_metadata {
                    usage = Some(metadata.to_audio_usage());
                }

                let text = parsed.joined_text();
                if text.is_empty() {
                    continue;
                }

                let mut chunk = Response {
                    object: "audio.transcription.chunk".to_string(),
                    model: model_requested.clone(),
                    data: ResponseData::Transcription(TranscriptionResponse {
                        text,
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                if send_raw {
                    chunk.extra.raw_response = util::raw_value(true, event.data.as_bytes());
                }
                chunk.extra.model_requested = Some(model_requested.clone());

                if producer.send(chunk.into()).await == Delivery::Closed {
                    return;
                }
            }

            let mut terminal = Response {
                object: "audio.transcription.chunk".to_string(),
                model: model_requested.clone(),
                data: ResponseData::Transcription(TranscriptionResponse {
                    usage,
                    ..Default::default()
                }),
                ..Default::default()
            };
            terminal.extra.model_requested = Some(model_requested);

            producer.finish(terminal.into()).await;
        });

        Ok(rx)
    }
}
