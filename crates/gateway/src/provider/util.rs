//! Shared adapter plumbing: input validation, dispatch timing, cancellation
//! racing, and error classification.

use std::time::Instant;

use bytes::Bytes;
use schema::{
    ChatRequest, EmbeddingRequest, ErrorKind, GatewayError, ProviderId, Request, RequestPayload,
    RequestType, Response, ResponsesRequest, SpeechRequest, TextCompletionRequest,
    TranscriptionRequest,
};
use serde_json::Value;

use crate::config::ProviderConfig;
use crate::context::RequestContext;
use crate::ProviderResult;

pub(crate) fn unsupported(provider: ProviderId, request_type: RequestType) -> Box<GatewayError> {
    let mut error = GatewayError::unsupported(provider, request_type);
    error.extra.provider = Some(provider);
    error.extra.request_type = Some(request_type);
    Box::new(error)
}

/// Gate an operation on the provider's allow-set before any work.
pub(crate) fn ensure_allowed(
    config: &ProviderConfig,
    provider: ProviderId,
    request_type: RequestType,
) -> ProviderResult<()> {
    match &config.allowed_requests {
        Some(allowed) if !allowed.contains(&request_type) => Err(unsupported(provider, request_type)),
        _ => Ok(()),
    }
}

fn missing_input(provider: ProviderId, request_type: RequestType, what: &str) -> Box<GatewayError> {
    let mut error = GatewayError::operation(format!("{what} input is not provided"));
    error.extra.provider = Some(provider);
    error.extra.request_type = Some(request_type);
    Box::new(error)
}

pub(crate) fn chat_input<'r>(
    request: &'r Request,
    request_type: RequestType,
) -> ProviderResult<&'r ChatRequest> {
    match &request.payload {
        RequestPayload::Chat(chat) if !chat.input.is_empty() => Ok(chat),
        _ => Err(missing_input(request.provider, request_type, "chat completion")),
    }
}

pub(crate) fn text_input<'r>(
    request: &'r Request,
    request_type: RequestType,
) -> ProviderResult<&'r TextCompletionRequest> {
    match &request.payload {
        RequestPayload::TextCompletion(text) => match &text.input {
            schema::TextCompletionInput::Single(prompt) if !prompt.is_empty() => Ok(text),
            schema::TextCompletionInput::Batch(prompts) if !prompts.is_empty() => Ok(text),
            _ => Err(missing_input(request.provider, request_type, "text completion")),
        },
        _ => Err(missing_input(request.provider, request_type, "text completion")),
    }
}

pub(crate) fn responses_input<'r>(
    request: &'r Request,
    request_type: RequestType,
) -> ProviderResult<&'r ResponsesRequest> {
    match &request.payload {
        RequestPayload::Responses(responses) if !responses.input.is_empty() => Ok(responses),
        _ => Err(missing_input(request.provider, request_type, "responses")),
    }
}

pub(crate) fn embedding_input(request: &Request) -> ProviderResult<&EmbeddingRequest> {
    match &request.payload {
        RequestPayload::Embedding(embedding) if !embedding.input.is_empty() => Ok(embedding),
        _ => Err(missing_input(request.provider, RequestType::Embedding, "embedding")),
    }
}

pub(crate) fn speech_input<'r>(
    request: &'r Request,
    request_type: RequestType,
) -> ProviderResult<&'r SpeechRequest> {
    match &request.payload {
        RequestPayload::Speech(speech) if !speech.input.is_empty() => Ok(speech),
        _ => Err(missing_input(request.provider, request_type, "speech")),
    }
}

pub(crate) fn transcription_input<'r>(
    request: &'r Request,
    request_type: RequestType,
) -> ProviderResult<&'r TranscriptionRequest> {
    match &request.payload {
        RequestPayload::Transcription(transcription) if !transcription.file.is_empty() => {
            Ok(transcription)
        }
        _ => Err(missing_input(request.provider, request_type, "transcription")),
    }
}

/// Classify a transport failure. Cancellation wins over everything; reqwest's
/// own timeout flag maps to the deadline error.
pub(crate) fn classify_send_error(ctx: &RequestContext, error: reqwest::Error) -> GatewayError {
    if ctx.token.is_cancelled() {
        return GatewayError::cancelled();
    }
    if error.is_timeout() {
        return GatewayError::timed_out(error);
    }
    GatewayError::transport(error)
}

/// Dispatch a request racing the cancellation token.
///
/// Dropping the in-flight future aborts the outbound call; the caller-visible
/// contract is a `RequestCancelled` error either way.
pub(crate) async fn send_with_cancellation(
    ctx: &RequestContext,
    builder: reqwest::RequestBuilder,
) -> Result<reqwest::Response, Box<GatewayError>> {
    if ctx.token.is_cancelled() {
        return Err(Box::new(GatewayError::cancelled()));
    }

    tokio::select! {
        response = builder.send() => response.map_err(|e| Box::new(classify_send_error(ctx, e))),
        _ = ctx.token.cancelled() => Err(Box::new(GatewayError::cancelled())),
    }
}

pub(crate) struct Dispatched {
    pub status: u16,
    pub body: Bytes,
    pub latency_ms: u64,
}

/// Send a request and read the full body, timing the round trip.
pub(crate) async fn dispatch(
    ctx: &RequestContext,
    builder: reqwest::RequestBuilder,
) -> ProviderResult<Dispatched> {
    let started = Instant::now();
    let response = send_with_cancellation(ctx, builder).await?;
    let status = response.status().as_u16();

    let body = tokio::select! {
        body = response.bytes() => body.map_err(|e| Box::new(classify_send_error(ctx, e)))?,
        _ = ctx.token.cancelled() => return Err(Box::new(GatewayError::cancelled())),
    };

    Ok(Dispatched {
        status,
        body,
        latency_ms: started.elapsed().as_millis() as u64,
    })
}

/// Decode a non-2xx body into the canonical error, preserving the provider's
/// error envelope fields where they exist.
pub(crate) fn error_from_body(status: u16, body: &[u8]) -> GatewayError {
    let text = String::from_utf8_lossy(body);

    let mut error = match sonic_rs::from_slice::<Value>(body) {
        Ok(value) => {
            let envelope = value.get("error").unwrap_or(&value);
            let message = envelope
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or(&text)
                .to_string();

            let mut error = GatewayError::api(status, message);
            error.error.error_type = envelope
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string);
            error.error.code = match envelope.get("code") {
                Some(Value::String(code)) => Some(code.clone()),
                Some(Value::Number(code)) => Some(code.to_string()),
                _ => None,
            };
            error.error.param = envelope.get("param").filter(|p| !p.is_null()).cloned();
            error.event_id = value
                .get("event_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            error
        }
        Err(_) => GatewayError::api(status, text.to_string()),
    };

    if error.error.message.is_empty() {
        error.error.message = format!("provider returned status {status}");
    }

    error
}

/// Stamp the gateway metadata every response carries.
pub(crate) fn stamp_response(
    response: &mut Response,
    provider: ProviderId,
    request_type: RequestType,
    model_requested: &str,
    latency_ms: u64,
    raw_response: Option<Value>,
) {
    response.extra.provider = Some(provider);
    response.extra.request_type = Some(request_type);
    response.extra.model_requested = Some(model_requested.to_string());
    response.extra.latency_ms = Some(latency_ms);
    if raw_response.is_some() {
        response.extra.raw_response = raw_response;
    }
}

/// Stamp the same metadata onto an error before returning it, logging
/// provider failures at error level on the way out. Cancellations and
/// configuration problems stay quiet; the caller asked for those.
pub(crate) fn stamp_error(
    mut error: GatewayError,
    provider: ProviderId,
    request_type: RequestType,
    latency_ms: Option<u64>,
) -> Box<GatewayError> {
    match error.kind {
        Some(ErrorKind::ProviderApiError) => {
            log::error!(
                "{provider} {request_type} API error ({}): {}",
                error.status_code.unwrap_or_default(),
                error.error.message
            );
        }
        Some(ErrorKind::ProviderResponseUnmarshal) => {
            log::error!(
                "failed to decode {provider} {request_type} response: {}",
                error.error.source.as_deref().unwrap_or(&error.error.message)
            );
        }
        Some(ErrorKind::ProviderJsonMarshaling) => {
            log::error!(
                "failed to encode {provider} {request_type} request: {}",
                error.error.source.as_deref().unwrap_or(&error.error.message)
            );
        }
        Some(ErrorKind::ProviderRequest) | Some(ErrorKind::ProviderRequestTimedOut) => {
            log::error!(
                "{provider} {request_type} request failed: {}",
                error.error.source.as_deref().unwrap_or(&error.error.message)
            );
        }
        _ => {}
    }

    error.extra.provider = Some(provider);
    error.extra.request_type = Some(request_type);
    if latency_ms.is_some() {
        error.extra.latency_ms = latency_ms;
    }
    Box::new(error)
}

/// Decoded-JSON raw payload for send-back-raw providers; falls back to the
/// body as a string when it is not JSON.
pub(crate) fn raw_value(enabled: bool, body: &[u8]) -> Option<Value> {
    if !enabled {
        return None;
    }

    Some(match sonic_rs::from_slice::<Value>(body) {
        Ok(value) => value,
        Err(_) => Value::String(String::from_utf8_lossy(body).to_string()),
    })
}

/// Check unary preconditions shared by every operation, then hand back the
/// request type for stamping.
pub(crate) fn begin(
    config: &ProviderConfig,
    provider: ProviderId,
    request: &Request,
    stream: bool,
) -> ProviderResult<RequestType> {
    let request_type = request.request_type(stream);
    ensure_allowed(config, provider, request_type)?;
    Ok(request_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::Parameters;

    #[test]
    fn empty_chat_input_fails_before_any_network_io() {
        let request = Request::new(
            ProviderId::OpenAi,
            "gpt-4o",
            RequestPayload::Chat(ChatRequest {
                input: vec![],
                params: Parameters::default(),
            }),
        );

        let error = chat_input(&request, RequestType::ChatCompletion).unwrap_err();
        assert!(error.internal);
        assert!(error.error.message.contains("input is not provided"));
        assert_eq!(error.extra.request_type, Some(RequestType::ChatCompletion));
    }

    #[test]
    fn mismatched_payload_fails_the_same_way() {
        let request = Request::new(
            ProviderId::OpenAi,
            "gpt-4o",
            RequestPayload::Chat(ChatRequest {
                input: vec![],
                params: Parameters::default(),
            }),
        );

        assert!(text_input(&request, RequestType::TextCompletion).is_err());
        assert!(embedding_input(&request).is_err());
    }

    #[test]
    fn allow_set_gates_operations() {
        let mut config = ProviderConfig::default();
        config.allowed_requests = Some([RequestType::ChatCompletion].into_iter().collect());

        assert!(ensure_allowed(&config, ProviderId::OpenAi, RequestType::ChatCompletion).is_ok());

        let error =
            ensure_allowed(&config, ProviderId::OpenAi, RequestType::Embedding).unwrap_err();
        assert_eq!(error.kind, Some(schema::ErrorKind::UnsupportedOperation));
    }

    #[test]
    fn error_body_decoding_prefers_the_provider_envelope() {
        let error = error_from_body(
            429,
            br#"{"error":{"message":"rate limited","type":"rate_limit_error","code":"429"}}"#,
        );
        assert_eq!(error.status_code, Some(429));
        assert_eq!(error.error.message, "rate limited");
        assert_eq!(error.error.error_type.as_deref(), Some("rate_limit_error"));

        let raw = error_from_body(502, b"bad gateway");
        assert_eq!(raw.error.message, "bad gateway");
    }

    #[test]
    fn raw_value_decodes_json_and_falls_back_to_text() {
        assert_eq!(raw_value(false, b"{}"), None);
        assert_eq!(raw_value(true, br#"{"a":1}"#), Some(serde_json::json!({"a":1})));
        assert_eq!(raw_value(true, b"plain"), Some(Value::String("plain".into())));
    }
}
