//! Cohere v2 adapter: `/v2/chat` and `/v2/embed` with Bearer auth.
//!
//! Streaming is SSE whose payloads carry a `type` discriminator; the state
//! machine follows the v2 event flow (message-start → content/tool events →
//! message-end). Unknown event types are logged and skipped; `data: [DONE]`
//! is accepted as a terminator alongside `message-end`.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::HeaderMap;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use schema::{
    BilledUsage, ChatContent, ChatDelta, ChatMessage, ChatRole, ChatToolCall, ChatToolCallDelta,
    Choice, Embedding, EmbeddingInput, EmbeddingValue, FunctionCall, FunctionCallDelta,
    GatewayError, Key, ProviderId, Request, RequestType, Response, ResponseData, Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ProviderConfig;
use crate::context::RequestContext;
use crate::http::{build_client, build_streaming_client, merge_extra_headers, sse_headers, trim_base_url};
use crate::provider::responses_bridge::{self, StreamShape};
use crate::provider::{Provider, util};
use crate::stream::{Delivery, StreamProducer};
use crate::{ProviderResult, ResponseStream};

const COHERE_API_URL: &str = "https://api.cohere.ai";

pub struct CohereProvider {
    client: Client,
    stream_client: Client,
    base_url: String,
    config: ProviderConfig,
}

impl CohereProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let base_url = trim_base_url(config.base_url.as_deref().unwrap_or(COHERE_API_URL));

        Ok(Self {
            client: build_client(&config)?,
            stream_client: build_streaming_client(&config)?,
            base_url,
            config,
        })
    }

    fn headers(&self, key: &Key, sse: bool) -> ProviderResult<HeaderMap> {
        let secret = key.secret().ok_or_else(|| {
            Box::new(GatewayError::configuration("no API key value configured for provider cohere"))
        })?;

        let mut headers = if sse { sse_headers() } else { HeaderMap::new() };
        headers.insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json"));

        let mut value = http::HeaderValue::from_str(&format!("Bearer {secret}")).map_err(|_| {
            Box::new(GatewayError::configuration("API key contains invalid header characters"))
        })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);

        merge_extra_headers(&mut headers, &self.config.extra_headers);
        Ok(headers)
    }

    async fn chat_call(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
        chat: &schema::ChatRequest,
        request_type: RequestType,
    ) -> ProviderResult<Response> {
        let body = sonic_rs::to_vec(&CohereChatBody::new(&request.model, chat, false)).map_err(|e| {
            util::stamp_error(GatewayError::marshaling(e), ProviderId::Cohere, request_type, None)
        })?;

        let builder = self
            .client
            .post(format!("{}/v2/chat", self.base_url))
            .headers(self.headers(key, false)?)
            .body(body);

        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Cohere, request_type, None))?;

        if !(200..300).contains(&dispatched.status) {
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                ProviderId::Cohere,
                request_type,
                Some(dispatched.latency_ms),
            ));
        }

        let parsed: CohereChatResponse = sonic_rs::from_slice(&dispatched.body).map_err(|e| {
            util::stamp_error(GatewayError::unmarshal(e), ProviderId::Cohere, request_type, None)
        })?;

        let mut response = parsed.into_response(&request.model);
        util::stamp_response(
            &mut response,
            ProviderId::Cohere,
            request_type,
            &request.model,
            dispatched.latency_ms,
            util::raw_value(self.config.send_back_raw_response, &dispatched.body),
        );

        Ok(response)
    }

    async fn chat_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
        chat: &schema::ChatRequest,
        shape: StreamShape,
    ) -> ProviderResult<ResponseStream> {
        let body = sonic_rs::to_vec(&CohereChatBody::new(&request.model, chat, true)).map_err(|e| {
            util::stamp_error(
                GatewayError::marshaling(e),
                ProviderId::Cohere,
                shape.request_type,
                None,
            )
        })?;

        let builder = self
            .stream_client
            .post(format!("{}/v2/chat", self.base_url))
            .headers(self.headers(key, true)?)
            .body(body);

        let upstream = util::send_with_cancellation(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Cohere, shape.request_type, None))?;

        let status = upstream.status();
        if !status.is_success() {
            let body = upstream.bytes().await.unwrap_or_default();
            return Err(util::stamp_error(
                util::error_from_body(status.as_u16(), &body),
                ProviderId::Cohere,
                shape.request_type,
                None,
            ));
        }

        let (mut producer, rx) = StreamProducer::new(
            ctx,
            shape.hooks,
            ProviderId::Cohere,
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

            let mut events = upstream.bytes_stream().eventsource();
            let mut state = CohereStreamState::new(model);

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

                let parsed: CohereStreamEvent = match sonic_rs::from_str(&event.data) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        log::warn!("skipping undecodable cohere stream event: {e}");
                        continue;
                    }
                };

                match state.step(parsed) {
                    CohereStep::Continue => {}
                    CohereStep::Chunk(mut chunk) => {
                        if send_raw {
                            chunk.extra.raw_response = util::raw_value(true, event.data.as_bytes());
                        }
                        chunk.extra.model_requested = Some(model_requested.clone());

                        if producer.send(chunk.into()).await == Delivery::Closed {
                            return;
                        }
                    }
                    CohereStep::Done(mut terminal) => {
                        terminal.extra.model_requested = Some(model_requested.clone());
                        producer.finish(terminal.into()).await;
                        return;
                    }
                }
            }

            // EOF or [DONE] before message-end: close with what was gathered.
            let mut terminal = state.terminal();
            terminal.extra.model_requested = Some(model_requested);
            producer.finish(terminal.into()).await;
        });

        Ok(rx)
    }
}

#[derive(Serialize)]
struct CohereChatBody {
    model: String,
    messages: Vec<CohereMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    extra: Map<String, Value>,
}

#[derive(Serialize)]
struct CohereMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl CohereChatBody {
    fn new(model: &str, chat: &schema::ChatRequest, stream: bool) -> Self {
        let params = &chat.params;

        let messages = chat
            .input
            .iter()
            .map(|message: &ChatMessage| CohereMessage {
                role: match message.role {
                    ChatRole::System | ChatRole::Developer => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::Tool => "tool",
                },
                content: message.content.as_ref().and_then(ChatContent::joined_text),
                tool_calls: message.tool_calls.clone(),
                tool_call_id: message.tool_call_id.clone(),
            })
            .collect();

        let tools = params.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|tool| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": tool.function.name,
                            "description": tool.function.description,
                            "parameters": tool.function.parameters,
                        }
                    })
                })
                .collect()
        });

        Self {
            model: model.to_string(),
            messages,
            temperature: params.temperature,
            p: params.top_p,
            k: params.top_k,
            max_tokens: params.max_completion_tokens,
            stop_sequences: params.stop.clone(),
            tools,
            stream: stream.then_some(true),
            extra: params.extra_params.clone(),
        }
    }
}

#[derive(Deserialize)]
struct CohereChatResponse {
    #[serde(default)]
    id: String,
    message: CohereResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    usage: Option<CohereUsage>,
}

#[derive(Deserialize)]
struct CohereResponseMessage {
    #[serde(default)]
    content: Vec<CohereContentBlock>,
    #[serde(default)]
    tool_calls: Option<Vec<CohereToolCall>>,
    #[serde(default)]
    tool_plan: Option<String>,
}

#[derive(Deserialize)]
struct CohereContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct CohereToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<CohereFunction>,
}

#[derive(Deserialize)]
struct CohereFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct CohereUsage {
    #[serde(default)]
    billed_units: Option<CohereUnits>,
    #[serde(default)]
    tokens: Option<CohereUnits>,
}

#[derive(Deserialize)]
struct CohereUnits {
    #[serde(default)]
    input_tokens: Option<f64>,
    #[serde(default)]
    output_tokens: Option<f64>,
}

impl CohereUsage {
    fn to_usage(&self) -> Option<Usage> {
        let tokens = self.tokens.as_ref()?;
        let prompt = tokens.input_tokens.unwrap_or(0.0) as u32;
        let completion = tokens.output_tokens.unwrap_or(0.0) as u32;
        Some(Usage::new(prompt, completion, prompt + completion))
    }

    fn to_billed(&self) -> Option<BilledUsage> {
        let billed = self.billed_units.as_ref()?;
        Some(BilledUsage {
            input_tokens: billed.input_tokens,
            output_tokens: billed.output_tokens,
            search_units: None,
            classifications: None,
        })
    }
}

impl CohereChatResponse {
    fn into_response(self, model: &str) -> Response {
        let text: String = self
            .message
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect();

        let tool_calls: Vec<ChatToolCall> = self
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ChatToolCall {
                id: call.id.unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4())),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: call.function.as_ref().and_then(|f| f.name.clone()).unwrap_or_default(),
                    arguments: call
                        .function
                        .and_then(|f| f.arguments)
                        .unwrap_or_else(|| "{}".to_string()),
                },
            })
            .collect();

        let mut response = Response {
            id: self.id,
            object: "chat.completion".to_string(),
            model: model.to_string(),
            usage: self.usage.as_ref().and_then(CohereUsage::to_usage),
            data: ResponseData::Chat {
                choices: vec![Choice {
                    index: 0,
                    message: Some(ChatMessage {
                        role: ChatRole::Assistant,
                        content: if text.is_empty() {
                            None
                        } else {
                            Some(ChatContent::Text(text))
                        },
                        refusal: None,
                        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                        tool_call_id: None,
                    }),
                    // Cohere finish reasons pass through verbatim.
                    finish_reason: self.finish_reason,
                    ..Default::default()
                }],
            },
            ..Default::default()
        };
        response.extra.billed_usage = self.usage.as_ref().and_then(CohereUsage::to_billed);

        if self.message.tool_plan.is_some() {
            log::debug!("cohere tool plan present on unary response");
        }

        response
    }
}

/// One v2 streaming event; the payload shape varies by `type`, so the delta
/// is kept as a tree and drilled per event.
#[derive(Deserialize)]
struct CohereStreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    delta: Option<Value>,
}

enum CohereStep {
    Continue,
    Chunk(Response),
    Done(Response),
}

struct CohereStreamState {
    model: String,
    response_id: String,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    billed: Option<BilledUsage>,
    /// Slot of the tool call currently accumulating.
    current_tool_slot: Option<u32>,
    next_tool_slot: u32,
}

impl CohereStreamState {
    fn new(model: String) -> Self {
        Self {
            model,
            response_id: String::new(),
            finish_reason: None,
            usage: None,
            billed: None,
            current_tool_slot: None,
            next_tool_slot: 0,
        }
    }

    fn chunk(&self, delta: ChatDelta) -> Response {
        Response {
            id: self.response_id.clone(),
            object: "chat.completion.chunk".to_string(),
            model: self.model.clone(),
            data: ResponseData::Chat {
                choices: vec![Choice {
                    index: 0,
                    delta: Some(delta),
                    ..Default::default()
                }],
            },
            ..Default::default()
        }
    }

    fn terminal(&self) -> Response {
        let mut terminal = self.chunk(ChatDelta::default());
        terminal.usage = self.usage.clone();
        terminal.extra.billed_usage = self.billed.clone();
        if let Some(choices) = terminal.data.choices_mut() {
            choices[0].finish_reason = self.finish_reason.clone();
        }
        terminal
    }

    fn step(&mut self, event: CohereStreamEvent) -> CohereStep {
        let delta = event.delta.unwrap_or(Value::Null);

        match event.event_type.as_str() {
            "message-start" => {
                if let Some(id) = event.id {
                    self.response_id = id;
                }

                CohereStep::Chunk(self.chunk(ChatDelta {
                    role: Some(ChatRole::Assistant),
                    ..Default::default()
                }))
            }
            "content-delta" => {
                let Some(text) = delta
                    .pointer("/message/content/text")
                    .and_then(Value::as_str)
                else {
                    return CohereStep::Continue;
                };

                CohereStep::Chunk(self.chunk(ChatDelta {
                    content: Some(text.to_string()),
                    ..Default::default()
                }))
            }
            "tool-plan-delta" => {
                let Some(plan) = delta
                    .pointer("/message/tool_plan")
                    .and_then(Value::as_str)
                else {
                    return CohereStep::Continue;
                };

                CohereStep::Chunk(self.chunk(ChatDelta {
                    thought: Some(plan.to_string()),
                    ..Default::default()
                }))
            }
            "tool-call-start" => {
                let call = delta.pointer("/message/tool_calls");
                let slot = self.next_tool_slot;
                self.next_tool_slot += 1;
                self.current_tool_slot = Some(slot);

                CohereStep::Chunk(self.chunk(ChatDelta {
                    tool_calls: Some(vec![ChatToolCallDelta {
                        index: slot,
                        id: call
                            .and_then(|c| c.get("id"))
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        call_type: Some("function".to_string()),
                        function: FunctionCallDelta {
                            name: call
                                .and_then(|c| c.pointer("/function/name"))
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            arguments: call
                                .and_then(|c| c.pointer("/function/arguments"))
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        },
                    }]),
                    ..Default::default()
                }))
            }
            "tool-call-delta" => {
                let Some(slot) = self.current_tool_slot else {
                    return CohereStep::Continue;
                };
                let Some(arguments) = delta
                    .pointer("/message/tool_calls/function/arguments")
                    .and_then(Value::as_str)
                else {
                    return CohereStep::Continue;
                };

                CohereStep::Chunk(self.chunk(ChatDelta {
                    tool_calls: Some(vec![ChatToolCallDelta {
                        index: slot,
                        id: None,
                        call_type: None,
                        function: FunctionCallDelta {
                            name: None,
                            arguments: Some(arguments.to_string()),
                        },
                    }]),
                    ..Default::default()
                }))
            }
            "tool-call-end" => {
                self.current_tool_slot = None;
                CohereStep::Continue
            }
            "message-end" => {
                if let Some(reason) = delta.pointer("/finish_reason").and_then(Value::as_str) {
                    self.finish_reason = Some(reason.to_string());
                }
                if let Some(usage) = delta.get("usage")
                    && let Ok(usage) = serde_json::from_value::<CohereUsage>(usage.clone())
                {
                    self.usage = usage.to_usage();
                    self.billed = usage.to_billed();
                }

                CohereStep::Done(self.terminal())
            }
            "content-start" | "content-end" => CohereStep::Continue,
            other => {
                log::warn!("skipping unknown cohere stream event `{other}`");
                CohereStep::Continue
            }
        }
    }
}

#[derive(Serialize)]
struct CohereEmbedBody {
    model: String,
    texts: Vec<String>,
    input_type: &'static str,
    embedding_types: Vec<&'static str>,
}

#[derive(Deserialize)]
struct CohereEmbedResponse {
    #[serde(default)]
    id: String,
    embeddings: CohereEmbeddings,
    #[serde(default)]
    meta: Option<Value>,
}

#[derive(Deserialize)]
struct CohereEmbeddings {
    #[serde(default)]
    float: Vec<Vec<f32>>,
}

#[async_trait]
impl Provider for CohereProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Cohere
    }

    async fn chat_completion(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let request_type = util::begin(&self.config, ProviderId::Cohere, request, false)?;
        let chat = util::chat_input(request, request_type)?;
        self.chat_call(ctx, key, request, chat, request_type).await
    }

    async fn chat_completion_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        let request_type = util::begin(&self.config, ProviderId::Cohere, request, true)?;
        let chat = util::chat_input(request, request_type)?;
        self.chat_stream(ctx, key, request, chat, StreamShape::chat(ctx)).await
    }

    async fn responses(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        util::ensure_allowed(&self.config, ProviderId::Cohere, RequestType::Responses)?;
        let chat = responses_bridge::chat_from_responses(request, RequestType::Responses)?;

        let mut response = self
            .chat_call(ctx, key, request, &chat, RequestType::Responses)
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
        util::ensure_allowed(&self.config, ProviderId::Cohere, RequestType::ResponsesStream)?;
        let chat = responses_bridge::chat_from_responses(request, RequestType::ResponsesStream)?;
        self.chat_stream(ctx, key, request, &chat, StreamShape::responses(ctx))
            .await
    }

    async fn embedding(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        util::ensure_allowed(&self.config, ProviderId::Cohere, RequestType::Embedding)?;
        let embedding = util::embedding_input(request)?;

        let texts = match &embedding.input {
            EmbeddingInput::Text(text) => vec![text.clone()],
            EmbeddingInput::Texts(texts) => texts.clone(),
            EmbeddingInput::Tokens(_) | EmbeddingInput::TokenBatches(_) => {
                return Err(util::stamp_error(
                    GatewayError::operation("cohere embeddings accept text input only"),
                    ProviderId::Cohere,
                    RequestType::Embedding,
                    None,
                ));
            }
        };

        let body = sonic_rs::to_vec(&CohereEmbedBody {
            model: request.model.clone(),
            texts,
            input_type: "search_document",
            embedding_types: vec!["float"],
        })
        .map_err(|e| {
            util::stamp_error(
                GatewayError::marshaling(e),
                ProviderId::Cohere,
                RequestType::Embedding,
                None,
            )
        })?;

        let builder = self
            .client
            .post(format!("{}/v2/embed", self.base_url))
            .headers(self.headers(key, false)?)
            .body(body);

        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Cohere, RequestType::Embedding, None))?;

        if !(200..300).contains(&dispatched.status) {
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                ProviderId::Cohere,
                RequestType::Embedding,
                Some(dispatched.latency_ms),
            ));
        }

        let parsed: CohereEmbedResponse = sonic_rs::from_slice(&dispatched.body).map_err(|e| {
            util::stamp_error(
                GatewayError::unmarshal(e),
                ProviderId::Cohere,
                RequestType::Embedding,
                None,
            )
        })?;

        let data = parsed
            .embeddings
            .float
            .into_iter()
            .enumerate()
            .map(|(index, floats)| Embedding {
                index: index as u32,
                object: "embedding".to_string(),
                embedding: EmbeddingValue::Floats(floats),
            })
            .collect();

        let mut response = Response {
            id: parsed.id,
            object: "list".to_string(),
            model: request.model.clone(),
            data: ResponseData::Embedding { data },
            ..Default::default()
        };

        if let Some(billed) = parsed
            .meta
            .as_ref()
            .and_then(|meta| meta.pointer("/billed_units/input_tokens"))
            .and_then(Value::as_f64)
        {
            response.extra.billed_usage = Some(BilledUsage {
                input_tokens: Some(billed),
                ..Default::default()
            });
        }

        util::stamp_response(
            &mut response,
            ProviderId::Cohere,
            RequestType::Embedding,
            &request.model,
            dispatched.latency_ms,
            util::raw_value(self.config.send_back_raw_response, &dispatched.body),
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(state: &mut CohereStreamState, payload: &str) -> CohereStep {
        let event: CohereStreamEvent = serde_json::from_str(payload).unwrap();
        state.step(event)
    }

    #[test]
    fn tool_call_event_flow_accumulates_one_call() {
        let mut state = CohereStreamState::new("command-r".into());

        let CohereStep::Chunk(role) =
            step(&mut state, r#"{"type":"message-start","id":"c1","delta":{"message":{"role":"assistant"}}}"#)
        else {
            panic!("expected role chunk");
        };
        assert_eq!(role.id, "c1");
        let delta = role.data.choices().unwrap()[0].delta.as_ref().unwrap();
        assert_eq!(delta.role, Some(ChatRole::Assistant));

        let CohereStep::Chunk(start) = step(
            &mut state,
            r#"{"type":"tool-call-start","index":0,"delta":{"message":{"tool_calls":{"id":"t1","type":"function","function":{"name":"f","arguments":""}}}}}"#,
        ) else {
            panic!("expected tool start chunk");
        };
        let delta = start.data.choices().unwrap()[0].delta.as_ref().unwrap();
        let call = &delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id.as_deref(), Some("t1"));
        assert_eq!(call.function.name.as_deref(), Some("f"));

        let CohereStep::Chunk(first) = step(
            &mut state,
            r#"{"type":"tool-call-delta","delta":{"message":{"tool_calls":{"function":{"arguments":"{\"x\":"}}}}}"#,
        ) else {
            panic!("expected arguments chunk");
        };
        let delta = first.data.choices().unwrap()[0].delta.as_ref().unwrap();
        assert_eq!(
            delta.tool_calls.as_ref().unwrap()[0].function.arguments.as_deref(),
            Some("{\"x\":")
        );

        let CohereStep::Chunk(_second) = step(
            &mut state,
            r#"{"type":"tool-call-delta","delta":{"message":{"tool_calls":{"function":{"arguments":"1}"}}}}}"#,
        ) else {
            panic!("expected arguments chunk");
        };

        assert!(matches!(step(&mut state, r#"{"type":"tool-call-end"}"#), CohereStep::Continue));

        let CohereStep::Done(terminal) = step(
            &mut state,
            r#"{"type":"message-end","delta":{"finish_reason":"tool_call","usage":{"billed_units":{"input_tokens":4,"output_tokens":8},"tokens":{"input_tokens":10,"output_tokens":20}}}}"#,
        ) else {
            panic!("expected terminal");
        };

        let choice = &terminal.data.choices().unwrap()[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_call"));

        let usage = terminal.usage.as_ref().unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 20);

        let billed = terminal.extra.billed_usage.as_ref().unwrap();
        assert_eq!(billed.input_tokens, Some(4.0));
    }

    #[test]
    fn unknown_event_types_are_skipped() {
        let mut state = CohereStreamState::new("command-r".into());
        assert!(matches!(
            step(&mut state, r#"{"type":"citation-start","delta":{}}"#),
            CohereStep::Continue
        ));
    }

    #[test]
    fn content_deltas_become_text_chunks() {
        let mut state = CohereStreamState::new("command-r".into());

        let CohereStep::Chunk(chunk) = step(
            &mut state,
            r#"{"type":"content-delta","index":0,"delta":{"message":{"content":{"text":"Hi"}}}}"#,
        ) else {
            panic!("expected content chunk");
        };

        let delta = chunk.data.choices().unwrap()[0].delta.as_ref().unwrap();
        assert_eq!(delta.content.as_deref(), Some("Hi"));
    }
}
