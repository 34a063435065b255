//! The request envelope and the shared parameter surface.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audio::{SpeechRequest, TranscriptionRequest};
use crate::chat::{ChatMessage, ChatTool, ToolChoice};
use crate::embedding::EmbeddingRequest;
use crate::provider::ProviderId;
use crate::responses::ResponsesRequest;

/// The operation a request or response belongs to.
///
/// Every response and error carries the exact request type that generated it;
/// post-hooks use it to tell streams apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    TextCompletion,
    TextCompletionStream,
    ChatCompletion,
    ChatCompletionStream,
    Responses,
    ResponsesStream,
    Embedding,
    Speech,
    SpeechStream,
    Transcription,
    TranscriptionStream,
}

impl RequestType {
    pub fn is_stream(&self) -> bool {
        matches!(
            self,
            Self::TextCompletionStream
                | Self::ChatCompletionStream
                | Self::ResponsesStream
                | Self::SpeechStream
                | Self::TranscriptionStream
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextCompletion => "text_completion",
            Self::TextCompletionStream => "text_completion_stream",
            Self::ChatCompletion => "chat_completion",
            Self::ChatCompletionStream => "chat_completion_stream",
            Self::Responses => "responses",
            Self::ResponsesStream => "responses_stream",
            Self::Embedding => "embedding",
            Self::Speech => "speech",
            Self::SpeechStream => "speech_stream",
            Self::Transcription => "transcription",
            Self::TranscriptionStream => "transcription_stream",
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(provider, model)` alternative tried by the router when the primary
/// fails with an error that allows fallbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fallback {
    pub provider: ProviderId,
    pub model: String,
}

/// The abstract request issued by a caller.
///
/// Exactly one payload variant is populated; the payload and the operation
/// agree by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub provider: ProviderId,
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<Fallback>,
    #[serde(flatten)]
    pub payload: RequestPayload,
}

impl Request {
    pub fn new(provider: ProviderId, model: impl Into<String>, payload: RequestPayload) -> Self {
        Self {
            provider,
            model: model.into(),
            fallbacks: Vec::new(),
            payload,
        }
    }

    /// The request type this payload maps to, in its unary or streaming form.
    pub fn request_type(&self, stream: bool) -> RequestType {
        match (&self.payload, stream) {
            (RequestPayload::TextCompletion(_), false) => RequestType::TextCompletion,
            (RequestPayload::TextCompletion(_), true) => RequestType::TextCompletionStream,
            (RequestPayload::Chat(_), false) => RequestType::ChatCompletion,
            (RequestPayload::Chat(_), true) => RequestType::ChatCompletionStream,
            (RequestPayload::Responses(_), false) => RequestType::Responses,
            (RequestPayload::Responses(_), true) => RequestType::ResponsesStream,
            // Embeddings have no streaming form.
            (RequestPayload::Embedding(_), _) => RequestType::Embedding,
            (RequestPayload::Speech(_), false) => RequestType::Speech,
            (RequestPayload::Speech(_), true) => RequestType::SpeechStream,
            (RequestPayload::Transcription(_), false) => RequestType::Transcription,
            (RequestPayload::Transcription(_), true) => RequestType::TranscriptionStream,
        }
    }
}

/// The six typed request payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPayload {
    TextCompletion(TextCompletionRequest),
    Chat(ChatRequest),
    Responses(ResponsesRequest),
    Embedding(EmbeddingRequest),
    Speech(SpeechRequest),
    Transcription(TranscriptionRequest),
}

/// Text-completion input: a single prompt or a batch.
///
/// Unmarshal order: the batch (array) form is tried before the bare string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextCompletionInput {
    Batch(Vec<String>),
    Single(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextCompletionRequest {
    pub input: TextCompletionInput,
    #[serde(flatten)]
    pub params: Parameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub input: Vec<ChatMessage>,
    #[serde(flatten)]
    pub params: Parameters,
}

/// OpenAI-style sampling and tool knobs shared by text, chat, and (through
/// the bridge) Responses requests.
///
/// `extra_params` entries are merged verbatim into provider request bodies,
/// after the typed fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Parameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,

    /// Open pass-through knobs merged verbatim into the provider body.
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra_params: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_usage: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatRole;

    #[test]
    fn text_completion_input_round_trips_both_variants() {
        let single = TextCompletionInput::Single("once upon".into());
        let json = serde_json::to_string(&single).unwrap();
        assert_eq!(json, r#""once upon""#);
        assert_eq!(serde_json::from_str::<TextCompletionInput>(&json).unwrap(), single);

        let batch = TextCompletionInput::Batch(vec!["a".into(), "b".into()]);
        let json = serde_json::to_string(&batch).unwrap();
        assert_eq!(serde_json::from_str::<TextCompletionInput>(&json).unwrap(), batch);
    }

    #[test]
    fn request_type_follows_payload() {
        let request = Request::new(
            ProviderId::OpenAi,
            "gpt-4o",
            RequestPayload::Chat(ChatRequest {
                input: vec![ChatMessage::text(ChatRole::User, "hi")],
                params: Parameters::default(),
            }),
        );

        assert_eq!(request.request_type(false), RequestType::ChatCompletion);
        assert_eq!(request.request_type(true), RequestType::ChatCompletionStream);
    }

    #[test]
    fn extra_params_flatten_into_the_envelope() {
        let mut params = Parameters::default();
        params.temperature = Some(0.2);
        params
            .extra_params
            .insert("custom_knob".into(), Value::from(3));

        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["temperature"], Value::from(0.2));
        assert_eq!(value["custom_knob"], Value::from(3));
    }
}
