//! The response envelope shared by every operation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::{SpeechResponse, TranscriptionResponse};
use crate::chat::{ChatDelta, ChatMessage};
use crate::error::GatewayError;
use crate::provider::ProviderId;
use crate::request::RequestType;
use crate::responses::{ResponsesResponse, ResponsesStreamEvent};
use crate::usage::{BilledUsage, Usage};

/// One response serves all eleven operations.
///
/// Exactly one [`ResponseData`] shape is populated; the bridge conversions
/// rewrite `data`, `object`, and the usage shape in place while keeping that
/// invariant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: String,
    /// Object tag, e.g. `chat.completion`, `chat.completion.chunk`,
    /// `response`, `text_completion`, `list`.
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(flatten)]
    pub data: ResponseData,
    #[serde(default, skip_serializing_if = "ResponseExtra::is_empty")]
    pub extra: ResponseExtra,
}

/// The operation-specific payload of a [`Response`].
///
/// Serialized flat into the envelope. Unmarshal tries variants in declaration
/// order, each keyed on a distinct field; chat comes last with a defaulted
/// `choices` list so that usage-only stream chunks (some providers omit the
/// choices array entirely) still decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    /// Embedding vectors, under the OpenAI `data` key.
    Embedding { data: Vec<crate::embedding::Embedding> },
    /// An embedded Responses-API response. Wrapped under its own key so its
    /// fields never collide with the envelope's.
    Responses { response: ResponsesResponse },
    /// One Responses-API streaming event.
    ResponsesStream { event: ResponsesStreamEvent },
    Speech(SpeechResponse),
    Transcription(TranscriptionResponse),
    /// Chat-style choices; also carries text-completion results.
    Chat {
        #[serde(default)]
        choices: Vec<Choice>,
    },
}

impl Default for ResponseData {
    fn default() -> Self {
        Self::Chat { choices: Vec::new() }
    }
}

impl ResponseData {
    pub fn choices(&self) -> Option<&[Choice]> {
        match self {
            Self::Chat { choices } => Some(choices),
            _ => None,
        }
    }

    pub fn choices_mut(&mut self) -> Option<&mut Vec<Choice>> {
        match self {
            Self::Chat { choices } => Some(choices),
            _ => None,
        }
    }
}

/// One generation alternative in a chat or text-completion response.
///
/// `message` is populated on unary responses, `delta` on streaming chunks;
/// the two are mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChatDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Value>,
}

/// Gateway-side metadata attached to every response and error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseExtra {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    /// The exact request type that produced this response. Post-hooks rely on
    /// it to tell streams apart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_type: Option<RequestType>,
    /// The model the caller asked for, before any provider-side aliasing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_requested: Option<String>,
    /// Wall-clock latency from just before dispatch to just after receive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// 0-based position of this chunk within its stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    /// Decoded upstream body, present when the provider was configured with
    /// send-back-raw.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billed_usage: Option<BilledUsage>,
}

impl ResponseExtra {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// The streaming delivery union: each envelope carries a response or an
/// error, never both. The producer closes the channel after the terminal
/// envelope.
///
/// Unmarshal order: the error side first, keyed on its mandatory `error`
/// body, since a response tolerates unknown fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEnvelope {
    Error(Box<GatewayError>),
    Response(Box<Response>),
}

impl StreamEnvelope {
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Response(response) => Some(response),
            Self::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&GatewayError> {
        match self {
            Self::Error(error) => Some(error),
            Self::Response(_) => None,
        }
    }

    pub fn chunk_index(&self) -> Option<u32> {
        match self {
            Self::Response(response) => response.extra.chunk_index,
            Self::Error(error) => error.extra.chunk_index,
        }
    }
}

impl From<Response> for StreamEnvelope {
    fn from(response: Response) -> Self {
        Self::Response(Box::new(response))
    }
}

impl From<GatewayError> for StreamEnvelope {
    fn from(error: GatewayError) -> Self {
        Self::Error(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_response_serializes_choices_flat() {
        let response = Response {
            id: "r1".into(),
            object: "chat.completion".into(),
            model: "gpt-4o".into(),
            data: ResponseData::Chat {
                choices: vec![Choice {
                    index: 0,
                    message: Some(ChatMessage::text(crate::ChatRole::Assistant, "hello")),
                    finish_reason: Some("stop".into()),
                    ..Default::default()
                }],
            },
            ..Default::default()
        };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["choices"][0]["message"]["content"], "hello");
        assert_eq!(value["object"], "chat.completion");

        let back: Response = serde_json::from_value(value).unwrap();
        assert_eq!(back.data.choices().unwrap().len(), 1);
    }

    #[test]
    fn envelope_union_dispatches_to_populated_side() {
        let ok = StreamEnvelope::from(Response::default());
        assert!(ok.response().is_some());
        assert!(ok.error().is_none());

        let err = StreamEnvelope::from(GatewayError::api(500, "boom"));
        assert!(err.error().is_some());
        assert!(err.response().is_none());

        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["status_code"], json!(500));

        // The union dispatches back to the error side on read, too.
        let back: StreamEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(back.error().unwrap().status_code, Some(500));
    }
}
