//! Provider-agnostic request/response model for the gateway.
//!
//! Every provider adapter marshals in and out of the types in this crate. The
//! model deliberately mirrors the OpenAI wire vocabulary where the industry
//! does, and carries explicit unions where providers disagree:
//!
//! - **Chat Completions shape**: role + content + tool_calls messages.
//! - **Responses shape**: a flat list of typed items where tool calls are
//!   first-class items rather than message attachments.
//!
//! The [`bridge`] module converts between the two shapes in both directions;
//! it is exercised by every provider that implements the Responses surface on
//! top of its chat endpoint.

mod audio;
mod chat;
mod embedding;
mod error;
mod key;
mod provider;
mod request;
mod response;
mod responses;
mod usage;

pub mod bridge;

pub use audio::{
    SpeechRequest, SpeechResponse, TranscriptionRequest, TranscriptionResponse, VoiceConfig,
    VoiceInput,
};
pub use chat::{
    ChatContent, ChatContentBlock, ChatDelta, ChatMessage, ChatRole, ChatTool, ChatToolCall,
    ChatToolCallDelta, FunctionCall, FunctionCallDelta, FunctionDefinition, ImageUrl, InputAudio,
    InputFile, ToolChoice, ToolChoiceFunction, ToolChoiceMode,
};
pub use embedding::{Embedding, EmbeddingInput, EmbeddingParameters, EmbeddingRequest, EmbeddingValue};
pub use error::{ErrorBody, ErrorKind, GatewayError, StreamControl};
pub use key::{AzureKeyConfig, BedrockKeyConfig, Key, OpenAiKeyConfig, VertexKeyConfig};
pub use provider::ProviderId;
pub use request::{
    ChatRequest, Fallback, Parameters, Request, RequestPayload, RequestType, StreamOptions,
    TextCompletionInput, TextCompletionRequest,
};
pub use response::{Choice, Response, ResponseData, ResponseExtra, StreamEnvelope};
pub use responses::{
    CodeInterpreterOutput, CodeInterpreterPayload, ComparisonOperator, CompoundOperator,
    ComputerCallPayload, CustomToolCallPayload, FileSearchFilter, FileSearchPayload,
    FunctionCallOutput, FunctionCallOutputPayload, FunctionCallPayload, ImageGenerationPayload,
    ItemReferencePayload, LocalShellCallPayload, McpCallPayload, McpListToolsPayload,
    MessagePayload, Reasoning, ReasoningPayload, ReasoningSummary, RefusalPayload,
    ResponsesContent, ResponsesContentBlock, ResponsesEventType, ResponsesItem,
    ResponsesParameters, ResponsesRequest, ResponsesResponse, ResponsesRole, ResponsesStreamEvent,
    ResponsesTool, ResponsesToolChoice, TextConfig, WebSearchPayload,
};
pub use usage::{
    AudioTokenDetails, AudioUsage, BilledUsage, InputTokensDetails, OutputTokensDetails, Usage,
};
