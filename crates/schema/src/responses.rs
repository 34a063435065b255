//! Responses-API shapes.
//!
//! In this model an assistant turn is a flat list of typed items: a tool call
//! is a `function_call` item, its result a `function_call_output` item, and
//! plain text lives in `message` items. Items are discriminated by a `type`
//! field merged flat with the variant's own fields; an absent tag means
//! `message`. serde's internally-tagged derive cannot default a missing tag,
//! so the item codec is written by hand: the tag is read first, then the
//! matching payload is decoded from the same object.

use serde::de::Error as DeError;
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::chat::InputAudio;
use crate::usage::Usage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsesRole {
    System,
    Developer,
    User,
    Assistant,
}

/// A typed item in a Responses conversation or output list.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsesItem {
    Message(MessagePayload),
    FunctionCall(FunctionCallPayload),
    FunctionCallOutput(FunctionCallOutputPayload),
    FileSearchCall(FileSearchPayload),
    ComputerCall(ComputerCallPayload),
    ComputerCallOutput(ComputerCallPayload),
    WebSearchCall(WebSearchPayload),
    CodeInterpreterCall(CodeInterpreterPayload),
    LocalShellCall(LocalShellCallPayload),
    LocalShellCallOutput(LocalShellCallPayload),
    McpListTools(McpListToolsPayload),
    McpApprovalRequest(McpCallPayload),
    McpApprovalResponse(McpCallPayload),
    McpCall(McpCallPayload),
    CustomToolCall(CustomToolCallPayload),
    CustomToolCallOutput(CustomToolCallPayload),
    ImageGenerationCall(ImageGenerationPayload),
    Reasoning(ReasoningPayload),
    Refusal(RefusalPayload),
    ItemReference(ItemReferencePayload),
    /// An item type this gateway does not know yet; preserved verbatim so it
    /// survives a round trip.
    Unknown(Value),
}

impl ResponsesItem {
    pub fn item_type(&self) -> &str {
        match self {
            Self::Message(_) => "message",
            Self::FunctionCall(_) => "function_call",
            Self::FunctionCallOutput(_) => "function_call_output",
            Self::FileSearchCall(_) => "file_search_call",
            Self::ComputerCall(_) => "computer_call",
            Self::ComputerCallOutput(_) => "computer_call_output",
            Self::WebSearchCall(_) => "web_search_call",
            Self::CodeInterpreterCall(_) => "code_interpreter_call",
            Self::LocalShellCall(_) => "local_shell_call",
            Self::LocalShellCallOutput(_) => "local_shell_call_output",
            Self::McpListTools(_) => "mcp_list_tools",
            Self::McpApprovalRequest(_) => "mcp_approval_request",
            Self::McpApprovalResponse(_) => "mcp_approval_response",
            Self::McpCall(_) => "mcp_call",
            Self::CustomToolCall(_) => "custom_tool_call",
            Self::CustomToolCallOutput(_) => "custom_tool_call_output",
            Self::ImageGenerationCall(_) => "image_generation_call",
            Self::Reasoning(_) => "reasoning",
            Self::Refusal(_) => "refusal",
            Self::ItemReference(_) => "item_reference",
            Self::Unknown(value) => value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        }
    }
}

impl Serialize for ResponsesItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        fn tagged<T: Serialize, E: SerError>(tag: &str, payload: &T) -> Result<Value, E> {
            let mut value = serde_json::to_value(payload).map_err(E::custom)?;
            let Some(map) = value.as_object_mut() else {
                return Err(E::custom("responses item payload must serialize to an object"));
            };
            map.insert("type".to_string(), Value::String(tag.to_string()));
            Ok(value)
        }

        let value = match self {
            Self::Message(p) => tagged("message", p)?,
            Self::FunctionCall(p) => tagged("function_call", p)?,
            Self::FunctionCallOutput(p) => tagged("function_call_output", p)?,
            Self::FileSearchCall(p) => tagged("file_search_call", p)?,
            Self::ComputerCall(p) => tagged("computer_call", p)?,
            Self::ComputerCallOutput(p) => tagged("computer_call_output", p)?,
            Self::WebSearchCall(p) => tagged("web_search_call", p)?,
            Self::CodeInterpreterCall(p) => tagged("code_interpreter_call", p)?,
            Self::LocalShellCall(p) => tagged("local_shell_call", p)?,
            Self::LocalShellCallOutput(p) => tagged("local_shell_call_output", p)?,
            Self::McpListTools(p) => tagged("mcp_list_tools", p)?,
            Self::McpApprovalRequest(p) => tagged("mcp_approval_request", p)?,
            Self::McpApprovalResponse(p) => tagged("mcp_approval_response", p)?,
            Self::McpCall(p) => tagged("mcp_call", p)?,
            Self::CustomToolCall(p) => tagged("custom_tool_call", p)?,
            Self::CustomToolCallOutput(p) => tagged("custom_tool_call_output", p)?,
            Self::ImageGenerationCall(p) => tagged("image_generation_call", p)?,
            Self::Reasoning(p) => tagged("reasoning", p)?,
            Self::Refusal(p) => tagged("refusal", p)?,
            Self::ItemReference(p) => tagged("item_reference", p)?,
            Self::Unknown(value) => value.clone(),
        };

        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ResponsesItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;

        let Some(map) = value.as_object() else {
            return Err(D::Error::custom("responses item must be a JSON object"));
        };

        // An absent tag means a plain message item.
        let tag = map
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("message")
            .to_string();

        fn payload<T, E>(value: Value) -> Result<T, E>
        where
            T: serde::de::DeserializeOwned,
            E: DeError,
        {
            serde_json::from_value(value).map_err(E::custom)
        }

        let item = match tag.as_str() {
            "message" => Self::Message(payload(value)?),
            "function_call" => Self::FunctionCall(payload(value)?),
            "function_call_output" => Self::FunctionCallOutput(payload(value)?),
            "file_search_call" => Self::FileSearchCall(payload(value)?),
            "computer_call" => Self::ComputerCall(payload(value)?),
            "computer_call_output" => Self::ComputerCallOutput(payload(value)?),
            "web_search_call" => Self::WebSearchCall(payload(value)?),
            "code_interpreter_call" => Self::CodeInterpreterCall(payload(value)?),
            "local_shell_call" => Self::LocalShellCall(payload(value)?),
            "local_shell_call_output" => Self::LocalShellCallOutput(payload(value)?),
            "mcp_list_tools" => Self::McpListTools(payload(value)?),
            "mcp_approval_request" => Self::McpApprovalRequest(payload(value)?),
            "mcp_approval_response" => Self::McpApprovalResponse(payload(value)?),
            "mcp_call" => Self::McpCall(payload(value)?),
            "custom_tool_call" => Self::CustomToolCall(payload(value)?),
            "custom_tool_call_output" => Self::CustomToolCallOutput(payload(value)?),
            "image_generation_call" => Self::ImageGenerationCall(payload(value)?),
            "reasoning" => Self::Reasoning(payload(value)?),
            "refusal" => Self::Refusal(payload(value)?),
            "item_reference" => Self::ItemReference(payload(value)?),
            _ => Self::Unknown(value),
        };

        Ok(item)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ResponsesRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ResponsesContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Correlates the call with its `function_call_output` item.
    pub call_id: String,
    pub name: String,
    /// Arguments as a raw JSON string.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallOutputPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub call_id: String,
    pub output: FunctionCallOutput,
}

/// Tool output: a bare string or a content-block list, never a wrapper
/// object. Unmarshal order: blocks before the string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionCallOutput {
    Blocks(Vec<ResponsesContentBlock>),
    Text(String),
}

impl FunctionCallOutput {
    pub fn joined_text(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::Blocks(blocks) => {
                let parts: Vec<&str> = blocks
                    .iter()
                    .filter_map(|block| match block {
                        ResponsesContentBlock::OutputText { text, .. } => Some(text.as_str()),
                        ResponsesContentBlock::InputText { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();

                if parts.is_empty() { None } else { Some(parts.concat()) }
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSearchPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
}

/// Shared by `computer_call` and `computer_call_output`: a call carries an
/// action, an output carries a screenshot payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputerCallPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_safety_checks: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_safety_checks: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSearchPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeInterpreterPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<CodeInterpreterOutput>>,
}

/// Code-interpreter output union, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CodeInterpreterOutput {
    Logs { logs: String },
    Image { url: String },
}

/// Shared by `local_shell_call` and `local_shell_call_output`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalShellCallPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpListToolsPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared by the MCP call, approval-request, and approval-response items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpCallPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approve: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared by `custom_tool_call` and `custom_tool_call_output`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomToolCallPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Base64-encoded image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summary: Vec<ReasoningSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReasoningSummary {
    SummaryText { text: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefusalPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub refusal: String,
}

/// Reference to an item created in a previous response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemReferencePayload {
    pub id: String,
}

/// Message content: a bare string or a block list. Unmarshal order: blocks
/// before the string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesContent {
    Blocks(Vec<ResponsesContentBlock>),
    Text(String),
}

impl ResponsesContent {
    pub fn joined_text(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::Blocks(blocks) => {
                let parts: Vec<&str> = blocks
                    .iter()
                    .filter_map(|block| match block {
                        ResponsesContentBlock::InputText { text }
                        | ResponsesContentBlock::OutputText { text, .. } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();

                if parts.is_empty() { None } else { Some(parts.concat()) }
            }
        }
    }
}

/// Content blocks distinguish the input variants callers send from the
/// output variants models produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesContentBlock {
    InputText {
        text: String,
    },
    InputImage {
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    InputFile {
        #[serde(skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_data: Option<String>,
    },
    InputAudio {
        input_audio: InputAudio,
    },
    OutputText {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        annotations: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        logprobs: Option<Value>,
    },
    Refusal {
        refusal: String,
    },
}

/// Metadata filter for file-search tools.
///
/// Comparison operators carry a key and a value; compound operators carry a
/// non-empty list of sub-filters. The codec rejects anything else.
#[derive(Debug, Clone, PartialEq)]
pub enum FileSearchFilter {
    Comparison {
        op: ComparisonOperator,
        key: String,
        value: Value,
    },
    Compound {
        op: CompoundOperator,
        filters: Vec<FileSearchFilter>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
        }
    }

    fn from_str(tag: &str) -> Option<Self> {
        Some(match tag {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOperator {
    And,
    Or,
}

impl CompoundOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

impl Serialize for FileSearchFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = Map::new();

        match self {
            Self::Comparison { op, key, value } => {
                map.insert("type".into(), Value::String(op.as_str().into()));
                map.insert("key".into(), Value::String(key.clone()));
                map.insert("value".into(), value.clone());
            }
            Self::Compound { op, filters } => {
                if filters.is_empty() {
                    return Err(S::Error::custom(format!(
                        "`{}` filter requires a non-empty filters list",
                        op.as_str()
                    )));
                }
                map.insert("type".into(), Value::String(op.as_str().into()));
                let filters = filters
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(S::Error::custom)?;
                map.insert("filters".into(), Value::Array(filters));
            }
        }

        Value::Object(map).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FileSearchFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct RawFilter {
            #[serde(rename = "type")]
            kind: String,
            key: Option<String>,
            value: Option<Value>,
            filters: Option<Vec<FileSearchFilter>>,
        }

        let raw = RawFilter::deserialize(deserializer)?;

        if let Some(op) = ComparisonOperator::from_str(&raw.kind) {
            let key = raw
                .key
                .ok_or_else(|| D::Error::custom(format!("`{}` filter requires `key`", raw.kind)))?;
            let value = raw
                .value
                .ok_or_else(|| D::Error::custom(format!("`{}` filter requires `value`", raw.kind)))?;

            return Ok(Self::Comparison { op, key, value });
        }

        let op = match raw.kind.as_str() {
            "and" => CompoundOperator::And,
            "or" => CompoundOperator::Or,
            other => {
                return Err(D::Error::custom(format!("unknown filter type `{other}`")));
            }
        };

        let filters = raw.filters.unwrap_or_default();
        if filters.is_empty() {
            return Err(D::Error::custom(format!(
                "`{}` filter requires a non-empty filters list",
                raw.kind
            )));
        }

        Ok(Self::Compound { op, filters })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub input: Vec<ResponsesItem>,
    #[serde(flatten)]
    pub params: ResponsesParameters,
}

/// Responses-API request knobs. The bridge maps these to and from the chat
/// [`Parameters`](crate::Parameters) surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponsesTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ResponsesToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra_params: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reasoning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
}

/// Responses tools are flat: the function fields sit next to `type` instead
/// of nesting under a `function` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsesTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// Unmarshal order: the named-tool object before the mode keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesToolChoice {
    Named {
        #[serde(rename = "type")]
        choice_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Mode(String),
}

/// An embedded Responses-API response block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsesResponse {
    pub id: String,
    /// Always `response`.
    pub object: String,
    #[serde(default)]
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<ResponsesItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incomplete_details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Responses streaming event types, with unknown types preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsesEventType {
    #[serde(rename = "response.created")]
    Created,
    #[serde(rename = "response.in_progress")]
    InProgress,
    #[serde(rename = "response.completed")]
    Completed,
    #[serde(rename = "response.incomplete")]
    Incomplete,
    #[serde(rename = "response.failed")]
    Failed,
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded,
    #[serde(rename = "response.output_item.done")]
    OutputItemDone,
    #[serde(rename = "response.content_part.added")]
    ContentPartAdded,
    #[serde(rename = "response.content_part.done")]
    ContentPartDone,
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta,
    #[serde(rename = "response.output_text.done")]
    OutputTextDone,
    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryTextDelta,
    #[serde(rename = "response.refusal.delta")]
    RefusalDelta,
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta,
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone,
    #[serde(rename = "error")]
    Error,
    #[serde(untagged)]
    Other(String),
}

/// One Responses-API streaming event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsesStreamEvent {
    #[serde(rename = "type")]
    pub event_type: ResponsesEventType,
    #[serde(default)]
    pub sequence_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<ResponsesItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponsesResponse>,
}

impl Default for ResponsesEventType {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_tag_defaults_to_message() {
        let item: ResponsesItem =
            serde_json::from_value(json!({"role": "user", "content": "hi"})).unwrap();

        let ResponsesItem::Message(message) = item else {
            panic!("expected message item");
        };
        assert_eq!(message.role, Some(ResponsesRole::User));
        assert_eq!(message.content, Some(ResponsesContent::Text("hi".into())));
    }

    #[test]
    fn function_call_marshals_flat() {
        let item = ResponsesItem::FunctionCall(FunctionCallPayload {
            id: Some("fc_1".into()),
            status: Some("completed".into()),
            call_id: "call_1".into(),
            name: "lookup".into(),
            arguments: r#"{"q":1}"#.into(),
        });

        // The tag and the base fields sit flat next to the payload's own.
        let value = serde_json::to_value(&item).unwrap();
        insta::assert_json_snapshot!(value, @r###"
        {
          "arguments": "{\"q\":1}",
          "call_id": "call_1",
          "id": "fc_1",
          "name": "lookup",
          "status": "completed",
          "type": "function_call"
        }
        "###);

        let back: ResponsesItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn function_call_output_serializes_output_directly() {
        let item = ResponsesItem::FunctionCallOutput(FunctionCallOutputPayload {
            id: None,
            status: None,
            call_id: "call_1".into(),
            output: FunctionCallOutput::Text("42".into()),
        });

        let value = serde_json::to_value(&item).unwrap();
        insta::assert_json_snapshot!(value, @r###"
        {
          "call_id": "call_1",
          "output": "42",
          "type": "function_call_output"
        }
        "###);

        let blocks = ResponsesItem::FunctionCallOutput(FunctionCallOutputPayload {
            id: None,
            status: None,
            call_id: "call_2".into(),
            output: FunctionCallOutput::Blocks(vec![ResponsesContentBlock::OutputText {
                text: "42".into(),
                annotations: None,
                logprobs: None,
            }]),
        });

        let value = serde_json::to_value(&blocks).unwrap();
        insta::assert_json_snapshot!(value, @r###"
        {
          "call_id": "call_2",
          "output": [
            {
              "text": "42",
              "type": "output_text"
            }
          ],
          "type": "function_call_output"
        }
        "###);

        let back: ResponsesItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, blocks);
    }

    #[test]
    fn unknown_item_types_survive_round_trips() {
        let raw = json!({"type": "future_item", "payload": {"x": 1}});
        let item: ResponsesItem = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(item.item_type(), "future_item");
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }

    #[test]
    fn comparison_filter_requires_key_and_value() {
        let valid: FileSearchFilter =
            serde_json::from_value(json!({"type": "eq", "key": "lang", "value": "en"})).unwrap();
        assert!(matches!(
            valid,
            FileSearchFilter::Comparison { op: ComparisonOperator::Eq, .. }
        ));

        let missing = serde_json::from_value::<FileSearchFilter>(json!({"type": "gt", "key": "n"}));
        assert!(missing.is_err());
    }

    #[test]
    fn compound_filter_requires_sub_filters() {
        let valid: FileSearchFilter = serde_json::from_value(json!({
            "type": "and",
            "filters": [{"type": "eq", "key": "lang", "value": "en"}]
        }))
        .unwrap();
        assert!(matches!(valid, FileSearchFilter::Compound { op: CompoundOperator::And, .. }));

        let empty = serde_json::from_value::<FileSearchFilter>(json!({"type": "or", "filters": []}));
        assert!(empty.is_err());

        let round = serde_json::to_value(&valid).unwrap();
        assert_eq!(round["type"], "and");
        assert_eq!(round["filters"][0]["key"], "lang");
    }

    #[test]
    fn stream_event_type_preserves_unknown_names() {
        let event: ResponsesEventType = serde_json::from_value(json!("response.audio.delta")).unwrap();
        assert_eq!(event, ResponsesEventType::Other("response.audio.delta".into()));

        let known: ResponsesEventType = serde_json::from_value(json!("response.completed")).unwrap();
        assert_eq!(known, ResponsesEventType::Completed);
    }
}
