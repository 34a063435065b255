//! Chat Completions message shapes.
//!
//! The classic role + content + tool_calls model. Content is either a bare
//! string or an ordered list of typed blocks; both forms appear on the wire
//! and the untagged union preserves whichever the caller sent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,

    /// String content or an ordered list of content blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatContent>,

    /// Refusal text on assistant messages that declined to answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,

    /// Tool calls issued by an assistant message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,

    /// On `tool` messages, the ID of the tool call being answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Plain-text message with no tool traffic.
    pub fn text(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(ChatContent::Text(content.into())),
            refusal: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// Message content union.
///
/// Unmarshal order: blocks (array) are tried before the bare string so that
/// `["..."]` is never silently coerced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Blocks(Vec<ChatContentBlock>),
    Text(String),
}

impl ChatContent {
    /// Concatenated text of all text blocks, or the bare string.
    pub fn joined_text(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::Blocks(blocks) => {
                let parts: Vec<&str> = blocks
                    .iter()
                    .filter_map(|block| match block {
                        ChatContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();

                if parts.is_empty() { None } else { Some(parts.concat()) }
            }
        }
    }
}

/// A typed content block within a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContentBlock {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    File { file: InputFile },
    InputAudio { input_audio: InputAudio },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Base64 data URL when the file travels inline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudio {
    /// Base64-encoded audio payload.
    pub data: String,
    pub format: String,
}

/// A completed tool call on an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a raw JSON string, exactly as the provider produced them.
    pub arguments: String,
}

/// Incremental tool-call fragment on a streaming delta.
///
/// The first fragment of a call carries `id` and the function name; later
/// fragments append to `arguments`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatToolCallDelta {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    pub function: FunctionCallDelta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Incremental assistant output on a streaming chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Reasoning text interleaved by providers that surface it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCallDelta>>,
}

impl ChatDelta {
    /// Whether this delta carries forwardable output.
    ///
    /// Pure role/finish/usage chunks are absorbed by the streaming engine
    /// rather than delivered.
    pub fn has_output(&self) -> bool {
        self.content.is_some()
            || self.thought.is_some()
            || self.refusal.is_some()
            || self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// Tool-choice union: a mode keyword or a specific function.
///
/// Unmarshal order: the object form is tried before the keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Specific {
        #[serde(rename = "type")]
        choice_type: String,
        function: ToolChoiceFunction,
    },
    Mode(ToolChoiceMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    None,
    Auto,
    Required,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChoiceFunction {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_union_prefers_blocks_over_text() {
        let blocks: ChatContent = serde_json::from_str(r#"[{"type":"text","text":"hi"}]"#).unwrap();
        assert!(matches!(blocks, ChatContent::Blocks(ref b) if b.len() == 1));

        let text: ChatContent = serde_json::from_str(r#""hi""#).unwrap();
        assert_eq!(text, ChatContent::Text("hi".to_string()));
    }

    #[test]
    fn content_union_round_trips() {
        let original = ChatContent::Blocks(vec![
            ChatContentBlock::Text { text: "look at".into() },
            ChatContentBlock::ImageUrl {
                image_url: ImageUrl {
                    url: "https://example.com/cat.png".into(),
                    detail: None,
                },
            },
        ]);

        let bytes = serde_json::to_string(&original).unwrap();
        let back: ChatContent = serde_json::from_str(&bytes).unwrap();
        assert_eq!(original, back);
    }

    #[test]
    fn tool_choice_union_round_trips_both_variants() {
        let mode = ToolChoice::Mode(ToolChoiceMode::Auto);
        let json = serde_json::to_string(&mode).unwrap();
        assert_eq!(json, r#""auto""#);
        assert_eq!(serde_json::from_str::<ToolChoice>(&json).unwrap(), mode);

        let specific = ToolChoice::Specific {
            choice_type: "function".into(),
            function: ToolChoiceFunction { name: "lookup".into() },
        };
        let json = serde_json::to_string(&specific).unwrap();
        assert_eq!(serde_json::from_str::<ToolChoice>(&json).unwrap(), specific);
    }

    #[test]
    fn delta_with_only_role_has_no_output() {
        let delta = ChatDelta {
            role: Some(ChatRole::Assistant),
            ..Default::default()
        };
        assert!(!delta.has_output());

        let delta = ChatDelta {
            content: Some("hi".into()),
            ..Default::default()
        };
        assert!(delta.has_output());
    }
}
