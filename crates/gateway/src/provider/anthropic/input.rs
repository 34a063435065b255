//! Canonical-to-Anthropic request conversion.

use schema::{
    ChatContent, ChatContentBlock, ChatRequest, ChatRole, ChatTool, GatewayError, Parameters,
    ToolChoice, ToolChoiceMode,
};
use serde::Serialize;
use serde_json::{Map, Value};

/// The messages API requires an explicit output budget.
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Serialize)]
pub(crate) struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<AnthropicToolChoice>,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

#[derive(Serialize)]
pub(crate) struct AnthropicMessage {
    pub role: &'static str,
    pub content: Vec<AnthropicContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicContentBlock {
    Text {
        text: String,
    },
    Image {
        source: AnthropicImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Serialize)]
pub(crate) struct AnthropicImageSource {
    #[serde(rename = "type")]
    pub source_type: &'static str,
    pub url: String,
}

#[derive(Serialize)]
pub(crate) struct AnthropicTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Serialize)]
pub(crate) struct AnthropicToolChoice {
    #[serde(rename = "type")]
    pub choice_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AnthropicRequest {
    /// System and developer messages lift into the dedicated `system` field;
    /// tool messages fold into user-role `tool_result` blocks; assistant tool
    /// calls become `tool_use` blocks with their arguments parsed back into
    /// JSON.
    pub(crate) fn from_chat(
        model: &str,
        chat: &ChatRequest,
        stream: bool,
    ) -> Result<Self, GatewayError> {
        let params = &chat.params;
        let mut system_parts: Vec<String> = Vec::new();
        let mut messages: Vec<AnthropicMessage> = Vec::new();

        for message in &chat.input {
            match message.role {
                ChatRole::System | ChatRole::Developer => {
                    if let Some(text) = message.content.as_ref().and_then(ChatContent::joined_text) {
                        system_parts.push(text);
                    }
                }
                ChatRole::User => {
                    messages.push(AnthropicMessage {
                        role: "user",
                        content: content_blocks(message.content.as_ref()),
                    });
                }
                ChatRole::Assistant => {
                    let mut content = content_blocks(message.content.as_ref());

                    for call in message.tool_calls.iter().flatten() {
                        let input = serde_json::from_str(&call.function.arguments)
                            .unwrap_or_else(|_| Value::Object(Map::new()));
                        content.push(AnthropicContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.function.name.clone(),
                            input,
                        });
                    }

                    messages.push(AnthropicMessage {
                        role: "assistant",
                        content,
                    });
                }
                ChatRole::Tool => {
                    messages.push(AnthropicMessage {
                        role: "user",
                        content: vec![AnthropicContentBlock::ToolResult {
                            tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                            content: message
                                .content
                                .as_ref()
                                .and_then(ChatContent::joined_text)
                                .unwrap_or_default(),
                        }],
                    });
                }
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n"))
        };

        Ok(Self {
            model: model.to_string(),
            messages,
            max_tokens: params.max_completion_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            stop_sequences: params.stop.clone(),
            stream: stream.then_some(true),
            tools: convert_tools(params),
            tool_choice: convert_tool_choice(params),
            extra: params.extra_params.clone(),
        })
    }
}

fn content_blocks(content: Option<&ChatContent>) -> Vec<AnthropicContentBlock> {
    match content {
        None => Vec::new(),
        Some(ChatContent::Text(text)) => vec![AnthropicContentBlock::Text { text: text.clone() }],
        Some(ChatContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|block| match block {
                ChatContentBlock::Text { text } => {
                    Some(AnthropicContentBlock::Text { text: text.clone() })
                }
                ChatContentBlock::ImageUrl { image_url } => Some(AnthropicContentBlock::Image {
                    source: AnthropicImageSource {
                        source_type: "url",
                        url: image_url.url.clone(),
                    },
                }),
                // File and audio blocks have no messages-API counterpart.
                _ => None,
            })
            .collect(),
    }
}

fn convert_tools(params: &Parameters) -> Option<Vec<AnthropicTool>> {
    let tools = params.tools.as_ref()?;

    Some(
        tools
            .iter()
            .map(|tool: &ChatTool| AnthropicTool {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                input_schema: tool
                    .function
                    .parameters
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({"type": "object"})),
            })
            .collect(),
    )
}

fn convert_tool_choice(params: &Parameters) -> Option<AnthropicToolChoice> {
    match params.tool_choice.as_ref()? {
        ToolChoice::Mode(ToolChoiceMode::Auto) => Some(AnthropicToolChoice {
            choice_type: "auto",
            name: None,
        }),
        ToolChoice::Mode(ToolChoiceMode::Required) => Some(AnthropicToolChoice {
            choice_type: "any",
            name: None,
        }),
        ToolChoice::Mode(ToolChoiceMode::None) => None,
        ToolChoice::Specific { function, .. } => Some(AnthropicToolChoice {
            choice_type: "tool",
            name: Some(function.name.clone()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::ChatMessage;

    #[test]
    fn system_messages_lift_into_the_system_field() {
        let chat = ChatRequest {
            input: vec![
                ChatMessage::text(ChatRole::System, "be brief"),
                ChatMessage::text(ChatRole::User, "hi"),
            ],
            params: Parameters::default(),
        };

        let request = AnthropicRequest::from_chat("claude-sonnet-4-20250514", &chat, false).unwrap();
        assert_eq!(request.system.as_deref(), Some("be brief"));
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn tool_messages_become_tool_result_blocks() {
        let chat = ChatRequest {
            input: vec![ChatMessage {
                role: ChatRole::Tool,
                content: Some(ChatContent::Text("42".into())),
                refusal: None,
                tool_calls: None,
                tool_call_id: Some("toolu_1".into()),
            }],
            params: Parameters::default(),
        };

        let request = AnthropicRequest::from_chat("claude-sonnet-4-20250514", &chat, false).unwrap();
        let value = serde_json::to_value(&request.messages).unwrap();
        assert_eq!(value[0]["role"], "user");
        assert_eq!(value[0]["content"][0]["type"], "tool_result");
        assert_eq!(value[0]["content"][0]["tool_use_id"], "toolu_1");
    }
}
