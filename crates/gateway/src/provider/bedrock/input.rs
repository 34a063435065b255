//! Canonical-to-Bedrock request conversion: the Converse API for chat and
//! the per-model-family Invoke bodies for text completion.

use schema::{
    ChatContent, ChatContentBlock, ChatRequest, ChatRole, Parameters, TextCompletionInput,
    ToolChoice, ToolChoiceMode,
};
use serde::Serialize;
use serde_json::{Map, Value, json};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ConverseRequest {
    pub messages: Vec<ConverseMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<Vec<SystemBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_config: Option<InferenceConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_model_request_fields: Option<Map<String, Value>>,
}

#[derive(Serialize)]
pub(super) struct ConverseMessage {
    pub role: &'static str,
    pub content: Vec<ConverseBlock>,
}

/// Converse content blocks are single-key objects: `{"text": ...}`,
/// `{"toolUse": {...}}`, `{"toolResult": {...}}`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) enum ConverseBlock {
    Text(String),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ToolUseBlock {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: Vec<Value>,
}

#[derive(Serialize)]
pub(super) struct SystemBlock {
    pub text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InferenceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ToolConfig {
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

impl ConverseRequest {
    pub(super) fn from_chat(chat: &ChatRequest) -> Self {
        let params = &chat.params;
        let mut system: Vec<SystemBlock> = Vec::new();
        let mut messages: Vec<ConverseMessage> = Vec::new();

        for message in &chat.input {
            match message.role {
                ChatRole::System | ChatRole::Developer => {
                    if let Some(text) = message.content.as_ref().and_then(ChatContent::joined_text) {
                        system.push(SystemBlock { text });
                    }
                }
                ChatRole::User => {
                    messages.push(ConverseMessage {
                        role: "user",
                        content: text_blocks(message.content.as_ref()),
                    });
                }
                ChatRole::Assistant => {
                    let mut content = text_blocks(message.content.as_ref());

                    for call in message.tool_calls.iter().flatten() {
                        content.push(ConverseBlock::ToolUse(ToolUseBlock {
                            tool_use_id: call.id.clone(),
                            name: call.function.name.clone(),
                            input: serde_json::from_str(&call.function.arguments)
                                .unwrap_or_else(|_| Value::Object(Map::new())),
                        }));
                    }

                    messages.push(ConverseMessage {
                        role: "assistant",
                        content,
                    });
                }
                ChatRole::Tool => {
                    messages.push(ConverseMessage {
                        role: "user",
                        content: vec![ConverseBlock::ToolResult(ToolResultBlock {
                            tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                            content: vec![json!({
                                "text": message
                                    .content
                                    .as_ref()
                                    .and_then(ChatContent::joined_text)
                                    .unwrap_or_default()
                            })],
                        })],
                    });
                }
            }
        }

        let inference_config = if params.max_completion_tokens.is_some()
            || params.temperature.is_some()
            || params.top_p.is_some()
            || params.stop.is_some()
        {
            Some(InferenceConfig {
                max_tokens: params.max_completion_tokens,
                temperature: params.temperature,
                top_p: params.top_p,
                stop_sequences: params.stop.clone(),
            })
        } else {
            None
        };

        Self {
            messages,
            system: if system.is_empty() { None } else { Some(system) },
            inference_config,
            tool_config: tool_config(params),
            additional_model_request_fields: if params.extra_params.is_empty() {
                None
            } else {
                Some(params.extra_params.clone())
            },
        }
    }
}

fn text_blocks(content: Option<&ChatContent>) -> Vec<ConverseBlock> {
    match content {
        None => Vec::new(),
        Some(ChatContent::Text(text)) => vec![ConverseBlock::Text(text.clone())],
        Some(ChatContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|block| match block {
                ChatContentBlock::Text { text } => Some(ConverseBlock::Text(text.clone())),
                _ => None,
            })
            .collect(),
    }
}

fn tool_config(params: &Parameters) -> Option<ToolConfig> {
    let tools = params.tools.as_ref()?;

    let tools = tools
        .iter()
        .map(|tool| {
            json!({
                "toolSpec": {
                    "name": tool.function.name,
                    "description": tool.function.description,
                    "inputSchema": { "json": tool.function.parameters.clone().unwrap_or_else(|| json!({"type": "object"})) },
                }
            })
        })
        .collect();

    let tool_choice = params.tool_choice.as_ref().and_then(|choice| match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => Some(json!({"auto": {}})),
        ToolChoice::Mode(ToolChoiceMode::Required) => Some(json!({"any": {}})),
        ToolChoice::Mode(ToolChoiceMode::None) => None,
        ToolChoice::Specific { function, .. } => Some(json!({"tool": {"name": function.name}})),
    });

    Some(ToolConfig { tools, tool_choice })
}

/// Invoke bodies for text completion, per model family.
pub(super) enum InvokeTextBody {
    Anthropic(Value),
    Mistral(Value),
}

impl InvokeTextBody {
    /// Anthropic and Mistral text models take different body shapes; the
    /// family is sniffed from the model identifier.
    pub(super) fn build(model: &str, input: &TextCompletionInput, params: &Parameters) -> Option<Self> {
        let prompt = match input {
            TextCompletionInput::Single(prompt) => prompt.clone(),
            TextCompletionInput::Batch(prompts) => prompts.join("\n"),
        };

        if model.contains("anthropic.") {
            return Some(Self::Anthropic(json!({
                "prompt": format!("\n\nHuman: {prompt}\n\nAssistant:"),
                "max_tokens_to_sample": params.max_completion_tokens.unwrap_or(2048),
                "temperature": params.temperature,
                "stop_sequences": params.stop,
            })));
        }

        if model.contains("mistral.") {
            return Some(Self::Mistral(json!({
                "prompt": prompt,
                "max_tokens": params.max_completion_tokens,
                "temperature": params.temperature,
                "top_p": params.top_p,
                "stop": params.stop,
            })));
        }

        None
    }

    pub(super) fn body(&self) -> &Value {
        match self {
            Self::Anthropic(body) | Self::Mistral(body) => body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::ChatMessage;

    #[test]
    fn converse_blocks_use_single_key_objects() {
        let chat = ChatRequest {
            input: vec![
                ChatMessage::text(ChatRole::System, "be brief"),
                ChatMessage::text(ChatRole::User, "hi"),
            ],
            params: Parameters::default(),
        };

        let request = ConverseRequest::from_chat(&chat);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["system"][0]["text"], "be brief");
        assert_eq!(value["messages"][0]["content"][0]["text"], "hi");
    }

    #[test]
    fn invoke_body_is_chosen_by_model_family() {
        let params = Parameters::default();
        let input = TextCompletionInput::Single("tell me".into());

        let anthropic = InvokeTextBody::build("anthropic.claude-v2", &input, &params).unwrap();
        assert!(matches!(anthropic, InvokeTextBody::Anthropic(_)));
        assert!(
            anthropic.body()["prompt"]
                .as_str()
                .unwrap()
                .contains("Human: tell me")
        );

        let mistral = InvokeTextBody::build("mistral.mistral-7b", &input, &params).unwrap();
        assert!(matches!(mistral, InvokeTextBody::Mistral(_)));

        assert!(InvokeTextBody::build("amazon.titan", &input, &params).is_none());
    }
}
