//! Bedrock response parsing and the Converse-stream state machine.

use schema::{
    ChatContent, ChatDelta, ChatMessage, ChatRole, ChatToolCall, ChatToolCallDelta, Choice,
    FunctionCall, FunctionCallDelta, Response, ResponseData, Usage,
};
use serde::Deserialize;
use serde_json::Value;

pub(super) fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        "tool_use" => "tool_calls".to_string(),
        "content_filtered" | "guardrail_intervened" => "content_filter".to_string(),
        other => other.to_string(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ConverseResponse {
    pub output: ConverseOutput,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<ConverseUsage>,
}

#[derive(Deserialize)]
pub(super) struct ConverseOutput {
    pub message: ConverseOutputMessage,
}

#[derive(Deserialize)]
pub(super) struct ConverseOutputMessage {
    #[serde(default)]
    pub content: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ConverseUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl ConverseUsage {
    pub(super) fn to_usage(self) -> Usage {
        Usage::new(
            self.input_tokens,
            self.output_tokens,
            self.total_tokens.max(self.input_tokens + self.output_tokens),
        )
    }
}

impl ConverseResponse {
    pub(super) fn into_response(self, model: &str) -> Response {
        let mut text = String::new();
        let mut tool_calls: Vec<ChatToolCall> = Vec::new();

        for block in &self.output.message.content {
            if let Some(fragment) = block.get("text").and_then(Value::as_str) {
                text.push_str(fragment);
            } else if let Some(tool_use) = block.get("toolUse") {
                tool_calls.push(ChatToolCall {
                    id: tool_use
                        .get("toolUseId")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("tooluse_{}", uuid::Uuid::new_v4())),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: tool_use
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        arguments: tool_use
                            .get("input")
                            .map(Value::to_string)
                            .unwrap_or_else(|| "{}".to_string()),
                    },
                });
            }
        }

        Response {
            object: "chat.completion".to_string(),
            model: model.to_string(),
            usage: self.usage.map(ConverseUsage::to_usage),
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
                    finish_reason: self.stop_reason.as_deref().map(map_stop_reason),
                    ..Default::default()
                }],
            },
            ..Default::default()
        }
    }
}

/// Invoke text-completion response shapes, per model family.
#[derive(Deserialize)]
pub(super) struct AnthropicTextResponse {
    #[serde(default)]
    pub completion: String,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct MistralTextResponse {
    #[serde(default)]
    pub outputs: Vec<MistralTextOutput>,
}

#[derive(Deserialize)]
pub(super) struct MistralTextOutput {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

pub(super) fn text_response(model: &str, text: String, stop_reason: Option<String>) -> Response {
    let mut response = Response {
        model: model.to_string(),
        data: ResponseData::Chat {
            choices: vec![Choice {
                index: 0,
                message: Some(ChatMessage::text(ChatRole::Assistant, text)),
                finish_reason: stop_reason.as_deref().map(map_stop_reason),
                ..Default::default()
            }],
        },
        ..Default::default()
    };
    response.to_text_completion();
    response
}

/// Converse-stream event payloads, dispatched on the frame's `:event-type`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ContentBlockStartEvent {
    #[serde(default)]
    pub content_block_index: u32,
    #[serde(default)]
    pub start: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ContentBlockDeltaEvent {
    #[serde(default)]
    pub content_block_index: u32,
    pub delta: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MessageStopEvent {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct MetadataEvent {
    #[serde(default)]
    pub usage: Option<ConverseUsage>,
}

pub(super) enum StreamStep {
    Continue,
    Chunk(Response),
}

/// Accumulates Converse-stream events into canonical chat delta chunks. The
/// terminal chunk is assembled at EOF because `metadata` (usage) arrives
/// after `messageStop`.
pub(super) struct BedrockStreamState {
    model: String,
    finish_reason: Option<String>,
    usage: Option<ConverseUsage>,
    tool_indices: std::collections::HashMap<u32, u32>,
    next_tool_slot: u32,
}

impl BedrockStreamState {
    pub(super) fn new(model: String) -> Self {
        Self {
            model,
            finish_reason: None,
            usage: None,
            tool_indices: std::collections::HashMap::new(),
            next_tool_slot: 0,
        }
    }

    fn chunk(&self, delta: ChatDelta) -> Response {
        Response {
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

    pub(super) fn step(&mut self, event_type: &str, payload: &[u8]) -> Result<StreamStep, sonic_rs::Error> {
        match event_type {
            "messageStart" => Ok(StreamStep::Chunk(self.chunk(ChatDelta {
                role: Some(ChatRole::Assistant),
                ..Default::default()
            }))),
            "contentBlockStart" => {
                let event: ContentBlockStartEvent = sonic_rs::from_slice(payload)?;

                let Some(tool_use) = event.start.as_ref().and_then(|start| start.get("toolUse"))
                else {
                    return Ok(StreamStep::Continue);
                };

                let slot = self.next_tool_slot;
                self.next_tool_slot += 1;
                self.tool_indices.insert(event.content_block_index, slot);

                Ok(StreamStep::Chunk(self.chunk(ChatDelta {
                    tool_calls: Some(vec![ChatToolCallDelta {
                        index: slot,
                        id: tool_use
                            .get("toolUseId")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        call_type: Some("function".to_string()),
                        function: FunctionCallDelta {
                            name: tool_use
                                .get("name")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            arguments: Some(String::new()),
                        },
                    }]),
                    ..Default::default()
                })))
            }
            "contentBlockDelta" => {
                let event: ContentBlockDeltaEvent = sonic_rs::from_slice(payload)?;

                if let Some(text) = event.delta.get("text").and_then(Value::as_str) {
                    return Ok(StreamStep::Chunk(self.chunk(ChatDelta {
                        content: Some(text.to_string()),
                        ..Default::default()
                    })));
                }

                if let Some(reasoning) = event
                    .delta
                    .get("reasoningContent")
                    .and_then(|r| r.get("text"))
                    .and_then(Value::as_str)
                {
                    return Ok(StreamStep::Chunk(self.chunk(ChatDelta {
                        thought: Some(reasoning.to_string()),
                        ..Default::default()
                    })));
                }

                if let Some(input) = event
                    .delta
                    .get("toolUse")
                    .and_then(|t| t.get("input"))
                    .and_then(Value::as_str)
                {
                    let Some(slot) = self.tool_indices.get(&event.content_block_index).copied()
                    else {
                        return Ok(StreamStep::Continue);
                    };

                    return Ok(StreamStep::Chunk(self.chunk(ChatDelta {
                        tool_calls: Some(vec![ChatToolCallDelta {
                            index: slot,
                            id: None,
                            call_type: None,
                            function: FunctionCallDelta {
                                name: None,
                                arguments: Some(input.to_string()),
                            },
                        }]),
                        ..Default::default()
                    })));
                }

                Ok(StreamStep::Continue)
            }
            "messageStop" => {
                let event: MessageStopEvent = sonic_rs::from_slice(payload)?;
                if let Some(reason) = event.stop_reason {
                    self.finish_reason = Some(map_stop_reason(&reason));
                }
                Ok(StreamStep::Continue)
            }
            "metadata" => {
                let event: MetadataEvent = sonic_rs::from_slice(payload)?;
                if event.usage.is_some() {
                    self.usage = event.usage;
                }
                Ok(StreamStep::Continue)
            }
            other => {
                log::debug!("ignoring bedrock stream event `{other}`");
                Ok(StreamStep::Continue)
            }
        }
    }

    /// The synthetic terminal chunk, emitted at EOF.
    pub(super) fn terminal(&self) -> Response {
        let mut terminal = self.chunk(ChatDelta::default());
        terminal.usage = self.usage.map(ConverseUsage::to_usage);
        if let Some(choices) = terminal.data.choices_mut() {
            choices[0].finish_reason = self.finish_reason.clone();
        }
        terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reasons_map_like_the_other_anthropic_surfaces() {
        assert_eq!(map_stop_reason("end_turn"), "stop");
        assert_eq!(map_stop_reason("max_tokens"), "length");
        assert_eq!(map_stop_reason("tool_use"), "tool_calls");
        assert_eq!(map_stop_reason("content_filtered"), "content_filter");
    }

    #[test]
    fn content_deltas_become_chat_chunks_and_terminal_carries_usage() {
        let mut state = BedrockStreamState::new("claude".into());

        let step = state.step("messageStart", br#"{"role":"assistant"}"#).unwrap();
        assert!(matches!(step, StreamStep::Chunk(_)));

        let StreamStep::Chunk(chunk) = state
            .step(
                "contentBlockDelta",
                br#"{"contentBlockIndex":0,"delta":{"text":"Hello"}}"#,
            )
            .unwrap()
        else {
            panic!("expected a chunk");
        };
        let delta = chunk.data.choices().unwrap()[0].delta.as_ref().unwrap();
        assert_eq!(delta.content.as_deref(), Some("Hello"));

        let step = state
            .step("messageStop", br#"{"stopReason":"end_turn"}"#)
            .unwrap();
        assert!(matches!(step, StreamStep::Continue));

        let step = state
            .step(
                "metadata",
                br#"{"usage":{"inputTokens":5,"outputTokens":7,"totalTokens":12}}"#,
            )
            .unwrap();
        assert!(matches!(step, StreamStep::Continue));

        let terminal = state.terminal();
        assert_eq!(terminal.usage.as_ref().unwrap().total_tokens, 12);
        assert_eq!(
            terminal.data.choices().unwrap()[0].finish_reason.as_deref(),
            Some("stop")
        );
    }

    #[test]
    fn tool_use_streams_accumulate_by_block_index() {
        let mut state = BedrockStreamState::new("claude".into());

        let StreamStep::Chunk(start) = state
            .step(
                "contentBlockStart",
                br#"{"contentBlockIndex":1,"start":{"toolUse":{"toolUseId":"t1","name":"f"}}}"#,
            )
            .unwrap()
        else {
            panic!("expected a chunk");
        };
        let delta = start.data.choices().unwrap()[0].delta.as_ref().unwrap();
        assert_eq!(delta.tool_calls.as_ref().unwrap()[0].id.as_deref(), Some("t1"));

        let StreamStep::Chunk(args) = state
            .step(
                "contentBlockDelta",
                br#"{"contentBlockIndex":1,"delta":{"toolUse":{"input":"{\"x\":1}"}}}"#,
            )
            .unwrap()
        else {
            panic!("expected a chunk");
        };
        let delta = args.data.choices().unwrap()[0].delta.as_ref().unwrap();
        assert_eq!(
            delta.tool_calls.as_ref().unwrap()[0].function.arguments.as_deref(),
            Some("{\"x\":1}")
        );
    }
}
