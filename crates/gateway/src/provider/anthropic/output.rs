//! Anthropic response parsing and the SSE message state machine.

use schema::{
    ChatContent, ChatDelta, ChatMessage, ChatRole, ChatToolCall, ChatToolCallDelta, Choice,
    FunctionCall, FunctionCallDelta, Response, ResponseData, Usage,
};
use serde::Deserialize;
use serde_json::Value;

/// Inbound finish-reason mapping: `end_turn`→`stop`, `max_tokens`→`length`,
/// `tool_use`→`tool_calls`, otherwise passthrough.
pub(crate) fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        "tool_use" => "tool_calls".to_string(),
        "refusal" => "content_filter".to_string(),
        other => other.to_string(),
    }
}

#[derive(Deserialize)]
pub(crate) struct AnthropicResponse {
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub content: Vec<AnthropicContent>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    pub usage: AnthropicUsage,
}

#[derive(Deserialize)]
pub(crate) struct AnthropicContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct AnthropicUsage {
    /// May be omitted on streaming `message_delta` events.
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

impl AnthropicUsage {
    pub(crate) fn to_usage(self) -> Usage {
        Usage::new(
            self.input_tokens,
            self.output_tokens,
            self.input_tokens + self.output_tokens,
        )
    }
}

impl AnthropicResponse {
    pub(crate) fn into_response(self) -> Response {
        let mut text = String::new();
        let mut tool_calls: Vec<ChatToolCall> = Vec::new();

        for block in &self.content {
            match block.content_type.as_str() {
                "text" => {
                    if let Some(t) = &block.text {
                        text.push_str(t);
                    }
                }
                "tool_use" => {
                    tool_calls.push(ChatToolCall {
                        id: block
                            .id
                            .clone()
                            .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4())),
                        call_type: "function".to_string(),
                        function: FunctionCall {
                            name: block.name.clone().unwrap_or_default(),
                            arguments: block
                                .input
                                .as_ref()
                                .map(|input| input.to_string())
                                .unwrap_or_else(|| "{}".to_string()),
                        },
                    });
                }
                other => {
                    log::debug!("ignoring anthropic content block `{other}`");
                }
            }
        }

        Response {
            id: self.id,
            object: "chat.completion".to_string(),
            model: self.model,
            usage: Some(self.usage.to_usage()),
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

/// Streaming events, discriminated by the SSE `event:` type echoed in the
/// payload's `type` field.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicStreamEvent {
    MessageStart {
        message: AnthropicMessageStart,
    },
    ContentBlockStart {
        index: u32,
        content_block: AnthropicStartedBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: AnthropicBlockDelta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: u32,
    },
    MessageDelta {
        delta: AnthropicMessageDelta,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: AnthropicStreamError,
    },
}

#[derive(Deserialize)]
pub(crate) struct AnthropicMessageStart {
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicStartedBlock {
    Text {
        #[allow(dead_code)]
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[allow(dead_code)]
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicBlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    SignatureDelta {
        #[allow(dead_code)]
        #[serde(default)]
        signature: String,
    },
}

#[derive(Deserialize)]
pub(crate) struct AnthropicMessageDelta {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct AnthropicStreamError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Outcome of one state transition.
pub(crate) enum StreamStep {
    /// Nothing to forward for this event.
    Continue,
    /// A delta chunk to deliver.
    Chunk(Response),
    /// `message_stop` reached: the synthetic terminal chunk.
    Done(Response),
    /// A mid-stream error event.
    Failed { error_type: String, message: String },
}

/// State machine converting the message event flow
/// (`message_start` → `content_block_*` → `message_delta` → `message_stop`)
/// into canonical chat delta chunks.
pub(crate) struct AnthropicStreamState {
    message_id: String,
    model: String,
    usage: Option<AnthropicUsage>,
    finish_reason: Option<String>,
    /// Block index to streaming tool-call slot.
    tool_indices: std::collections::HashMap<u32, u32>,
    next_tool_slot: u32,
}

impl AnthropicStreamState {
    pub(crate) fn new() -> Self {
        Self {
            message_id: String::new(),
            model: String::new(),
            usage: None,
            finish_reason: None,
            tool_indices: std::collections::HashMap::new(),
            next_tool_slot: 0,
        }
    }

    fn chunk(&self, delta: ChatDelta) -> Response {
        Response {
            id: self.message_id.clone(),
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

    pub(crate) fn step(&mut self, event: AnthropicStreamEvent) -> StreamStep {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.message_id = message.id;
                self.model = message.model;
                self.usage = message.usage;

                StreamStep::Chunk(self.chunk(ChatDelta {
                    role: Some(ChatRole::Assistant),
                    ..Default::default()
                }))
            }
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => {
                match content_block {
                    AnthropicStartedBlock::ToolUse { id, name } => {
                        let slot = self.next_tool_slot;
                        self.next_tool_slot += 1;
                        self.tool_indices.insert(index, slot);

                        StreamStep::Chunk(self.chunk(ChatDelta {
                            tool_calls: Some(vec![ChatToolCallDelta {
                                index: slot,
                                id: Some(id),
                                call_type: Some("function".to_string()),
                                function: FunctionCallDelta {
                                    name: Some(name),
                                    arguments: Some(String::new()),
                                },
                            }]),
                            ..Default::default()
                        }))
                    }
                    _ => StreamStep::Continue,
                }
            }
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicBlockDelta::TextDelta { text } => StreamStep::Chunk(self.chunk(ChatDelta {
                    content: Some(text),
                    ..Default::default()
                })),
                AnthropicBlockDelta::ThinkingDelta { thinking } => {
                    StreamStep::Chunk(self.chunk(ChatDelta {
                        thought: Some(thinking),
                        ..Default::default()
                    }))
                }
                AnthropicBlockDelta::InputJsonDelta { partial_json } => {
                    let Some(slot) = self.tool_indices.get(&index).copied() else {
                        return StreamStep::Continue;
                    };

                    StreamStep::Chunk(self.chunk(ChatDelta {
                        tool_calls: Some(vec![ChatToolCallDelta {
                            index: slot,
                            id: None,
                            call_type: None,
                            function: FunctionCallDelta {
                                name: None,
                                arguments: Some(partial_json),
                            },
                        }]),
                        ..Default::default()
                    }))
                }
                AnthropicBlockDelta::SignatureDelta { .. } => StreamStep::Continue,
            },
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(new_usage) = usage {
                    let mut merged = self.usage.unwrap_or_default();
                    merged.output_tokens = merged.output_tokens.max(new_usage.output_tokens);
                    merged.input_tokens = merged.input_tokens.max(new_usage.input_tokens);
                    self.usage = Some(merged);
                }
                if let Some(reason) = delta.stop_reason {
                    self.finish_reason = Some(map_stop_reason(&reason));
                }
                StreamStep::Continue
            }
            AnthropicStreamEvent::MessageStop => {
                let mut terminal = self.chunk(ChatDelta::default());
                terminal.usage = self.usage.map(AnthropicUsage::to_usage);
                if let Some(choices) = terminal.data.choices_mut() {
                    choices[0].finish_reason = self.finish_reason.clone();
                }
                StreamStep::Done(terminal)
            }
            AnthropicStreamEvent::Ping | AnthropicStreamEvent::ContentBlockStop { .. } => {
                StreamStep::Continue
            }
            AnthropicStreamEvent::Error { error } => StreamStep::Failed {
                error_type: error.error_type,
                message: error.message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reasons_map_to_chat_finish_reasons() {
        assert_eq!(map_stop_reason("end_turn"), "stop");
        assert_eq!(map_stop_reason("max_tokens"), "length");
        assert_eq!(map_stop_reason("tool_use"), "tool_calls");
        assert_eq!(map_stop_reason("stop_sequence"), "stop");
        assert_eq!(map_stop_reason("pause_turn"), "pause_turn");
    }

    fn text_flow() -> Vec<&'static str> {
        vec![
            r#"{"type":"message_start","message":{"id":"msg_1","model":"claude-sonnet-4-20250514","role":"assistant","content":[],"usage":{"input_tokens":12,"output_tokens":1}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":9}}"#,
            r#"{"type":"message_stop"}"#,
        ]
    }

    #[test]
    fn text_event_flow_emits_role_deltas_and_terminal() {
        let mut state = AnthropicStreamState::new();
        let mut chunks = Vec::new();
        let mut terminal = None;

        for payload in text_flow() {
            let event: AnthropicStreamEvent = serde_json::from_str(payload).unwrap();
            match state.step(event) {
                StreamStep::Chunk(chunk) => chunks.push(chunk),
                StreamStep::Done(done) => terminal = Some(done),
                StreamStep::Continue => {}
                StreamStep::Failed { .. } => panic!("unexpected failure"),
            }
        }

        assert_eq!(chunks.len(), 3);
        let role = chunks[0].data.choices().unwrap()[0].delta.as_ref().unwrap();
        assert_eq!(role.role, Some(ChatRole::Assistant));

        let first = chunks[1].data.choices().unwrap()[0].delta.as_ref().unwrap();
        assert_eq!(first.content.as_deref(), Some("Hel"));

        let terminal = terminal.expect("terminal chunk");
        assert_eq!(terminal.id, "msg_1");

        let usage = terminal.usage.as_ref().unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 9);
        assert_eq!(usage.total_tokens, 21);

        let choice = &terminal.data.choices().unwrap()[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn tool_use_blocks_stream_as_tool_call_deltas() {
        let mut state = AnthropicStreamState::new();

        let start: AnthropicStreamEvent = serde_json::from_str(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_9","name":"lookup"}}"#,
        )
        .unwrap();

        let StreamStep::Chunk(chunk) = state.step(start) else {
            panic!("expected a chunk");
        };
        let delta = chunk.data.choices().unwrap()[0].delta.as_ref().unwrap();
        let call = &delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id.as_deref(), Some("toolu_9"));
        assert_eq!(call.function.name.as_deref(), Some("lookup"));

        let args: AnthropicStreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"q\":"}}"#,
        )
        .unwrap();

        let StreamStep::Chunk(chunk) = state.step(args) else {
            panic!("expected a chunk");
        };
        let delta = chunk.data.choices().unwrap()[0].delta.as_ref().unwrap();
        let call = &delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.function.arguments.as_deref(), Some("{\"q\":"));
        assert!(call.id.is_none());
    }

    #[test]
    fn error_events_surface_as_failures() {
        let mut state = AnthropicStreamState::new();
        let event: AnthropicStreamEvent = serde_json::from_str(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"busy"}}"#,
        )
        .unwrap();

        let StreamStep::Failed { error_type, message } = state.step(event) else {
            panic!("expected a failure");
        };
        assert_eq!(error_type, "overloaded_error");
        assert_eq!(message, "busy");
    }
}
