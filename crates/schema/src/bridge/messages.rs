//! Message-level conversions.

use crate::chat::{
    ChatContent, ChatContentBlock, ChatMessage, ChatRole, ChatToolCall, FunctionCall, ImageUrl,
};
use crate::responses::{
    FunctionCallOutput, FunctionCallOutputPayload, FunctionCallPayload, MessagePayload,
    ResponsesContent, ResponsesContentBlock, ResponsesItem, ResponsesRole,
};

/// Expand chat messages into Responses items.
///
/// An assistant message with k tool calls produces k `function_call` items in
/// list order, preceded by a `message` item when the source carried textual
/// content or a refusal. Tool messages become `function_call_output` items.
pub fn chat_messages_to_responses_items(messages: &[ChatMessage]) -> Vec<ResponsesItem> {
    let mut items = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            ChatRole::Tool => {
                let output = message
                    .content
                    .as_ref()
                    .map(chat_content_to_function_output)
                    .unwrap_or_else(|| FunctionCallOutput::Text(String::new()));

                items.push(ResponsesItem::FunctionCallOutput(FunctionCallOutputPayload {
                    id: None,
                    status: None,
                    call_id: message.tool_call_id.clone().unwrap_or_default(),
                    output,
                }));
            }
            ChatRole::Assistant => {
                let content = assistant_content_to_responses(message);

                if let Some(content) = content {
                    items.push(ResponsesItem::Message(MessagePayload {
                        id: None,
                        status: None,
                        role: Some(ResponsesRole::Assistant),
                        content: Some(content),
                    }));
                }

                for call in message.tool_calls.iter().flatten() {
                    items.push(ResponsesItem::FunctionCall(FunctionCallPayload {
                        id: None,
                        status: None,
                        call_id: call.id.clone(),
                        name: call.function.name.clone(),
                        arguments: call.function.arguments.clone(),
                    }));
                }
            }
            ChatRole::User | ChatRole::System | ChatRole::Developer => {
                let role = match message.role {
                    ChatRole::User => ResponsesRole::User,
                    ChatRole::System => ResponsesRole::System,
                    _ => ResponsesRole::Developer,
                };

                items.push(ResponsesItem::Message(MessagePayload {
                    id: None,
                    status: None,
                    role: Some(role),
                    content: message.content.as_ref().map(input_content_to_responses),
                }));
            }
        }
    }

    items
}

/// Collapse Responses items back into chat messages.
///
/// A run of `function_call` items accumulates in a pending buffer; any other
/// item flushes the buffer as a single assistant message carrying the
/// accumulated tool calls, then is processed itself. Reasoning items are
/// skipped. Items with no chat counterpart are dropped.
pub fn responses_items_to_chat_messages(items: &[ResponsesItem]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(items.len());
    let mut pending: Vec<ChatToolCall> = Vec::new();

    fn flush(pending: &mut Vec<ChatToolCall>, messages: &mut Vec<ChatMessage>) {
        if pending.is_empty() {
            return;
        }

        messages.push(ChatMessage {
            role: ChatRole::Assistant,
            content: None,
            refusal: None,
            // Deep copy so later mutation of the buffer cannot alias.
            tool_calls: Some(pending.clone()),
            tool_call_id: None,
        });
        pending.clear();
    }

    for item in items {
        match item {
            ResponsesItem::FunctionCall(call) => {
                pending.push(ChatToolCall {
                    id: call.call_id.clone(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                });
            }
            ResponsesItem::Reasoning(_) => {
                flush(&mut pending, &mut messages);
            }
            ResponsesItem::FunctionCallOutput(output) => {
                flush(&mut pending, &mut messages);

                messages.push(ChatMessage {
                    role: ChatRole::Tool,
                    content: Some(function_output_to_chat_content(&output.output)),
                    refusal: None,
                    tool_calls: None,
                    tool_call_id: Some(output.call_id.clone()),
                });
            }
            ResponsesItem::Message(message) => {
                flush(&mut pending, &mut messages);

                let role = match message.role {
                    Some(ResponsesRole::User) => ChatRole::User,
                    Some(ResponsesRole::System) => ChatRole::System,
                    Some(ResponsesRole::Developer) => ChatRole::Developer,
                    Some(ResponsesRole::Assistant) | None => ChatRole::Assistant,
                };

                let (content, refusal) = message
                    .content
                    .as_ref()
                    .map(responses_content_to_chat)
                    .unwrap_or((None, None));

                messages.push(ChatMessage {
                    role,
                    content,
                    refusal,
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
            other => {
                flush(&mut pending, &mut messages);
                log::debug!(
                    "dropping `{}` item with no chat completion counterpart",
                    other.item_type()
                );
            }
        }
    }

    flush(&mut pending, &mut messages);
    messages
}

/// Assistant content plus the refusal field, as Responses content.
fn assistant_content_to_responses(message: &ChatMessage) -> Option<ResponsesContent> {
    let mut blocks = Vec::new();

    match &message.content {
        // A bare string with no refusal passes through unchanged.
        Some(ChatContent::Text(text)) if message.refusal.is_none() => {
            return Some(ResponsesContent::Text(text.clone()));
        }
        Some(ChatContent::Text(text)) => {
            blocks.push(ResponsesContentBlock::OutputText {
                text: text.clone(),
                annotations: None,
                logprobs: None,
            });
        }
        Some(ChatContent::Blocks(chat_blocks)) => {
            for block in chat_blocks {
                if let ChatContentBlock::Text { text } = block {
                    blocks.push(ResponsesContentBlock::OutputText {
                        text: text.clone(),
                        annotations: None,
                        logprobs: None,
                    });
                }
            }
        }
        None => {}
    }

    if let Some(refusal) = &message.refusal {
        blocks.push(ResponsesContentBlock::Refusal {
            refusal: refusal.clone(),
        });
    }

    if blocks.is_empty() {
        None
    } else {
        Some(ResponsesContent::Blocks(blocks))
    }
}

/// Map user-side chat content into Responses input blocks:
/// text→input_text, image_url→input_image, file→input_file,
/// input_audio→input_audio.
fn input_content_to_responses(content: &ChatContent) -> ResponsesContent {
    match content {
        ChatContent::Text(text) => ResponsesContent::Text(text.clone()),
        ChatContent::Blocks(blocks) => {
            let blocks = blocks
                .iter()
                .map(|block| match block {
                    ChatContentBlock::Text { text } => {
                        ResponsesContentBlock::InputText { text: text.clone() }
                    }
                    ChatContentBlock::ImageUrl { image_url } => ResponsesContentBlock::InputImage {
                        image_url: Some(image_url.url.clone()),
                        file_id: None,
                        detail: image_url.detail.clone(),
                    },
                    ChatContentBlock::File { file } => ResponsesContentBlock::InputFile {
                        file_id: file.file_id.clone(),
                        filename: file.filename.clone(),
                        file_data: file.file_data.clone(),
                    },
                    ChatContentBlock::InputAudio { input_audio } => {
                        ResponsesContentBlock::InputAudio {
                            input_audio: input_audio.clone(),
                        }
                    }
                })
                .collect();

            ResponsesContent::Blocks(blocks)
        }
    }
}

/// Map Responses content back to chat content; refusal blocks lift into the
/// assistant message's refusal field.
fn responses_content_to_chat(content: &ResponsesContent) -> (Option<ChatContent>, Option<String>) {
    match content {
        ResponsesContent::Text(text) => (Some(ChatContent::Text(text.clone())), None),
        ResponsesContent::Blocks(blocks) => {
            let mut chat_blocks = Vec::new();
            let mut refusal = None;

            for block in blocks {
                match block {
                    ResponsesContentBlock::InputText { text }
                    | ResponsesContentBlock::OutputText { text, .. } => {
                        chat_blocks.push(ChatContentBlock::Text { text: text.clone() });
                    }
                    ResponsesContentBlock::Refusal { refusal: text } => {
                        refusal = Some(text.clone());
                    }
                    ResponsesContentBlock::InputImage { image_url, detail, .. } => {
                        chat_blocks.push(ChatContentBlock::ImageUrl {
                            image_url: ImageUrl {
                                url: image_url.clone().unwrap_or_default(),
                                detail: detail.clone(),
                            },
                        });
                    }
                    ResponsesContentBlock::InputFile {
                        file_id,
                        filename,
                        file_data,
                    } => {
                        chat_blocks.push(ChatContentBlock::File {
                            file: crate::chat::InputFile {
                                file_id: file_id.clone(),
                                filename: filename.clone(),
                                file_data: file_data.clone(),
                            },
                        });
                    }
                    ResponsesContentBlock::InputAudio { input_audio } => {
                        chat_blocks.push(ChatContentBlock::InputAudio {
                            input_audio: input_audio.clone(),
                        });
                    }
                }
            }

            let content = if chat_blocks.is_empty() {
                None
            } else {
                Some(ChatContent::Blocks(chat_blocks))
            };

            (content, refusal)
        }
    }
}

fn chat_content_to_function_output(content: &ChatContent) -> FunctionCallOutput {
    match content {
        ChatContent::Text(text) => FunctionCallOutput::Text(text.clone()),
        ChatContent::Blocks(blocks) => {
            let blocks = blocks
                .iter()
                .filter_map(|block| match block {
                    ChatContentBlock::Text { text } => Some(ResponsesContentBlock::OutputText {
                        text: text.clone(),
                        annotations: None,
                        logprobs: None,
                    }),
                    _ => None,
                })
                .collect::<Vec<_>>();

            if blocks.is_empty() {
                FunctionCallOutput::Text(String::new())
            } else {
                FunctionCallOutput::Blocks(blocks)
            }
        }
    }
}

/// Lift an embedded tool output back into message content.
fn function_output_to_chat_content(output: &FunctionCallOutput) -> ChatContent {
    match output {
        FunctionCallOutput::Text(text) => ChatContent::Text(text.clone()),
        FunctionCallOutput::Blocks(_) => {
            ChatContent::Text(output.joined_text().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responses::ReasoningPayload;

    fn tool_call(id: &str, name: &str, arguments: &str) -> ChatToolCall {
        ChatToolCall {
            id: id.into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    #[test]
    fn assistant_with_k_tool_calls_expands_to_k_function_call_items() {
        let messages = vec![ChatMessage {
            role: ChatRole::Assistant,
            content: None,
            refusal: None,
            tool_calls: Some(vec![
                tool_call("call_a", "first", r#"{"x":1}"#),
                tool_call("call_b", "second", r#"{"y":2}"#),
                tool_call("call_c", "third", "{}"),
            ]),
            tool_call_id: None,
        }];

        let items = chat_messages_to_responses_items(&messages);
        assert_eq!(items.len(), 3);

        for (item, (call_id, name)) in items
            .iter()
            .zip([("call_a", "first"), ("call_b", "second"), ("call_c", "third")])
        {
            let ResponsesItem::FunctionCall(call) = item else {
                panic!("expected function_call item");
            };
            assert_eq!(call.call_id, call_id);
            assert_eq!(call.name, name);
        }
    }

    #[test]
    fn two_tool_call_conversation_round_trips() {
        let original = vec![
            ChatMessage::text(ChatRole::User, "do X"),
            ChatMessage {
                role: ChatRole::Assistant,
                content: None,
                refusal: None,
                tool_calls: Some(vec![
                    tool_call("call_a", "fa", r#"{"a":1}"#),
                    tool_call("call_b", "fb", r#"{"b":2}"#),
                ]),
                tool_call_id: None,
            },
            ChatMessage {
                role: ChatRole::Tool,
                content: Some(ChatContent::Text("rA".into())),
                refusal: None,
                tool_calls: None,
                tool_call_id: Some("call_a".into()),
            },
            ChatMessage {
                role: ChatRole::Tool,
                content: Some(ChatContent::Text("rB".into())),
                refusal: None,
                tool_calls: None,
                tool_call_id: Some("call_b".into()),
            },
        ];

        let items = chat_messages_to_responses_items(&original);

        // user message, two calls, two outputs -- in source order.
        let kinds: Vec<&str> = items.iter().map(ResponsesItem::item_type).collect();
        insta::assert_debug_snapshot!(kinds, @r###"
        [
            "message",
            "function_call",
            "function_call",
            "function_call_output",
            "function_call_output",
        ]
        "###);

        let back = responses_items_to_chat_messages(&items);
        assert_eq!(back, original);
    }

    #[test]
    fn pending_buffer_flushes_before_non_call_items_and_at_end() {
        let items = vec![
            ResponsesItem::FunctionCall(FunctionCallPayload {
                id: None,
                status: None,
                call_id: "c1".into(),
                name: "f".into(),
                arguments: "{}".into(),
            }),
            ResponsesItem::Message(MessagePayload {
                id: None,
                status: None,
                role: Some(ResponsesRole::Assistant),
                content: Some(ResponsesContent::Text("done".into())),
            }),
            ResponsesItem::FunctionCall(FunctionCallPayload {
                id: None,
                status: None,
                call_id: "c2".into(),
                name: "g".into(),
                arguments: "{}".into(),
            }),
        ];

        let messages = responses_items_to_chat_messages(&items);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].tool_calls.as_ref().unwrap()[0].id, "c1");
        assert_eq!(messages[1].content, Some(ChatContent::Text("done".into())));
        assert_eq!(messages[2].tool_calls.as_ref().unwrap()[0].id, "c2");
    }

    #[test]
    fn reasoning_items_are_skipped() {
        let items = vec![
            ResponsesItem::Reasoning(ReasoningPayload::default()),
            ResponsesItem::Message(MessagePayload {
                id: None,
                status: None,
                role: Some(ResponsesRole::Assistant),
                content: Some(ResponsesContent::Text("hi".into())),
            }),
        ];

        let messages = responses_items_to_chat_messages(&items);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ChatRole::Assistant);
    }

    #[test]
    fn assistant_refusal_becomes_a_refusal_block_and_back() {
        let original = vec![ChatMessage {
            role: ChatRole::Assistant,
            content: None,
            refusal: Some("cannot help with that".into()),
            tool_calls: None,
            tool_call_id: None,
        }];

        let items = chat_messages_to_responses_items(&original);
        let ResponsesItem::Message(message) = &items[0] else {
            panic!("expected message item");
        };
        let Some(ResponsesContent::Blocks(blocks)) = &message.content else {
            panic!("expected block content");
        };
        assert!(matches!(blocks[0], ResponsesContentBlock::Refusal { .. }));

        let back = responses_items_to_chat_messages(&items);
        assert_eq!(back, original);
    }

    #[test]
    fn embedded_tool_output_lifts_back_into_message_content() {
        let items = vec![ResponsesItem::FunctionCallOutput(FunctionCallOutputPayload {
            id: None,
            status: None,
            call_id: "call_1".into(),
            output: FunctionCallOutput::Blocks(vec![ResponsesContentBlock::OutputText {
                text: "result".into(),
                annotations: None,
                logprobs: None,
            }]),
        })];

        let messages = responses_items_to_chat_messages(&items);
        assert_eq!(messages[0].role, ChatRole::Tool);
        assert_eq!(messages[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[0].content, Some(ChatContent::Text("result".into())));
    }
}
