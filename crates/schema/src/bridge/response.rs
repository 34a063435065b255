//! In-place response-shape conversions.
//!
//! These are shallow: they move choices into output items (or back), rewrite
//! the object tag and the request-type echo, and remap the usage shape. The
//! envelope keeps exactly one data shape populated throughout.

use crate::chat::{ChatContent, ChatMessage, ChatRole};
use crate::request::RequestType;
use crate::response::{Choice, Response, ResponseData};
use crate::responses::ResponsesResponse;
use crate::usage::Usage;

use super::messages::{chat_messages_to_responses_items, responses_items_to_chat_messages};

impl Response {
    /// Rewrite a chat-shaped response into the Responses shape.
    pub fn to_responses_only(&mut self) {
        let choices = match &mut self.data {
            ResponseData::Responses { .. } => return,
            ResponseData::Chat { choices } => std::mem::take(choices),
            _ => return,
        };

        let mut output = Vec::new();
        let mut finish_reason = None;

        for choice in &choices {
            if let Some(message) = &choice.message {
                output.extend(chat_messages_to_responses_items(std::slice::from_ref(message)));
            }
            if choice.finish_reason.is_some() {
                finish_reason = choice.finish_reason.clone();
            }
        }

        let status = match finish_reason.as_deref() {
            Some("length") | Some("content_filter") => "incomplete",
            _ => "completed",
        };

        self.usage = self.usage.take().map(Usage::into_responses_shape);
        self.object = "response".to_string();
        self.extra.request_type = Some(match self.extra.request_type {
            Some(RequestType::ChatCompletionStream) => RequestType::ResponsesStream,
            _ => RequestType::Responses,
        });

        self.data = ResponseData::Responses {
            response: ResponsesResponse {
                id: self.id.clone(),
                object: "response".to_string(),
                created_at: self.created,
                status: Some(status.to_string()),
                model: self.model.clone(),
                output,
                usage: self.usage.clone(),
                instructions: None,
                incomplete_details: None,
                error: None,
            },
        };
    }

    /// Rewrite a Responses-shaped response into the chat shape.
    pub fn to_chat_only(&mut self) {
        let response = match &mut self.data {
            ResponseData::Chat { .. } => return,
            ResponseData::Responses { response } => std::mem::take(response),
            _ => return,
        };

        let messages = responses_items_to_chat_messages(&response.output);

        // Collapse the projected messages into one assistant turn.
        let mut content: Option<ChatContent> = None;
        let mut refusal = None;
        let mut tool_calls = Vec::new();

        for message in messages {
            if let Some(text) = message.content.as_ref().and_then(ChatContent::joined_text) {
                content = Some(match content.take().and_then(|c| c.joined_text()) {
                    Some(existing) => ChatContent::Text(existing + &text),
                    None => ChatContent::Text(text),
                });
            }
            if message.refusal.is_some() {
                refusal = message.refusal;
            }
            if let Some(calls) = message.tool_calls {
                tool_calls.extend(calls);
            }
        }

        let finish_reason = if !tool_calls.is_empty() {
            "tool_calls"
        } else {
            match response.status.as_deref() {
                Some("incomplete") => "length",
                _ => "stop",
            }
        };

        if self.id.is_empty() {
            self.id = response.id;
        }
        if self.model.is_empty() {
            self.model = response.model;
        }
        if self.created == 0 {
            self.created = response.created_at;
        }

        let usage = self.usage.take().or(response.usage);
        self.usage = usage.map(Usage::into_chat_shape);
        self.object = "chat.completion".to_string();
        self.extra.request_type = Some(match self.extra.request_type {
            Some(RequestType::ResponsesStream) => RequestType::ChatCompletionStream,
            _ => RequestType::ChatCompletion,
        });

        self.data = ResponseData::Chat {
            choices: vec![Choice {
                index: 0,
                message: Some(ChatMessage {
                    role: ChatRole::Assistant,
                    content,
                    refusal,
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                    tool_call_id: None,
                }),
                delta: None,
                finish_reason: Some(finish_reason.to_string()),
                logprobs: None,
            }],
        };
    }

    /// Mark a chat-shaped response as a text-completion result.
    pub fn to_text_completion(&mut self) {
        self.object = "text_completion".to_string();
        self.extra.request_type = Some(match self.extra.request_type {
            Some(RequestType::ChatCompletionStream) | Some(RequestType::TextCompletionStream) => {
                RequestType::TextCompletionStream
            }
            _ => RequestType::TextCompletion,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatToolCall, FunctionCall};

    fn chat_response() -> Response {
        Response {
            id: "r1".into(),
            object: "chat.completion".into(),
            created: 1700000000,
            model: "gpt-4o".into(),
            usage: Some(Usage::new(3, 4, 7)),
            data: ResponseData::Chat {
                choices: vec![Choice {
                    index: 0,
                    message: Some(ChatMessage {
                        role: ChatRole::Assistant,
                        content: Some(ChatContent::Text("hello".into())),
                        refusal: None,
                        tool_calls: Some(vec![ChatToolCall {
                            id: "call_1".into(),
                            call_type: "function".into(),
                            function: FunctionCall {
                                name: "lookup".into(),
                                arguments: "{}".into(),
                            },
                        }]),
                        tool_call_id: None,
                    }),
                    delta: None,
                    finish_reason: Some("tool_calls".into()),
                    logprobs: None,
                }],
            },
            extra: crate::ResponseExtra {
                request_type: Some(RequestType::ChatCompletion),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn to_responses_moves_choices_into_output_items() {
        let mut response = chat_response();
        response.to_responses_only();

        assert_eq!(response.object, "response");
        assert_eq!(response.extra.request_type, Some(RequestType::Responses));

        let ResponseData::Responses { response: block } = &response.data else {
            panic!("expected responses shape");
        };
        assert_eq!(block.output.len(), 2);
        assert_eq!(block.output[0].item_type(), "message");
        assert_eq!(block.output[1].item_type(), "function_call");

        let usage = response.usage.as_ref().unwrap();
        assert_eq!(usage.input_tokens, Some(3));
        assert_eq!(usage.output_tokens, Some(4));
        assert_eq!(usage.total_tokens, 7);
    }

    #[test]
    fn responses_round_trip_restores_chat_content() {
        let mut response = chat_response();
        response.to_responses_only();
        response.to_chat_only();

        assert_eq!(response.object, "chat.completion");
        assert_eq!(response.extra.request_type, Some(RequestType::ChatCompletion));

        let choices = response.data.choices().unwrap();
        let message = choices[0].message.as_ref().unwrap();
        assert_eq!(message.content, Some(ChatContent::Text("hello".into())));
        assert_eq!(message.tool_calls.as_ref().unwrap()[0].id, "call_1");
        assert_eq!(choices[0].finish_reason.as_deref(), Some("tool_calls"));

        let usage = response.usage.as_ref().unwrap();
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 4);
        assert_eq!(usage.total_tokens, 7);
    }

    #[test]
    fn usage_total_is_recomputed_when_missing() {
        let mut response = chat_response();
        response.usage = Some(Usage::new(5, 6, 0));
        response.to_responses_only();
        assert_eq!(response.usage.as_ref().unwrap().total_tokens, 11);
    }

    #[test]
    fn text_completion_rewrite_updates_object_and_request_type() {
        let mut response = chat_response();
        response.to_text_completion();
        assert_eq!(response.object, "text_completion");
        assert_eq!(response.extra.request_type, Some(RequestType::TextCompletion));
    }
}
