//! Streaming-chunk conversion from chat deltas to Responses events.

use crate::request::RequestType;
use crate::response::{Response, ResponseData};
use crate::responses::{
    FunctionCallPayload, MessagePayload, ResponsesContent, ResponsesEventType, ResponsesItem,
    ResponsesResponse, ResponsesRole, ResponsesStreamEvent,
};
use crate::usage::Usage;

impl Response {
    /// Rewrite a chat streaming chunk into one Responses streaming event.
    ///
    /// Classification, first match wins: a role delta opens the output item;
    /// content, thought, refusal, and tool-call deltas map to their delta
    /// events; a finish-reason-only chunk closes the stream as `completed`,
    /// `incomplete`, or `output_item.done` and carries aggregated usage.
    pub fn to_responses_stream(&mut self, sequence_number: u64) {
        if matches!(self.data, ResponseData::ResponsesStream { .. }) {
            return;
        }

        let choices = match &mut self.data {
            ResponseData::Chat { choices } => std::mem::take(choices),
            _ => return,
        };

        let mut event = ResponsesStreamEvent {
            sequence_number,
            ..Default::default()
        };

        let choice = choices.into_iter().next().unwrap_or_default();
        let delta = choice.delta.unwrap_or_default();

        if delta.role.is_some() {
            event.event_type = ResponsesEventType::OutputItemAdded;
            event.output_index = Some(0);
            event.item = Some(ResponsesItem::Message(MessagePayload {
                id: if self.id.is_empty() { None } else { Some(self.id.clone()) },
                status: Some("in_progress".to_string()),
                role: Some(ResponsesRole::Assistant),
                content: Some(ResponsesContent::Blocks(Vec::new())),
            }));
        } else if let Some(content) = delta.content {
            event.event_type = ResponsesEventType::OutputTextDelta;
            event.delta = Some(content);
            event.output_index = Some(0);
            event.content_index = Some(0);
            event.item_id = Some(self.id.clone());
        } else if let Some(thought) = delta.thought {
            event.event_type = ResponsesEventType::ReasoningSummaryTextDelta;
            event.delta = Some(thought);
            event.output_index = Some(0);
            event.summary_index = Some(0);
            event.item_id = Some(self.id.clone());
        } else if let Some(refusal) = delta.refusal {
            event.event_type = ResponsesEventType::RefusalDelta;
            event.delta = Some(refusal);
            event.output_index = Some(0);
            event.content_index = Some(0);
            event.item_id = Some(self.id.clone());
        } else if let Some(call) = delta.tool_calls.and_then(|calls| calls.into_iter().next()) {
            event.event_type = ResponsesEventType::FunctionCallArgumentsDelta;
            event.output_index = Some(call.index);
            event.delta = call.function.arguments.clone();

            // The first fragment of a call carries its identity; surface it
            // as item metadata so the consumer can open the item.
            if call.id.is_some() || call.function.name.is_some() {
                event.item = Some(ResponsesItem::FunctionCall(FunctionCallPayload {
                    id: None,
                    status: Some("in_progress".to_string()),
                    call_id: call.id.clone().unwrap_or_default(),
                    name: call.function.name.clone().unwrap_or_default(),
                    arguments: call.function.arguments.unwrap_or_default(),
                }));
            }
            event.item_id = call.id;
        } else {
            event.event_type = match choice.finish_reason.as_deref() {
                Some("length") | Some("content_filter") => ResponsesEventType::Incomplete,
                Some("tool_calls") => ResponsesEventType::OutputItemDone,
                _ => ResponsesEventType::Completed,
            };

            let usage = self.usage.take().map(Usage::into_responses_shape);
            self.usage = usage.clone();

            event.response = Some(ResponsesResponse {
                id: self.id.clone(),
                object: "response".to_string(),
                created_at: self.created,
                status: Some(match event.event_type {
                    ResponsesEventType::Incomplete => "incomplete".to_string(),
                    _ => "completed".to_string(),
                }),
                model: self.model.clone(),
                output: Vec::new(),
                usage,
                instructions: None,
                incomplete_details: None,
                error: None,
            });
        }

        self.extra.request_type = Some(RequestType::ResponsesStream);
        self.data = ResponseData::ResponsesStream { event };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatDelta, ChatRole, ChatToolCallDelta, FunctionCallDelta};
    use crate::response::Choice;

    fn chunk(delta: ChatDelta, finish_reason: Option<&str>) -> Response {
        Response {
            id: "chunk_1".into(),
            object: "chat.completion.chunk".into(),
            model: "gpt-4o".into(),
            data: ResponseData::Chat {
                choices: vec![Choice {
                    index: 0,
                    delta: Some(delta),
                    finish_reason: finish_reason.map(str::to_string),
                    ..Default::default()
                }],
            },
            extra: crate::ResponseExtra {
                request_type: Some(RequestType::ChatCompletionStream),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn event(response: &Response) -> &ResponsesStreamEvent {
        match &response.data {
            ResponseData::ResponsesStream { event } => event,
            _ => panic!("expected responses stream event"),
        }
    }

    #[test]
    fn role_chunk_opens_an_output_item() {
        let mut response = chunk(
            ChatDelta {
                role: Some(ChatRole::Assistant),
                ..Default::default()
            },
            None,
        );
        response.to_responses_stream(2);

        let event = event(&response);
        assert_eq!(event.event_type, ResponsesEventType::OutputItemAdded);
        assert_eq!(event.sequence_number, 2);
        assert!(event.item.is_some());
    }

    #[test]
    fn content_chunk_becomes_a_text_delta() {
        let mut response = chunk(
            ChatDelta {
                content: Some("hel".into()),
                ..Default::default()
            },
            None,
        );
        response.to_responses_stream(3);

        let event = event(&response);
        assert_eq!(event.event_type, ResponsesEventType::OutputTextDelta);
        assert_eq!(event.delta.as_deref(), Some("hel"));
        assert_eq!(response.extra.request_type, Some(RequestType::ResponsesStream));
    }

    #[test]
    fn thought_and_refusal_chunks_map_to_their_delta_events() {
        let mut thought = chunk(
            ChatDelta {
                thought: Some("mull".into()),
                ..Default::default()
            },
            None,
        );
        thought.to_responses_stream(4);
        assert_eq!(event(&thought).event_type, ResponsesEventType::ReasoningSummaryTextDelta);

        let mut refusal = chunk(
            ChatDelta {
                refusal: Some("no".into()),
                ..Default::default()
            },
            None,
        );
        refusal.to_responses_stream(5);
        assert_eq!(event(&refusal).event_type, ResponsesEventType::RefusalDelta);
    }

    #[test]
    fn first_tool_call_fragment_carries_item_metadata() {
        let mut first = chunk(
            ChatDelta {
                tool_calls: Some(vec![ChatToolCallDelta {
                    index: 0,
                    id: Some("call_1".into()),
                    call_type: Some("function".into()),
                    function: FunctionCallDelta {
                        name: Some("lookup".into()),
                        arguments: Some(String::new()),
                    },
                }]),
                ..Default::default()
            },
            None,
        );
        first.to_responses_stream(6);

        let first_event = event(&first);
        assert_eq!(first_event.event_type, ResponsesEventType::FunctionCallArgumentsDelta);
        let Some(ResponsesItem::FunctionCall(call)) = &first_event.item else {
            panic!("expected function_call item metadata");
        };
        assert_eq!(call.call_id, "call_1");
        assert_eq!(call.name, "lookup");

        let mut later = chunk(
            ChatDelta {
                tool_calls: Some(vec![ChatToolCallDelta {
                    index: 0,
                    id: None,
                    call_type: None,
                    function: FunctionCallDelta {
                        name: None,
                        arguments: Some(r#"{"x":1}"#.into()),
                    },
                }]),
                ..Default::default()
            },
            None,
        );
        later.to_responses_stream(7);

        let later_event = event(&later);
        assert!(later_event.item.is_none());
        assert_eq!(later_event.delta.as_deref(), Some(r#"{"x":1}"#));
    }

    #[test]
    fn finish_chunk_closes_the_stream_with_usage() {
        let mut response = chunk(ChatDelta::default(), Some("stop"));
        response.usage = Some(Usage::new(1, 2, 3));
        response.to_responses_stream(9);

        let response_event = event(&response);
        assert_eq!(response_event.event_type, ResponsesEventType::Completed);

        let block = response_event.response.as_ref().unwrap();
        assert_eq!(block.status.as_deref(), Some("completed"));
        assert_eq!(block.usage.as_ref().unwrap().input_tokens, Some(1));

        let mut truncated = chunk(ChatDelta::default(), Some("length"));
        truncated.to_responses_stream(10);
        assert_eq!(event(&truncated).event_type, ResponsesEventType::Incomplete);

        let mut tools = chunk(ChatDelta::default(), Some("tool_calls"));
        tools.to_responses_stream(11);
        assert_eq!(event(&tools).event_type, ResponsesEventType::OutputItemDone);
    }
}
