//! Request-level conversions between the chat and Responses surfaces.

use crate::chat::{ChatMessage, ChatRole, ChatTool, FunctionDefinition, ToolChoice, ToolChoiceFunction, ToolChoiceMode};
use crate::request::{ChatRequest, Parameters};
use crate::responses::{
    Reasoning, ResponsesParameters, ResponsesRequest, ResponsesTool, ResponsesToolChoice,
    TextConfig,
};

use super::messages::{chat_messages_to_responses_items, responses_items_to_chat_messages};

impl ChatRequest {
    /// Rewrite this chat request as a Responses request.
    ///
    /// Field laws: `max_completion_tokens` becomes `max_output_tokens`,
    /// `reasoning_effort` nests under `reasoning.effort`, `verbosity` nests
    /// under `text.verbosity`; everything else common passes through.
    pub fn to_responses(&self) -> ResponsesRequest {
        let params = &self.params;

        let reasoning = params.reasoning_effort.as_ref().map(|effort| Reasoning {
            effort: Some(effort.clone()),
            summary: None,
        });

        let text = params.verbosity.as_ref().map(|verbosity| TextConfig {
            verbosity: Some(verbosity.clone()),
            format: None,
        });

        ResponsesRequest {
            input: chat_messages_to_responses_items(&self.input),
            params: ResponsesParameters {
                max_output_tokens: params.max_completion_tokens,
                temperature: params.temperature,
                top_p: params.top_p,
                instructions: None,
                previous_response_id: None,
                store: None,
                truncation: None,
                tools: params.tools.as_ref().map(|tools| {
                    tools.iter().map(chat_tool_to_responses).collect()
                }),
                tool_choice: params.tool_choice.as_ref().map(chat_tool_choice_to_responses),
                parallel_tool_calls: params.parallel_tool_calls,
                reasoning,
                text,
                service_tier: params.service_tier.clone(),
                user: params.user.clone(),
                extra_params: params.extra_params.clone(),
            },
        }
    }
}

impl ResponsesRequest {
    /// Rewrite this Responses request as a chat request.
    ///
    /// `instructions` becomes a leading system message. Fields without a chat
    /// counterpart (`previous_response_id`, `store`, `truncation`) are
    /// dropped with a debug log; this projection is one-way.
    pub fn to_chat(&self) -> ChatRequest {
        let params = &self.params;

        let mut input: Vec<ChatMessage> = Vec::with_capacity(self.input.len() + 1);
        if let Some(instructions) = &params.instructions {
            input.push(ChatMessage::text(ChatRole::System, instructions.clone()));
        }
        input.extend(responses_items_to_chat_messages(&self.input));

        for (field, set) in [
            ("previous_response_id", params.previous_response_id.is_some()),
            ("store", params.store.is_some()),
            ("truncation", params.truncation.is_some()),
        ] {
            if set {
                log::debug!("dropping `{field}`: no chat completion counterpart");
            }
        }

        ChatRequest {
            input,
            params: Parameters {
                temperature: params.temperature,
                top_p: params.top_p,
                max_completion_tokens: params.max_output_tokens,
                tools: params.tools.as_ref().map(|tools| {
                    tools.iter().filter_map(responses_tool_to_chat).collect()
                }),
                tool_choice: params.tool_choice.as_ref().and_then(responses_tool_choice_to_chat),
                parallel_tool_calls: params.parallel_tool_calls,
                reasoning_effort: params.reasoning.as_ref().and_then(|r| r.effort.clone()),
                verbosity: params.text.as_ref().and_then(|t| t.verbosity.clone()),
                service_tier: params.service_tier.clone(),
                user: params.user.clone(),
                extra_params: params.extra_params.clone(),
                ..Default::default()
            },
        }
    }
}

fn chat_tool_to_responses(tool: &ChatTool) -> ResponsesTool {
    ResponsesTool {
        tool_type: tool.tool_type.clone(),
        name: Some(tool.function.name.clone()),
        description: tool.function.description.clone(),
        parameters: tool.function.parameters.clone(),
        strict: tool.function.strict,
    }
}

fn responses_tool_to_chat(tool: &ResponsesTool) -> Option<ChatTool> {
    // Only function tools have a chat counterpart; hosted tools (file search,
    // web search, ...) stay on the Responses surface.
    if tool.tool_type != "function" {
        log::debug!("dropping `{}` tool: no chat completion counterpart", tool.tool_type);
        return None;
    }

    Some(ChatTool {
        tool_type: tool.tool_type.clone(),
        function: FunctionDefinition {
            name: tool.name.clone().unwrap_or_default(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
            strict: tool.strict,
        },
    })
}

fn chat_tool_choice_to_responses(choice: &ToolChoice) -> ResponsesToolChoice {
    match choice {
        ToolChoice::Mode(mode) => {
            let mode = match mode {
                ToolChoiceMode::None => "none",
                ToolChoiceMode::Auto => "auto",
                ToolChoiceMode::Required => "required",
            };
            ResponsesToolChoice::Mode(mode.to_string())
        }
        ToolChoice::Specific { function, .. } => ResponsesToolChoice::Named {
            choice_type: "function".to_string(),
            name: Some(function.name.clone()),
        },
    }
}

fn responses_tool_choice_to_chat(choice: &ResponsesToolChoice) -> Option<ToolChoice> {
    match choice {
        ResponsesToolChoice::Mode(mode) => {
            let mode = match mode.as_str() {
                "none" => ToolChoiceMode::None,
                "auto" => ToolChoiceMode::Auto,
                "required" => ToolChoiceMode::Required,
                other => {
                    log::debug!("dropping unknown tool choice mode `{other}`");
                    return None;
                }
            };
            Some(ToolChoice::Mode(mode))
        }
        ResponsesToolChoice::Named { name, .. } => Some(ToolChoice::Specific {
            choice_type: "function".to_string(),
            function: ToolChoiceFunction {
                name: name.clone().unwrap_or_default(),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parameter_laws_hold_in_both_directions() {
        let mut params = Parameters::default();
        params.max_completion_tokens = Some(512);
        params.reasoning_effort = Some("high".into());
        params.verbosity = Some("low".into());
        params.temperature = Some(0.1);
        params.extra_params.insert("custom".into(), json!(true));

        let chat = ChatRequest {
            input: vec![ChatMessage::text(ChatRole::User, "hi")],
            params,
        };

        let responses = chat.to_responses();
        assert_eq!(responses.params.max_output_tokens, Some(512));
        assert_eq!(
            responses.params.reasoning.as_ref().and_then(|r| r.effort.as_deref()),
            Some("high")
        );
        assert_eq!(
            responses.params.text.as_ref().and_then(|t| t.verbosity.as_deref()),
            Some("low")
        );
        assert_eq!(responses.params.extra_params.get("custom"), Some(&json!(true)));

        let back = responses.to_chat();
        assert_eq!(back.params.max_completion_tokens, Some(512));
        assert_eq!(back.params.reasoning_effort.as_deref(), Some("high"));
        assert_eq!(back.params.verbosity.as_deref(), Some("low"));
        assert_eq!(back.params.temperature, Some(0.1));
    }

    #[test]
    fn instructions_become_a_leading_system_message() {
        let mut responses = ChatRequest {
            input: vec![ChatMessage::text(ChatRole::User, "hi")],
            params: Parameters::default(),
        }
        .to_responses();
        responses.params.instructions = Some("be terse".into());

        let chat = responses.to_chat();
        assert_eq!(chat.input[0].role, ChatRole::System);
        assert_eq!(chat.input[0].content, Some(crate::ChatContent::Text("be terse".into())));
        assert_eq!(chat.input[1].role, ChatRole::User);
    }

    #[test]
    fn function_tools_round_trip_and_hosted_tools_drop() {
        let mut params = Parameters::default();
        params.tools = Some(vec![ChatTool {
            tool_type: "function".into(),
            function: FunctionDefinition {
                name: "lookup".into(),
                description: Some("find things".into()),
                parameters: Some(json!({"type": "object"})),
                strict: Some(true),
            },
        }]);

        let chat = ChatRequest {
            input: vec![],
            params,
        };

        let mut responses = chat.to_responses();
        assert_eq!(responses.params.tools.as_ref().unwrap()[0].name.as_deref(), Some("lookup"));

        responses.params.tools.as_mut().unwrap().push(ResponsesTool {
            tool_type: "web_search".into(),
            name: None,
            description: None,
            parameters: None,
            strict: None,
        });

        let back = responses.to_chat();
        let tools = back.params.tools.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].function.name, "lookup");
    }
}
