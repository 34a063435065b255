use serde::{Deserialize, Serialize};

/// Token accounting as reported by the provider.
///
/// The prompt/completion/total triple is the Chat Completions shape. The
/// optional input/output fields mirror the Responses API shape; response
/// conversions remap between the two and recompute the total when a provider
/// omits it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens_details: Option<InputTokensDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens_details: Option<OutputTokensDetails>,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32, total_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
            ..Default::default()
        }
    }

    /// Rewrite into the Responses input/output shape.
    pub fn into_responses_shape(mut self) -> Self {
        self.input_tokens = Some(self.input_tokens.unwrap_or(self.prompt_tokens));
        self.output_tokens = Some(self.output_tokens.unwrap_or(self.completion_tokens));
        if self.total_tokens == 0 {
            self.total_tokens = self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0);
        }
        self
    }

    /// Rewrite into the prompt/completion shape.
    pub fn into_chat_shape(mut self) -> Self {
        if let Some(input) = self.input_tokens.take() {
            self.prompt_tokens = input;
        }
        if let Some(output) = self.output_tokens.take() {
            self.completion_tokens = output;
        }
        if self.total_tokens == 0 {
            self.total_tokens = self.prompt_tokens + self.completion_tokens;
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputTokensDetails {
    #[serde(default)]
    pub cached_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTokensDetails {
    #[serde(default)]
    pub reasoning_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_tokens: Option<u32>,
}

/// Token accounting for speech and transcription operations.
///
/// Disjoint from [`Usage`]: audio endpoints report input/output token splits
/// with an audio/text breakdown and never report prompt/completion fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_token_details: Option<AudioTokenDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTokenDetails {
    #[serde(default)]
    pub text_tokens: u32,
    #[serde(default)]
    pub audio_tokens: u32,
}

/// Billing units reported by providers that meter separately from tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BilledUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_units: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifications: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_shape_fills_totals_from_chat_fields() {
        let usage = Usage::new(3, 4, 0).into_responses_shape();
        assert_eq!(usage.input_tokens, Some(3));
        assert_eq!(usage.output_tokens, Some(4));
        assert_eq!(usage.total_tokens, 7);
    }

    #[test]
    fn chat_shape_lifts_input_output_fields() {
        let usage = Usage {
            input_tokens: Some(10),
            output_tokens: Some(5),
            ..Default::default()
        };

        let usage = usage.into_chat_shape();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
        assert_eq!(usage.input_tokens, None);
    }
}
