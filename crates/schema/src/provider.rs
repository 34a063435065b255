use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of an upstream provider.
///
/// The gateway routes a request to exactly one provider; fallbacks name
/// further `(provider, model)` pairs to try in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    Azure,
    Anthropic,
    Bedrock,
    Cohere,
    Vertex,
    Gemini,
    Groq,
    Ollama,
    OpenRouter,
    Mistral,
    Cerebras,
    Parasail,
    Sgl,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Anthropic => "anthropic",
            Self::Bedrock => "bedrock",
            Self::Cohere => "cohere",
            Self::Vertex => "vertex",
            Self::Gemini => "gemini",
            Self::Groq => "groq",
            Self::Ollama => "ollama",
            Self::OpenRouter => "openrouter",
            Self::Mistral => "mistral",
            Self::Cerebras => "cerebras",
            Self::Parasail => "parasail",
            Self::Sgl => "sgl",
        }
    }

    /// Providers that authenticate without an API key value.
    ///
    /// Vertex and Bedrock may also run with an empty key value, but they
    /// authenticate through their key sub-config rather than being keyless.
    pub fn is_keyless(&self) -> bool {
        matches!(self, Self::Ollama | Self::Sgl)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
