//! Credential shapes.
//!
//! A [`Key`] is an opaque secret value plus optional provider-specific
//! sub-config. The gateway selects one key per request through an injected
//! selector or the weighted-random default.

use std::collections::BTreeMap;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Key {
    pub id: String,

    /// The secret value. May be empty for keyless providers (Ollama, SGL) and
    /// for Vertex/Bedrock keys that authenticate through their sub-config.
    #[serde(default)]
    pub value: Option<SecretString>,

    /// Relative weight for load-balancing across keys.
    #[serde(default = "default_weight")]
    pub weight: f32,

    /// Models this key may serve; empty means all.
    #[serde(default)]
    pub models: Vec<String>,

    #[serde(default)]
    pub openai: Option<OpenAiKeyConfig>,
    #[serde(default)]
    pub azure: Option<AzureKeyConfig>,
    #[serde(default)]
    pub vertex: Option<VertexKeyConfig>,
    #[serde(default)]
    pub bedrock: Option<BedrockKeyConfig>,
}

fn default_weight() -> f32 {
    1.0
}

impl Key {
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: Some(SecretString::from(value.into())),
            weight: 1.0,
            models: Vec::new(),
            openai: None,
            azure: None,
            vertex: None,
            bedrock: None,
        }
    }

    /// The secret value, when present and non-empty.
    pub fn secret(&self) -> Option<&str> {
        self.value
            .as_ref()
            .map(ExposeSecret::expose_secret)
            .filter(|value| !value.is_empty())
    }

    /// Whether this key may serve `model`.
    ///
    /// An empty allow-list matches everything. `substring_match` switches
    /// between substring and exact comparison.
    pub fn allows_model(&self, model: &str, substring_match: bool) -> bool {
        if self.models.is_empty() {
            return true;
        }

        self.models.iter().any(|allowed| {
            if substring_match {
                model.contains(allowed.as_str())
            } else {
                allowed == model
            }
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiKeyConfig {
    /// Route Responses requests to the native `/v1/responses` endpoint
    /// instead of bridging through chat completions.
    #[serde(default)]
    pub use_responses_api: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzureKeyConfig {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: String,
    /// Model name to deployment name.
    #[serde(default)]
    pub deployments: BTreeMap<String, String>,
    #[serde(default)]
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VertexKeyConfig {
    pub project_id: String,
    pub region: String,
    /// Service-account credentials JSON. Absent means application-default
    /// credentials.
    #[serde(default)]
    pub credentials: Option<SecretString>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BedrockKeyConfig {
    #[serde(default)]
    pub access_key: Option<SecretString>,
    #[serde(default)]
    pub secret_key: Option<SecretString>,
    #[serde(default)]
    pub session_token: Option<SecretString>,
    #[serde(default)]
    pub region: Option<String>,
    /// Inference-profile ARN applied to models without an explicit mapping.
    #[serde(default)]
    pub arn: Option<String>,
    /// Model name to inference-profile ARN.
    #[serde(default)]
    pub deployments: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_matches_everything() {
        let key = Key::new("k1", "sk-x");
        assert!(key.allows_model("gpt-4o", false));
        assert!(key.allows_model("anything", true));
    }

    #[test]
    fn allow_list_supports_exact_and_substring_matching() {
        let mut key = Key::new("k1", "sk-x");
        key.models = vec!["gpt-4o".to_string()];

        assert!(key.allows_model("gpt-4o", false));
        assert!(!key.allows_model("gpt-4o-mini", false));
        assert!(key.allows_model("gpt-4o-mini", true));
        assert!(!key.allows_model("claude-sonnet", true));
    }

    #[test]
    fn empty_value_is_not_a_secret() {
        let mut key = Key::new("k1", "");
        assert_eq!(key.secret(), None);

        key.value = Some(SecretString::from("sk-y".to_string()));
        assert_eq!(key.secret(), Some("sk-y"));
    }
}
