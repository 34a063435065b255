use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Embedding input union.
///
/// Exactly one variant is inhabited. Unmarshal tries the most specific shape
/// first: nested token batches, then token lists, then string lists, then the
/// bare string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    TokenBatches(Vec<Vec<u32>>),
    Tokens(Vec<u32>),
    Texts(Vec<String>),
    Text(String),
}

impl EmbeddingInput {
    /// Number of inputs represented.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(_) | Self::Tokens(_) => 1,
            Self::Texts(texts) => texts.len(),
            Self::TokenBatches(batches) => batches.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Tokens(tokens) => tokens.is_empty(),
            Self::Texts(texts) => texts.is_empty(),
            Self::TokenBatches(batches) => batches.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub input: EmbeddingInput,
    #[serde(flatten)]
    pub params: EmbeddingParameters,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingParameters {
    /// `float` or `base64`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(flatten, skip_serializing_if = "Map::is_empty")]
    pub extra_params: Map<String, Value>,
}

/// One embedding vector in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub index: u32,
    pub object: String,
    pub embedding: EmbeddingValue,
}

/// Vector payload: float list or base64-packed floats, per the requested
/// encoding format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingValue {
    Floats(Vec<f32>),
    Base64(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_union_discriminates_token_shapes() {
        let tokens: EmbeddingInput = serde_json::from_str("[1,2,3]").unwrap();
        assert_eq!(tokens, EmbeddingInput::Tokens(vec![1, 2, 3]));

        let batches: EmbeddingInput = serde_json::from_str("[[1,2],[3]]").unwrap();
        assert_eq!(batches, EmbeddingInput::TokenBatches(vec![vec![1, 2], vec![3]]));

        let texts: EmbeddingInput = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(texts, EmbeddingInput::Texts(vec!["a".into(), "b".into()]));

        let text: EmbeddingInput = serde_json::from_str(r#""a""#).unwrap();
        assert_eq!(text, EmbeddingInput::Text("a".into()));
    }

    #[test]
    fn input_union_round_trips() {
        for input in [
            EmbeddingInput::Text("x".into()),
            EmbeddingInput::Texts(vec!["x".into(), "y".into()]),
            EmbeddingInput::Tokens(vec![7, 8]),
            EmbeddingInput::TokenBatches(vec![vec![7], vec![8, 9]]),
        ] {
            let json = serde_json::to_string(&input).unwrap();
            assert_eq!(serde_json::from_str::<EmbeddingInput>(&json).unwrap(), input);
        }
    }
}
