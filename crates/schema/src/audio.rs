//! Speech synthesis and transcription payloads.

use serde::{Deserialize, Serialize};

use crate::usage::AudioUsage;

/// Voice selection: a single named voice or a multi-speaker configuration.
///
/// Unmarshal order: the configuration list is tried before the bare name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoiceInput {
    MultiVoice(Vec<VoiceConfig>),
    Voice(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub speaker: String,
    pub voice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechRequest {
    /// Text to synthesize.
    pub input: String,
    pub voice: VoiceInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Audio container, e.g. `mp3`, `wav`, `pcm`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeechResponse {
    /// Raw audio bytes; for streaming, the bytes carried by this chunk.
    pub audio: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<AudioUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionRequest {
    /// Raw audio bytes to transcribe.
    pub file: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResponse {
    /// Transcribed text; for streaming, the delta carried by this chunk.
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<AudioUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_union_round_trips_both_variants() {
        let named = VoiceInput::Voice("alloy".into());
        let json = serde_json::to_string(&named).unwrap();
        assert_eq!(json, r#""alloy""#);
        assert_eq!(serde_json::from_str::<VoiceInput>(&json).unwrap(), named);

        let multi = VoiceInput::MultiVoice(vec![VoiceConfig {
            speaker: "narrator".into(),
            voice: "echo".into(),
        }]);
        let json = serde_json::to_string(&multi).unwrap();
        assert_eq!(serde_json::from_str::<VoiceInput>(&json).unwrap(), multi);
    }
}
