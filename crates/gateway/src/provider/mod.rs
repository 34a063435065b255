//! The provider contract and its adapters.

mod util;

pub mod anthropic;
pub mod azure;
pub mod bedrock;
pub mod cohere;
pub mod gemini;
pub mod openai;
pub mod openai_like;
pub mod vertex;

mod responses_bridge;

use async_trait::async_trait;
use schema::{Key, ProviderId, Request, RequestType, Response};

use crate::context::RequestContext;
use crate::{ProviderResult, ResponseStream};

/// The eleven-operation provider surface.
///
/// Adapters override the operations they support; the rest fail fast with
/// `UnsupportedOperation` before any work. Implementations uphold the shared
/// guarantees: input validation before network I/O, `RequestCancelled` on
/// context cancellation, `ProviderRequestTimedOut` on deadline expiry,
/// wall-clock latency and the exact request type echoed on every response
/// and error, and the decoded upstream body attached when the provider was
/// configured with send-back-raw.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn text_completion(
        &self,
        _ctx: &RequestContext,
        _key: &Key,
        _request: &Request,
    ) -> ProviderResult<Response> {
        Err(util::unsupported(self.id(), RequestType::TextCompletion))
    }

    async fn text_completion_stream(
        &self,
        _ctx: &RequestContext,
        _key: &Key,
        _request: &Request,
    ) -> ProviderResult<ResponseStream> {
        Err(util::unsupported(self.id(), RequestType::TextCompletionStream))
    }

    async fn chat_completion(
        &self,
        _ctx: &RequestContext,
        _key: &Key,
        _request: &Request,
    ) -> ProviderResult<Response> {
        Err(util::unsupported(self.id(), RequestType::ChatCompletion))
    }

    async fn chat_completion_stream(
        &self,
        _ctx: &RequestContext,
        _key: &Key,
        _request: &Request,
    ) -> ProviderResult<ResponseStream> {
        Err(util::unsupported(self.id(), RequestType::ChatCompletionStream))
    }

    async fn responses(
        &self,
        _ctx: &RequestContext,
        _key: &Key,
        _request: &Request,
    ) -> ProviderResult<Response> {
        Err(util::unsupported(self.id(), RequestType::Responses))
    }

    async fn responses_stream(
        &self,
        _ctx: &RequestContext,
        _key: &Key,
        _request: &Request,
    ) -> ProviderResult<ResponseStream> {
        Err(util::unsupported(self.id(), RequestType::ResponsesStream))
    }

    async fn embedding(
        &self,
        _ctx: &RequestContext,
        _key: &Key,
        _request: &Request,
    ) -> ProviderResult<Response> {
        Err(util::unsupported(self.id(), RequestType::Embedding))
    }

    async fn speech(
        &self,
        _ctx: &RequestContext,
        _key: &Key,
        _request: &Request,
    ) -> ProviderResult<Response> {
        Err(util::unsupported(self.id(), RequestType::Speech))
    }

    async fn speech_stream(
        &self,
        _ctx: &RequestContext,
        _key: &Key,
        _request: &Request,
    ) -> ProviderResult<ResponseStream> {
        Err(util::unsupported(self.id(), RequestType::SpeechStream))
    }

    async fn transcription(
        &self,
        _ctx: &RequestContext,
        _key: &Key,
        _request: &Request,
    ) -> ProviderResult<Response> {
        Err(util::unsupported(self.id(), RequestType::Transcription))
    }

    async fn transcription_stream(
        &self,
        _ctx: &RequestContext,
        _key: &Key,
        _request: &Request,
    ) -> ProviderResult<ResponseStream> {
        Err(util::unsupported(self.id(), RequestType::TranscriptionStream))
    }
}
