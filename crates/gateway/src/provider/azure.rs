//! Azure OpenAI adapter.
//!
//! Same wire shapes as OpenAI, different addressing and auth: requests go to
//! `{endpoint}/openai/deployments/{deployment}/{path}?api-version={v}`,
//! authenticated with the `api-key` header or a caller-supplied OAuth bearer
//! from the request context.

use async_trait::async_trait;
use http::HeaderMap;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use schema::{AzureKeyConfig, GatewayError, Key, ProviderId, Request, RequestType, Response};
use secrecy::ExposeSecret;

use crate::config::ProviderConfig;
use crate::context::RequestContext;
use crate::http::{build_client, build_streaming_client, merge_extra_headers, sse_headers, trim_base_url};
use crate::provider::openai_like::{ChatBody, SseStreamParams, encode_body, spawn_chat_sse_stream};
use crate::provider::responses_bridge::{self, StreamShape};
use crate::provider::{Provider, util};
use crate::{ProviderResult, ResponseStream};

const DEFAULT_API_VERSION: &str = "2024-02-01";

pub struct AzureProvider {
    client: Client,
    stream_client: Client,
    config: ProviderConfig,
}

impl AzureProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        Ok(Self {
            client: build_client(&config)?,
            stream_client: build_streaming_client(&config)?,
            config,
        })
    }

    fn key_config(key: &Key) -> ProviderResult<&AzureKeyConfig> {
        let azure = key.azure.as_ref().ok_or_else(|| {
            Box::new(GatewayError::configuration("azure keys require endpoint configuration"))
        })?;

        if azure.endpoint.is_empty() {
            return Err(Box::new(GatewayError::configuration(
                "azure key endpoint must not be empty",
            )));
        }

        Ok(azure)
    }

    /// Deployment for a model: the configured mapping, or the model name
    /// itself when resources are named after models.
    fn url(azure: &AzureKeyConfig, model: &str, path: &str) -> String {
        let deployment = azure
            .deployments
            .get(model)
            .map(String::as_str)
            .unwrap_or(model);
        let api_version = azure.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION);

        format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            trim_base_url(&azure.endpoint),
            deployment,
            path,
            api_version
        )
    }

    fn headers(&self, ctx: &RequestContext, key: &Key, sse: bool) -> ProviderResult<HeaderMap> {
        let mut headers = if sse { sse_headers() } else { HeaderMap::new() };
        headers.insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json"));

        if let Some(secret) = key.secret() {
            let mut value = http::HeaderValue::from_str(secret).map_err(|_| {
                Box::new(GatewayError::configuration("API key contains invalid header characters"))
            })?;
            value.set_sensitive(true);
            headers.insert("api-key", value);
        } else if let Some(token) = &ctx.bearer_token {
            let mut value = http::HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|_| {
                    Box::new(GatewayError::configuration("bearer token contains invalid header characters"))
                })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        } else {
            return Err(Box::new(GatewayError::configuration(
                "azure requires an api key or a bearer token in the request context",
            )));
        }

        merge_extra_headers(&mut headers, &self.config.extra_headers);
        Ok(headers)
    }

    async fn unary_json(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
        path: &str,
        body: Vec<u8>,
        request_type: RequestType,
    ) -> ProviderResult<Response> {
        let azure = Self::key_config(key)?;
        let builder = self
            .client
            .post(Self::url(azure, &request.model, path))
            .headers(self.headers(ctx, key, false)?)
            .body(body);

        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Azure, request_type, None))?;

        if !(200..300).contains(&dispatched.status) {
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                ProviderId::Azure,
                request_type,
                Some(dispatched.latency_ms),
            ));
        }

        let mut response: Response = sonic_rs::from_slice(&dispatched.body).map_err(|e| {
            util::stamp_error(GatewayError::unmarshal(e), ProviderId::Azure, request_type, None)
        })?;

        util::stamp_response(
            &mut response,
            ProviderId::Azure,
            request_type,
            &request.model,
            dispatched.latency_ms,
            util::raw_value(self.config.send_back_raw_response, &dispatched.body),
        );

        Ok(response)
    }

    async fn chat_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
        chat: &schema::ChatRequest,
        shape: StreamShape,
    ) -> ProviderResult<ResponseStream> {
        let azure = Self::key_config(key)?;
        let body = encode_body(
            ProviderId::Azure,
            shape.request_type,
            &ChatBody::new(&request.model, chat, Some(true)),
        )?;

        let builder = self
            .stream_client
            .post(Self::url(azure, &request.model, "chat/completions"))
            .headers(self.headers(ctx, key, true)?)
            .body(body);

        let upstream = util::send_with_cancellation(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Azure, shape.request_type, None))?;

        let status = upstream.status();
        if !status.is_success() {
            let body = upstream.bytes().await.unwrap_or_default();
            return Err(util::stamp_error(
                util::error_from_body(status.as_u16(), &body),
                ProviderId::Azure,
                shape.request_type,
                None,
            ));
        }

        Ok(spawn_chat_sse_stream(
            ctx,
            shape,
            SseStreamParams {
                provider: ProviderId::Azure,
                model_requested: request.model.clone(),
                buffer_size: self.config.stream_buffer_size,
                send_raw: self.config.send_back_raw_response,
            },
            upstream,
        ))
    }
}

#[async_trait]
impl Provider for AzureProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Azure
    }

    async fn chat_completion(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let request_type = util::begin(&self.config, ProviderId::Azure, request, false)?;
        let chat = util::chat_input(request, request_type)?;

        let body = encode_body(
            ProviderId::Azure,
            request_type,
            &ChatBody::new(&request.model, chat, None),
        )?;
        self.unary_json(ctx, key, request, "chat/completions", body, request_type)
            .await
    }

    async fn chat_completion_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        let request_type = util::begin(&self.config, ProviderId::Azure, request, true)?;
        let chat = util::chat_input(request, request_type)?;
        self.chat_stream(ctx, key, request, chat, StreamShape::chat(ctx)).await
    }

    async fn embedding(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        util::ensure_allowed(&self.config, ProviderId::Azure, RequestType::Embedding)?;
        let embedding = util::embedding_input(request)?;

        #[derive(serde::Serialize)]
        struct EmbeddingBody<'a> {
            input: &'a schema::EmbeddingInput,
            #[serde(flatten)]
            params: &'a schema::EmbeddingParameters,
        }

        let body = encode_body(
            ProviderId::Azure,
            RequestType::Embedding,
            &EmbeddingBody {
                input: &embedding.input,
                params: &embedding.params,
            },
        )?;
        self.unary_json(ctx, key, request, "embeddings", body, RequestType::Embedding)
            .await
    }

    async fn responses(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        util::ensure_allowed(&self.config, ProviderId::Azure, RequestType::Responses)?;
        let chat = responses_bridge::chat_from_responses(request, RequestType::Responses)?;

        let body = encode_body(
            ProviderId::Azure,
            RequestType::Responses,
            &ChatBody::new(&request.model, &chat, None),
        )?;
        let mut response = self
            .unary_json(
                ctx,
                key,
                request,
                "chat/completions",
                body,
                RequestType::Responses,
            )
            .await?;
        response.to_responses_only();
        Ok(response)
    }

    async fn responses_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        util::ensure_allowed(&self.config, ProviderId::Azure, RequestType::ResponsesStream)?;
        let chat = responses_bridge::chat_from_responses(request, RequestType::ResponsesStream)?;
        self.chat_stream(ctx, key, request, &chat, StreamShape::responses(ctx))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn azure_config(api_version: Option<&str>) -> AzureKeyConfig {
        AzureKeyConfig {
            endpoint: "https://my-resource.openai.azure.com/".to_string(),
            deployments: BTreeMap::from([("gpt-4o".to_string(), "prod-gpt4o".to_string())]),
            api_version: api_version.map(str::to_string),
        }
    }

    #[test]
    fn urls_use_deployments_and_default_api_version() {
        let azure = azure_config(None);

        insta::assert_snapshot!(
            AzureProvider::url(&azure, "gpt-4o", "chat/completions"),
            @"https://my-resource.openai.azure.com/openai/deployments/prod-gpt4o/chat/completions?api-version=2024-02-01"
        );

        // Unmapped models address a deployment of the same name.
        insta::assert_snapshot!(
            AzureProvider::url(&azure, "gpt-35", "embeddings"),
            @"https://my-resource.openai.azure.com/openai/deployments/gpt-35/embeddings?api-version=2024-02-01"
        );
    }

    #[test]
    fn configured_api_version_wins() {
        let azure = azure_config(Some("2024-10-21"));
        let url = AzureProvider::url(&azure, "gpt-4o", "chat/completions");
        assert!(url.ends_with("api-version=2024-10-21"));
    }

    #[test]
    fn missing_azure_config_is_a_configuration_error() {
        let key = Key::new("k", "secret");
        let error = AzureProvider::key_config(&key).unwrap_err();
        assert_eq!(error.kind, Some(schema::ErrorKind::Configuration));
    }
}
