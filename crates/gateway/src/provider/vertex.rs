//! Google Vertex AI adapter.
//!
//! Two sub-dialects: Claude models use the Anthropic schema at the
//! `publishers/anthropic` endpoints with the Vertex anthropic version; other
//! models use the OpenAI-compatible chat endpoint. Authentication is an OAuth2
//! bearer obtained from a service-account JWT (or application-default
//! credentials), cached in a process-scoped pool keyed by the SHA-256 of the
//! credentials JSON. 401/403 responses and construction failures evict the
//! cached entry, so an expired token rebuilds on the next call.

use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use schema::{GatewayError, Key, ProviderId, Request, RequestType, Response, VertexKeyConfig};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::config::ProviderConfig;
use crate::context::RequestContext;
use crate::http::{sse_headers, trim_base_url};
use crate::provider::anthropic::input::AnthropicRequest;
use crate::provider::anthropic::output::{
    AnthropicResponse, AnthropicStreamEvent, AnthropicStreamState, StreamStep,
};
use crate::provider::openai_like::{ChatBody, SseStreamParams, spawn_chat_sse_stream};
use crate::provider::responses_bridge::{self, StreamShape};
use crate::provider::{Provider, util};
use crate::stream::{Delivery, StreamProducer};
use crate::{ProviderResult, ResponseStream};

const VERTEX_ANTHROPIC_VERSION: &str = "vertex-2023-10-16";
const OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Process-scoped pool of authenticated clients, keyed by credential hash.
static CLIENT_POOL: LazyLock<ClientPool> = LazyLock::new(ClientPool::new);

pub struct VertexProvider {
    config: ProviderConfig,
}

impl VertexProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        Ok(Self { config })
    }

    fn key_config(key: &Key) -> ProviderResult<&VertexKeyConfig> {
        key.vertex.as_ref().ok_or_else(|| {
            Box::new(GatewayError::configuration(
                "vertex keys require project_id and region configuration",
            ))
        })
    }

    fn base_url(&self, vertex: &VertexKeyConfig) -> String {
        match &self.config.base_url {
            Some(url) => trim_base_url(url),
            None => format!("https://{}-aiplatform.googleapis.com", vertex.region),
        }
    }

    fn is_claude_model(model: &str) -> bool {
        model.contains("claude")
    }

    /// Resolve the service-account credentials JSON: the key's own, or the
    /// application-default credentials file.
    fn credentials_json(vertex: &VertexKeyConfig) -> ProviderResult<String> {
        if let Some(credentials) = &vertex.credentials {
            return Ok(credentials.expose_secret().to_string());
        }

        let path = std::env::var("GOOGLE_APPLICATION_CREDENTIALS").map_err(|_| {
            Box::new(GatewayError::configuration(
                "vertex key has no credentials and GOOGLE_APPLICATION_CREDENTIALS is not set",
            ))
        })?;

        std::fs::read_to_string(&path).map_err(|e| {
            Box::new(GatewayError::configuration(format!(
                "failed to read application default credentials from {path}: {e}"
            )))
        })
    }

    async fn authed_clients(&self, vertex: &VertexKeyConfig) -> ProviderResult<AuthedClients> {
        let credentials = Self::credentials_json(vertex)?;
        let pool_key = ClientPool::pool_key(&credentials);

        if let Some(clients) = CLIENT_POOL.get(&pool_key) {
            return Ok(clients);
        }

        let clients = build_authenticated_clients(&self.config, &credentials).await?;
        Ok(CLIENT_POOL.insert_first_writer_wins(pool_key, clients))
    }

    /// Evict the pooled client when the upstream rejects its token.
    fn evict_on_auth_failure(vertex: &VertexKeyConfig, status: u16) {
        if (status == 401 || status == 403)
            && let Ok(credentials) = Self::credentials_json(vertex)
        {
            CLIENT_POOL.evict(&ClientPool::pool_key(&credentials));
        }
    }

    fn claude_body(
        model: &str,
        chat: &schema::ChatRequest,
        stream: bool,
    ) -> Result<Vec<u8>, GatewayError> {
        let request = AnthropicRequest::from_chat(model, chat, stream)?;

        // The Vertex dialect carries the version in the body and the model in
        // the URL.
        let mut value = serde_json::to_value(&request).map_err(GatewayError::marshaling)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("model");
            map.insert("anthropic_version".to_string(), json!(VERTEX_ANTHROPIC_VERSION));
        }

        serde_json::to_vec(&value).map_err(GatewayError::marshaling)
    }

    async fn claude_chat(
        &self,
        ctx: &RequestContext,
        vertex: &VertexKeyConfig,
        request: &Request,
        chat: &schema::ChatRequest,
        request_type: RequestType,
    ) -> ProviderResult<Response> {
        let clients = self.authed_clients(vertex).await?;
        let url = format!(
            "{}/v1/projects/{}/locations/{}/publishers/anthropic/models/{}:rawPredict",
            self.base_url(vertex),
            vertex.project_id,
            vertex.region,
            request.model
        );

        let body = Self::claude_body(&request.model, chat, false)
            .map_err(|e| util::stamp_error(e, ProviderId::Vertex, request_type, None))?;

        let builder = clients.unary.post(&url).json_headers().body(body);
        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Vertex, request_type, None))?;

        if !(200..300).contains(&dispatched.status) {
            Self::evict_on_auth_failure(vertex, dispatched.status);
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                ProviderId::Vertex,
                request_type,
                Some(dispatched.latency_ms),
            ));
        }

        let parsed: AnthropicResponse = sonic_rs::from_slice(&dispatched.body).map_err(|e| {
            util::stamp_error(GatewayError::unmarshal(e), ProviderId::Vertex, request_type, None)
        })?;

        let mut response = parsed.into_response();
        response.model = request.model.clone();
        util::stamp_response(
            &mut response,
            ProviderId::Vertex,
            request_type,
            &request.model,
            dispatched.latency_ms,
            util::raw_value(self.config.send_back_raw_response, &dispatched.body),
        );

        Ok(response)
    }

    async fn claude_chat_stream(
        &self,
        ctx: &RequestContext,
        vertex: &VertexKeyConfig,
        request: &Request,
        chat: &schema::ChatRequest,
        shape: StreamShape,
    ) -> ProviderResult<ResponseStream> {
        let clients = self.authed_clients(vertex).await?;
        let url = format!(
            "{}/v1/projects/{}/locations/{}/publishers/anthropic/models/{}:streamRawPredict",
            self.base_url(vertex),
            vertex.project_id,
            vertex.region,
            request.model
        );

        let body = Self::claude_body(&request.model, chat, true)
            .map_err(|e| util::stamp_error(e, ProviderId::Vertex, shape.request_type, None))?;

        let builder = clients
            .streaming
            .post(&url)
            .headers(sse_headers())
            .json_headers()
            .body(body);

        let upstream = util::send_with_cancellation(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Vertex, shape.request_type, None))?;

        let status = upstream.status();
        if !status.is_success() {
            Self::evict_on_auth_failure(vertex, status.as_u16());
            let body = upstream.bytes().await.unwrap_or_default();
            return Err(util::stamp_error(
                util::error_from_body(status.as_u16(), &body),
                ProviderId::Vertex,
                shape.request_type,
                None,
            ));
        }

        let (mut producer, rx) = StreamProducer::new(
            ctx,
            shape.hooks,
            ProviderId::Vertex,
            shape.request_type,
            self.config.stream_buffer_size,
        );
        let model_requested = request.model.clone();
        let send_raw = self.config.send_back_raw_response;
        let emit_head = shape.emit_head;

        tokio::spawn(async move {
            if emit_head && responses_bridge::emit_head_events(&mut producer).await == Delivery::Closed
            {
                return;
            }

            let mut events = upstream.bytes_stream().eventsource();
            let mut state = AnthropicStreamState::new();

            loop {
                let Some(event) = events.next().await else { break };

                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        producer.fail(GatewayError::transport(e)).await;
                        return;
                    }
                };

                let parsed: AnthropicStreamEvent = match sonic_rs::from_str(&event.data) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        log::warn!("skipping undecodable vertex stream event: {e}");
                        continue;
                    }
                };

                match state.step(parsed) {
                    StreamStep::Continue => {}
                    StreamStep::Chunk(mut chunk) => {
                        chunk.model = model_requested.clone();
                        if send_raw {
                            chunk.extra.raw_response = util::raw_value(true, event.data.as_bytes());
                        }
                        chunk.extra.model_requested = Some(model_requested.clone());

                        if producer.send(chunk.into()).await == Delivery::Closed {
                            return;
                        }
                    }
                    StreamStep::Done(mut terminal) => {
                        terminal.model = model_requested.clone();
                        terminal.extra.model_requested = Some(model_requested.clone());
                        producer.finish(terminal.into()).await;
                        return;
                    }
                    StreamStep::Failed { error_type, message } => {
                        let error = GatewayError {
                            kind: Some(schema::ErrorKind::ProviderApiError),
                            error: schema::ErrorBody {
                                error_type: Some(error_type),
                                message,
                                ..Default::default()
                            },
                            ..Default::default()
                        };
                        producer.fail(error).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn openai_chat(
        &self,
        ctx: &RequestContext,
        vertex: &VertexKeyConfig,
        request: &Request,
        chat: &schema::ChatRequest,
        request_type: RequestType,
    ) -> ProviderResult<Response> {
        let clients = self.authed_clients(vertex).await?;
        let url = format!(
            "{}/v1beta1/projects/{}/locations/{}/endpoints/openapi/chat/completions",
            self.base_url(vertex),
            vertex.project_id,
            vertex.region
        );

        let body = sonic_rs::to_vec(&ChatBody::new(&request.model, chat, None)).map_err(|e| {
            util::stamp_error(GatewayError::marshaling(e), ProviderId::Vertex, request_type, None)
        })?;

        let builder = clients.unary.post(&url).json_headers().body(body);
        let dispatched = util::dispatch(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Vertex, request_type, None))?;

        if !(200..300).contains(&dispatched.status) {
            Self::evict_on_auth_failure(vertex, dispatched.status);
            return Err(util::stamp_error(
                util::error_from_body(dispatched.status, &dispatched.body),
                ProviderId::Vertex,
                request_type,
                Some(dispatched.latency_ms),
            ));
        }

        let mut response: Response = sonic_rs::from_slice(&dispatched.body).map_err(|e| {
            util::stamp_error(GatewayError::unmarshal(e), ProviderId::Vertex, request_type, None)
        })?;

        util::stamp_response(
            &mut response,
            ProviderId::Vertex,
            request_type,
            &request.model,
            dispatched.latency_ms,
            util::raw_value(self.config.send_back_raw_response, &dispatched.body),
        );

        Ok(response)
    }

    async fn openai_chat_stream(
        &self,
        ctx: &RequestContext,
        vertex: &VertexKeyConfig,
        request: &Request,
        chat: &schema::ChatRequest,
        shape: StreamShape,
    ) -> ProviderResult<ResponseStream> {
        let clients = self.authed_clients(vertex).await?;
        let url = format!(
            "{}/v1beta1/projects/{}/locations/{}/endpoints/openapi/chat/completions",
            self.base_url(vertex),
            vertex.project_id,
            vertex.region
        );

        let body = sonic_rs::to_vec(&ChatBody::new(&request.model, chat, Some(true))).map_err(|e| {
            util::stamp_error(
                GatewayError::marshaling(e),
                ProviderId::Vertex,
                shape.request_type,
                None,
            )
        })?;

        // The pooled client carries its own Authorization header; no key
        // value is attached here.
        let builder = clients
            .streaming
            .post(&url)
            .headers(sse_headers())
            .json_headers()
            .body(body);

        let upstream = util::send_with_cancellation(ctx, builder)
            .await
            .map_err(|e| util::stamp_error(*e, ProviderId::Vertex, shape.request_type, None))?;

        let status = upstream.status();
        if !status.is_success() {
            Self::evict_on_auth_failure(vertex, status.as_u16());
            let body = upstream.bytes().await.unwrap_or_default();
            return Err(util::stamp_error(
                util::error_from_body(status.as_u16(), &body),
                ProviderId::Vertex,
                shape.request_type,
                None,
            ));
        }

        Ok(spawn_chat_sse_stream(
            ctx,
            shape,
            SseStreamParams {
                provider: ProviderId::Vertex,
                model_requested: request.model.clone(),
                buffer_size: self.config.stream_buffer_size,
                send_raw: self.config.send_back_raw_response,
            },
            upstream,
        ))
    }
}

#[async_trait]
impl Provider for VertexProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Vertex
    }

    async fn chat_completion(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        let request_type = util::begin(&self.config, ProviderId::Vertex, request, false)?;
        let chat = util::chat_input(request, request_type)?;
        let vertex = Self::key_config(key)?;

        if Self::is_claude_model(&request.model) {
            self.claude_chat(ctx, vertex, request, chat, request_type).await
        } else {
            self.openai_chat(ctx, vertex, request, chat, request_type).await
        }
    }

    async fn chat_completion_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        let request_type = util::begin(&self.config, ProviderId::Vertex, request, true)?;
        let chat = util::chat_input(request, request_type)?;
        let vertex = Self::key_config(key)?;

        if Self::is_claude_model(&request.model) {
            self.claude_chat_stream(ctx, vertex, request, chat, StreamShape::chat(ctx))
                .await
        } else {
            self.openai_chat_stream(ctx, vertex, request, chat, StreamShape::chat(ctx))
                .await
        }
    }

    async fn responses(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<Response> {
        util::ensure_allowed(&self.config, ProviderId::Vertex, RequestType::Responses)?;
        let chat = responses_bridge::chat_from_responses(request, RequestType::Responses)?;
        let vertex = Self::key_config(key)?;

        let mut response = if Self::is_claude_model(&request.model) {
            self.claude_chat(ctx, vertex, request, &chat, RequestType::Responses)
                .await?
        } else {
            self.openai_chat(ctx, vertex, request, &chat, RequestType::Responses)
                .await?
        };

        response.to_responses_only();
        Ok(response)
    }

    async fn responses_stream(
        &self,
        ctx: &RequestContext,
        key: &Key,
        request: &Request,
    ) -> ProviderResult<ResponseStream> {
        util::ensure_allowed(&self.config, ProviderId::Vertex, RequestType::ResponsesStream)?;
        let chat = responses_bridge::chat_from_responses(request, RequestType::ResponsesStream)?;
        let vertex = Self::key_config(key)?;

        if Self::is_claude_model(&request.model) {
            self.claude_chat_stream(ctx, vertex, request, &chat, StreamShape::responses(ctx))
                .await
        } else {
            self.openai_chat_stream(ctx, vertex, request, &chat, StreamShape::responses(ctx))
                .await
        }
    }
}

/// The pooled pair: a timed unary client and an untimed streaming client,
/// both carrying the OAuth bearer as a default header.
#[derive(Clone)]
pub(crate) struct AuthedClients {
    pub unary: Client,
    pub streaming: Client,
}

pub(crate) struct ClientPool {
    entries: DashMap<[u8; 32], AuthedClients>,
}

impl ClientPool {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub(crate) fn pool_key(credentials: &str) -> [u8; 32] {
        let digest = Sha256::digest(credentials.as_bytes());
        digest.into()
    }

    pub(crate) fn get(&self, key: &[u8; 32]) -> Option<AuthedClients> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Atomic insert; a concurrent loser's clients are dropped and the first
    /// writer's entry is returned.
    pub(crate) fn insert_first_writer_wins(
        &self,
        key: [u8; 32],
        clients: AuthedClients,
    ) -> AuthedClients {
        self.entries.entry(key).or_insert(clients).value().clone()
    }

    pub(crate) fn evict(&self, key: &[u8; 32]) {
        self.entries.remove(key);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Deserialize)]
struct ServiceAccount {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(serde::Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchange a service-account JWT for an access token and build the client
/// pair with the bearer installed as a default header.
async fn build_authenticated_clients(
    config: &ProviderConfig,
    credentials: &str,
) -> ProviderResult<AuthedClients> {
    let account: ServiceAccount = serde_json::from_str(credentials).map_err(|e| {
        Box::new(GatewayError::configuration(format!(
            "invalid vertex service account credentials: {e}"
        )))
    })?;

    let token_uri = account
        .token_uri
        .as_deref()
        .unwrap_or("https://oauth2.googleapis.com/token");

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();

    let claims = JwtClaims {
        iss: &account.client_email,
        scope: OAUTH_SCOPE,
        aud: token_uri,
        iat: now,
        exp: now + 3600,
    };

    let encoding_key =
        jsonwebtoken::EncodingKey::from_rsa_pem(account.private_key.as_bytes()).map_err(|e| {
            Box::new(GatewayError::configuration(format!(
                "invalid vertex service account private key: {e}"
            )))
        })?;

    let assertion = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256),
        &claims,
        &encoding_key,
    )
    .map_err(|e| Box::new(GatewayError::configuration(format!("failed to sign vertex JWT: {e}"))))?;

    let exchange_client = crate::http::build_client(config)?;
    let response = exchange_client
        .post(token_uri)
        .form(&[("grant_type", JWT_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await
        .map_err(|e| Box::new(GatewayError::transport(e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.bytes().await.unwrap_or_default();
        log::error!("vertex token exchange failed with status {}", status.as_u16());
        return Err(Box::new(util::error_from_body(status.as_u16(), &body)));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| Box::new(GatewayError::unmarshal(e)))?;

    let mut headers = http::HeaderMap::new();
    let mut bearer = http::HeaderValue::from_str(&format!("Bearer {}", token.access_token))
        .map_err(|_| Box::new(GatewayError::configuration("vertex access token is not header-safe")))?;
    bearer.set_sensitive(true);
    headers.insert(http::header::AUTHORIZATION, bearer);

    // The bearer is installed as a client default header rather than per
    // request, so the adapter attaches no Authorization of its own.
    let unary = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .default_headers(headers.clone())
        .build()
        .map_err(|e| Box::new(GatewayError::configuration(format!("failed to build vertex client: {e}"))))?;

    let streaming = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .default_headers(headers)
        .build()
        .map_err(|e| {
            Box::new(GatewayError::configuration(format!(
                "failed to build vertex streaming client: {e}"
            )))
        })?;

    Ok(AuthedClients { unary, streaming })
}

/// Small extension to keep JSON content-type application uniform.
trait JsonHeaders {
    fn json_headers(self) -> Self;
}

impl JsonHeaders for reqwest::RequestBuilder {
    fn json_headers(self) -> Self {
        self.header(http::header::CONTENT_TYPE, "application/json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_clients() -> AuthedClients {
        AuthedClients {
            unary: Client::new(),
            streaming: Client::new(),
        }
    }

    #[test]
    fn pool_keys_are_stable_per_credentials() {
        let a = ClientPool::pool_key(r#"{"client_email":"a"}"#);
        let b = ClientPool::pool_key(r#"{"client_email":"b"}"#);
        assert_ne!(a, b);
        assert_eq!(a, ClientPool::pool_key(r#"{"client_email":"a"}"#));
    }

    #[test]
    fn pool_insert_is_first_writer_wins() {
        let pool = ClientPool::new();
        let key = ClientPool::pool_key("creds");

        pool.insert_first_writer_wins(key, dummy_clients());
        assert_eq!(pool.len(), 1);

        // A second writer does not replace the entry.
        pool.insert_first_writer_wins(key, dummy_clients());
        assert_eq!(pool.len(), 1);
        assert!(pool.get(&key).is_some());
    }

    #[test]
    fn eviction_removes_the_entry_and_allows_rebuild() {
        let pool = ClientPool::new();
        let key = ClientPool::pool_key("creds");

        pool.insert_first_writer_wins(key, dummy_clients());
        pool.evict(&key);
        assert!(pool.get(&key).is_none());

        pool.insert_first_writer_wins(key, dummy_clients());
        assert!(pool.get(&key).is_some());
    }

    #[test]
    fn claude_models_are_detected_by_name() {
        assert!(VertexProvider::is_claude_model("claude-sonnet-4@20250514"));
        assert!(!VertexProvider::is_claude_model("gemini-2.0-flash"));
    }

    #[test]
    fn claude_body_swaps_model_for_anthropic_version() {
        let chat = schema::ChatRequest {
            input: vec![schema::ChatMessage::text(schema::ChatRole::User, "hi")],
            params: schema::Parameters::default(),
        };

        let body = VertexProvider::claude_body("claude-sonnet-4", &chat, false).unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();

        assert!(value.get("model").is_none());
        assert_eq!(value["anthropic_version"], VERTEX_ANTHROPIC_VERSION);
    }
}
