use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;

use weft_types::{Result, Secrets, WeftError};

use crate::{
    EmbeddingRequest, EmbeddingResponse, ImageRequest, ImageResponse, OpenAiCompatAdapter,
    Request, Response, StreamEvent,
};

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    async fn complete(&self, request: &Request) -> Result<Response>;
    fn stream(&self, request: &Request) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>>;

    async fn embed(&self, _request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        Err(WeftError::Other(format!(
            "Provider {} does not support embeddings",
            self.name()
        )))
    }

    async fn generate_image(&self, _request: &ImageRequest) -> Result<ImageResponse> {
        Err(WeftError::Other(format!(
            "Provider {} does not support image generation",
            self.name()
        )))
    }
}

// ---------------------------------------------------------------------------
// ProviderRoute
// ---------------------------------------------------------------------------

/// Which upstream a generative node talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderRoute {
    /// Chat-style nodes (llm, summarizer, classifier, transform).
    OpenRouter,
    /// Embeddings and image generation.
    OpenAi,
}

impl ProviderRoute {
    pub fn name(self) -> &'static str {
        match self {
            ProviderRoute::OpenRouter => "openrouter",
            ProviderRoute::OpenAi => "openai",
        }
    }

    /// Secret holding the API key.
    pub fn credential(self) -> &'static str {
        match self {
            ProviderRoute::OpenRouter => "OPENROUTER_API_KEY",
            ProviderRoute::OpenAi => "OPENAI_API_KEY",
        }
    }

    /// Optional secret overriding the base URL (self-hosted gateways, tests).
    pub fn base_url_key(self) -> &'static str {
        match self {
            ProviderRoute::OpenRouter => "OPENROUTER_BASE_URL",
            ProviderRoute::OpenAi => "OPENAI_BASE_URL",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderRoute::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderRoute::OpenAi => "https://api.openai.com/v1",
        }
    }
}

// ---------------------------------------------------------------------------
// ProviderFactory
// ---------------------------------------------------------------------------

/// Builds a provider for one node execution from that run's secrets.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, route: ProviderRoute, env: &Secrets) -> Result<Arc<dyn ProviderAdapter>>;
}

/// Default factory: OpenAI-compatible HTTP adapters.
#[derive(Debug, Clone)]
pub struct HttpProviderFactory {
    client: reqwest::Client,
}

impl HttpProviderFactory {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WeftError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn build(&self, route: ProviderRoute, env: &Secrets) -> Result<Arc<dyn ProviderAdapter>> {
        let api_key = env.get(route.credential()).ok_or_else(|| WeftError::Auth {
            provider: route.name().into(),
        })?;
        let base_url = env
            .get(route.base_url_key())
            .unwrap_or(route.default_base_url());
        Ok(Arc::new(OpenAiCompatAdapter::new(
            route,
            self.client.clone(),
            api_key.to_string(),
            base_url.to_string(),
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
