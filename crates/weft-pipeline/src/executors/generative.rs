use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_stream::StreamExt;

use weft_llm::{
    approx_tokens, image_cost, EmbeddingRequest, ImageRequest, Message, ModelCatalog,
    ProviderAdapter, ProviderFactory, ProviderRoute, Request, StreamEvent, Usage,
};
use weft_schema::NodeSpec;
use weft_types::{NodeMetrics, Result, Secrets, WeftError};

use super::{fail, number_field, require, Credential, OPENAI_API_KEY, OPENROUTER_API_KEY};
use crate::executor::{value_to_text, ChunkSink, NodeExecutor, NodeInputs, NodeOutput};

const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";

/// Resolve the provider after checking the credential, so a missing key
/// reports as a credential error naming the node's service.
fn provider_for(
    providers: &dyn ProviderFactory,
    route: ProviderRoute,
    env: &Secrets,
    service: &str,
    credential: Credential,
) -> Result<Arc<dyn ProviderAdapter>> {
    require(env, service, credential)?;
    providers.build(route, env)
}

fn no_input(node: &NodeSpec, what: &str) -> WeftError {
    fail(node, format!("No {what}: connect an upstream node"))
}

// ---------------------------------------------------------------------------
// ChatExecutor: llm, summarizer, transform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatKind {
    Llm,
    Summarizer,
    Transform,
}

impl ChatKind {
    fn node_type(self) -> &'static str {
        match self {
            ChatKind::Llm => "llm",
            ChatKind::Summarizer => "summarizer",
            ChatKind::Transform => "transform",
        }
    }

    fn service(self) -> &'static str {
        match self {
            ChatKind::Llm => "LLM",
            ChatKind::Summarizer => "Summarizer",
            ChatKind::Transform => "Transform",
        }
    }

    fn model_field(self) -> &'static str {
        match self {
            ChatKind::Llm => "model",
            ChatKind::Summarizer => "summaryModel",
            ChatKind::Transform => "transformModel",
        }
    }
}

/// Streams a chat completion through OpenRouter, forwarding each delta as
/// a `node_chunk` event.
pub struct ChatExecutor {
    kind: ChatKind,
    providers: Arc<dyn ProviderFactory>,
    catalog: ModelCatalog,
}

impl ChatExecutor {
    fn new(kind: ChatKind, providers: Arc<dyn ProviderFactory>) -> Self {
        Self {
            kind,
            providers,
            catalog: ModelCatalog::new(),
        }
    }

    pub fn llm(providers: Arc<dyn ProviderFactory>) -> Self {
        Self::new(ChatKind::Llm, providers)
    }

    pub fn summarizer(providers: Arc<dyn ProviderFactory>) -> Self {
        Self::new(ChatKind::Summarizer, providers)
    }

    pub fn transform(providers: Arc<dyn ProviderFactory>) -> Self {
        Self::new(ChatKind::Transform, providers)
    }

    fn build_request(&self, node: &NodeSpec, inputs: &NodeInputs) -> Result<Request> {
        let model = node.str_or(self.kind.model_field(), DEFAULT_CHAT_MODEL);

        let (system, prompt) = match self.kind {
            ChatKind::Llm => {
                let system = node
                    .str_field("systemPrompt")
                    .filter(|s| !s.trim().is_empty())
                    .or_else(|| inputs.lookup("system").map(value_to_text));
                let prompt = match inputs.lookup("prompt") {
                    Some(p) => value_to_text(p),
                    None => inputs
                        .iter()
                        .filter(|u| u.handle.as_deref() != Some("system"))
                        .map(|u| value_to_text(&u.value))
                        .collect::<Vec<_>>()
                        .join("\n\n"),
                };
                (system, prompt)
            }
            ChatKind::Summarizer => {
                let style = node.str_or("summaryStyle", "Concise");
                let length = node.str_or("summaryLength", "Short");
                let system = format!(
                    "Summarize the user's text. Style: {style}. Target length: {length}. \
                     Reply with the summary only."
                );
                (Some(system), inputs.joined_text("\n\n"))
            }
            ChatKind::Transform => {
                let instruction = node.str_or("transformFn", "Return the input unchanged.");
                let system = format!(
                    "Apply this transformation to the user's input and reply with the \
                     result only:\n{instruction}"
                );
                (Some(system), inputs.joined_text("\n\n"))
            }
        };

        if prompt.trim().is_empty() {
            return Err(no_input(node, "prompt"));
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        let mut request = Request::new(model, messages);
        request.temperature = number_field(node, "temperature").map(|t| t as f32);
        request.max_tokens = number_field(node, "maxTokens")
            .filter(|n| *n >= 1.0)
            .map(|n| n as u32);
        Ok(request)
    }
}

#[async_trait]
impl NodeExecutor for ChatExecutor {
    fn node_type(&self) -> &str {
        self.kind.node_type()
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        env: &Secrets,
        chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let provider = provider_for(
            self.providers.as_ref(),
            ProviderRoute::OpenRouter,
            env,
            self.kind.service(),
            OPENROUTER_API_KEY,
        )?;
        let request = self.build_request(node, inputs)?;
        tracing::info!(node = %node.id, model = %request.model, provider = provider.name(), "Streaming completion");

        let mut text = String::new();
        let mut usage: Option<Usage> = None;
        let mut stream = provider.stream(&request);
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::ContentDelta { text: delta } => {
                    chunks.send(delta.clone()).await?;
                    text.push_str(&delta);
                }
                StreamEvent::MessageEnd { usage: reported, .. } => {
                    usage = reported;
                    break;
                }
                StreamEvent::Error(e) => {
                    return Err(Arc::try_unwrap(e)
                        .unwrap_or_else(|shared| WeftError::Other(shared.to_string())));
                }
            }
        }

        let usage = usage.unwrap_or(Usage {
            input_tokens: approx_tokens(request.prompt_chars()),
            output_tokens: approx_tokens(text.chars().count()),
        });
        let cost = self
            .catalog
            .cost(&request.model, usage.input_tokens, usage.output_tokens);
        Ok(NodeOutput::new(
            text,
            NodeMetrics::new(cost, usage.input_tokens, usage.output_tokens),
        ))
    }
}

// ---------------------------------------------------------------------------
// ClassifierExecutor
// ---------------------------------------------------------------------------

pub struct ClassifierExecutor {
    providers: Arc<dyn ProviderFactory>,
    catalog: ModelCatalog,
}

impl ClassifierExecutor {
    pub fn new(providers: Arc<dyn ProviderFactory>) -> Self {
        Self {
            providers,
            catalog: ModelCatalog::new(),
        }
    }
}

/// Map the model's reply onto a configured label: exact match scores 1.0,
/// a reply containing a label 0.8, anything else the first label at 0.0.
fn match_label(reply: &str, labels: &[String]) -> (String, f64) {
    let reply = reply.trim().trim_matches(|c: char| c == '.' || c == '"').to_lowercase();
    if let Some(label) = labels.iter().find(|l| l.to_lowercase() == reply) {
        return (label.clone(), 1.0);
    }
    if let Some(label) = labels.iter().find(|l| reply.contains(&l.to_lowercase())) {
        return (label.clone(), 0.8);
    }
    let fallback = labels.first().cloned().unwrap_or_else(|| "unknown".into());
    (fallback, 0.0)
}

#[async_trait]
impl NodeExecutor for ClassifierExecutor {
    fn node_type(&self) -> &str {
        "classifier"
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let provider = provider_for(
            self.providers.as_ref(),
            ProviderRoute::OpenRouter,
            env,
            "Classifier",
            OPENROUTER_API_KEY,
        )?;
        let labels: Vec<String> = node
            .str_or("labels", "positive, negative, neutral")
            .split(',')
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        let text = inputs.joined_text("\n\n");
        if text.trim().is_empty() {
            return Err(no_input(node, "text to classify"));
        }

        let model = node.str_or("classifierModel", DEFAULT_CHAT_MODEL);
        let mut request = Request::new(
            model,
            vec![
                Message::system(format!(
                    "Classify the user's text into exactly one of these labels: {}. \
                     Reply with the label only.",
                    labels.join(", ")
                )),
                Message::user(text),
            ],
        );
        request.temperature = Some(0.0);
        request.max_tokens = Some(16);

        let response = provider.complete(&request).await?;
        let (label, score) = match_label(&response.text, &labels);
        let cost = self.catalog.cost(
            &request.model,
            response.usage.input_tokens,
            response.usage.output_tokens,
        );
        Ok(NodeOutput::new(
            json!({ "label": label, "score": score }),
            NodeMetrics::new(cost, response.usage.input_tokens, response.usage.output_tokens),
        ))
    }
}

// ---------------------------------------------------------------------------
// EmbedderExecutor / ImageGenExecutor
// ---------------------------------------------------------------------------

pub struct EmbedderExecutor {
    providers: Arc<dyn ProviderFactory>,
    catalog: ModelCatalog,
}

impl EmbedderExecutor {
    pub fn new(providers: Arc<dyn ProviderFactory>) -> Self {
        Self {
            providers,
            catalog: ModelCatalog::new(),
        }
    }
}

#[async_trait]
impl NodeExecutor for EmbedderExecutor {
    fn node_type(&self) -> &str {
        "embedder"
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let provider = provider_for(
            self.providers.as_ref(),
            ProviderRoute::OpenAi,
            env,
            "Embedder",
            OPENAI_API_KEY,
        )?;
        let input = inputs.joined_text("\n");
        if input.trim().is_empty() {
            return Err(no_input(node, "text to embed"));
        }
        let model = node.str_or("embeddingModel", DEFAULT_EMBEDDING_MODEL);
        // Only the text-embedding-3 family accepts a dimensions override.
        let dimensions = number_field(node, "dimensions")
            .filter(|_| model.starts_with("text-embedding-3"))
            .map(|d| d as u32);

        let response = provider
            .embed(&EmbeddingRequest {
                model: model.clone(),
                input,
                dimensions,
            })
            .await?;
        let cost = self.catalog.cost(&model, response.input_tokens, 0);
        Ok(NodeOutput::new(
            json!({
                "model": response.model,
                "dimensions": response.vector.len(),
                "vector": response.vector,
            }),
            NodeMetrics::new(cost, response.input_tokens, 0),
        ))
    }
}

pub struct ImageGenExecutor {
    providers: Arc<dyn ProviderFactory>,
}

impl ImageGenExecutor {
    pub fn new(providers: Arc<dyn ProviderFactory>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl NodeExecutor for ImageGenExecutor {
    fn node_type(&self) -> &str {
        "imageGen"
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let provider = provider_for(
            self.providers.as_ref(),
            ProviderRoute::OpenAi,
            env,
            "Image Gen",
            OPENAI_API_KEY,
        )?;
        let prompt = inputs.joined_text("\n");
        if prompt.trim().is_empty() {
            return Err(no_input(node, "image prompt"));
        }
        let model = node.str_or("imageModel", DEFAULT_IMAGE_MODEL);
        let quality = node
            .str_field("quality")
            .filter(|_| model.contains("dall-e-3"));

        let image = provider
            .generate_image(&ImageRequest {
                model: model.clone(),
                prompt,
                size: node.str_or("imageSize", "1024x1024"),
                quality,
            })
            .await?;
        tracing::info!(node = %node.id, model = %model, "Image generated");
        Ok(NodeOutput::new(image.url, NodeMetrics::new(image_cost(&model), 0, 0)))
    }
}
