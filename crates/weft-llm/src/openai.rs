use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use serde_json::{json, Value};
use tokio_stream::StreamExt;

use weft_types::{Result, WeftError};

use crate::{
    EmbeddingRequest, EmbeddingResponse, FinishReason, ImageRequest, ImageResponse, ModelCatalog,
    ProviderAdapter, ProviderRoute, Request, Response, SseLineBuffer, StreamEvent, Usage,
};

// ---------------------------------------------------------------------------
// OpenAiCompatAdapter
// ---------------------------------------------------------------------------

/// Adapter for any endpoint speaking the OpenAI chat-completions dialect
/// (OpenAI itself, OpenRouter, local gateways).
pub struct OpenAiCompatAdapter {
    route: ProviderRoute,
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    catalog: ModelCatalog,
}

impl OpenAiCompatAdapter {
    pub fn new(
        route: ProviderRoute,
        client: reqwest::Client,
        api_key: String,
        base_url: String,
    ) -> Self {
        Self {
            route,
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            catalog: ModelCatalog::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn model_id(&self, model: &str) -> String {
        match self.route {
            ProviderRoute::OpenRouter => self.catalog.routed_id(model),
            ProviderRoute::OpenAi => model.to_string(),
        }
    }

    fn build_chat_body(&self, request: &Request, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model_id(&request.model),
            "messages": request.messages,
            "stream": stream,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    fn transport_error(&self, e: reqwest::Error) -> WeftError {
        WeftError::Provider {
            provider: self.route.name().into(),
            status: 0,
            message: e.to_string(),
        }
    }

    fn request(&self, path: &str, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .header("X-Title", "Weft")
            .json(body)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        tracing::debug!(provider = self.route.name(), path, "Provider request");
        let resp = self
            .request(path, body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(map_error(self.route.name(), status, &text));
        }

        serde_json::from_str(&text).map_err(|e| WeftError::Provider {
            provider: self.route.name().into(),
            status: status.as_u16(),
            message: format!("Failed to parse response JSON: {e}"),
        })
    }
}

fn parse_usage(usage: &Value) -> Option<Usage> {
    let input = usage["prompt_tokens"].as_u64()?;
    Some(Usage {
        input_tokens: input,
        output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
    })
}

fn parse_chat_response(body: &Value) -> Response {
    let choice = &body["choices"][0];
    Response {
        id: body["id"].as_str().unwrap_or("").to_string(),
        text: choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string(),
        usage: parse_usage(&body["usage"]).unwrap_or_default(),
        model: body["model"].as_str().unwrap_or("").to_string(),
        finish_reason: FinishReason::from_openai(choice["finish_reason"].as_str()),
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(provider: &str, status: reqwest::StatusCode, body: &str) -> WeftError {
    tracing::warn!(provider, status = status.as_u16(), "Provider returned error status");
    match status.as_u16() {
        401 | 403 => WeftError::Auth {
            provider: provider.into(),
        },
        code => WeftError::Provider {
            provider: provider.into(),
            status: code,
            message: extract_error_message(body),
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        self.route.name()
    }

    fn default_model(&self) -> &str {
        "gpt-4o"
    }

    async fn complete(&self, request: &Request) -> Result<Response> {
        tracing::info!(
            model = %request.model,
            messages = request.messages.len(),
            "LLM request"
        );
        let body = self.build_chat_body(request, false);
        let json = self.post_json("chat/completions", &body).await?;
        let response = parse_chat_response(&json);
        tracing::info!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish = ?response.finish_reason,
            "LLM response"
        );
        Ok(response)
    }

    fn stream(&self, request: &Request) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send + '_>> {
        let body = self.build_chat_body(request, true);
        tracing::info!(
            model = %request.model,
            messages = request.messages.len(),
            "LLM stream request"
        );

        Box::pin(async_stream::stream! {
            let resp = match self.request("chat/completions", &body).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(provider = self.route.name(), error = %e, "Stream request failed");
                    yield StreamEvent::Error(Arc::new(self.transport_error(e)));
                    return;
                }
            };

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                yield StreamEvent::Error(Arc::new(map_error(self.route.name(), status, &text)));
                return;
            }

            let mut bytes = Box::pin(resp.bytes_stream());
            let mut lines = SseLineBuffer::new();
            let mut usage = None;
            let mut finish_reason = FinishReason::EndTurn;

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::warn!(provider = self.route.name(), error = %e, "Stream interrupted");
                        yield StreamEvent::Error(Arc::new(self.transport_error(e)));
                        return;
                    }
                };

                for data in lines.feed(&chunk) {
                    if data == "[DONE]" {
                        tracing::debug!(provider = self.route.name(), ?usage, finish = ?finish_reason, "Stream done");
                        yield StreamEvent::MessageEnd { usage, finish_reason };
                        return;
                    }
                    let Ok(event) = serde_json::from_str::<Value>(&data) else {
                        tracing::debug!(provider = self.route.name(), "Skipping non-JSON SSE data");
                        continue;
                    };
                    if let Some(message) = event["error"]["message"].as_str() {
                        tracing::warn!(provider = self.route.name(), error = message, "Provider error in stream");
                        yield StreamEvent::Error(Arc::new(WeftError::Provider {
                            provider: self.route.name().into(),
                            status: 200,
                            message: message.to_string(),
                        }));
                        return;
                    }
                    let choice = &event["choices"][0];
                    if let Some(text) = choice["delta"]["content"].as_str() {
                        if !text.is_empty() {
                            yield StreamEvent::ContentDelta { text: text.to_string() };
                        }
                    }
                    if let Some(reason) = choice["finish_reason"].as_str() {
                        finish_reason = FinishReason::from_openai(Some(reason));
                    }
                    if let Some(u) = parse_usage(&event["usage"]) {
                        usage = Some(u);
                    }
                }
            }

            yield StreamEvent::MessageEnd { usage, finish_reason };
        })
    }

    async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        let mut body = json!({
            "model": request.model,
            "input": request.input,
        });
        if let Some(dims) = request.dimensions {
            body["dimensions"] = json!(dims);
        }
        let json = self.post_json("embeddings", &body).await?;

        let vector = json["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| WeftError::Provider {
                provider: self.route.name().into(),
                status: 200,
                message: "embedding response has no vector".into(),
            })?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(EmbeddingResponse {
            model: json["model"].as_str().unwrap_or(&request.model).to_string(),
            vector,
            input_tokens: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        })
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<ImageResponse> {
        let mut body = json!({
            "model": request.model,
            "prompt": request.prompt,
            "size": request.size,
            "n": 1,
        });
        if let Some(ref quality) = request.quality {
            body["quality"] = json!(quality);
        }
        let json = self.post_json("images/generations", &body).await?;

        let image = &json["data"][0];
        let url = image["url"].as_str().ok_or_else(|| WeftError::Provider {
            provider: self.route.name().into(),
            status: 200,
            message: "image response has no url".into(),
        })?;

        Ok(ImageResponse {
            url: url.to_string(),
            revised_prompt: image["revised_prompt"].as_str().map(String::from),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
