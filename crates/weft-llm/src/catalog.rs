use std::collections::HashMap;

// ---------------------------------------------------------------------------
// ModelInfo / ModelCatalog
// ---------------------------------------------------------------------------

/// USD per 1K prompt / completion tokens used when a model is not in the catalog.
pub const DEFAULT_INPUT_PER_1K: f64 = 0.005;
pub const DEFAULT_OUTPUT_PER_1K: f64 = 0.015;

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub vendor: String,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Static model table: vendor prefix for routed providers and token pricing.
pub struct ModelCatalog {
    models: HashMap<String, ModelInfo>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        let mut models = HashMap::new();

        for (id, vendor, input, output) in [
            ("gpt-4o", "openai", 0.0025, 0.01),
            ("gpt-4o-mini", "openai", 0.00015, 0.0006),
            ("gpt-4-turbo", "openai", 0.01, 0.03),
            ("gpt-3.5-turbo", "openai", 0.0005, 0.0015),
            ("claude-3-5-sonnet", "anthropic", 0.003, 0.015),
            ("claude-3-haiku", "anthropic", 0.00025, 0.00125),
            ("text-embedding-3-small", "openai", 0.00002, 0.0),
            ("text-embedding-3-large", "openai", 0.00013, 0.0),
            ("text-embedding-ada-002", "openai", 0.0001, 0.0),
        ] {
            models.insert(
                id.to_string(),
                ModelInfo {
                    id: id.to_string(),
                    vendor: vendor.to_string(),
                    input_per_1k: input,
                    output_per_1k: output,
                },
            );
        }

        Self { models }
    }

    pub fn lookup(&self, model: &str) -> Option<&ModelInfo> {
        self.models.get(model)
    }

    /// Dollar cost of a call. Unknown models use the default rates.
    pub fn cost(&self, model: &str, tokens_in: u64, tokens_out: u64) -> f64 {
        let (input, output) = self
            .lookup(model)
            .map(|m| (m.input_per_1k, m.output_per_1k))
            .unwrap_or((DEFAULT_INPUT_PER_1K, DEFAULT_OUTPUT_PER_1K));
        (tokens_in as f64 * input + tokens_out as f64 * output) / 1000.0
    }

    /// Routed model id (`vendor/model`) for aggregators such as OpenRouter.
    /// Ids that already carry a vendor prefix pass through.
    pub fn routed_id(&self, model: &str) -> String {
        if model.contains('/') {
            return model.to_string();
        }
        match self.lookup(model) {
            Some(info) => format!("{}/{}", info.vendor, model),
            None if model.starts_with("claude") => format!("anthropic/{model}"),
            None if model.starts_with("gemini") => format!("google/{model}"),
            None => format!("openai/{model}"),
        }
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Flat per-image price: DALL-E 3 costs more than everything else.
pub fn image_cost(model: &str) -> f64 {
    if model.contains("dall-e-3") {
        0.04
    } else {
        0.02
    }
}

/// Rough token estimate (four characters per token) for providers that do
/// not report usage.
pub fn approx_tokens(chars: usize) -> u64 {
    chars.div_ceil(4) as u64
}
