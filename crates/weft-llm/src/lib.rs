//! OpenAI-compatible LLM client for Weft generative nodes.
//!
//! Provides the `ProviderAdapter` trait, a `ProviderFactory` that builds
//! adapters from a run's secrets, an OpenRouter/OpenAI HTTP adapter with
//! streaming, and the model pricing catalog used for cost metrics.

mod catalog;
mod openai;
mod provider;
mod sse;
mod types;

pub use catalog::*;
pub use openai::OpenAiCompatAdapter;
pub use provider::*;
pub use sse::SseLineBuffer;
pub use types::*;
