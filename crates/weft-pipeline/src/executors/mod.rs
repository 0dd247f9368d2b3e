//! Built-in node executors, one per node type.
//!
//! Data and control executors are pure functions of their configuration
//! and predecessor results. Generative and integration executors call out
//! over HTTP and each requires its own named credential.

mod control;
mod data;
mod generative;
mod integration;
mod io;

pub use control::{ConditionalExecutor, DelayExecutor, FilterExecutor, LoopExecutor};
pub use data::{
    CalculatorExecutor, CsvParserExecutor, JoinExecutor, JsonParserExecutor, SplitExecutor,
    TextExecutor,
};
pub use generative::{ChatExecutor, ClassifierExecutor, EmbedderExecutor, ImageGenExecutor};
pub use integration::{
    ApiExecutor, EmailExecutor, GitHubExecutor, GoogleSheetsExecutor, HttpContext,
    NotionExecutor, SlackWebhookExecutor, VectorDbExecutor, WebScraperExecutor,
};
pub use io::{InputExecutor, OutputExecutor};

use std::sync::{Arc, OnceLock};

use regex::{Captures, Regex};
use serde_json::Value;

use weft_llm::ProviderFactory;
use weft_schema::NodeSpec;
use weft_types::{Result, Secrets, WeftError};

use crate::engine::EngineConfig;
use crate::executor::{value_to_text, ExecutorRegistry, NodeInputs};

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// A secret an executor needs, and how error messages name it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Credential {
    pub key: &'static str,
    pub label: &'static str,
}

impl Credential {
    pub const fn named(key: &'static str) -> Self {
        Self { key, label: key }
    }

    pub const fn labelled(key: &'static str, label: &'static str) -> Self {
        Self { key, label }
    }
}

pub(crate) const OPENROUTER_API_KEY: Credential = Credential::named("OPENROUTER_API_KEY");
pub(crate) const OPENAI_API_KEY: Credential = Credential::named("OPENAI_API_KEY");
pub(crate) const SLACK_WEBHOOK_URL: Credential = Credential::named("SLACK_WEBHOOK_URL");
pub(crate) const SENDGRID_API_KEY: Credential = Credential::named("SENDGRID_API_KEY");
pub(crate) const GITHUB_TOKEN: Credential = Credential::labelled("GITHUB_TOKEN", "GitHub Token");
pub(crate) const GOOGLE_SHEETS_API_KEY: Credential =
    Credential::labelled("GOOGLE_SHEETS_API_KEY", "API Key");
pub(crate) const NOTION_TOKEN: Credential = Credential::labelled("NOTION_TOKEN", "Notion Token");
pub(crate) const PINECONE_API_KEY: Credential = Credential::named("PINECONE_API_KEY");
pub(crate) const PINECONE_HOST: Credential = Credential::named("PINECONE_HOST");

/// Secret names the CLI forwards from the process environment.
pub const KNOWN_CREDENTIALS: &[&str] = &[
    "OPENROUTER_API_KEY",
    "OPENROUTER_BASE_URL",
    "OPENAI_API_KEY",
    "OPENAI_BASE_URL",
    "SLACK_WEBHOOK_URL",
    "SENDGRID_API_KEY",
    "GITHUB_TOKEN",
    "GOOGLE_SHEETS_API_KEY",
    "NOTION_TOKEN",
    "PINECONE_API_KEY",
    "PINECONE_HOST",
];

/// The secret's value, or a credential error naming `service`.
pub(crate) fn require<'a>(env: &'a Secrets, service: &str, credential: Credential) -> Result<&'a str> {
    env.get(credential.key)
        .ok_or_else(|| WeftError::missing_credential(service, credential.label))
}

/// An executor failure attributed to `node`.
pub(crate) fn fail(node: &NodeSpec, message: impl Into<String>) -> WeftError {
    WeftError::Executor {
        executor: node.node_type.clone(),
        node: node.id.clone(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([a-zA-Z_$][a-zA-Z0-9_$]*)\s*\}\}").expect("literal pattern")
    })
}

/// Replace `{{name}}` with the matching upstream value. `{{input}}` falls
/// back to the first upstream value; other unknown names stay as written.
pub(crate) fn render_template(template: &str, inputs: &NodeInputs) -> String {
    placeholder_pattern()
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            let value = inputs.lookup(name).or_else(|| {
                if name == "input" {
                    inputs.first()
                } else {
                    None
                }
            });
            match value {
                Some(v) => value_to_text(v),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// A numeric config field; numeric strings count.
pub(crate) fn number_field(node: &NodeSpec, key: &str) -> Option<f64> {
    match node.data.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decode `\n`, `\t`, `\r` and `\\` typed literally into a config field.
pub(crate) fn decode_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Default registry factory
// ---------------------------------------------------------------------------

/// Registry with every built-in executor. Generative executors build their
/// provider per call through `providers`.
pub fn default_registry(
    config: &EngineConfig,
    providers: Arc<dyn ProviderFactory>,
) -> Result<ExecutorRegistry> {
    let http = HttpContext::new(config.http_timeout)?;

    let mut reg = ExecutorRegistry::new();
    reg.register(InputExecutor);
    reg.register(OutputExecutor);

    reg.register(TextExecutor);
    reg.register(JoinExecutor);
    reg.register(SplitExecutor);
    reg.register(JsonParserExecutor);
    reg.register(CsvParserExecutor);
    reg.register(CalculatorExecutor);

    reg.register(FilterExecutor);
    reg.register(ConditionalExecutor);
    reg.register(LoopExecutor);
    reg.register(DelayExecutor::new(config.max_delay));

    reg.register(ChatExecutor::llm(providers.clone()));
    reg.register(ChatExecutor::summarizer(providers.clone()));
    reg.register(ChatExecutor::transform(providers.clone()));
    reg.register(ClassifierExecutor::new(providers.clone()));
    reg.register(EmbedderExecutor::new(providers.clone()));
    reg.register(ImageGenExecutor::new(providers));

    reg.register(ApiExecutor::new(http.clone()));
    reg.register(WebScraperExecutor::new(http.clone()));
    reg.register(SlackWebhookExecutor::new(http.clone()));
    reg.register(EmailExecutor::new(http.clone()));
    reg.register(GitHubExecutor::new(http.clone()));
    reg.register(GoogleSheetsExecutor::new(http.clone()));
    reg.register(NotionExecutor::new(http.clone()));
    reg.register(VectorDbExecutor::new(http));
    Ok(reg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Upstream;
    use crate::registry::NodeTypeRegistry;
    use serde_json::json;
    use std::time::Duration;

    struct NoProviders;

    impl ProviderFactory for NoProviders {
        fn build(
            &self,
            route: weft_llm::ProviderRoute,
            _env: &Secrets,
        ) -> Result<Arc<dyn weft_llm::ProviderAdapter>> {
            Err(WeftError::Auth {
                provider: route.name().into(),
            })
        }
    }

    #[test]
    fn require_reports_service_and_label() {
        let env = Secrets::new();
        let err = require(&env, "GitHub", GITHUB_TOKEN).unwrap_err();
        assert_eq!(err.to_string(), "GitHub Error: GitHub Token missing in settings.");

        let mut env = Secrets::new();
        env.insert("OPENAI_API_KEY", "sk-test");
        assert_eq!(require(&env, "Embedder", OPENAI_API_KEY).unwrap(), "sk-test");
    }

    #[test]
    fn template_renders_known_names_and_keeps_unknown() {
        let inputs = NodeInputs::new(vec![Upstream {
            node_id: "in1".into(),
            node_type: "customInput".into(),
            alias: Some("topic".into()),
            handle: None,
            value: json!("rust"),
        }]);
        assert_eq!(
            render_template("Write about {{ topic }} and {{missing}}", &inputs),
            "Write about rust and {{missing}}"
        );
        assert_eq!(render_template("{{input}}!", &inputs), "rust!");
    }

    #[test]
    fn escapes_decoded() {
        assert_eq!(decode_escapes("a\\nb\\tc"), "a\nb\tc");
        assert_eq!(decode_escapes("x\\qy\\"), "x\\qy\\");
    }

    #[test]
    fn default_registry_covers_catalog() {
        let reg = default_registry(
            &EngineConfig::default().with_http_timeout(Duration::from_secs(1)),
            Arc::new(NoProviders),
        )
        .unwrap();
        for descriptor in NodeTypeRegistry::builtin().all() {
            assert!(reg.has(&descriptor.node_type), "missing {}", descriptor.node_type);
        }
    }
}
