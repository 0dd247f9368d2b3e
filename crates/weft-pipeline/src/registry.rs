//! Static catalog of node type metadata.
//!
//! Validation reads required fields and connection limits from here; the
//! CLI lists it for canvas tooling. The built-in catalog is assembled once
//! per process and never mutated.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection limit meaning "no limit".
pub const UNBOUNDED: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    Text,
    Textarea,
    Select,
    Number,
    ModelSelect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub default: Option<Value>,
}

impl FieldDescriptor {
    pub fn new(name: &str, kind: FieldKind, label: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            label: label.to_string(),
            required: false,
            options: None,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn options(mut self, options: &[&str]) -> Self {
        self.options = Some(options.iter().map(|o| o.to_string()).collect());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeDescriptor {
    #[serde(rename = "type")]
    pub node_type: String,
    pub label: String,
    pub category: String,
    pub color: String,
    pub description: String,
    pub fields: Vec<FieldDescriptor>,
    /// `-1` for unbounded.
    pub max_inputs: i32,
    /// `-1` for unbounded.
    pub max_outputs: i32,
}

impl NodeTypeDescriptor {
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Input limit widened by `extra` custom handles; `None` when unbounded.
    pub fn effective_max_inputs(&self, extra: usize) -> Option<usize> {
        effective_limit(self.max_inputs, extra)
    }

    /// Output limit widened by `extra` custom handles; `None` when unbounded.
    pub fn effective_max_outputs(&self, extra: usize) -> Option<usize> {
        effective_limit(self.max_outputs, extra)
    }
}

fn effective_limit(max: i32, extra: usize) -> Option<usize> {
    usize::try_from(max).ok().map(|m| m + extra)
}

// ---------------------------------------------------------------------------
// NodeTypeRegistry
// ---------------------------------------------------------------------------

/// Descriptors looked up by type key, listed in catalog order.
#[derive(Debug, Clone)]
pub struct NodeTypeRegistry {
    descriptors: Vec<NodeTypeDescriptor>,
    index: HashMap<String, usize>,
}

impl NodeTypeRegistry {
    pub fn new(descriptors: Vec<NodeTypeDescriptor>) -> Self {
        let index = descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.node_type.clone(), i))
            .collect();
        Self { descriptors, index }
    }

    /// The process-wide built-in catalog.
    pub fn builtin() -> &'static NodeTypeRegistry {
        static REGISTRY: OnceLock<NodeTypeRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| NodeTypeRegistry::new(builtin_descriptors()))
    }

    pub fn get(&self, node_type: &str) -> Option<&NodeTypeDescriptor> {
        self.index.get(node_type).map(|&i| &self.descriptors[i])
    }

    pub fn has(&self, node_type: &str) -> bool {
        self.index.contains_key(node_type)
    }

    pub fn all(&self) -> &[NodeTypeDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Built-in descriptors in catalog order.
pub fn node_types() -> Vec<NodeTypeDescriptor> {
    NodeTypeRegistry::builtin().all().to_vec()
}

// ---------------------------------------------------------------------------
// Built-in catalog
// ---------------------------------------------------------------------------

fn descriptor(
    node_type: &str,
    label: &str,
    category: &str,
    color: &str,
    description: &str,
    limits: (i32, i32),
    fields: Vec<FieldDescriptor>,
) -> NodeTypeDescriptor {
    NodeTypeDescriptor {
        node_type: node_type.to_string(),
        label: label.to_string(),
        category: category.to_string(),
        color: color.to_string(),
        description: description.to_string(),
        fields,
        max_inputs: limits.0,
        max_outputs: limits.1,
    }
}

const IO_TYPES: &[&str] = &["Text", "File", "Number", "Boolean"];
const LLM_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4-turbo",
    "gpt-3.5-turbo",
    "claude-3-5-sonnet",
    "claude-3-haiku",
];

fn builtin_descriptors() -> Vec<NodeTypeDescriptor> {
    use FieldKind::*;
    let f = FieldDescriptor::new;

    vec![
        // I/O
        descriptor(
            "customInput", "Input", "I/O", "green",
            "Pipeline entry point — provides text or data into the graph.",
            (0, 1),
            vec![
                f("inputName", Text, "Variable Name").required().default_value("input"),
                f("inputType", Select, "Type").options(IO_TYPES).default_value("Text"),
            ],
        ),
        descriptor(
            "customOutput", "Output", "I/O", "rose",
            "Pipeline exit point — receives and exposes final results.",
            (1, 0),
            vec![
                f("outputName", Text, "Variable Name").required().default_value("output"),
                f("outputType", Select, "Type").options(IO_TYPES).default_value("Text"),
            ],
        ),
        // AI
        descriptor(
            "llm", "LLM", "AI", "purple",
            "Large Language Model inference node.",
            (2, 1),
            vec![
                f("model", Select, "Model").options(LLM_MODELS).required().default_value("gpt-4o"),
                f("temperature", Number, "Temperature"),
                f("maxTokens", Number, "Max Tokens"),
                f("systemPrompt", Textarea, "System Prompt"),
            ],
        ),
        descriptor(
            "embedder", "Embedder", "AI", "violet",
            "Convert text into a numerical vector embedding for semantic search.",
            (1, 1),
            vec![
                f("embeddingModel", Select, "Embedding Model")
                    .options(&["text-embedding-3-small", "text-embedding-3-large", "text-embedding-ada-002"])
                    .default_value("text-embedding-3-small"),
                f("dimensions", Select, "Output Dimensions")
                    .options(&["256", "512", "1024", "1536", "3072"])
                    .default_value("1536"),
            ],
        ),
        descriptor(
            "imageGen", "Image Gen", "AI", "pink",
            "Generate an image from a text prompt.",
            (1, 1),
            vec![
                f("imageModel", Select, "Model").options(&["dall-e-3", "dall-e-2"]).default_value("dall-e-3"),
                f("imageSize", Select, "Image Size")
                    .options(&["256x256", "512x512", "1024x1024", "1792x1024", "1024x1792"])
                    .default_value("1024x1024"),
                f("quality", Select, "Quality").options(&["standard", "hd"]).default_value("standard"),
            ],
        ),
        descriptor(
            "classifier", "Classifier", "AI", "teal",
            "Zero-shot classification of text into custom labels.",
            (1, 2),
            vec![
                f("classifierModel", ModelSelect, "Model"),
                f("labels", Text, "Labels (comma-separated)").default_value("positive, negative, neutral"),
            ],
        ),
        descriptor(
            "summarizer", "Summarizer", "AI", "sky",
            "Condense long documents into concise summaries using an LLM.",
            (1, 1),
            vec![
                f("summaryModel", ModelSelect, "Model"),
                f("summaryStyle", Select, "Style")
                    .options(&["Concise", "Bullet Points", "Detailed", "ELI5"])
                    .default_value("Concise"),
                f("summaryLength", Select, "Target Length")
                    .options(&["1 Sentence", "Short", "Medium", "Long"])
                    .default_value("Short"),
            ],
        ),
        // Data
        descriptor(
            "text", "Text", "Data", "amber",
            "Text template with {{variable}} interpolation — creates dynamic prompts.",
            (UNBOUNDED, 1),
            vec![f("text", Textarea, "Text Template").required().default_value("{{input}}")],
        ),
        descriptor(
            "transform", "Transform", "Data", "amber",
            "Applies a transformation function to its input data.",
            (1, 1),
            vec![
                f("transformModel", ModelSelect, "Model"),
                f("transformFn", Textarea, "Transformation").required().default_value(""),
            ],
        ),
        descriptor(
            "join", "Join", "Data", "amber",
            "Merges two or more inputs into a single combined output.",
            (UNBOUNDED, 1),
            vec![f("separator", Text, "Separator").default_value("\\n")],
        ),
        descriptor(
            "split", "Split", "Data", "amber",
            "Splits a single input into multiple output streams.",
            (1, UNBOUNDED),
            vec![
                f("delimiter", Text, "Delimiter").default_value("\\n\\n"),
                f("maxSplits", Number, "Max Splits"),
            ],
        ),
        descriptor(
            "jsonParser", "JSON Parser", "Data", "amber",
            "Parse a JSON string and extract a value via dot-notation key path.",
            (1, 2),
            vec![
                f("parseMode", Select, "Mode")
                    .options(&["Extract Key", "Stringify", "Array Length", "Keys List"])
                    .default_value("Extract Key"),
                f("jsonPath", Text, "Key Path"),
            ],
        ),
        descriptor(
            "csvParser", "CSV Parser", "Data", "green",
            "Parse a CSV string into rows and extract headers.",
            (1, 2),
            vec![
                f("csvDelimiter", Select, "Delimiter")
                    .options(&["Comma", "Semicolon", "Tab", "Pipe"])
                    .default_value("Comma"),
                f("hasHeader", Select, "Has Header Row").options(&["Yes", "No"]).default_value("Yes"),
            ],
        ),
        descriptor(
            "calculator", "Calculator", "Data", "cyan",
            "Evaluate a math expression from two inputs (a and b).",
            (2, 1),
            vec![f("expression", Text, "Expression").required().default_value("a + b")],
        ),
        // Logic
        descriptor(
            "filter", "Filter", "Logic", "cyan",
            "Filters data based on a condition — passes data only when the condition is met.",
            (1, 1),
            vec![f("condition", Text, "Condition").required().default_value("")],
        ),
        descriptor(
            "conditional", "Conditional", "Logic", "orange",
            "Branch execution into true or false paths based on an expression.",
            (1, 2),
            vec![f("condition", Text, "Condition").required()],
        ),
        descriptor(
            "loop", "Loop", "Logic", "indigo",
            "Iterate over a list and emit each item for processing.",
            (1, 2),
            vec![
                f("loopMode", Select, "Mode").options(&["For Each", "Fixed Count"]).default_value("For Each"),
                f("maxIterations", Number, "Max Iterations").default_value(3),
            ],
        ),
        descriptor(
            "delay", "Delay", "Logic", "slate",
            "Pause execution for a set duration before continuing.",
            (1, 1),
            vec![
                f("delaySeconds", Number, "Duration").default_value(1),
                f("delayUnit", Select, "Unit")
                    .options(&["Milliseconds", "Seconds", "Minutes"])
                    .default_value("Seconds"),
            ],
        ),
        // Automation and integrations
        descriptor(
            "api", "API Call", "Automation", "rose",
            "Makes HTTP requests to external REST APIs.",
            (1, 1),
            vec![
                f("method", Select, "Method")
                    .options(&["GET", "POST", "PUT", "DELETE", "PATCH"])
                    .default_value("GET"),
                f("url", Text, "URL").required().default_value(""),
                f("headers", Textarea, "Headers (JSON)"),
            ],
        ),
        descriptor(
            "vectorDb", "Vector DB", "Integrations", "green",
            "Query, upsert, or delete vectors from a Pinecone index.",
            (1, 1),
            vec![
                f("action", Select, "Database Action").options(&["Query", "Upsert", "Delete"]).default_value("Query"),
                f("indexName", Text, "Index / Collection Name").required(),
                f("topK", Number, "Top K Results").default_value(5),
            ],
        ),
        descriptor(
            "webScraper", "Web Scraper", "Integrations", "cyan",
            "Extract content from any public webpage and convert to text or markdown.",
            (1, 1),
            vec![
                f("url", Text, "Target URL").required(),
                f("format", Select, "Extraction Format")
                    .options(&["Markdown", "Raw Text", "HTML"])
                    .default_value("Markdown"),
            ],
        ),
        descriptor(
            "slackWebhook", "Slack / Discord", "Integrations", "amber",
            "Send a message to a Slack or Discord channel via an incoming webhook.",
            (1, 1),
            vec![
                f("webhookUrl", Text, "Webhook URL"),
                f("messageTemplate", Textarea, "Message Template"),
            ],
        ),
        descriptor(
            "email", "Email", "Integrations", "rose",
            "Send transactional email via SendGrid.",
            (1, 1),
            vec![
                f("emailProvider", Select, "Provider").options(&["SendGrid"]).default_value("SendGrid"),
                f("emailTo", Text, "To").required(),
                f("emailSubject", Text, "Subject").default_value("Pipeline notification"),
            ],
        ),
        descriptor(
            "github", "GitHub", "Integrations", "slate",
            "Interact with GitHub — create issues, read files, and more.",
            (1, 1),
            vec![
                f("ghAction", Select, "Action")
                    .options(&["Create Issue", "Read File", "List Commits", "Get Repo Info"])
                    .default_value("Create Issue"),
                f("ghRepo", Text, "Repository (owner/repo)").required(),
                f("ghPath", Text, "File Path"),
            ],
        ),
        descriptor(
            "googleSheets", "Google Sheets", "Integrations", "green",
            "Read from or write to a Google Sheet using the Sheets API.",
            (1, 1),
            vec![
                f("sheetsAction", Select, "Action")
                    .options(&["Append Row", "Read Range", "Update Cell"])
                    .default_value("Append Row"),
                f("spreadsheetId", Text, "Spreadsheet ID").required(),
                f("sheetRange", Text, "Range (A1 notation)").default_value("Sheet1!A:D"),
            ],
        ),
        descriptor(
            "notion", "Notion", "Integrations", "stone",
            "Create or append pages in a Notion database workspace.",
            (1, 1),
            vec![
                f("notionAction", Select, "Action")
                    .options(&["Append Page", "Create Page", "Query Database", "Update Page", "Get Page"])
                    .default_value("Create Page"),
                f("notionDbId", Text, "Database / Page ID").required(),
            ],
        ),
    ]
}
