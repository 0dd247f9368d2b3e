use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde_json::{json, Map, Value};

use weft_schema::NodeSpec;
use weft_types::{Result, Secrets, WeftError};

use super::{
    fail, number_field, render_template, require, GITHUB_TOKEN, GOOGLE_SHEETS_API_KEY,
    NOTION_TOKEN, PINECONE_API_KEY, PINECONE_HOST, SENDGRID_API_KEY, SLACK_WEBHOOK_URL,
};
use crate::executor::{value_to_text, ChunkSink, FailurePolicy, NodeExecutor, NodeInputs, NodeOutput};

const GITHUB_API: &str = "https://api.github.com";
const SENDGRID_API: &str = "https://api.sendgrid.com";
const SHEETS_API: &str = "https://sheets.googleapis.com";
const NOTION_API: &str = "https://api.notion.com";
const NOTION_VERSION: &str = "2022-06-28";
const NOTION_TEXT_LIMIT: usize = 2000;

// ---------------------------------------------------------------------------
// HttpContext: shared client with timeout mapping
// ---------------------------------------------------------------------------

/// Shared HTTP client for integration executors.
#[derive(Debug, Clone)]
pub struct HttpContext {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpContext {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("weft/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WeftError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn classify(&self, service: &str, err: reqwest::Error) -> WeftError {
        if err.is_timeout() {
            WeftError::Timeout {
                service: service.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            WeftError::integration(service, err)
        }
    }

    /// Send and read the body. Non-JSON bodies come back as a JSON string.
    pub async fn send(&self, service: &str, request: RequestBuilder) -> Result<(StatusCode, Value)> {
        let response = request.send().await.map_err(|e| self.classify(service, e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.classify(service, e))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        tracing::debug!(service, status = status.as_u16(), "HTTP response");
        Ok((status, body))
    }

    /// Like [`send`](Self::send) but a non-2xx status is an error.
    pub async fn send_ok(&self, service: &str, request: RequestBuilder) -> Result<Value> {
        let (status, body) = self.send(service, request).await?;
        if !status.is_success() {
            let detail: String = value_to_text(&body).chars().take(300).collect();
            return Err(WeftError::integration(
                service,
                format!("HTTP {}: {detail}", status.as_u16()),
            ));
        }
        Ok(body)
    }
}

fn parse_url(node: &NodeSpec, raw: &str) -> Result<Url> {
    Url::parse(raw.trim()).map_err(|e| fail(node, format!("Invalid URL '{raw}': {e}")))
}

/// `base` with `segments` appended, each percent-encoded.
fn join_segments(node: &NodeSpec, base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = parse_url(node, base)?;
    url.path_segments_mut()
        .map_err(|_| fail(node, format!("URL '{base}' cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn required_field(node: &NodeSpec, key: &str, label: &str) -> Result<String> {
    node.str_field(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| fail(node, format!("Required field '{label}' is empty.")))
}

/// First `n` characters, safe on multi-byte text.
fn prefix(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

// ---------------------------------------------------------------------------
// ApiExecutor
// ---------------------------------------------------------------------------

/// Generic REST call. Auth comes from the node's own `headers` field.
pub struct ApiExecutor {
    http: HttpContext,
}

impl ApiExecutor {
    pub fn new(http: HttpContext) -> Self {
        Self { http }
    }
}

/// `headers` as a JSON object or a JSON object encoded in a string.
fn header_map(node: &NodeSpec) -> Result<Map<String, Value>> {
    match node.data.get("headers") {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Map::new()),
        Some(Value::String(s)) => match serde_json::from_str(s) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(fail(node, "Headers must be a JSON object")),
        },
        Some(_) => Err(fail(node, "Headers must be a JSON object")),
    }
}

#[async_trait]
impl NodeExecutor for ApiExecutor {
    fn node_type(&self) -> &str {
        "api"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::ReportAsResult
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        _env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let raw_url = required_field(node, "url", "URL")?;
        let url = parse_url(node, &render_template(&raw_url, inputs))?;
        let method_name = node.str_or("method", "GET").to_uppercase();
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| fail(node, format!("Unsupported method '{method_name}'")))?;

        let mut request = self.http.client().request(method.clone(), url.clone());
        for (name, value) in header_map(node)? {
            request = request.header(name, value_to_text(&value));
        }
        if method != Method::GET && method != Method::DELETE {
            match inputs.first() {
                Some(body @ (Value::Object(_) | Value::Array(_))) => request = request.json(body),
                Some(Value::Null) | None => {}
                Some(other) => request = request.body(value_to_text(other)),
            }
        }

        tracing::info!(node = %node.id, method = %method, url = %url, "API call");
        let (status, body) = self.http.send("API", request).await?;
        Ok(NodeOutput::free(json!({
            "status": status.as_u16(),
            "method": method.as_str(),
            "url": url.as_str(),
            "body": body,
        })))
    }
}

// ---------------------------------------------------------------------------
// WebScraperExecutor
// ---------------------------------------------------------------------------

pub struct WebScraperExecutor {
    http: HttpContext,
}

impl WebScraperExecutor {
    pub fn new(http: HttpContext) -> Self {
        Self { http }
    }
}

struct MarkupPatterns {
    hidden: Regex,
    heading: Regex,
    link: Regex,
    item: Regex,
    breaks: Regex,
    tag: Regex,
    blank_lines: Regex,
    spaces: Regex,
}

fn markup() -> &'static MarkupPatterns {
    static PATTERNS: OnceLock<MarkupPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("literal pattern");
        MarkupPatterns {
            hidden: re(r"(?is)<(?:script|style|noscript|head)\b[^>]*>.*?</(?:script|style|noscript|head)>"),
            heading: re(r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]>"),
            link: re(r#"(?is)<a\b[^>]*href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#),
            item: re(r"(?i)<li\b[^>]*>"),
            breaks: re(r"(?i)<br\s*/?>|</p>|</div>|</li>|</tr>"),
            tag: re(r"(?s)<[^>]+>"),
            blank_lines: re(r"\n\s*\n(\s*\n)+"),
            spaces: re(r"[ \t]+"),
        }
    })
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn tidy(text: &str) -> String {
    let p = markup();
    let text = p.spaces.replace_all(text, " ");
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    p.blank_lines
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

/// Visible text only.
pub(crate) fn html_to_text(html: &str) -> String {
    let p = markup();
    let text = p.hidden.replace_all(html, "");
    let text = p.breaks.replace_all(&text, "\n");
    let text = p.tag.replace_all(&text, " ");
    tidy(&decode_entities(&text))
}

/// Headings, links and list items as Markdown; other markup dropped.
pub(crate) fn html_to_markdown(html: &str) -> String {
    let p = markup();
    let text = p.hidden.replace_all(html, "");
    let text = p.heading.replace_all(&text, |caps: &regex::Captures<'_>| {
        let level: usize = caps[1].parse().unwrap_or(1);
        format!("\n\n{} {}\n\n", "#".repeat(level), caps[2].trim())
    });
    let text = p.link.replace_all(&text, "[$2]($1)");
    let text = p.item.replace_all(&text, "\n- ");
    let text = p.breaks.replace_all(&text, "\n");
    let text = p.tag.replace_all(&text, "");
    tidy(&decode_entities(&text))
}

#[async_trait]
impl NodeExecutor for WebScraperExecutor {
    fn node_type(&self) -> &str {
        "webScraper"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::ReportAsResult
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        _env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let raw_url = required_field(node, "url", "Target URL")?;
        let url = parse_url(node, &render_template(&raw_url, inputs))?;
        let body = self
            .http
            .send_ok("Web Scraper", self.http.client().get(url))
            .await?;
        let html = value_to_text(&body);
        let content = match node.str_or("format", "Markdown").as_str() {
            "HTML" => html,
            "Raw Text" => html_to_text(&html),
            _ => html_to_markdown(&html),
        };
        Ok(NodeOutput::free(content))
    }
}

// ---------------------------------------------------------------------------
// SlackWebhookExecutor
// ---------------------------------------------------------------------------

/// Posts to a Slack or Discord incoming webhook. A `webhookUrl` on the node
/// overrides the `SLACK_WEBHOOK_URL` secret.
pub struct SlackWebhookExecutor {
    http: HttpContext,
}

impl SlackWebhookExecutor {
    pub fn new(http: HttpContext) -> Self {
        Self { http }
    }
}

fn is_discord(url: &str) -> bool {
    url.contains("discord.com/api/webhooks") || url.contains("discordapp.com/api/webhooks")
}

#[async_trait]
impl NodeExecutor for SlackWebhookExecutor {
    fn node_type(&self) -> &str {
        "slackWebhook"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::ReportAsResult
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let webhook = match node.str_field("webhookUrl").filter(|u| !u.trim().is_empty()) {
            Some(url) => url,
            None => require(env, "Webhook", SLACK_WEBHOOK_URL)?.to_string(),
        };
        let message = match node.str_field("messageTemplate").filter(|t| !t.trim().is_empty()) {
            Some(template) => render_template(&template, inputs),
            None => inputs.joined_text("\n\n"),
        };
        if message.trim().is_empty() {
            return Err(fail(node, "Nothing to send: connect an upstream node"));
        }

        let url = parse_url(node, &webhook)?;
        let (payload, target) = if is_discord(&webhook) {
            (json!({ "content": message }), "Discord")
        } else {
            (json!({ "text": message }), "Slack")
        };
        self.http
            .send_ok("Webhook", self.http.client().post(url).json(&payload))
            .await?;
        Ok(NodeOutput::free(format!(
            "Message dispatched to {target} successfully."
        )))
    }
}

// ---------------------------------------------------------------------------
// EmailExecutor: SendGrid v3
// ---------------------------------------------------------------------------

pub struct EmailExecutor {
    http: HttpContext,
    base_url: String,
}

impl EmailExecutor {
    pub fn new(http: HttpContext) -> Self {
        Self {
            http,
            base_url: SENDGRID_API.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl NodeExecutor for EmailExecutor {
    fn node_type(&self) -> &str {
        "email"
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let key = require(env, "Email", SENDGRID_API_KEY)?;
        let to = required_field(node, "emailTo", "To")?;
        let subject = node.str_or("emailSubject", "Pipeline notification");
        let from = node.str_or("emailFrom", "pipelines@weft.dev");
        let mut body = inputs.joined_text("\n\n");
        if body.is_empty() {
            body = " ".into();
        }

        let url = join_segments(node, &self.base_url, &["v3", "mail", "send"])?;
        let payload = json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": from },
            "subject": subject,
            "content": [{ "type": "text/plain", "value": body }],
        });
        self.http
            .send_ok("Email", self.http.client().post(url).bearer_auth(key).json(&payload))
            .await?;
        Ok(NodeOutput::free(format!(
            "Email sent to '{to}' with subject '{subject}'."
        )))
    }
}

// ---------------------------------------------------------------------------
// GitHubExecutor
// ---------------------------------------------------------------------------

pub struct GitHubExecutor {
    http: HttpContext,
    base_url: String,
}

impl GitHubExecutor {
    pub fn new(http: HttpContext) -> Self {
        Self {
            http,
            base_url: GITHUB_API.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request(&self, method: Method, url: Url, token: &str) -> RequestBuilder {
        self.http
            .client()
            .request(method, url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }
}

/// Issue title: first non-empty line of the body, capped at 80 characters.
fn issue_title(body: &str) -> String {
    body.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| prefix(l, 80))
        .unwrap_or_else(|| "Pipeline output".to_string())
}

#[async_trait]
impl NodeExecutor for GitHubExecutor {
    fn node_type(&self) -> &str {
        "github"
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let token = require(env, "GitHub", GITHUB_TOKEN)?;
        let repo = required_field(node, "ghRepo", "Repository (owner/repo)")?;
        let Some((owner, name)) = repo.split_once('/').filter(|(o, n)| !o.is_empty() && !n.is_empty())
        else {
            return Err(fail(node, format!("Repository '{repo}' is not in owner/repo form")));
        };
        let action = node.str_or("ghAction", "Create Issue");
        let base = &self.base_url;

        let value = match action.as_str() {
            "Create Issue" => {
                let body = inputs.joined_text("\n\n");
                let url = join_segments(node, base, &["repos", owner, name, "issues"])?;
                let payload = json!({ "title": issue_title(&body), "body": body });
                let created = self
                    .http
                    .send_ok("GitHub", self.request(Method::POST, url, token).json(&payload))
                    .await?;
                let number = created.get("number").map(value_to_text).unwrap_or_default();
                json!(format!(
                    "GitHub [{action}] on repo '{repo}' completed. ID: #{number}"
                ))
            }
            "Get Repo Info" => {
                let url = join_segments(node, base, &["repos", owner, name])?;
                let info = self
                    .http
                    .send_ok("GitHub", self.request(Method::GET, url, token))
                    .await?;
                json!({
                    "full_name": info["full_name"],
                    "description": info["description"],
                    "stars": info["stargazers_count"],
                    "forks": info["forks_count"],
                    "open_issues": info["open_issues_count"],
                    "default_branch": info["default_branch"],
                })
            }
            "List Commits" => {
                let mut url = join_segments(node, base, &["repos", owner, name, "commits"])?;
                url.query_pairs_mut().append_pair("per_page", "10");
                let commits = self
                    .http
                    .send_ok("GitHub", self.request(Method::GET, url, token))
                    .await?;
                let list = commits.as_array().cloned().unwrap_or_default();
                Value::Array(
                    list.iter()
                        .map(|c| {
                            let message = value_to_text(&c["commit"]["message"]);
                            json!({
                                "sha": prefix(&value_to_text(&c["sha"]), 7),
                                "message": message.lines().next().unwrap_or_default(),
                                "author": c["commit"]["author"]["name"],
                            })
                        })
                        .collect(),
                )
            }
            "Read File" => {
                let path = required_field(node, "ghPath", "File Path")?;
                let mut segments = vec!["repos", owner, name, "contents"];
                segments.extend(path.split('/').filter(|s| !s.is_empty()));
                let url = join_segments(node, base, &segments)?;
                let content = self
                    .http
                    .send_ok(
                        "GitHub",
                        self.request(Method::GET, url, token)
                            .header("Accept", "application/vnd.github.raw+json"),
                    )
                    .await?;
                json!(value_to_text(&content))
            }
            other => return Err(fail(node, format!("Unsupported GitHub action '{other}'"))),
        };
        Ok(NodeOutput::free(value))
    }
}

// ---------------------------------------------------------------------------
// GoogleSheetsExecutor
// ---------------------------------------------------------------------------

pub struct GoogleSheetsExecutor {
    http: HttpContext,
    base_url: String,
}

impl GoogleSheetsExecutor {
    pub fn new(http: HttpContext) -> Self {
        Self {
            http,
            base_url: SHEETS_API.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// One sheet row from the upstream value: arrays spread into cells,
/// anything else fills a single cell.
fn sheet_row(inputs: &NodeInputs) -> Vec<String> {
    match inputs.first() {
        Some(Value::Array(items)) => items.iter().map(value_to_text).collect(),
        Some(value) => vec![value_to_text(value)],
        None => Vec::new(),
    }
}

#[async_trait]
impl NodeExecutor for GoogleSheetsExecutor {
    fn node_type(&self) -> &str {
        "googleSheets"
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let key = require(env, "Google Sheets", GOOGLE_SHEETS_API_KEY)?;
        let spreadsheet = required_field(node, "spreadsheetId", "Spreadsheet ID")?;
        let range = node.str_or("sheetRange", "Sheet1!A:D");
        let action = node.str_or("sheetsAction", "Append Row");
        let client = self.http.client();

        let request = match action.as_str() {
            "Read Range" => {
                let url = join_segments(node, &self.base_url, &["v4", "spreadsheets", spreadsheet.as_str(), "values", range.as_str()])?;
                client.get(url)
            }
            "Append Row" => {
                let segment = format!("{range}:append");
                let url = join_segments(node, &self.base_url, &["v4", "spreadsheets", spreadsheet.as_str(), "values", segment.as_str()])?;
                client
                    .post(url)
                    .query(&[("valueInputOption", "USER_ENTERED")])
                    .json(&json!({ "values": [sheet_row(inputs)] }))
            }
            "Update Cell" => {
                let url = join_segments(node, &self.base_url, &["v4", "spreadsheets", spreadsheet.as_str(), "values", range.as_str()])?;
                client
                    .put(url)
                    .query(&[("valueInputOption", "USER_ENTERED")])
                    .json(&json!({ "values": [[inputs.text()]] }))
            }
            other => return Err(fail(node, format!("Unsupported Sheets action '{other}'"))),
        };

        let body = self
            .http
            .send_ok("Google Sheets", request.query(&[("key", key)]))
            .await?;
        let value = if action == "Read Range" {
            body.get("values").cloned().unwrap_or_else(|| json!([]))
        } else {
            json!(format!("Sheets [{action}] on '{spreadsheet}' succeeded."))
        };
        Ok(NodeOutput::free(value))
    }
}

// ---------------------------------------------------------------------------
// NotionExecutor
// ---------------------------------------------------------------------------

pub struct NotionExecutor {
    http: HttpContext,
    base_url: String,
}

impl NotionExecutor {
    pub fn new(http: HttpContext) -> Self {
        Self {
            http,
            base_url: NOTION_API.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

fn rich_text(content: &str) -> Value {
    json!([{ "type": "text", "text": { "content": prefix(content, NOTION_TEXT_LIMIT) } }])
}

fn paragraph(content: &str) -> Value {
    json!({ "object": "block", "type": "paragraph", "paragraph": { "rich_text": rich_text(content) } })
}

#[async_trait]
impl NodeExecutor for NotionExecutor {
    fn node_type(&self) -> &str {
        "notion"
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let token = require(env, "Notion", NOTION_TOKEN)?;
        let target = required_field(node, "notionDbId", "Database / Page ID")?;
        let action = node.str_or("notionAction", "Create Page");
        let text = inputs.joined_text("\n\n");
        let title = issue_title(&text);
        let base = &self.base_url;
        let client = self.http.client();

        let (request, returns_body) = match action.as_str() {
            "Create Page" => {
                let url = join_segments(node, base, &["v1", "pages"])?;
                let payload = json!({
                    "parent": { "database_id": target },
                    "properties": { "Name": { "title": rich_text(&title) } },
                    "children": [paragraph(&text)],
                });
                (client.post(url).json(&payload), false)
            }
            "Append Page" => {
                let url = join_segments(node, base, &["v1", "blocks", target.as_str(), "children"])?;
                (client.patch(url).json(&json!({ "children": [paragraph(&text)] })), false)
            }
            "Update Page" => {
                let url = join_segments(node, base, &["v1", "pages", target.as_str()])?;
                let payload = json!({ "properties": { "Name": { "title": rich_text(&title) } } });
                (client.patch(url).json(&payload), false)
            }
            "Query Database" => {
                let url = join_segments(node, base, &["v1", "databases", target.as_str(), "query"])?;
                (client.post(url).json(&json!({ "page_size": 10 })), true)
            }
            "Get Page" => {
                let url = join_segments(node, base, &["v1", "pages", target.as_str()])?;
                (client.get(url), true)
            }
            other => return Err(fail(node, format!("Unsupported Notion action '{other}'"))),
        };

        let body = self
            .http
            .send_ok(
                "Notion",
                request.bearer_auth(token).header("Notion-Version", NOTION_VERSION),
            )
            .await?;
        let value = if returns_body {
            body
        } else {
            json!(format!(
                "Notion [{action}] on database '{}...' completed.",
                prefix(&target, 8)
            ))
        };
        Ok(NodeOutput::free(value))
    }
}

// ---------------------------------------------------------------------------
// VectorDbExecutor: Pinecone data plane
// ---------------------------------------------------------------------------

/// The index is addressed by `PINECONE_HOST`; `indexName` selects the
/// namespace within it.
pub struct VectorDbExecutor {
    http: HttpContext,
}

impl VectorDbExecutor {
    pub fn new(http: HttpContext) -> Self {
        Self { http }
    }
}

/// An embedding from upstream: a bare number array or an embedder result.
fn upstream_vector(inputs: &NodeInputs) -> Option<Vec<f64>> {
    let value = inputs.first()?;
    let array = match value {
        Value::Array(items) => items,
        Value::Object(map) => map.get("vector")?.as_array()?,
        _ => return None,
    };
    array.iter().map(Value::as_f64).collect()
}

fn pinecone_host(node: &NodeSpec, host: &str) -> Result<Url> {
    let host = host.trim();
    if host.starts_with("http://") || host.starts_with("https://") {
        parse_url(node, host)
    } else {
        parse_url(node, &format!("https://{host}"))
    }
}

#[async_trait]
impl NodeExecutor for VectorDbExecutor {
    fn node_type(&self) -> &str {
        "vectorDb"
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let key = require(env, "Vector DB", PINECONE_API_KEY)?;
        let host = require(env, "Vector DB", PINECONE_HOST)?;
        let namespace = required_field(node, "indexName", "Index / Collection Name")?;
        let action = node.str_or("action", "Query");
        let base = pinecone_host(node, host)?;
        let base = base.as_str();

        let (path, payload): (&[&str], Value) = match action.as_str() {
            "Query" => {
                let vector = upstream_vector(inputs)
                    .ok_or_else(|| fail(node, "Query needs an embedding vector upstream"))?;
                let top_k = number_field(node, "topK").filter(|k| *k >= 1.0).unwrap_or(5.0) as u64;
                (
                    &["query"][..],
                    json!({ "namespace": namespace, "vector": vector, "topK": top_k, "includeMetadata": true }),
                )
            }
            "Upsert" => {
                let vector = upstream_vector(inputs)
                    .ok_or_else(|| fail(node, "Upsert needs an embedding vector upstream"))?;
                let id = uuid::Uuid::new_v4().to_string();
                (
                    &["vectors", "upsert"][..],
                    json!({ "namespace": namespace, "vectors": [{ "id": id, "values": vector }] }),
                )
            }
            "Delete" => {
                let ids: Vec<String> = inputs
                    .text()
                    .split([',', '\n'])
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if ids.is_empty() {
                    return Err(fail(node, "Delete needs vector ids upstream"));
                }
                (&["vectors", "delete"][..], json!({ "namespace": namespace, "ids": ids }))
            }
            other => return Err(fail(node, format!("Unsupported vector action '{other}'"))),
        };

        let url = join_segments(node, base, path)?;
        let request = self
            .http
            .client()
            .post(url)
            .header("Api-Key", key)
            .json(&payload);
        let body = self.http.send_ok("Vector DB", request).await?;
        let value = match action.as_str() {
            "Query" => {
                let matches = body["matches"].as_array().cloned().unwrap_or_default();
                json!(matches
                    .iter()
                    .map(|m| json!({ "id": m["id"], "score": m["score"], "metadata": m["metadata"] }))
                    .collect::<Vec<_>>())
            }
            _ => json!(format!("Vector [{action}] on index '{namespace}' completed.")),
        };
        Ok(NodeOutput::free(value))
    }
}
