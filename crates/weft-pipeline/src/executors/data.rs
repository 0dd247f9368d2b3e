use async_trait::async_trait;
use serde_json::{json, Value};

use weft_schema::NodeSpec;
use weft_types::{Result, Secrets};

use super::{decode_escapes, fail, number_field, render_template};
use crate::executor::{ChunkSink, FailurePolicy, NodeExecutor, NodeInputs, NodeOutput};
use crate::expression::{evaluate, Bindings};

/// A config string, keeping whitespace-only values such as `" "`.
fn raw_or(node: &NodeSpec, key: &str, default: &str) -> String {
    node.str_field(key)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

// ---------------------------------------------------------------------------
// TextExecutor
// ---------------------------------------------------------------------------

/// Renders `{{name}}` placeholders from predecessor results.
pub struct TextExecutor;

#[async_trait]
impl NodeExecutor for TextExecutor {
    fn node_type(&self) -> &str {
        "text"
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
        let template = node.str_field("text").unwrap_or_else(|| "{{input}}".into());
        Ok(NodeOutput::free(render_template(&template, inputs)))
    }
}

// ---------------------------------------------------------------------------
// JoinExecutor / SplitExecutor
// ---------------------------------------------------------------------------

pub struct JoinExecutor;

#[async_trait]
impl NodeExecutor for JoinExecutor {
    fn node_type(&self) -> &str {
        "join"
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
        let separator = decode_escapes(&raw_or(node, "separator", "\\n"));
        Ok(NodeOutput::free(inputs.joined_text(&separator)))
    }
}

pub struct SplitExecutor;

#[async_trait]
impl NodeExecutor for SplitExecutor {
    fn node_type(&self) -> &str {
        "split"
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
        let delimiter = decode_escapes(&raw_or(node, "delimiter", "\\n\\n"));
        let text = inputs.text();
        // maxSplits counts cuts, so it yields at most maxSplits + 1 parts.
        // No text has more cuts than bytes.
        let parts: Vec<&str> = match number_field(node, "maxSplits") {
            Some(max) if max >= 0.0 => {
                let cuts = max.min(text.len() as f64) as usize;
                text.splitn(cuts + 1, delimiter.as_str()).collect()
            }
            _ => text.split(delimiter.as_str()).collect(),
        };
        Ok(NodeOutput::free(json!(parts)))
    }
}

// ---------------------------------------------------------------------------
// JsonParserExecutor
// ---------------------------------------------------------------------------

pub struct JsonParserExecutor;

#[async_trait]
impl NodeExecutor for JsonParserExecutor {
    fn node_type(&self) -> &str {
        "jsonParser"
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
        let document = match inputs.first() {
            Some(Value::String(s)) => serde_json::from_str(s)?,
            Some(other) => other.clone(),
            None => return Err(fail(node, "No input to parse")),
        };

        let mode = node.str_or("parseMode", "Extract Key");
        let value = match mode.as_str() {
            "Stringify" => Value::String(serde_json::to_string_pretty(&document)?),
            "Array Length" => match &document {
                Value::Array(items) => json!(items.len()),
                _ => return Err(fail(node, "Input is not a JSON array")),
            },
            "Keys List" => match &document {
                Value::Object(map) => json!(map.keys().collect::<Vec<_>>()),
                _ => return Err(fail(node, "Input is not a JSON object")),
            },
            _ => {
                let path = node.str_or("jsonPath", "");
                extract_path(&document, &path)
                    .cloned()
                    .ok_or_else(|| fail(node, format!("Key path '{}' not found", path)))?
            }
        };
        Ok(NodeOutput::free(value))
    }
}

/// Follow a dot/index path such as `data.results[0].name`. An empty path
/// selects the whole document.
fn extract_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let (key, indices) = match segment.find('[') {
            Some(pos) => segment.split_at(pos),
            None => (segment, ""),
        };
        if !key.is_empty() {
            current = match current {
                Value::Object(map) => map.get(key)?,
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        for index in indices.split('[').filter(|s| !s.is_empty()) {
            let idx: usize = index.strip_suffix(']')?.trim().parse().ok()?;
            current = current.as_array()?.get(idx)?;
        }
    }
    Some(current)
}

// ---------------------------------------------------------------------------
// CsvParserExecutor
// ---------------------------------------------------------------------------

pub struct CsvParserExecutor;

#[async_trait]
impl NodeExecutor for CsvParserExecutor {
    fn node_type(&self) -> &str {
        "csvParser"
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
        let delimiter = match node.str_or("csvDelimiter", "Comma").as_str() {
            "Semicolon" => ';',
            "Tab" => '\t',
            "Pipe" => '|',
            _ => ',',
        };
        let has_header = !node.str_or("hasHeader", "Yes").eq_ignore_ascii_case("no");

        let mut rows = parse_csv(&inputs.text(), delimiter);
        let headers = if has_header && !rows.is_empty() {
            rows.remove(0)
        } else {
            let width = rows.iter().map(Vec::len).max().unwrap_or(0);
            (1..=width).map(|i| format!("col{i}")).collect()
        };
        Ok(NodeOutput::free(json!({ "headers": headers, "rows": rows })))
    }
}

/// Quote-aware CSV split. Doubled quotes inside a quoted field are a
/// literal quote; blank lines are skipped.
fn parse_csv(text: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                other => field.push(other),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                push_row(&mut rows, std::mem::take(&mut row));
            }
            c if c == delimiter => row.push(std::mem::take(&mut field)),
            other => field.push(other),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        push_row(&mut rows, row);
    }
    rows
}

fn push_row(rows: &mut Vec<Vec<String>>, row: Vec<String>) {
    let blank = row.len() == 1 && row[0].trim().is_empty();
    if !blank {
        rows.push(row);
    }
}

// ---------------------------------------------------------------------------
// CalculatorExecutor
// ---------------------------------------------------------------------------

/// Evaluates a restricted arithmetic expression over `a` and `b`.
pub struct CalculatorExecutor;

#[async_trait]
impl NodeExecutor for CalculatorExecutor {
    fn node_type(&self) -> &str {
        "calculator"
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
        let expression = node.str_or("expression", "a + b");
        let a = inputs.lookup("a").or_else(|| inputs.get(0));
        let b = inputs.lookup("b").or_else(|| inputs.get(1));

        let mut vars = Bindings::new();
        if let Some(a) = a {
            vars = vars.bind("a", a);
        }
        if let Some(b) = b {
            vars = vars.bind("b", b);
        }
        if let Some(first) = inputs.first() {
            vars = vars.bind("value", first).bind("input", first);
        }

        let result = evaluate(&expression, &vars)?;
        Ok(NodeOutput::free(result.to_json()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::WeftError;
    use crate::executor::Upstream;

    async fn run(executor: &dyn NodeExecutor, node: &NodeSpec, inputs: &NodeInputs) -> Result<Value> {
        executor
            .execute(node, inputs, &Secrets::new(), &ChunkSink::discard())
            .await
            .map(|out| out.value)
    }

    fn named(handle: &str, value: Value) -> Upstream {
        Upstream {
            node_id: format!("src_{handle}"),
            node_type: "customInput".into(),
            alias: None,
            handle: Some(handle.into()),
            value,
        }
    }

    #[tokio::test]
    async fn text_defaults_to_input_passthrough() {
        let node = NodeSpec::new("t", "text");
        let out = run(&TextExecutor, &node, &NodeInputs::single("hi")).await.unwrap();
        assert_eq!(out, json!("hi"));
    }

    #[tokio::test]
    async fn join_decodes_separator() {
        let node = NodeSpec::new("j", "join").with("separator", "\\t");
        let inputs = NodeInputs::new(vec![named("x", json!("a")), named("y", json!(2))]);
        assert_eq!(run(&JoinExecutor, &node, &inputs).await.unwrap(), json!("a\t2"));

        let default = NodeSpec::new("j", "join");
        assert_eq!(run(&JoinExecutor, &default, &inputs).await.unwrap(), json!("a\n2"));
    }

    #[tokio::test]
    async fn split_respects_max_splits() {
        let node = NodeSpec::new("s", "split").with("delimiter", ",").with("maxSplits", 1);
        let out = run(&SplitExecutor, &node, &NodeInputs::single("a,b,c")).await.unwrap();
        assert_eq!(out, json!(["a", "b,c"]));

        let default = NodeSpec::new("s", "split");
        let out = run(&SplitExecutor, &default, &NodeInputs::single("p1\n\np2")).await.unwrap();
        assert_eq!(out, json!(["p1", "p2"]));
    }

    #[tokio::test]
    async fn split_with_huge_max_splits_splits_everything() {
        let node = NodeSpec::new("s", "split").with("delimiter", ",").with("maxSplits", 1e300);
        let out = run(&SplitExecutor, &node, &NodeInputs::single("a,b,c")).await.unwrap();
        assert_eq!(out, json!(["a", "b", "c"]));

        let empty = run(&SplitExecutor, &node, &NodeInputs::single("")).await.unwrap();
        assert_eq!(empty, json!([""]));
    }

    #[tokio::test]
    async fn json_parser_modes() {
        let doc = json!(r#"{"data": {"results": [{"name": "first"}, {"name": "second"}]}}"#);
        let inputs = NodeInputs::single(doc);

        let extract = NodeSpec::new("p", "jsonParser").with("jsonPath", "data.results[1].name");
        assert_eq!(run(&JsonParserExecutor, &extract, &inputs).await.unwrap(), json!("second"));

        let keys = NodeSpec::new("p", "jsonParser").with("parseMode", "Keys List");
        assert_eq!(run(&JsonParserExecutor, &keys, &inputs).await.unwrap(), json!(["data"]));

        let length = NodeSpec::new("p", "jsonParser")
            .with("parseMode", "Array Length");
        let arr = NodeInputs::single(json!([1, 2, 3]));
        assert_eq!(run(&JsonParserExecutor, &length, &arr).await.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn json_parser_failures_are_errors() {
        let node = NodeSpec::new("p", "jsonParser").with("jsonPath", "nope");
        assert!(run(&JsonParserExecutor, &node, &NodeInputs::single("{not json")).await.is_err());
        assert!(run(&JsonParserExecutor, &node, &NodeInputs::single(json!({"a": 1})))
            .await
            .is_err());
        assert_eq!(JsonParserExecutor.failure_policy(), FailurePolicy::ReportAsResult);
    }

    #[test]
    fn csv_quotes_and_blank_lines() {
        let rows = parse_csv("name,quote\n\"Smith, J\",\"said \"\"hi\"\"\"\n\n", ',');
        assert_eq!(
            rows,
            vec![
                vec!["name".to_string(), "quote".to_string()],
                vec!["Smith, J".to_string(), "said \"hi\"".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn csv_without_header_gets_generated_names() {
        let node = NodeSpec::new("c", "csvParser")
            .with("csvDelimiter", "Pipe")
            .with("hasHeader", "No");
        let out = run(&CsvParserExecutor, &node, &NodeInputs::single("1|2\n3|4|5"))
            .await
            .unwrap();
        assert_eq!(out["headers"], json!(["col1", "col2", "col3"]));
        assert_eq!(out["rows"][1], json!(["3", "4", "5"]));
    }

    #[tokio::test]
    async fn calculator_uses_handles_then_positions() {
        let node = NodeSpec::new("calc", "calculator").with("expression", "a - b");
        let by_handle = NodeInputs::new(vec![named("b", json!(10)), named("a", json!(3))]);
        assert_eq!(run(&CalculatorExecutor, &node, &by_handle).await.unwrap(), json!(-7));

        let default = NodeSpec::new("calc", "calculator");
        let positional = NodeInputs::new(vec![named("x", json!("2")), named("y", json!(2.5))]);
        assert_eq!(run(&CalculatorExecutor, &default, &positional).await.unwrap(), json!(4.5));
    }

    #[tokio::test]
    async fn calculator_rejects_unsafe_expressions() {
        let node = NodeSpec::new("calc", "calculator").with("expression", "open('x')");
        let err = run(&CalculatorExecutor, &node, &NodeInputs::default()).await.unwrap_err();
        assert!(matches!(err, WeftError::Expression(_)));
    }
}
