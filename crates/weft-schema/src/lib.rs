//! Wire format for Weft pipelines.
//!
//! Decodes the flat node/edge lists the canvas submits into typed
//! [`NodeSpec`] / [`EdgeSpec`] values, enforces boundary size limits, and
//! loads saved pipelines from JSON files.
//!
//! # Example
//! ```
//! let json = r#"{"nodes": [{"id": "a", "type": "customInput"}], "edges": []}"#;
//! let pipeline = weft_schema::parse_pipeline(json).unwrap();
//! assert_eq!(pipeline.name, "Untitled Pipeline");
//! assert_eq!(pipeline.nodes[0].node_type, "customInput");
//! ```

pub mod limits;
mod spec;

use std::path::Path;

pub use limits::{check_graph_limits, MAX_EDGES, MAX_NAME_CHARS, MAX_NODES};
pub use spec::*;

use weft_types::Result;

/// Decode a pipeline document and check its size limits.
pub fn parse_pipeline(source: &str) -> Result<PipelineData> {
    let pipeline: PipelineData = serde_json::from_str(source)?;
    pipeline.check_limits()?;
    Ok(pipeline)
}

/// Read a pipeline document from a JSON file.
pub fn load_pipeline(path: &Path) -> Result<PipelineData> {
    let source = std::fs::read_to_string(path)?;
    let pipeline = parse_pipeline(&source)?;
    tracing::debug!(
        path = %path.display(),
        nodes = pipeline.nodes.len(),
        edges = pipeline.edges.len(),
        "Pipeline loaded"
    );
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use weft_types::WeftError;

    #[test]
    fn parse_canvas_payload_ignores_display_fields() {
        let json = r#"{
            "name": "Support triage",
            "nodes": [
                {"id": "in", "type": "customInput", "position": {"x": 10, "y": 20},
                 "width": 240, "selected": true, "data": {"inputName": "query"}},
                {"id": "out", "type": "customOutput", "data": {}}
            ],
            "edges": [
                {"id": "e1", "source": "in", "target": "out",
                 "sourceHandle": "in-value", "targetHandle": "out-value", "animated": true}
            ]
        }"#;
        let p = parse_pipeline(json).unwrap();
        assert_eq!(p.name, "Support triage");
        assert_eq!(p.nodes.len(), 2);
        assert_eq!(p.nodes[0].position, Position { x: 10.0, y: 20.0 });
        assert_eq!(p.nodes[0].str_field("inputName").as_deref(), Some("query"));
        assert_eq!(p.edges[0].source_handle.as_deref(), Some("in-value"));
        assert_eq!(p.edges[0].target_handle.as_deref(), Some("out-value"));
    }

    #[test]
    fn node_without_data_gets_empty_map() {
        let p = parse_pipeline(r#"{"nodes": [{"id": "x", "type": "text"}]}"#).unwrap();
        assert!(p.nodes[0].data.is_empty());
        assert!(p.edges.is_empty());
    }

    #[test]
    fn too_many_nodes_rejected() {
        let nodes: Vec<NodeSpec> = (0..=MAX_NODES)
            .map(|i| NodeSpec::new(format!("n{i}"), "text"))
            .collect();
        let err = PipelineData::new(nodes, vec![]).check_limits().unwrap_err();
        assert!(matches!(
            err,
            WeftError::LimitExceeded { actual: 1001, max: 1000, .. }
        ));
    }

    #[test]
    fn too_many_edges_rejected() {
        let edges: Vec<EdgeSpec> = (0..=MAX_EDGES).map(|_| EdgeSpec::new("a", "b")).collect();
        assert!(check_graph_limits(&[], &edges).is_err());
        assert!(check_graph_limits(&[], &edges[..MAX_EDGES]).is_ok());
    }

    #[test]
    fn long_name_rejected() {
        let mut p = PipelineData::new(vec![], vec![]);
        p.name = "x".repeat(MAX_NAME_CHARS + 1);
        assert!(p.check_limits().is_err());
    }

    #[test]
    fn approval_flag_accepts_bool_or_string() {
        let a = NodeSpec::new("a", "llm").with("require_approval", true);
        let b = NodeSpec::new("b", "llm").with("require_approval", "true");
        let c = NodeSpec::new("c", "llm");
        assert!(a.requires_approval());
        assert!(b.requires_approval());
        assert!(!c.requires_approval());
    }

    #[test]
    fn extra_handles_default_to_empty() {
        let node = NodeSpec::new("j", "join")
            .with("extraInputs", serde_json::json!(["context", "history"]));
        assert_eq!(node.extra_inputs().len(), 2);
        assert!(node.extra_outputs().is_empty());
    }

    #[test]
    fn str_or_falls_back_on_blank() {
        let node = NodeSpec::new("d", "delay")
            .with("delaySeconds", 2)
            .with("delayUnit", "  ");
        assert_eq!(node.str_or("delaySeconds", "1"), "2");
        assert_eq!(node.str_or("delayUnit", "Seconds"), "Seconds");
    }

    #[test]
    fn layout_direction_parses_strictly() {
        assert_eq!("LR".parse::<LayoutDirection>().unwrap(), LayoutDirection::LR);
        assert_eq!("TB".parse::<LayoutDirection>().unwrap(), LayoutDirection::TB);
        assert!("diagonal".parse::<LayoutDirection>().is_err());
        assert_eq!(LayoutDirection::default().to_string(), "LR");
    }

    #[test]
    fn execute_request_never_serializes_secrets() {
        let mut env = weft_types::Secrets::new();
        env.insert("GITHUB_TOKEN", "ghp_secret");
        let req = ExecuteRequest::new(vec![], vec![]).with_env(env);
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("ghp_secret"));

        let decoded: ExecuteRequest = serde_json::from_str(
            r#"{"nodes": [], "edges": [], "pipeline_id": "p1", "env": {"GITHUB_TOKEN": "t"}}"#,
        )
        .unwrap();
        assert_eq!(decoded.pipeline_id.as_deref(), Some("p1"));
        assert_eq!(decoded.env.get("GITHUB_TOKEN"), Some("t"));
    }

    #[test]
    fn load_pipeline_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"nodes": [{{"id": "a", "type": "customInput"}}], "edges": []}}"#
        )
        .unwrap();
        let p = load_pipeline(file.path()).unwrap();
        assert_eq!(p.nodes.len(), 1);
    }

    #[test]
    fn load_pipeline_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_pipeline(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, WeftError::Io(_)));
    }
}
