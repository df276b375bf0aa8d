use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// History entry the engine keeps for a finished prompt
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptHistory {
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,

    #[serde(default)]
    pub status: Option<PromptStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<OutputImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptStatus {
    #[serde(default)]
    pub status_str: Option<String>,

    #[serde(default)]
    pub completed: bool,

    /// `[name, payload]` pairs such as `["execution_error", {...}]`
    #[serde(default)]
    pub messages: Vec<(String, Value)>,
}

impl PromptHistory {
    /// Finished successfully. Entries without a status block predate status
    /// tracking and only appear once the prompt is done.
    pub fn is_complete(&self) -> bool {
        match &self.status {
            Some(status) => status.completed || status.status_str.as_deref() == Some("success"),
            None => true,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.status_str.as_deref())
            .map(|s| s == "error")
            .unwrap_or(false)
    }

    /// Human-readable execution errors reported by the engine
    pub fn error_messages(&self) -> Vec<String> {
        let Some(status) = &self.status else {
            return Vec::new();
        };

        status
            .messages
            .iter()
            .filter(|(name, _)| name == "execution_error" || name == "execution_interrupted")
            .map(|(name, payload)| {
                let node_id = payload.get("node_id").and_then(|v| v.as_str()).unwrap_or("?");
                let node_type = payload.get("node_type").and_then(|v| v.as_str()).unwrap_or("?");
                let message = payload
                    .get("exception_message")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .unwrap_or(name.as_str());
                format!("{} (node {}): {}", node_type, node_id, message)
            })
            .collect()
    }

    /// Nodes the engine served from cache instead of running
    pub fn cached_nodes(&self) -> Vec<String> {
        let Some(status) = &self.status else {
            return Vec::new();
        };

        status
            .messages
            .iter()
            .filter(|(name, _)| name == "execution_cached")
            .filter_map(|(_, payload)| payload.get("nodes").and_then(|n| n.as_array()))
            .flatten()
            .filter_map(|n| n.as_str().map(str::to_string))
            .collect()
    }

    /// Output images of type "output", across all nodes
    pub fn output_images(&self) -> Vec<&OutputImage> {
        self.outputs
            .values()
            .flat_map(|o| o.images.iter())
            .filter(|img| img.kind == "output")
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> PromptHistory {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_success_history() {
        let history = parse(json!({
            "outputs": {
                "12": {"images": [
                    {"filename": "ComfyUI_00001_.png", "subfolder": "", "type": "output"},
                    {"filename": "preview.png", "subfolder": "", "type": "temp"}
                ]}
            },
            "status": {"status_str": "success", "completed": true, "messages": [
                ["execution_start", {"prompt_id": "p"}],
                ["execution_cached", {"nodes": ["1", "4"], "prompt_id": "p"}]
            ]}
        }));

        assert!(history.is_complete());
        assert!(!history.is_error());
        assert_eq!(history.cached_nodes(), vec!["1", "4"]);
        let images = history.output_images();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].filename, "ComfyUI_00001_.png");
    }

    #[test]
    fn test_error_history() {
        let history = parse(json!({
            "outputs": {},
            "status": {"status_str": "error", "completed": false, "messages": [
                ["execution_error", {
                    "node_id": "8", "node_type": "LoadImage",
                    "exception_message": "Invalid image file: image2.png\n"
                }]
            ]}
        }));

        assert!(history.is_error());
        assert!(!history.is_complete());
        assert_eq!(
            history.error_messages(),
            vec!["LoadImage (node 8): Invalid image file: image2.png"]
        );
    }

    #[test]
    fn test_history_without_status_counts_as_complete() {
        let history = parse(json!({"outputs": {}}));
        assert!(history.is_complete());
    }
}
