use crate::{RelightError, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Node identifier as used by the engine's API-format workflow ("1", "8", ...)
pub type NodeId = String;

/// File extensions the engine loads model weights from
pub const WEIGHT_EXTENSIONS: &[&str] = &[".safetensors", ".ckpt", ".pt", ".pth", ".bin", ".onnx"];

/// API-format workflow graph: node id to node record.
///
/// Serialises to exactly the JSON object the engine accepts as a prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Workflow {
    nodes: BTreeMap<NodeId, WorkflowNode>,
}

impl Workflow {
    /// Load a workflow from a static JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelightError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                RelightError::Workflow(WorkflowError::NotFound(path.display().to_string()))
            }
            _ => RelightError::Io(e),
        })?;

        let workflow: Workflow = serde_json::from_str(&text).map_err(|e| {
            WorkflowError::Invalid(format!("{}: {}", path.display(), e))
        })?;

        tracing::debug!("Loaded workflow {} ({} nodes)", path.display(), workflow.len());
        Ok(workflow)
    }

    pub fn from_value(value: Value) -> Result<Self, WorkflowError> {
        serde_json::from_value(value).map_err(|e| WorkflowError::Invalid(e.to_string()))
    }

    pub fn to_value(&self) -> Value {
        // A map of plain structs cannot fail to serialise.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn insert(&mut self, id: impl Into<NodeId>, node: WorkflowNode) {
        self.nodes.insert(id.into(), node);
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut WorkflowNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &WorkflowNode)> {
        self.nodes.iter()
    }

    /// Set one input parameter on one node
    pub fn set_input(
        &mut self,
        node_id: &str,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), WorkflowError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))?;
        node.inputs.insert(name.into(), value.into());
        Ok(())
    }

    /// Weight files the workflow refers to, deduplicated, in node order
    pub fn referenced_weights(&self) -> Vec<String> {
        let mut weights: Vec<String> = Vec::new();
        for node in self.nodes.values() {
            for value in node.inputs.values() {
                let Some(name) = value.as_str() else { continue };
                let lower = name.to_ascii_lowercase();
                let is_weight = WEIGHT_EXTENSIONS.iter().any(|ext| lower.ends_with(ext));
                if is_weight && !weights.iter().any(|w| w == name) {
                    weights.push(name.to_string());
                }
            }
        }
        weights
    }
}

/// One node of the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub class_type: String,

    #[serde(default)]
    pub inputs: Map<String, Value>,

    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<NodeMeta>,

    /// Fields the engine understands that we pass through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowNode {
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs: Map::new(),
            meta: None,
            extra: Map::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.meta = Some(NodeMeta {
            title: Some(title.into()),
        });
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.title.as_deref())
    }

    pub fn input_str(&self, name: &str) -> Option<&str> {
        self.inputs.get(name).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}
