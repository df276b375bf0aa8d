use crate::{ImageSlot, NodeId, Workflow, WorkflowError};
use serde::{Deserialize, Serialize};

/// Where request parameters land in the workflow graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBindings {
    /// Image loader nodes for subject, background and light, in slot order
    pub images: [NodeId; 3],

    /// Text-encode node that receives the negative prompt
    #[serde(default)]
    pub negative_prompt: Option<NodeId>,

    /// Sampler node that receives the seed
    #[serde(default)]
    pub seed: Option<NodeId>,
}

impl Default for NodeBindings {
    fn default() -> Self {
        Self {
            images: ["1".to_string(), "8".to_string(), "9".to_string()],
            negative_prompt: None,
            seed: None,
        }
    }
}

impl NodeBindings {
    pub fn image_node(&self, slot: ImageSlot) -> &str {
        &self.images[slot.index() - 1]
    }

    pub fn with_negative_prompt(mut self, node_id: impl Into<NodeId>) -> Self {
        self.negative_prompt = Some(node_id.into());
        self
    }

    pub fn with_seed(mut self, node_id: impl Into<NodeId>) -> Self {
        self.seed = Some(node_id.into());
        self
    }

    /// Every bound node id, images first
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.images
            .iter()
            .chain(self.negative_prompt.iter())
            .chain(self.seed.iter())
            .map(String::as_str)
    }

    /// Check that every bound node exists in the workflow
    pub fn validate(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        let missing: Vec<String> = self
            .node_ids()
            .filter(|id| !workflow.contains(id))
            .map(str::to_string)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::UnboundNodes(missing))
        }
    }
}
