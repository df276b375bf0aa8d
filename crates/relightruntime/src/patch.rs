use relightcore::{ImageSlot, NodeBindings, Workflow, WorkflowError};

/// Per-request values written into the workflow
#[derive(Debug, Clone, Default)]
pub struct WorkflowPatch {
    /// Staged file names in slot order; `None` leaves the node untouched
    pub image_filenames: [Option<String>; 3],
    pub negative_prompt: String,
    pub seed: u64,
}

/// Slots whose bound node reads a file from the input directory
///
/// The input directory is emptied before every run, so these slots need an
/// image in the request.
pub fn required_slots(workflow: &Workflow, bindings: &NodeBindings) -> Vec<ImageSlot> {
    ImageSlot::ALL
        .into_iter()
        .filter(|slot| {
            workflow
                .node(bindings.image_node(*slot))
                .map(|node| node.class_type == "LoadImage")
                .unwrap_or(false)
        })
        .collect()
}

/// Write request values into the bound nodes
pub fn update_workflow(
    workflow: &mut Workflow,
    bindings: &NodeBindings,
    patch: &WorkflowPatch,
) -> Result<(), WorkflowError> {
    for slot in ImageSlot::ALL {
        if let Some(filename) = &patch.image_filenames[slot.index() - 1] {
            workflow.set_input(bindings.image_node(slot), "image", filename.as_str())?;
        }
    }

    if let Some(node_id) = &bindings.negative_prompt {
        workflow.set_input(node_id, "text", format!("nsfw, {}", patch.negative_prompt))?;
    }

    if let Some(node_id) = &bindings.seed {
        workflow.set_input(node_id, "seed", patch.seed)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relightcore::WorkflowNode;
    use serde_json::json;

    fn workflow() -> Workflow {
        let mut workflow = Workflow::default();
        for id in ["1", "8", "9"] {
            workflow.insert(id, WorkflowNode::new("LoadImage").with_input("image", "placeholder.png"));
        }
        workflow.insert("3", WorkflowNode::new("KSampler").with_input("seed", 0));
        workflow.insert("7", WorkflowNode::new("CLIPTextEncode").with_input("text", ""));
        workflow
    }

    #[test]
    fn test_missing_slots_leave_nodes_untouched() {
        let mut workflow = workflow();
        let patch = WorkflowPatch {
            image_filenames: [Some("image1.jpg".to_string()), None, Some("image3.png".to_string())],
            ..WorkflowPatch::default()
        };

        update_workflow(&mut workflow, &NodeBindings::default(), &patch).unwrap();

        assert_eq!(workflow.node("1").unwrap().input_str("image"), Some("image1.jpg"));
        assert_eq!(workflow.node("8").unwrap().input_str("image"), Some("placeholder.png"));
        assert_eq!(workflow.node("9").unwrap().input_str("image"), Some("image3.png"));
    }

    #[test]
    fn test_default_bindings_ignore_prompt_and_seed() {
        let mut workflow = workflow();
        let patch = WorkflowPatch {
            negative_prompt: "blurry".to_string(),
            seed: 99,
            ..WorkflowPatch::default()
        };

        update_workflow(&mut workflow, &NodeBindings::default(), &patch).unwrap();

        assert_eq!(workflow.node("7").unwrap().inputs["text"], json!(""));
        assert_eq!(workflow.node("3").unwrap().inputs["seed"], json!(0));
    }

    #[test]
    fn test_bound_prompt_and_seed() {
        let mut workflow = workflow();
        let bindings = NodeBindings::default().with_negative_prompt("7").with_seed("3");
        let patch = WorkflowPatch {
            negative_prompt: "blurry".to_string(),
            seed: 1234,
            ..WorkflowPatch::default()
        };

        update_workflow(&mut workflow, &bindings, &patch).unwrap();

        assert_eq!(workflow.node("7").unwrap().input_str("text"), Some("nsfw, blurry"));
        assert_eq!(workflow.node("3").unwrap().inputs["seed"], json!(1234));
    }

    #[test]
    fn test_required_slots_follow_load_image_nodes() {
        let mut workflow = workflow();
        assert_eq!(
            required_slots(&workflow, &NodeBindings::default()),
            ImageSlot::ALL.to_vec()
        );

        workflow.insert("9", WorkflowNode::new("EmptyImage").with_input("width", 512));
        assert_eq!(
            required_slots(&workflow, &NodeBindings::default()),
            vec![ImageSlot::Subject, ImageSlot::Background]
        );
    }

    #[test]
    fn test_unknown_bound_node() {
        let mut workflow = workflow();
        let bindings = NodeBindings::default().with_seed("404");
        let err = update_workflow(&mut workflow, &bindings, &WorkflowPatch::default()).unwrap_err();
        assert!(matches!(err, WorkflowError::NodeNotFound(id) if id == "404"));
    }
}
