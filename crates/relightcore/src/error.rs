use crate::ImageSlot;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelightError {
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Output error: {0}")]
    Output(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Workflow file not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Bound nodes missing from workflow: {}", .0.join(", "))]
    UnboundNodes(Vec<String>),
}

#[derive(Error, Debug, Clone)]
pub enum InputError {
    #[error("Unsupported output format: {0} (expected webp, jpg or png)")]
    UnsupportedFormat(String),

    #[error("Output quality must be between 0 and 100, got {0}")]
    QualityOutOfRange(i64),

    #[error("Input image not found: {0}")]
    ImageNotFound(String),

    #[error("Invalid data URI: {0}")]
    InvalidDataUri(String),

    #[error("Failed to fetch input image {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("A {slot} image is required: node {node_id} loads it from the input directory")]
    MissingImage { slot: ImageSlot, node_id: String },
}

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Engine unreachable at {address}: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("Engine rejected the workflow: {0}")]
    Rejected(String),

    #[error("Workflow execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {seconds}s waiting for {what}")]
    Timeout { what: String, seconds: u64 },

    #[error("Unexpected engine response: {0}")]
    Protocol(String),

    #[error("Failed to start engine: {0}")]
    Spawn(String),
}
