//! Core abstractions for the relight predictor
//!
//! This crate provides the workflow graph model, the node bindings that say
//! where request parameters land, the prediction request types and the
//! progress events. It has no network or process dependencies.

mod bindings;
mod error;
pub mod events;
mod request;
mod workflow;

pub use bindings::NodeBindings;
pub use error::{EngineError, InputError, RelightError, WorkflowError};
pub use events::*;
pub use request::{ImageSlot, ImageSource, OutputFormat, OutputQuality, PredictionInput};
pub use workflow::{NodeId, NodeMeta, Workflow, WorkflowNode, WEIGHT_EXTENSIONS};

/// Result type for relight operations
pub type Result<T> = std::result::Result<T, RelightError>;
