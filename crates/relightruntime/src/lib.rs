//! Prediction runtime
//!
//! Stages request images, patches the workflow, drives the engine and
//! re-encodes whatever the engine writes to the output directory.

mod config;
pub mod optimise;
mod patch;
mod predictor;
pub mod seed;
pub mod staging;
mod weights;

pub use config::PredictorConfig;
pub use patch::{update_workflow, WorkflowPatch};
pub use predictor::Predictor;
pub use weights::{check_weights, WeightReport};
