//! Graph-execution engine adapters
//!
//! HTTP client for a running ComfyUI server and a supervisor that starts one
//! as a child process.

mod client;
mod history;
mod process;

pub use client::{ClientConfig, ComfyClient};
pub use history::{NodeOutput, OutputImage, PromptHistory, PromptStatus};
pub use process::{ComfyServer, ServerOptions, OFFLINE_ENV};

use async_trait::async_trait;
use relightcore::{EngineError, EventEmitter, Workflow};

/// The operations the predictor needs from an execution engine
#[async_trait]
pub trait Engine: Send + Sync {
    /// Queue a workflow for execution, returning its prompt id
    async fn queue_prompt(&self, workflow: &Workflow, client_id: &str) -> Result<String, EngineError>;

    /// Block until the prompt has finished executing
    async fn wait_for_completion(
        &self,
        prompt_id: &str,
        events: &EventEmitter,
    ) -> Result<PromptHistory, EngineError>;

    /// Drop anything still pending in the engine's queue
    async fn clear_queue(&self) -> Result<(), EngineError>;

    /// Returns true if the engine is responding
    async fn health_check(&self) -> bool;
}
