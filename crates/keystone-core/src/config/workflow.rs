//! Workflow orchestration configuration.

use serde::{Deserialize, Serialize};

/// Settings for the workflow orchestrator and its handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Buffer size for handlers wrapped in the asynchronous adapter.
    #[serde(default = "default_async_buffer")]
    pub async_buffer_size: usize,
    /// Whether the user lifecycle handler runs behind the asynchronous adapter.
    #[serde(default = "default_true")]
    pub async_lifecycle_handler: bool,
    /// Source module stamped on events the orchestrator publishes.
    #[serde(default = "default_source")]
    pub source_module: String,
    /// Whether the periodic expired-session sweep runs.
    #[serde(default = "default_true")]
    pub session_sweep_enabled: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            async_buffer_size: default_async_buffer(),
            async_lifecycle_handler: default_true(),
            source_module: default_source(),
            session_sweep_enabled: default_true(),
        }
    }
}

fn default_async_buffer() -> usize {
    256
}

fn default_true() -> bool {
    true
}

fn default_source() -> String {
    "workflow".to_string()
}
