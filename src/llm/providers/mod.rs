pub mod remote;

use crate::config::LlmConfig;
use crate::llm::{LlmError, SqlGenerator};
use std::sync::Arc;

pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn SqlGenerator>, LlmError> {
    match config.backend.as_str() {
        "openai" | "remote" => Ok(Arc::new(remote::RemoteLlmProvider::new(config)?)),
        other => Err(LlmError::ConfigError(format!(
            "Unsupported LLM backend: {}",
            other
        ))),
    }
}
