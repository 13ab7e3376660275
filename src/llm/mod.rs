pub mod models;
pub mod prompt;
pub mod providers;

use async_trait::async_trait;
use models::{Completion, Prompt};
use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum LlmError {
    ConnectionError(String),
    ResponseError(String),
    ConfigError(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::ResponseError(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::ConfigError(msg) => write!(f, "LLM configuration error: {}", msg),
        }
    }
}

impl Error for LlmError {}

/// Turns a prompt into candidate SQL queries.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate_sql(&self, api_key: &str, prompt: &Prompt) -> Result<Completion, LlmError>;
}
