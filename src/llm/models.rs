use serde::{Deserialize, Serialize};

/// System and user messages sent to the chat model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Candidates returned for one prompt. The first choice is the primary query.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub query: String,
    pub alternative_query: Option<String>,
    pub usage: Option<TokenUsage>,
}
