use crate::config::LlmConfig;
use crate::llm::models::{Completion, Prompt, TokenUsage};
use crate::llm::{LlmError, SqlGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

/// OpenAI-compatible chat completion endpoint.
pub struct RemoteLlmProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
    max_tokens: usize,
    candidates: usize,
}

#[derive(Serialize, Debug)]
struct PromptRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    max_tokens: usize,
    stop: [&'static str; 2],
    n: usize,
    top_p: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
}

#[derive(Serialize, Debug)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct PromptResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl RemoteLlmProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        if config.api_url.trim().is_empty() {
            return Err(LlmError::ConfigError(
                "API URL is required for remote LLM provider".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            candidates: config.candidates,
        })
    }
}

/// Strips markdown code fences the model sometimes wraps around its answer.
pub fn extract_sql(content: &str) -> String {
    let trimmed = content.trim();
    let inner = if let Some(start) = trimmed.find("```sql") {
        &trimmed[start + 6..]
    } else if let Some(start) = trimmed.find("```") {
        &trimmed[start + 3..]
    } else {
        return trimmed.to_string();
    };

    match inner.find("```") {
        Some(end) => inner[..end].trim().to_string(),
        None => inner.trim().to_string(),
    }
}

#[async_trait]
impl SqlGenerator for RemoteLlmProvider {
    async fn generate_sql(&self, api_key: &str, prompt: &Prompt) -> Result<Completion, LlmError> {
        let request = PromptRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: &prompt.system,
                },
                Message {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: 0.0,
            max_tokens: self.max_tokens,
            stop: ["#", ";"],
            n: self.candidates,
            top_p: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        };

        info!("Sending request to {} with model: {}", self.api_url, self.model);

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = match response.text().await {
                Ok(body) => format!(" - Response body: {}", body),
                Err(_) => String::new(),
            };

            error!("API responded with status code: {}{}", status, error_body);
            return Err(LlmError::ResponseError(format!(
                "API responded with status code: {}{}",
                status, error_body
            )));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| LlmError::ResponseError(format!("Failed to read response body: {}", e)))?;

        debug!("Raw response: {}", response_text);

        let prompt_response: PromptResponse = serde_json::from_str(&response_text)
            .map_err(|e| LlmError::ResponseError(format!("Failed to parse response: {}", e)))?;

        let mut candidates = prompt_response
            .choices
            .into_iter()
            .map(|choice| extract_sql(choice.message.content.as_deref().unwrap_or_default()));

        let query = candidates
            .next()
            .ok_or_else(|| LlmError::ResponseError("No choices in response".to_string()))?;
        let alternative_query = candidates.next().filter(|q| !q.is_empty());

        Ok(Completion {
            query,
            alternative_query,
            usage: prompt_response.usage,
        })
    }
}
