//! OpenAI chat-completions backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::TextGenerator;
use crate::domain::{CodeAidError, Result};
use crate::env;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

const DEFAULT_MODEL: &str = "gpt-4o-mini-2024-07-18";

/// OpenAI backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API key; requests fail fast when absent.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        OpenAiConfig {
            api_key: env::optional("OPENAI_API_KEY"),
            model: env::var_or("CODEAID_MODEL", DEFAULT_MODEL),
            base_url: env::var_or("CODEAID_LLM_BASE_URL", OPENAI_API_URL),
            timeout_secs: env::parse_or("CODEAID_LLM_TIMEOUT_SECS", 120),
        }
    }
}

impl OpenAiConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

/// OpenAI chat client. Build once and share.
pub struct OpenAiChat {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiChat {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("codeaid/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CodeAidError::Generator(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(OpenAiConfig::from_env())
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn build_request<'a>(&'a self, developer: &'a str, user: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "developer",
                    content: developer,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiChat {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn chat(&self, developer_instruction: &str, user_content: &str) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| CodeAidError::Generator("OPENAI_API_KEY not set".to_string()))?;

        let request = self.build_request(developer_instruction, user_content);
        let response = self
            .client
            .post(&self.config.base_url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CodeAidError::Generator(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CodeAidError::Generator(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(CodeAidError::Generator(format!(
                    "OpenAI API error: {}",
                    err.error.message
                )));
            }
            return Err(CodeAidError::Generator(format!(
                "OpenAI API error ({}): {}",
                status, body
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| CodeAidError::Generator(format!("failed to parse response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CodeAidError::Generator("response contained no content".to_string()))
    }
}
