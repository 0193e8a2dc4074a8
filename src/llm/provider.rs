use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::config::LLMConfig;
use crate::types::{AppError, AppResult, LLMRequest, LLMResponse};

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;
}

/// Configuration for the generation provider
pub struct LLMProviderConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl From<&LLMConfig> for LLMProviderConfig {
    fn from(config: &LLMConfig) -> Self {
        Self {
            name: config.provider.to_lowercase(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

pub struct LLM {
    adapter: Box<dyn LLMAdapter>,
    provider_name: String,
}

impl LLM {
    pub fn new(provider: LLMProviderConfig) -> AppResult<Self> {
        let adapter: Box<dyn LLMAdapter> = match provider.name.as_str() {
            // Every supported backend speaks the OpenAI chat completions dialect;
            // they differ only in base URL and whether a key is required.
            "openai" | "openai-compatible" | "ollama" | "vllm" => Box::new(
                crate::llm::openai::OpenAIAdapter::new(
                    &provider.base_url,
                    &provider.api_key,
                    provider.timeout,
                )?,
            ),
            other => {
                return Err(AppError::Internal(format!(
                    "Unsupported LLM provider: {}",
                    other
                )))
            }
        };

        info!(provider = %provider.name, base_url = %provider.base_url, "LLM provider configured");

        Ok(Self {
            adapter,
            provider_name: provider.name,
        })
    }

    pub fn from_config(config: &LLMConfig) -> AppResult<Self> {
        Self::new(LLMProviderConfig::from(config))
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }
}

#[async_trait]
impl LLMAdapter for LLM {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.adapter.create_chat_completion(request).await
    }
}
