use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::TranslationBackend;
use super::common::{chat_prompt, clean_translation_response, language_code_to_name};
use crate::config::TranslateConfig;
use crate::error::{Result, SubtitlerError};

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_completion_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI chat completions backend
pub struct OpenAIBackend {
    client: Client,
    config: TranslateConfig,
    api_key: Option<String>,
}

impl OpenAIBackend {
    pub fn new(config: TranslateConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let api_key = config.resolve_api_key();

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            SubtitlerError::Translation(format!(
                "OpenAI API key not set; provide translate.api_key or {}",
                self.config.api_key_env
            ))
        })
    }
}

#[async_trait]
impl TranslationBackend for OpenAIBackend {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String> {
        let api_key = self.api_key()?;
        let (system, user) = chat_prompt(text, &language_code_to_name(target_language));

        let request = ChatRequest {
            model: self.config.model().to_string(),
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            max_completion_tokens: self.config.max_completion_tokens,
            temperature: self.config.temperature,
        };

        let url = format!("{}/chat/completions", self.config.endpoint().trim_end_matches('/'));
        debug!("Sending translation request to: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SubtitlerError::Translation(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SubtitlerError::Translation(format!(
                "OpenAI API error {}: {}",
                status, error_text
            )));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| SubtitlerError::Translation(format!("Failed to parse response: {}", e)))?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        debug!("Raw OpenAI response: {}", content);

        let translated = clean_translation_response(&content);
        if translated.is_empty() {
            return Err(SubtitlerError::Translation("Empty translation received".to_string()));
        }
        Ok(translated)
    }

    async fn check_availability(&self) -> Result<()> {
        let api_key = self.api_key()?;
        let url = format!("{}/models", self.config.endpoint().trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| SubtitlerError::Translation(format!("Failed to connect to OpenAI: {}", e)))?;

        if response.status().is_success() {
            info!("OpenAI API is reachable");
            Ok(())
        } else {
            Err(SubtitlerError::Translation(format!(
                "OpenAI API returned {}",
                response.status()
            )))
        }
    }
}
