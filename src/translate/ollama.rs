use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use super::TranslationBackend;
use super::common::{clean_translation_response, json_prompt, language_code_to_name};
use crate::config::TranslateConfig;
use crate::error::{Result, SubtitlerError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
    pub done: bool,
}

/// Local Ollama server via `/api/generate` in JSON mode
pub struct OllamaBackend {
    client: Client,
    config: TranslateConfig,
}

impl OllamaBackend {
    pub fn new(config: TranslateConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl TranslationBackend for OllamaBackend {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String> {
        let request = GenerateRequest {
            model: self.config.model().to_string(),
            prompt: json_prompt(text, &language_code_to_name(target_language), target_language),
            stream: false,
            format: "json".to_string(),
        };

        let url = self.url("/api/generate");
        debug!("Sending translation request to: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SubtitlerError::Translation(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SubtitlerError::Translation(format!(
                "Ollama API error {}: {}",
                status, error_text
            )));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| SubtitlerError::Translation(format!("Failed to parse response: {}", e)))?;
        debug!("Raw Ollama response: {}", generated.response);

        let translated = clean_translation_response(&generated.response);
        if translated.is_empty() {
            return Err(SubtitlerError::Translation("Empty translation received".to_string()));
        }
        Ok(translated)
    }

    /// Check if Ollama is available and the model is loaded
    async fn check_availability(&self) -> Result<()> {
        let response = self
            .client
            .post(self.url("/api/show"))
            .json(&json!({ "name": self.config.model() }))
            .send()
            .await
            .map_err(|e| SubtitlerError::Translation(format!("Failed to connect to Ollama: {}", e)))?;

        if response.status().is_success() {
            info!("Ollama model '{}' is available", self.config.model());
            Ok(())
        } else {
            Err(SubtitlerError::Translation(format!(
                "Ollama model '{}' not found. Please pull the model first: ollama pull {}",
                self.config.model(), self.config.model()
            )))
        }
    }
}
