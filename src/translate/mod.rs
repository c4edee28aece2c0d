// Subtitle translation
//
// Backends translate one block of text at a time:
// - OpenAI: chat completions
// - Ollama: local `/api/generate` in JSON mode
//
// `SubtitleTranslator` never fails. Blocks the backend cannot translate keep their
// original text and the outcome records how many fell back.

pub mod common;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub use common::{is_working_language, language_code_to_name};
use crate::config::{TranslateConfig, TranslationProvider};
use crate::error::Result;
use crate::subtitle::{normalize_lines, parse_srt, render_blocks};

/// Stop calling a backend that has failed this many times in a row without any success
const MAX_CONSECUTIVE_FAILURES: usize = 3;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    /// Translate a single block of text into `target_language`
    async fn translate(&self, text: &str, target_language: &str) -> Result<String>;

    /// Check credentials and reachability
    async fn check_availability(&self) -> Result<()>;
}

/// Factory for creating translation backends
pub struct TranslatorFactory;

impl TranslatorFactory {
    pub fn create_backend(config: TranslateConfig) -> Result<Arc<dyn TranslationBackend>> {
        info!("Using {:?} translation backend ({})", config.provider, config.model());
        Ok(match config.provider {
            TranslationProvider::OpenAI => Arc::new(openai::OpenAIBackend::new(config)?),
            TranslationProvider::Ollama => Arc::new(ollama::OllamaBackend::new(config)?),
        })
    }
}

/// Result of translating a subtitle document
#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    pub text: String,
    pub translated_blocks: usize,
    pub fallback_blocks: usize,
    /// Last backend failure, if any block fell back
    pub reason: Option<String>,
}

impl TranslationOutcome {
    fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            translated_blocks: 0,
            fallback_blocks: 0,
            reason: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.fallback_blocks > 0 || self.reason.is_some()
    }

    /// Human-readable note for task warnings
    pub fn warning(&self) -> Option<String> {
        if !self.is_degraded() {
            return None;
        }
        let reason = self.reason.as_deref().unwrap_or("unknown error");
        Some(if self.translated_blocks == 0 {
            format!("Translation unavailable, subtitles kept in English: {}", reason)
        } else {
            format!(
                "{} of {} subtitle blocks kept in English: {}",
                self.fallback_blocks,
                self.fallback_blocks + self.translated_blocks,
                reason
            )
        })
    }
}

/// Translates the text lines of an SRT document, leaving indices and timings intact
pub struct SubtitleTranslator {
    backend: Arc<dyn TranslationBackend>,
}

impl SubtitleTranslator {
    pub fn new(backend: Arc<dyn TranslationBackend>) -> Self {
        Self { backend }
    }

    pub async fn translate_srt(&self, srt: &str, target_language: &str) -> TranslationOutcome {
        if is_working_language(target_language) {
            info!("Target language is {}, no translation needed", target_language);
            return TranslationOutcome::unchanged(srt);
        }

        let mut blocks = match parse_srt(srt) {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!("Cannot translate unparseable subtitles: {}", e);
                return TranslationOutcome {
                    reason: Some(e.to_string()),
                    ..TranslationOutcome::unchanged(srt)
                };
            }
        };

        info!(
            "Translating {} subtitle blocks to {}",
            blocks.len(),
            language_code_to_name(target_language)
        );

        let mut outcome = TranslationOutcome::unchanged(srt);
        let mut consecutive_failures = 0;

        for block in blocks.iter_mut() {
            if outcome.translated_blocks == 0 && consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                outcome.fallback_blocks += 1;
                continue;
            }

            match self.backend.translate(&block.text(), target_language).await {
                Ok(translated) if !normalize_lines(&translated).is_empty() => {
                    block.lines = normalize_lines(&translated);
                    outcome.translated_blocks += 1;
                    consecutive_failures = 0;
                }
                Ok(_) => {
                    warn!("Empty translation for block {}, keeping original", block.index);
                    outcome.fallback_blocks += 1;
                    outcome.reason = Some("empty translation received".to_string());
                    consecutive_failures += 1;
                }
                Err(e) => {
                    warn!("Translation failed for block {}, keeping original: {}", block.index, e);
                    outcome.fallback_blocks += 1;
                    outcome.reason = Some(e.to_string());
                    consecutive_failures += 1;
                }
            }
        }

        if outcome.translated_blocks > 0 {
            outcome.text = render_blocks(&blocks);
        }

        info!(
            "Translation finished: {} translated, {} kept original",
            outcome.translated_blocks, outcome.fallback_blocks
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubtitlerError;

    const SRT: &str = "1\n00:00:00,000 --> 00:00:01,000\nHello\n\n\
                       2\n00:00:01,000 --> 00:00:02,500\nGood\nbye\n\n";

    fn translator(mock: MockTranslationBackend) -> SubtitleTranslator {
        SubtitleTranslator::new(Arc::new(mock))
    }

    #[tokio::test]
    async fn test_working_language_is_identity() {
        let mut mock = MockTranslationBackend::new();
        mock.expect_translate().never();

        let outcome = translator(mock).translate_srt(SRT, "en").await;
        assert_eq!(outcome.text, SRT);
        assert!(!outcome.is_degraded());
    }

    #[tokio::test]
    async fn test_backend_failure_returns_original_bytes() {
        let mut mock = MockTranslationBackend::new();
        mock.expect_translate()
            .returning(|_, _| Err(SubtitlerError::Translation("connection refused".to_string())));

        let outcome = translator(mock).translate_srt(SRT, "es").await;
        assert_eq!(outcome.text, SRT);
        assert_eq!(outcome.translated_blocks, 0);
        assert_eq!(outcome.fallback_blocks, 2);
        assert!(outcome.warning().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_timings() {
        let mut mock = MockTranslationBackend::new();
        mock.expect_translate().returning(|text, language| {
            assert_eq!(language, "es");
            match text {
                "Hello" => Ok("Hola".to_string()),
                _ => Err(SubtitlerError::Translation("rate limited".to_string())),
            }
        });

        let outcome = translator(mock).translate_srt(SRT, "es").await;
        assert_eq!(
            outcome.text,
            "1\n00:00:00,000 --> 00:00:01,000\nHola\n\n\
             2\n00:00:01,000 --> 00:00:02,500\nGood\nbye\n\n"
        );
        assert_eq!(outcome.translated_blocks, 1);
        assert_eq!(outcome.fallback_blocks, 1);
        assert!(outcome.is_degraded());
    }

    #[tokio::test]
    async fn test_block_lines_are_joined_before_translation() {
        let mut mock = MockTranslationBackend::new();
        mock.expect_translate()
            .withf(|text, _| text == "Good bye")
            .times(1)
            .returning(|_, _| Ok("Adiós".to_string()));
        mock.expect_translate()
            .withf(|text, _| text == "Hello")
            .times(1)
            .returning(|_, _| Ok("Hola".to_string()));

        let outcome = translator(mock).translate_srt(SRT, "es").await;
        assert!(outcome.text.contains("\nAdiós\n"));
        assert!(!outcome.is_degraded());
    }

    #[tokio::test]
    async fn test_failing_backend_is_not_called_forever() {
        let srt: String = (1..=10)
            .map(|i| format!("{}\n00:00:0{},000 --> 00:00:0{},500\nline {}\n\n", i, i - 1, i - 1, i))
            .collect();

        let mut mock = MockTranslationBackend::new();
        mock.expect_translate()
            .times(MAX_CONSECUTIVE_FAILURES)
            .returning(|_, _| Err(SubtitlerError::Translation("no key".to_string())));

        let outcome = translator(mock).translate_srt(&srt, "fr").await;
        assert_eq!(outcome.text, srt);
        assert_eq!(outcome.fallback_blocks, 10);
    }
}
