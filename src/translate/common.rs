use serde::{Deserialize, Serialize};

/// Language spoken by every transcription
pub fn is_working_language(code: &str) -> bool {
    let primary = code.split('-').next().unwrap_or(code);
    primary.eq_ignore_ascii_case(crate::WORKING_LANGUAGE)
}

/// Structured reply requested from JSON-mode backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub text: String,
}

/// Convert language code to full language name for clearer prompts
pub fn language_code_to_name(code: &str) -> String {
    let primary = code.split('-').next().unwrap_or(code).to_ascii_lowercase();
    let name = match primary.as_str() {
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" => "Chinese",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "ru" => "Russian",
        "it" => "Italian",
        "pt" => "Portuguese",
        "pl" => "Polish",
        "nl" => "Dutch",
        "tr" => "Turkish",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "th" => "Thai",
        "vi" => "Vietnamese",
        "sv" => "Swedish",
        "da" => "Danish",
        "no" => "Norwegian",
        "fi" => "Finnish",
        "he" => "Hebrew",
        "hu" => "Hungarian",
        "cs" => "Czech",
        "sk" => "Slovak",
        "bg" => "Bulgarian",
        "hr" => "Croatian",
        "el" => "Greek",
        "ro" => "Romanian",
        "uk" => "Ukrainian",
        "id" => "Indonesian",
        "ms" => "Malay",
        "fa" => "Persian",
        "ur" => "Urdu",
        "bn" => "Bengali",
        "ta" => "Tamil",
        "te" => "Telugu",
        "sw" => "Swahili",
        "yo" => "Yoruba",
        "ig" => "Igbo",
        "ha" => "Hausa",
        "en" => "English",
        _ => return code.to_string(),
    };
    name.to_string()
}

/// System and user messages for chat-style backends
pub fn chat_prompt(text: &str, language_name: &str) -> (String, String) {
    (
        format!(
            "You are a professional translator. Translate the given text to {}. \
             Return ONLY the translated text, no explanations or additional content.",
            language_name
        ),
        format!("Translate this text to {}: {}", language_name, text),
    )
}

/// Single prompt for completion-style backends that answer in JSON
pub fn json_prompt(text: &str, language_name: &str, language_code: &str) -> String {
    format!(
        "You are a professional subtitle translator.\n\
         Translate the following subtitle line to {} ONLY.\n\
         The target language is: {} (language code: {})\n\
         Keep it short enough to read on screen.\n\
         Do not include any explanations, alternatives, or text in other languages.\n\
         Return the result in JSON format as {{\"text\":\"translated text\"}}.\n\
         \n\
         {}",
        language_name, language_name, language_code, text
    )
}

/// Extract the translation from a chatty model reply
pub fn clean_translation_response(response: &str) -> String {
    let trimmed = response.trim();

    if let Ok(result) = serde_json::from_str::<TranslationResult>(trimmed) {
        return result.text.trim().to_string();
    }

    let lines: Vec<&str> = trimmed.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    for &line in &lines {
        if line.starts_with("Here are")
            || line.starts_with("Here is")
            || line.starts_with("Option")
            || line.starts_with("**Option")
            || line.starts_with("- ")
            || line.starts_with("* ")
        {
            continue;
        }
        if line.starts_with("**") && line.ends_with("**") {
            continue;
        }

        let line = line.strip_prefix("Translation:").map(str::trim).unwrap_or(line);
        if !line.is_empty() {
            return strip_quotes(line).to_string();
        }
    }

    lines.first().map(|l| l.to_string()).unwrap_or_default()
}

fn strip_quotes(line: &str) -> &str {
    line.strip_prefix('"')
        .and_then(|l| l.strip_suffix('"'))
        .unwrap_or(line)
}
