//! Prompts for the LLM-backed translator and the vision OCR engine.
//!
//! Kept in one place so wording changes touch a single file and tests can
//! inspect the prompts without a live model.
//!
//! Callers can override the translation prompt via
//! [`crate::config::TranslatorConfig::system_prompt`].

/// Translation system prompt. `{target}` is replaced with the target language.
pub const TRANSLATION_SYSTEM_PROMPT: &str = "You are a professional translator. \
Translate the following English text into {target}. \
Ignore random characters or symbols, and focus on the meaningful content. \
Provide the result in markdown format. \
You don't need to translate the previous context.";

/// System prompt for a given target language.
pub fn translation_system_prompt(target_language: &str) -> String {
    TRANSLATION_SYSTEM_PROMPT.replace("{target}", target_language)
}

/// User message carrying the previous chunk's tail. Only sent when non-empty.
pub fn context_message(context: &str) -> String {
    format!("Previous context for reference: {context}")
}

/// User message carrying the chunk to translate.
pub fn text_message(text: &str) -> String {
    format!("Text to translate: {text}")
}

/// System prompt for transcribing a page image to plain text.
///
/// `{lang}` is replaced with the Tesseract-style language code the task was
/// submitted with (e.g. "eng", "deu").
pub const OCR_SYSTEM_PROMPT: &str = r#"You are an OCR engine. Transcribe all text visible in the page image.

Rules:
- The page is written in the language with code "{lang}".
- Output the text exactly as printed, in natural reading order.
- Keep paragraph breaks as blank lines.
- Do NOT translate, summarise, or correct the text.
- Do NOT add commentary, headings, or markdown fences.
- If the page has no readable text, output nothing."#;

pub fn ocr_system_prompt(lang: &str) -> String {
    OCR_SYSTEM_PROMPT.replace("{lang}", lang)
}
