//! Prompt assembly shared by per-scope answers and final synthesis

use super::HandlerOptions;
use crate::retrieval::SearchResult;

/// Longest passage excerpt placed in a prompt
const MAX_PASSAGE_CHARS: usize = 1500;

/// Append caller presentation preferences to a base system prompt
pub fn render_system_prompt(base: &str, options: &HandlerOptions) -> String {
    let mut prompt = base.trim().to_string();
    if let Some(tone) = &options.tone {
        prompt.push_str(&format!("\nRespond in a {tone} tone."));
    }
    if let Some(language) = &options.language {
        prompt.push_str(&format!("\nAnswer in {language}."));
    }
    match options.citation_style.as_deref() {
        Some("none") => prompt.push_str("\nDo not include citation markers."),
        Some(style) => prompt.push_str(&format!(
            "\nCite sources with their bracketed markers using {style} style."
        )),
        None => prompt.push_str("\nCite sources with their bracketed markers, e.g. [1]."),
    }
    prompt
}

/// Number passages `[1]..[n]` and pair them with the question
pub fn build_user_prompt(question: &str, context: &[SearchResult]) -> String {
    let mut prompt = String::from("Context:\n");
    for (i, result) in context.iter().enumerate() {
        prompt.push_str(&citation_line(i + 1, result));
        prompt.push('\n');
    }
    prompt.push_str("\nQuestion: ");
    prompt.push_str(question.trim());
    prompt
}

fn citation_line(marker: usize, result: &SearchResult) -> String {
    let mut header = format!("[{marker}] {}", result.display_title());
    if let Some(page) = result.page_number {
        header.push_str(&format!(" (p. {page})"));
    }
    format!("{header}\n{}", result.preview(MAX_PASSAGE_CHARS))
}
