//! Defensive code extraction from model output.
//!
//! The generation backend returns free text with no contractual structure, so
//! extraction is a pure function from text to code, unit-testable without any
//! live model. Fenced blocks are preferred; prose-wrapped and bare code are
//! recovered by line scanning.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// The response contained nothing that looks like code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no code-like content in model output")]
pub struct ExtractionFailure;

static TAGGED_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:python|py)[ \t]*\r?\n(.*?)```").expect("tagged fence regex is valid")
});

static ANY_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[^\n`]*\r?\n(.*?)```").expect("fence regex is valid")
});

static CODE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(import\s|from\s+\w|def\s+\w|class\s+\w|[A-Za-z_][A-Za-z0-9_.\[\]'\x22]*\s*=[^=]|print\()")
        .expect("code line regex is valid")
});

/// Extract runnable code from a model response.
///
/// Tried in order: all `python`-tagged fenced blocks (concatenated), the first
/// fenced block of any tag, the suffix starting at the first code-like line,
/// and finally the whole response when any line looks like code.
pub fn extract_code(text: &str) -> Result<String, ExtractionFailure> {
    let tagged: Vec<&str> = TAGGED_FENCE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|group| group.as_str()))
        .collect();
    if !tagged.is_empty() {
        let joined = tagged
            .iter()
            .map(|block| block.trim_end())
            .collect::<Vec<_>>()
            .join("\n\n");
        return finish(&joined);
    }

    if let Some(caps) = ANY_FENCE.captures(text) {
        let block = caps.get(1).map(|group| group.as_str()).unwrap_or_default();
        return finish(block);
    }

    if let Some(offset) = first_code_line_offset(text) {
        return finish(&text[offset..]);
    }

    Err(ExtractionFailure)
}

fn first_code_line_offset(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if CODE_LINE.is_match(line.trim_start()) {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

fn finish(code: &str) -> Result<String, ExtractionFailure> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(ExtractionFailure);
    }
    Ok(trimmed.to_string())
}
