//! Paragraph extraction from rendered section text
//!
//! Rendered text is split at blank lines. Inside each paragraph every
//! whitespace run that is at least two characters long or contains a newline
//! collapses to a single space, and link spans are remapped onto the
//! collapsed text. Paragraphs that still look like markup, or that are too
//! short to carry prose, are counted and dropped.

use super::render::{LinkSpan, RenderedText};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Paragraphs with fewer space-separated tokens are skipped
pub const MIN_PARAGRAPH_TOKENS: usize = 5;
/// Paragraphs with fewer characters are skipped
pub const MIN_PARAGRAPH_CHARS: usize = 15;
/// Paragraphs whose share of ASCII letters is lower are skipped
pub const MIN_LETTER_RATIO: f64 = 0.5;

fn paragraph_break() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s*\n\s*\n\s*").expect("valid paragraph regex"))
}

fn whitespace_run() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s{2,}|\n").expect("valid whitespace regex"))
}

fn markup_residue() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\{\{|\}\}|\{\||\|\}|\[\[|\]\]|\|-|^\||align=|class=|style=|cellpadding=|cellspacing=|border=|<div|<span|<table|</",
        )
        .expect("valid residue regex")
    })
}

/// One prose paragraph with links relative to its own text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    pub text: String,
    pub links: Vec<LinkSpan>,
}

/// Result of splitting one section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParagraphSplit {
    pub paragraphs: Vec<Paragraph>,
    /// Non-empty chunks rejected by the prose filters
    pub skipped: usize,
}

/// Why a paragraph was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MarkupResidue,
    TooFewTokens,
    TooShort,
    LowLetterRatio,
}

/// Check a collapsed paragraph against the prose filters.
pub fn reject_reason(text: &str) -> Option<Rejection> {
    if markup_residue().is_match(text) {
        return Some(Rejection::MarkupResidue);
    }
    if text.split(' ').count() < MIN_PARAGRAPH_TOKENS {
        return Some(Rejection::TooFewTokens);
    }

    let chars = text.chars().count();
    if chars < MIN_PARAGRAPH_CHARS {
        return Some(Rejection::TooShort);
    }

    let letters = text.chars().filter(char::is_ascii_alphabetic).count();
    if (letters as f64) / (chars as f64) < MIN_LETTER_RATIO {
        return Some(Rejection::LowLetterRatio);
    }

    None
}

/// Collapse separator whitespace of one chunk.
///
/// Returns the collapsed text and, for every byte offset of the chunk plus
/// its end, the corresponding offset in the collapsed text. Separator bytes
/// map to the position just before the inserted space.
fn collapse(chunk: &str) -> (String, Vec<usize>) {
    let mut clean = String::with_capacity(chunk.len());
    let mut offsets = vec![0usize; chunk.len() + 1];
    let mut cursor = 0;

    for run in whitespace_run().find_iter(chunk) {
        copy_plain(chunk, cursor, run.start(), &mut clean, &mut offsets);
        offsets[run.start()..run.end()].fill(clean.len());
        cursor = run.end();
        if !clean.is_empty() && cursor < chunk.len() {
            clean.push(' ');
        }
    }
    copy_plain(chunk, cursor, chunk.len(), &mut clean, &mut offsets);
    offsets[chunk.len()] = clean.len();

    (clean, offsets)
}

fn copy_plain(chunk: &str, from: usize, to: usize, clean: &mut String, offsets: &mut [usize]) {
    let base = clean.len();
    clean.push_str(&chunk[from..to]);
    for (i, offset) in offsets[from..to].iter_mut().enumerate() {
        *offset = base + i;
    }
}

/// Split rendered section text into filtered paragraphs.
pub fn split_paragraphs(rendered: &RenderedText) -> ParagraphSplit {
    let text = rendered.text.as_str();

    let mut bounds = Vec::new();
    let mut cursor = 0;
    for separator in paragraph_break().find_iter(text) {
        bounds.push((cursor, separator.start()));
        cursor = separator.end();
    }
    bounds.push((cursor, text.len()));

    let mut split = ParagraphSplit::default();

    for (start, end) in bounds {
        if start == end {
            continue;
        }
        let chunk = &text[start..end];
        let (clean, offsets) = collapse(chunk);
        if clean.is_empty() {
            continue;
        }

        if let Some(reason) = reject_reason(&clean) {
            debug!(?reason, paragraph = %clean, "skipping paragraph");
            split.skipped += 1;
            continue;
        }

        let mut links = Vec::new();
        for link in &rendered.links {
            if link.start < start || link.end > end {
                continue;
            }

            let mapped_start = offsets[link.start - start];
            let mapped_end = offsets[link.end - start];
            let expected = whitespace_run().replace_all(&link.title, " ");

            match clean.get(mapped_start..mapped_end) {
                Some(slice) if slice == expected => links.push(LinkSpan {
                    start: mapped_start,
                    end: mapped_end,
                    title: slice.to_string(),
                    ..link.clone()
                }),
                slice => debug!(
                    title = %link.title,
                    rendered = ?slice,
                    "dropping link whose text no longer matches"
                ),
            }
        }

        split.paragraphs.push(Paragraph { text: clean, links });
    }

    split
}
