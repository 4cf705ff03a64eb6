//! Built-in rule-based tokenizer

use super::{Sentence, Token, TokenizationResult, Tokenizer};

const SENTENCE_END: &[&str] = &[".", "!", "?"];

/// Word and punctuation tokenizer without POS tags or lemmas.
///
/// Words are runs of alphanumeric characters, with inner `'` or `-` joined
/// when followed by another alphanumeric. Every other non-whitespace
/// character is a token of its own. A sentence ends after `.`, `!` or `?`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTokenizer;

impl SimpleTokenizer {
    pub fn new() -> Self {
        Self
    }

    fn spans(text: &str) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut chars = text.char_indices().peekable();

        while let Some((start, c)) = chars.next() {
            if c.is_whitespace() {
                continue;
            }
            if !c.is_alphanumeric() {
                spans.push((start, start + c.len_utf8()));
                continue;
            }

            let mut end = start + c.len_utf8();
            while let Some(&(index, next)) = chars.peek() {
                if next.is_alphanumeric() {
                    end = index + next.len_utf8();
                    chars.next();
                } else if (next == '\'' || next == '-')
                    && text[index + 1..].chars().next().is_some_and(char::is_alphanumeric)
                {
                    chars.next();
                } else {
                    break;
                }
            }
            spans.push((start, end));
        }

        spans
    }
}

impl Tokenizer for SimpleTokenizer {
    fn split(&self, text: &str) -> TokenizationResult<Vec<Sentence>> {
        let spans = Self::spans(text);
        let mut sentences = Vec::new();
        let mut current: Sentence = Vec::new();
        let mut previous_end = 0;

        for (i, &(start, end)) in spans.iter().enumerate() {
            let next_start = spans.get(i + 1).map_or(text.len(), |&(s, _)| s);
            let value = &text[start..end];

            current.push(
                Token::new(start, end, value)
                    .with_before(&text[previous_end..start])
                    .with_after(&text[end..next_start]),
            );
            previous_end = end;

            if SENTENCE_END.contains(&value) {
                sentences.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            sentences.push(current);
        }

        Ok(sentences)
    }
}
