//! Token model

use serde::{Deserialize, Serialize};

/// One token of tokenized text.
///
/// `start`/`end` are byte offsets into the text the paragraph was cut from.
/// `before` is the text between the previous token and this one, `after` the
/// text following this token up to the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub start: usize,
    pub end: usize,
    pub value: String,
    pub pos: Option<String>,
    pub lemma: Option<String>,
    pub before: String,
    pub after: String,
}

impl Token {
    pub fn new(start: usize, end: usize, value: impl Into<String>) -> Self {
        Self {
            start,
            end,
            value: value.into(),
            pos: None,
            lemma: None,
            before: String::new(),
            after: String::new(),
        }
    }

    pub fn with_pos(mut self, pos: impl Into<String>) -> Self {
        self.pos = Some(pos.into());
        self
    }

    pub fn with_before(mut self, before: impl Into<String>) -> Self {
        self.before = before.into();
        self
    }

    pub fn with_after(mut self, after: impl Into<String>) -> Self {
        self.after = after.into();
        self
    }

    /// Lemma, or the surface value when the tokenizer produced none
    pub fn lemma_or_value(&self) -> &str {
        self.lemma.as_deref().unwrap_or(&self.value)
    }
}

/// A sentence: tokens in text order
pub type Sentence = Vec<Token>;

/// Rebuild the text of a paragraph from its tokens.
///
/// `before + value` of every token, then the `after` of the last one.
pub fn reconstruct(sentences: &[Sentence]) -> String {
    let mut text = String::new();
    let mut last_after = "";
    for token in sentences.iter().flatten() {
        text.push_str(&token.before);
        text.push_str(&token.value);
        last_after = &token.after;
    }
    text.push_str(last_after);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconstruct_uses_trailing_after_of_last_token() {
        let sentences = vec![
            vec![
                Token::new(1, 6, "Hello").with_before(" ").with_after(""),
                Token::new(6, 7, "!").with_after(" "),
            ],
            vec![Token::new(8, 10, "Hi").with_before(" ").with_after("\n")],
        ];
        assert_eq!(reconstruct(&sentences), " Hello! Hi\n");
        assert_eq!(reconstruct(&[]), "");
    }

    #[test]
    fn lemma_falls_back_to_value() {
        let mut token = Token::new(0, 4, "mice");
        assert_eq!(token.lemma_or_value(), "mice");
        token.lemma = Some("mouse".into());
        assert_eq!(token.lemma_or_value(), "mouse");
    }
}
