//! Tokenizer capability
//!
//! A tokenizer turns paragraphs into sentences of offset-exact tokens. The
//! backend is pluggable through [`Tokenizer`]; [`SimpleTokenizer`] is the
//! built-in one. Every result is checked to reconstruct its input exactly.

pub mod feature;
pub mod pool;
pub mod simple;
pub mod token;

pub use feature::{DescriptorError, FeatureDescriptor, NamedDescriptor, PUNCTUATION};
pub use pool::TokenizerPool;
pub use simple::SimpleTokenizer;
pub use token::{reconstruct, Sentence, Token};

/// Errors for a single paragraph; never fatal to a batch
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizationError {
    #[error("tokens do not reconstruct the input (first difference at byte {position})")]
    RoundTrip { position: usize },

    #[error("token {index} spans {start}..{end} but its value does not match the text there")]
    SpanMismatch { index: usize, start: usize, end: usize },

    #[error("tokenizer backend failed: {0}")]
    Backend(String),

    #[error("tokenizer pool is shut down")]
    PoolClosed,
}

pub type TokenizationResult<T> = Result<T, TokenizationError>;

/// Check that `sentences` reconstruct `text` byte for byte and that every
/// token's span points at its value. Offsets are relative to `text`.
pub fn validate_round_trip(text: &str, sentences: &[Sentence]) -> TokenizationResult<()> {
    let rebuilt = reconstruct(sentences);
    if rebuilt != text {
        let position = rebuilt
            .bytes()
            .zip(text.bytes())
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| rebuilt.len().min(text.len()));
        return Err(TokenizationError::RoundTrip { position });
    }

    for (index, token) in sentences.iter().flatten().enumerate() {
        if text.get(token.start..token.end) != Some(token.value.as_str()) {
            return Err(TokenizationError::SpanMismatch {
                index,
                start: token.start,
                end: token.end,
            });
        }
    }
    Ok(())
}

/// Tokenizer backend
///
/// Implementations must be thread-safe (Send + Sync): tokenizer workers
/// share one instance.
pub trait Tokenizer: Send + Sync {
    /// Split `text` into sentences. Offsets are relative to the start of `text`.
    fn split(&self, text: &str) -> TokenizationResult<Vec<Sentence>>;

    /// Tokenize one paragraph, validate it and shift offsets by `offset`
    fn tokenize_paragraph(&self, offset: usize, text: &str) -> TokenizationResult<Vec<Sentence>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let mut sentences = self.split(text)?;
        validate_round_trip(text, &sentences)?;

        for token in sentences.iter_mut().flatten() {
            token.start += offset;
            token.end += offset;
        }
        Ok(sentences)
    }

    /// Tokenize `(offset, text)` paragraphs; one result per paragraph, in order
    fn tokenize(&self, paragraphs: &[(usize, &str)]) -> Vec<TokenizationResult<Vec<Sentence>>> {
        paragraphs
            .iter()
            .map(|&(offset, text)| self.tokenize_paragraph(offset, text))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Splits on single spaces and forgets the whitespace
    struct LossyTokenizer;

    impl Tokenizer for LossyTokenizer {
        fn split(&self, text: &str) -> TokenizationResult<Vec<Sentence>> {
            let mut offset = 0;
            let tokens = text
                .split(' ')
                .map(|word| {
                    let token = Token::new(offset, offset + word.len(), word);
                    offset += word.len() + 1;
                    token
                })
                .collect();
            Ok(vec![tokens])
        }
    }

    #[test]
    fn lossy_tokenizer_fails_round_trip_for_that_paragraph_only() {
        let results = LossyTokenizer.tokenize(&[(0, "one two"), (8, "three")]);
        assert_eq!(results[0], Err(TokenizationError::RoundTrip { position: 3 }));
        let second = results[1].as_ref().unwrap();
        assert_eq!(second[0][0].start, 8);
        assert_eq!(second[0][0].end, 13);
    }

    #[test]
    fn empty_paragraph_has_no_sentences() {
        assert_eq!(LossyTokenizer.tokenize_paragraph(4, ""), Ok(Vec::new()));
    }

    #[test]
    fn span_mismatch_is_detected() {
        let sentences = vec![vec![Token::new(1, 3, "ab")]];
        assert_eq!(
            validate_round_trip("ab", &sentences),
            Err(TokenizationError::SpanMismatch { index: 0, start: 1, end: 3 })
        );
    }
}
