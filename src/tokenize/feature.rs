//! Feature preparation for the scorer and the example files

use super::Token;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Token values dropped when `ignore_punctuation` is set
pub const PUNCTUATION: &[&str] = &[".", ",", ";", ":", "?", "!", "\"", "'", "(", ")", "[", "]", "{", "}"];

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid output descriptor {0:?}, expected name,ngram,caseless,ignore_punct,pos,lemma,sentences")]
    Format(String),
}

/// How tokens are turned into feature strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    pub n_gram_size: usize,
    pub caseless: bool,
    pub ignore_punctuation: bool,
    pub add_pos_tags: bool,
    pub uses_lemma: bool,
    /// Segments are sentences instead of paragraphs
    pub uses_sentences: bool,
}

impl Default for FeatureDescriptor {
    fn default() -> Self {
        Self {
            n_gram_size: 1,
            caseless: false,
            ignore_punctuation: false,
            add_pos_tags: false,
            uses_lemma: false,
            uses_sentences: false,
        }
    }
}

impl FeatureDescriptor {
    /// Feature strings of a token sequence: filtered, transformed, then n-grams
    pub fn prepare_tokens(&self, tokens: &[Token]) -> Vec<String> {
        let values: Vec<String> = tokens
            .iter()
            .filter(|token| !(self.ignore_punctuation && PUNCTUATION.contains(&token.value.as_str())))
            .map(|token| {
                let value = if self.uses_lemma {
                    token.lemma_or_value()
                } else {
                    token.value.as_str()
                };
                let value = if self.caseless {
                    value.to_lowercase()
                } else {
                    value.to_string()
                };
                match (&token.pos, self.add_pos_tags) {
                    (Some(pos), true) => format!("{}_{}", value, pos),
                    _ => value,
                }
            })
            .collect();

        build_n_grams(&values, self.n_gram_size)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DescriptorError> {
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DescriptorError> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

/// All n-grams of sizes 1 to `n`, joined with `_`, smallest size first
pub fn build_n_grams(values: &[String], n: usize) -> Vec<String> {
    if n <= 1 {
        return values.to_vec();
    }

    let mut grams = Vec::new();
    for size in 1..=n.min(values.len()) {
        for window in values.windows(size) {
            grams.push(window.join("_"));
        }
    }
    grams
}

/// An output descriptor with its name, parsed from
/// `name,ngram,caseless,ignore_punct,pos,lemma,sentences`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedDescriptor {
    pub name: String,
    pub descriptor: FeatureDescriptor,
}

impl FromStr for NamedDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format_error = || DescriptorError::Format(s.to_string());
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [name, n_gram_size, flags @ ..] = parts.as_slice() else {
            return Err(format_error());
        };
        if name.is_empty() || flags.len() != 5 {
            return Err(format_error());
        }

        let n_gram_size: usize = n_gram_size.parse().map_err(|_| format_error())?;
        let flags = flags
            .iter()
            .map(|flag| match *flag {
                "0" => Ok(false),
                "1" => Ok(true),
                _ => Err(format_error()),
            })
            .collect::<Result<Vec<bool>, _>>()?;

        Ok(Self {
            name: name.to_string(),
            descriptor: FeatureDescriptor {
                n_gram_size: n_gram_size.max(1),
                caseless: flags[0],
                ignore_punctuation: flags[1],
                add_pos_tags: flags[2],
                uses_lemma: flags[3],
                uses_sentences: flags[4],
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> Vec<Token> {
        vec![
            Token::new(0, 3, "The").with_pos("DT"),
            Token::new(4, 9, "Gods").with_pos("NNS"),
            Token::new(9, 10, ",").with_pos(","),
            Token::new(11, 15, "flew").with_pos("VBD"),
        ]
    }

    #[test]
    fn bigrams_include_unigrams_first() {
        let values: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(build_n_grams(&values, 2), vec!["a", "b", "c", "a_b", "b_c"]);
        assert_eq!(build_n_grams(&values[..1], 3), vec!["a"]);
        assert!(build_n_grams(&[], 2).is_empty());
    }

    #[test]
    fn caseless_without_punctuation_with_pos() {
        let descriptor = FeatureDescriptor {
            caseless: true,
            ignore_punctuation: true,
            add_pos_tags: true,
            ..Default::default()
        };
        assert_eq!(descriptor.prepare_tokens(&tokens()), vec!["the_DT", "gods_NNS", "flew_VBD"]);
    }

    #[test]
    fn lemma_falls_back_to_value() {
        let mut tokens = tokens();
        tokens[1].lemma = Some("god".into());
        let descriptor = FeatureDescriptor { uses_lemma: true, ..Default::default() };
        assert_eq!(descriptor.prepare_tokens(&tokens), vec!["The", "god", ",", "flew"]);
    }

    #[test]
    fn parses_cli_descriptor() {
        let named: NamedDescriptor = "s_out,2,1,0,0,1,1".parse().unwrap();
        assert_eq!(named.name, "s_out");
        assert_eq!(named.descriptor.n_gram_size, 2);
        assert!(named.descriptor.caseless);
        assert!(!named.descriptor.ignore_punctuation);
        assert!(named.descriptor.uses_lemma);
        assert!(named.descriptor.uses_sentences);

        assert!("p_out,1,0,0".parse::<NamedDescriptor>().is_err());
        assert!("p_out,1,0,0,1,yes,0".parse::<NamedDescriptor>().is_err());
    }

    #[test]
    fn save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feature_descriptor.json");
        let descriptor = FeatureDescriptor { n_gram_size: 3, uses_sentences: true, ..Default::default() };
        descriptor.save(&path).unwrap();
        assert_eq!(FeatureDescriptor::load(&path).unwrap(), descriptor);
    }
}
