//! Wikisense: Wikipedia-derived sense inventory and disambiguation engine
//!
//! Builds a knowledge base of ambiguous phrases and their senses from a
//! Wikipedia dump, exports labelled training examples, and resolves
//! ambiguous phrases in free text to sense URLs.
//!
//! # Core Concepts
//!
//! - **Group title**: a normalized ambiguous phrase, named by a disambiguation page
//! - **Sense**: one `(article, section)` a group title can refer to
//! - **Example**: a paragraph or sentence labelled with one sense of a group
//!
//! # Example
//!
//! ```
//! use wikisense::matcher::PhraseIndex;
//! use wikisense::tokenize::{SimpleTokenizer, Tokenizer};
//!
//! let index = PhraseIndex::new(vec![("mercury".to_string(), vec![0, 1])]);
//! let tokens = SimpleTokenizer.split("Mercury is hot.").unwrap().concat();
//! assert_eq!(index.find(&tokens).len(), 1);
//! ```

pub mod category;
pub mod config;
pub mod corpus;
pub mod inventory;
pub mod markup;
pub mod matcher;
pub mod partition;
pub mod pipeline;
pub mod resolve;
pub mod serving;
pub mod storage;
pub mod title;
pub mod tokenize;

pub use config::{Config, ConfigError, PipelineConfig, ServingConfig};
pub use pipeline::{run_build, run_export, BuildInputs, BuildStats, ExportStats, PipelineError, PipelineResult};
pub use serving::{DisambiguatedSpan, Disambiguator, PriorScorer, Scorer, ServingError, ServingResult};
pub use storage::{KnowledgeBase, SenseLookup, StorageError, StorageResult};
pub use tokenize::{FeatureDescriptor, SimpleTokenizer, Token, Tokenizer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
