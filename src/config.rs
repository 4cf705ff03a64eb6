//! Run configuration
//!
//! Every tunable of the build, export and serving runs, with defaults that
//! match a full English Wikipedia run. Files are YAML; missing fields keep
//! their defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings of the build (`prepare`) and `export` runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Page-parse workers
    pub parse_workers: usize,
    /// Tokenize workers
    pub tokenize_workers: usize,
    /// Capacity of the reader → parse queue
    pub page_queue_capacity: usize,
    /// Capacity of the parse → tokenize queue
    pub paragraph_queue_capacity: usize,
    /// Capacity of the queues feeding the writer and the token shards
    pub writer_queue_capacity: usize,
    /// Pages per knowledge base transaction
    pub write_batch_size: usize,
    /// Token shard files (`tokens_{i}.gz`, by `article_id % shard_count`)
    pub shard_count: usize,
    /// Decompression read size in bytes
    pub chunk_size: usize,
    /// Dump namespaces that are read
    pub namespaces: BTreeSet<i64>,
    /// Held-out split fractions (dev, test, …); the rest is training data
    pub split_fractions: Vec<f64>,
    pub min_sense_evidence: u64,
    pub min_matching_mentions: u64,
    pub redirect_passes: usize,
    /// Category whose subtree holds the disambiguation pages
    pub seed_category: String,
    pub shuffle_seed: u64,
    /// Template rule table replacing the built-in rules
    pub template_table: Option<String>,
    /// Examples per output file before a new file is started
    pub examples_per_file: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parse_workers: 6,
            tokenize_workers: 6,
            page_queue_capacity: 1000,
            paragraph_queue_capacity: 1000,
            writer_queue_capacity: 10_000,
            write_batch_size: 500,
            shard_count: 4,
            chunk_size: 900_000,
            namespaces: BTreeSet::from([0]),
            split_fractions: vec![0.15, 0.15],
            min_sense_evidence: 14,
            min_matching_mentions: 5,
            redirect_passes: 3,
            seed_category: "Disambiguation_pages".to_string(),
            shuffle_seed: 0,
            template_table: None,
            examples_per_file: 3_000_000,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let counts = [
            ("parse_workers", self.parse_workers),
            ("tokenize_workers", self.tokenize_workers),
            ("page_queue_capacity", self.page_queue_capacity),
            ("paragraph_queue_capacity", self.paragraph_queue_capacity),
            ("writer_queue_capacity", self.writer_queue_capacity),
            ("write_batch_size", self.write_batch_size),
            ("shard_count", self.shard_count),
            ("chunk_size", self.chunk_size),
            ("examples_per_file", self.examples_per_file),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be positive", name)));
        }
        if self.split_fractions.iter().any(|f| *f < 0.0) || self.split_fractions.iter().sum::<f64>() >= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "split_fractions must be non-negative and sum below 1, got {:?}",
                self.split_fractions
            )));
        }
        Ok(())
    }
}

/// Settings of the serving side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Disambiguation workers, each with its own sense URL cache
    pub workers: usize,
    pub tokenizer_workers: usize,
    pub queue_capacity: usize,
    /// Sense URLs cached per worker
    pub url_cache_capacity: usize,
    pub base_url: String,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            tokenizer_workers: 2,
            queue_capacity: 64,
            url_cache_capacity: 10_000,
            base_url: "https://en.wikipedia.org/wiki/".to_string(),
        }
    }
}

impl ServingConfig {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(&fs::read_to_string(path)?)?)
    }
}

/// Both sections of a config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub serving: ServingConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(&fs::read_to_string(path)?)?;
        config.pipeline.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_a_full_run() {
        let config = PipelineConfig::default();
        assert_eq!(config.parse_workers, 6);
        assert_eq!(config.shard_count, 4);
        assert_eq!(config.split_fractions, vec![0.15, 0.15]);
        assert_eq!(config.seed_category, "Disambiguation_pages");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wikisense.yaml");
        fs::write(
            &path,
            "pipeline:\n  shard_count: 2\n  split_fractions: [0.1]\nserving:\n  workers: 8\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.pipeline.shard_count, 2);
        assert_eq!(config.pipeline.split_fractions, vec![0.1]);
        assert_eq!(config.pipeline.tokenize_workers, 6);
        assert_eq!(config.serving.workers, 8);
        assert_eq!(config.serving.base_url, "https://en.wikipedia.org/wiki/");
    }

    #[test]
    fn rejects_zero_workers_and_full_splits() {
        let config = PipelineConfig { parse_workers: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = PipelineConfig { split_fractions: vec![0.6, 0.4], ..Default::default() };
        assert!(config.validate().is_err());
    }
}
