//! Dataset partitioner
//!
//! Splits the example paragraphs of every sense into train and held-out sets
//! so that no paragraph ends up in more than one split.

use crate::storage::{Dataset, ParagraphKey};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("held-out fractions must be non-negative and sum below 1, got {0:?}")]
    InvalidFractions(Vec<f64>),
}

pub type PartitionResult<T> = Result<T, PartitionError>;

/// Example paragraphs of one sense
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenseParagraphs {
    pub sense_id: usize,
    pub paragraphs: Vec<ParagraphKey>,
}

/// A sense that could not fill its held-out splits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortfall {
    pub sense_id: usize,
    pub wanted: Vec<usize>,
    pub got: Vec<usize>,
}

/// Held-out assignments; every other paragraph is training data
#[derive(Debug, Clone, Default)]
pub struct Partition {
    held_out: HashMap<ParagraphKey, Dataset>,
    pub shortfalls: Vec<Shortfall>,
}

impl Partition {
    pub fn dataset_of(&self, key: &ParagraphKey) -> Dataset {
        self.held_out.get(key).copied().unwrap_or(Dataset::TRAIN)
    }

    pub fn held_out_count(&self) -> usize {
        self.held_out.len()
    }
}

/// Per-split target count: `round_half_even(count × fraction)`
pub fn target_counts(count: usize, fractions: &[f64]) -> Vec<usize> {
    fractions
        .iter()
        .map(|fraction| (count as f64 * fraction).round_ties_even() as usize)
        .collect()
}

#[derive(Debug, Clone)]
pub struct Partitioner {
    fractions: Vec<f64>,
    seed: u64,
}

impl Partitioner {
    /// `fractions` are the held-out splits in order (dev, test, …)
    pub fn new(fractions: Vec<f64>, seed: u64) -> PartitionResult<Self> {
        let valid = fractions.iter().all(|f| *f >= 0.0) && fractions.iter().sum::<f64>() < 1.0;
        if !valid {
            return Err(PartitionError::InvalidFractions(fractions));
        }
        Ok(Self { fractions, seed })
    }

    /// Assign paragraphs to splits.
    ///
    /// Senses are processed from the highest id down. Within a sense the
    /// paragraphs are shuffled; a paragraph already held out for an earlier
    /// sense counts toward that split, one already in training is skipped, and
    /// a fresh one goes to the first split still short of its target. Once
    /// every split is full the rest are training data.
    pub fn partition(&self, mut senses: Vec<SenseParagraphs>) -> Partition {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut assigned: HashMap<ParagraphKey, Dataset> = HashMap::new();
        let mut shortfalls = Vec::new();

        senses.sort_by(|a, b| b.sense_id.cmp(&a.sense_id));

        for sense in senses {
            let mut paragraphs = sense.paragraphs;
            paragraphs.sort_unstable();
            paragraphs.dedup();
            paragraphs.shuffle(&mut rng);

            let wanted = target_counts(paragraphs.len(), &self.fractions);
            let mut got = vec![0usize; wanted.len()];

            for key in paragraphs {
                if let Some(dataset) = assigned.get(&key) {
                    if dataset.0 >= 1 {
                        got[dataset.0 - 1] += 1;
                    }
                    continue;
                }

                let open_split = got.iter().zip(&wanted).position(|(have, want)| have < want);
                let dataset = match open_split {
                    Some(split) => {
                        got[split] += 1;
                        Dataset(split + 1)
                    }
                    None => Dataset::TRAIN,
                };
                assigned.insert(key, dataset);
            }

            if got.iter().sum::<usize>() < wanted.iter().sum::<usize>() {
                warn!(sense_id = sense.sense_id, ?wanted, ?got, "sense did not reach its held-out targets");
                shortfalls.push(Shortfall {
                    sense_id: sense.sense_id,
                    wanted,
                    got,
                });
            }
        }

        assigned.retain(|_, dataset| *dataset != Dataset::TRAIN);
        info!(
            held_out = assigned.len(),
            shortfalls = shortfalls.len(),
            "partitioned example paragraphs"
        );

        Partition {
            held_out: assigned,
            shortfalls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(article_id: u64, count: usize) -> Vec<ParagraphKey> {
        (0..count)
            .map(|p| ParagraphKey::paragraph(article_id, 0, p))
            .collect()
    }

    fn split_sizes(partition: &Partition, paragraphs: &[ParagraphKey]) -> [usize; 3] {
        let mut sizes = [0; 3];
        for key in paragraphs {
            sizes[partition.dataset_of(key).0] += 1;
        }
        sizes
    }

    #[test]
    fn twenty_paragraphs_split_three_three_fourteen() {
        let paragraphs = keys(1, 20);
        let partitioner = Partitioner::new(vec![0.15, 0.15], 7).unwrap();
        let partition = partitioner.partition(vec![SenseParagraphs {
            sense_id: 0,
            paragraphs: paragraphs.clone(),
        }]);

        assert_eq!(split_sizes(&partition, &paragraphs), [14, 3, 3]);
        assert!(partition.shortfalls.is_empty());
    }

    #[test]
    fn rounding_is_half_even() {
        assert_eq!(target_counts(10, &[0.25]), vec![2]);
        assert_eq!(target_counts(14, &[0.25]), vec![4]);
        assert_eq!(target_counts(6, &[0.25, 0.5]), vec![2, 3]);
        assert_eq!(target_counts(14, &[0.15, 0.15]), vec![2, 2]);
    }

    #[test]
    fn shared_paragraphs_keep_one_split() {
        let shared = keys(1, 20);
        let mut second = shared.clone();
        second.extend(keys(2, 20));

        let partitioner = Partitioner::new(vec![0.15, 0.15], 3).unwrap();
        let partition = partitioner.partition(vec![
            SenseParagraphs { sense_id: 0, paragraphs: second.clone() },
            SenseParagraphs { sense_id: 1, paragraphs: shared.clone() },
        ]);

        // sense 1 goes first and claims 3/3 of the shared paragraphs
        assert_eq!(split_sizes(&partition, &shared), [14, 3, 3]);
        // sense 0 needs 6/6 of 40 and reuses the shared held-out ones
        let sizes = split_sizes(&partition, &second);
        assert!(sizes[1] >= 6 && sizes[2] >= 6);
        assert_eq!(sizes.iter().sum::<usize>(), 40);
        assert!(partition.shortfalls.is_empty());
    }

    #[test]
    fn scarcity_is_reported() {
        // senses 1..=4 are too small for any held-out paragraph, so all 11
        // of their paragraphs are training data before sense 0 is reached
        let mut senses: Vec<SenseParagraphs> = (1..=4u64)
            .map(|article| SenseParagraphs {
                sense_id: article as usize,
                paragraphs: keys(article, if article == 4 { 2 } else { 3 }),
            })
            .collect();
        let mut sense0: Vec<ParagraphKey> =
            senses.iter().flat_map(|sense| sense.paragraphs.clone()).collect();
        sense0.extend(keys(5, 3));
        senses.push(SenseParagraphs { sense_id: 0, paragraphs: sense0.clone() });

        let partition = Partitioner::new(vec![0.15, 0.15], 11).unwrap().partition(senses);

        assert_eq!(split_sizes(&partition, &sense0), [11, 2, 1]);
        assert_eq!(
            partition.shortfalls,
            vec![Shortfall { sense_id: 0, wanted: vec![2, 2], got: vec![2, 1] }]
        );
    }

    #[test]
    fn same_seed_same_partition() {
        let paragraphs = keys(5, 50);
        let run = |seed| {
            let partition = Partitioner::new(vec![0.1, 0.2], seed).unwrap().partition(vec![
                SenseParagraphs { sense_id: 0, paragraphs: paragraphs.clone() },
            ]);
            paragraphs.iter().map(|k| partition.dataset_of(k)).collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn rejects_fractions_summing_to_one() {
        assert!(Partitioner::new(vec![0.5, 0.5], 0).is_err());
        assert!(Partitioner::new(vec![-0.1], 0).is_err());
    }
}
