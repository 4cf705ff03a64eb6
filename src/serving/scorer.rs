//! Scorer capability

use super::{ServingError, ServingResult};
use std::collections::HashSet;

/// Ranks candidate senses for a segment
///
/// Implementations must be thread-safe (Send + Sync): disambiguation
/// workers share one instance.
pub trait Scorer: Send + Sync {
    /// `(score, sense id)` pairs, highest score first. Every candidate must
    /// appear exactly once.
    fn rank(&self, features: &[String], candidates: &[usize]) -> ServingResult<Vec<(f32, usize)>>;
}

/// Check that `ranking` lists every candidate exactly once and nothing else
pub fn check_ranking(candidates: &[usize], ranking: &[(f32, usize)]) -> ServingResult<()> {
    let expected: HashSet<usize> = candidates.iter().copied().collect();
    let mut seen = HashSet::with_capacity(ranking.len());

    for &(_, sense_id) in ranking {
        if !expected.contains(&sense_id) {
            return Err(ServingError::UnknownCandidate(sense_id));
        }
        if !seen.insert(sense_id) {
            return Err(ServingError::DuplicateCandidate(sense_id));
        }
    }
    if let Some(missing) = candidates.iter().find(|id| !seen.contains(id)) {
        return Err(ServingError::MissingCandidate(*missing));
    }
    Ok(())
}

/// Ranks by sense id alone.
///
/// Sense ids are assigned in descending evidence order, so the lowest id is
/// the best supported sense. Features are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorScorer;

impl Scorer for PriorScorer {
    fn rank(&self, _features: &[String], candidates: &[usize]) -> ServingResult<Vec<(f32, usize)>> {
        let mut ranking: Vec<(f32, usize)> = candidates
            .iter()
            .map(|&sense_id| (1.0 / (1.0 + sense_id as f32), sense_id))
            .collect();
        ranking.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        Ok(ranking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prior_prefers_low_ids() {
        let ranking = PriorScorer.rank(&[], &[7, 2, 30]).unwrap();
        let ids: Vec<usize> = ranking.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![2, 7, 30]);
        assert!(check_ranking(&[7, 2, 30], &ranking).is_ok());
    }

    #[test]
    fn contract_violations() {
        assert!(matches!(
            check_ranking(&[1, 2], &[(0.5, 1)]),
            Err(ServingError::MissingCandidate(2))
        ));
        assert!(matches!(
            check_ranking(&[1, 2], &[(0.5, 1), (0.4, 1), (0.3, 2)]),
            Err(ServingError::DuplicateCandidate(1))
        ));
        assert!(matches!(
            check_ranking(&[1], &[(0.5, 1), (0.1, 9)]),
            Err(ServingError::UnknownCandidate(9))
        ));
    }
}
