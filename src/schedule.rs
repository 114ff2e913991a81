use std::collections::BTreeMap;

use ethereum_types::{H160, U256};
use tracing::debug;

use crate::errors::{ChainError, ChainResult};
use crate::params::EPOCH_LENGTH;

/// Deterministic weight-proportional proposer assignment for one epoch of
/// heights. Every node derives the identical table from the same salt,
/// starting height and validator set.
///
/// Validators are ordered by weight descending with lexicographic address
/// tie-breaks; each receives `⌊weight · EPOCH_LENGTH / Σweight⌋` heights
/// in that order. The handful of heights lost to the quota floors goes to
/// the first validator in the order.
pub struct ProposerSchedule {
    from_height: u64,
    assignments: Vec<H160>,
}

impl ProposerSchedule {
    pub fn new(salt: &[u8], from_height: u64, validators: &BTreeMap<H160, U256>) -> Self {
        let mut ordered: Vec<(H160, U256)> = validators
            .iter()
            .filter(|(_, weight)| !weight.is_zero())
            .map(|(address, weight)| (*address, *weight))
            .collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let total: U256 = ordered
            .iter()
            .fold(U256::zero(), |sum, (_, weight)| sum + *weight);
        if ordered.is_empty() || total.is_zero() {
            return Self {
                from_height,
                assignments: Vec::new(),
            };
        }

        let mut quotas: Vec<u64> = ordered
            .iter()
            .map(|(_, weight)| ((*weight * U256::from(EPOCH_LENGTH)) / total).as_u64())
            .collect();

        let mut assignments = Vec::with_capacity(EPOCH_LENGTH as usize);
        for _ in 0..EPOCH_LENGTH {
            let slot = quotas.iter().position(|quota| *quota > 0);
            match slot {
                Some(index) => {
                    quotas[index] -= 1;
                    assignments.push(ordered[index].0);
                }
                None => assignments.push(ordered[0].0),
            }
        }
        debug!(
            from_height,
            salt = %hex::encode(salt),
            validators = ordered.len(),
            "built proposer schedule"
        );
        Self {
            from_height,
            assignments,
        }
    }

    pub fn from_height(&self) -> u64 {
        self.from_height
    }

    /// Covered height range check; refreshing at epoch boundaries is the
    /// caller's job.
    pub fn covers(&self, height: u64) -> bool {
        height >= self.from_height
            && height < self.from_height + self.assignments.len() as u64
    }

    pub fn get_proposer(&self, height: u64) -> ChainResult<H160> {
        if !self.covers(height) {
            return Err(ChainError::UnknownHeight(height));
        }
        Ok(self.assignments[(height - self.from_height) as usize])
    }

    /// Number of heights assigned to `validator` in this epoch.
    pub fn assigned_count(&self, validator: H160) -> usize {
        self.assignments
            .iter()
            .filter(|assigned| **assigned == validator)
            .count()
    }
}
