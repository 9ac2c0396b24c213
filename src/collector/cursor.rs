use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::models::CheckpointKey;
use crate::data::repo::{AddressRepository, RepoError};
use crate::postcode::{Cep, CepRange};
use crate::text::CityFilter;

#[derive(Debug, Clone, PartialEq)]
pub enum IncrementStrategy {
    /// Every code, one after the other.
    Sequential,
    /// After `after_misses` consecutive not-found codes, jump ahead by a
    /// random delta in `min_jump..=max_jump` to cross sparse regions faster.
    /// Coverage depends on the seed; without one it is not reproducible.
    SkipAhead {
        after_misses: u32,
        min_jump: u32,
        max_jump: u32,
        seed: Option<u64>,
    },
}

impl Default for IncrementStrategy {
    fn default() -> Self {
        IncrementStrategy::Sequential
    }
}

/// First code still to scan in `range`: one past the highest stored match,
/// and never before the recorded checkpoint. `None` when nothing is left.
pub async fn resume_from(
    repo: &dyn AddressRepository,
    range: &CepRange,
    city_filter: Option<&CityFilter>,
) -> Result<Option<Cep>, RepoError> {
    let stored = repo.max_code_in_range(range, city_filter).await?;
    let checkpoint = repo.checkpoint(&CheckpointKey::new(range, city_filter)).await?;
    debug!(
        "Resume data for {}: highest stored {:?}, checkpoint {:?}",
        range, stored, checkpoint
    );

    let high_water_mark = match (stored, checkpoint) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };

    match high_water_mark {
        Some(code) if code >= range.start => Ok(code.checked_next()),
        _ => Ok(Some(range.start)),
    }
}

/// Walks a range in strictly increasing order.
pub struct RangeCursor {
    strategy: IncrementStrategy,
    misses: u32,
    rng: StdRng,
}

impl RangeCursor {
    pub fn new(strategy: IncrementStrategy) -> RangeCursor {
        let rng = match &strategy {
            IncrementStrategy::SkipAhead { seed: Some(seed), .. } => StdRng::seed_from_u64(*seed),
            _ => StdRng::from_entropy(),
        };
        RangeCursor { strategy, misses: 0, rng }
    }

    /// Feeds the result of the code just processed into the skip heuristic.
    pub fn observe(&mut self, not_found: bool) {
        if not_found {
            self.misses += 1;
        } else {
            self.misses = 0;
        }
    }

    pub fn next(&mut self, code: Cep) -> Option<Cep> {
        match self.strategy {
            IncrementStrategy::Sequential => code.checked_next(),
            IncrementStrategy::SkipAhead { after_misses, min_jump, max_jump, .. } => {
                if after_misses == 0 || self.misses < after_misses {
                    return code.checked_next();
                }
                self.misses = 0;
                let low = min_jump.max(1);
                let high = max_jump.max(low);
                let jump = self.rng.gen_range(low..=high);
                debug!("{} misses in a row after {}, skipping {} codes", after_misses, code, jump);
                code.checked_add(jump)
            }
        }
    }
}
