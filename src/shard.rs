//! Shard selection for distributing writes across shard records.

use rand::Rng;

use crate::error::{CounterError, Result};

/// Chooses the shard index a mutation targets.
///
/// An explicit in-range index is returned unchanged, which lets tests and
/// retries pin a specific shard. An absent or out-of-range index draws
/// uniformly from `[0, shard_count)`; out-of-range hints are discarded
/// rather than clamped or wrapped.
pub fn select(explicit: Option<u32>, shard_count: u32, rng: &mut impl Rng) -> Result<u32> {
    if shard_count == 0 {
        return Err(CounterError::InvalidShardCount);
    }
    if let Some(index) = explicit {
        if index < shard_count {
            return Ok(index);
        }
    }
    Ok(rng.gen_range(0..shard_count))
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn explicit_in_range_index_is_returned_unchanged() {
        let mut rng = StdRng::seed_from_u64(7);
        for index in 0..8 {
            assert_eq!(select(Some(index), 8, &mut rng).unwrap(), index);
        }
    }

    #[test]
    fn out_of_range_hint_is_discarded() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let index = select(Some(99), 4, &mut rng).unwrap();
            assert!(index < 4);
        }
    }

    #[test]
    fn absent_hint_draws_within_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = [false; 4];
        for _ in 0..200 {
            let index = select(None, 4, &mut rng).unwrap();
            assert!(index < 4);
            seen[index as usize] = true;
        }
        // 200 draws over 4 shards reach every slot.
        assert!(seen.iter().all(|hit| *hit));
    }

    #[test]
    fn single_shard_degenerates_to_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(select(None, 1, &mut rng).unwrap(), 0);
        assert_eq!(select(Some(5), 1, &mut rng).unwrap(), 0);
    }

    #[test]
    fn zero_shard_count_fails() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(matches!(
            select(None, 0, &mut rng).unwrap_err(),
            CounterError::InvalidShardCount
        ));
    }
}
