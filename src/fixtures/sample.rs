//! Constrained random samples for funding fixtures.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::core::errors::{HarnessError, Result};

/// Split `total` into `n` strictly positive parts.
///
/// Draws `n - 1` distinct cut points from `[1, total - 1]`, sorts them and
/// takes the gaps between `0`, the cuts and `total`. Positivity and the exact
/// sum hold by construction for any RNG.
pub fn constrained_sum_sample_pos<R: Rng + ?Sized>(
    n: usize,
    total: u64,
    rng: &mut R,
) -> Result<Vec<u64>> {
    if n == 0 {
        return Err(HarnessError::InvalidFixtureRequest {
            details: "sample length must be >= 1".to_string(),
        });
    }
    let parts = n as u64;
    if total < parts {
        return Err(HarnessError::InvalidFixtureRequest {
            details: format!("total {total} cannot be split into {n} positive parts"),
        });
    }
    let span = usize::try_from(total - 1).map_err(|_| HarnessError::InvalidFixtureRequest {
        details: format!("total {total} exceeds the addressable cut range"),
    })?;

    let mut cuts: Vec<u64> = rand::seq::index::sample(rng, span, n - 1)
        .into_iter()
        .map(|idx| idx as u64 + 1)
        .collect();
    cuts.sort_unstable();

    let mut sample = Vec::with_capacity(n);
    let mut prev = 0;
    for cut in cuts {
        sample.push(cut - prev);
        prev = cut;
    }
    sample.push(total - prev);
    Ok(sample)
}

/// Render integers as a compact array literal: `[5,12,13]`.
#[must_use]
pub fn arr_str(values: &[u64]) -> String {
    let inner: Vec<String> = values.iter().map(u64::to_string).collect();
    format!("[{}]", inner.join(","))
}

/// Current unix time in whole seconds.
#[must_use]
pub fn ts_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Deterministic RNG for a run seed.
#[must_use]
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn three_accounts_thirty_total() {
        let mut rng = seeded_rng(7);
        let sample = constrained_sum_sample_pos(3, 30, &mut rng).unwrap();
        assert_eq!(sample.len(), 3);
        assert!(sample.iter().all(|&part| part >= 1));
        assert_eq!(sample.iter().sum::<u64>(), 30);
    }

    #[test]
    fn same_seed_same_sample() {
        let a = constrained_sum_sample_pos(5, 1_000, &mut seeded_rng(99)).unwrap();
        let b = constrained_sum_sample_pos(5, 1_000, &mut seeded_rng(99)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn single_part_is_the_total() {
        let sample = constrained_sum_sample_pos(1, 42, &mut seeded_rng(1)).unwrap();
        assert_eq!(sample, vec![42]);
    }

    #[test]
    fn tight_total_yields_all_ones() {
        let sample = constrained_sum_sample_pos(4, 4, &mut seeded_rng(3)).unwrap();
        assert_eq!(sample, vec![1, 1, 1, 1]);
    }

    #[test]
    fn zero_length_rejected() {
        let err = constrained_sum_sample_pos(0, 10, &mut seeded_rng(0)).unwrap_err();
        assert_eq!(err.code(), "CSH-2201");
    }

    #[test]
    fn total_below_length_rejected() {
        let err = constrained_sum_sample_pos(5, 4, &mut seeded_rng(0)).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidFixtureRequest { .. }));
    }

    #[test]
    fn arr_str_is_compact() {
        assert_eq!(arr_str(&[5, 12, 13]), "[5,12,13]");
        assert_eq!(arr_str(&[]), "[]");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Every valid request yields `n` positive parts summing to `total`.
        #[test]
        fn partition_is_positive_and_exact(
            n in 1usize..40,
            extra in 0u64..5_000,
            seed in any::<u64>(),
        ) {
            let total = n as u64 + extra;
            let sample = constrained_sum_sample_pos(n, total, &mut seeded_rng(seed)).unwrap();
            prop_assert_eq!(sample.len(), n);
            prop_assert!(sample.iter().all(|&part| part >= 1));
            prop_assert_eq!(sample.iter().sum::<u64>(), total);
        }
    }
}
