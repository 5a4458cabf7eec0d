//! Deterministic stratified fold assignment
//!
//! Samples are grouped into strata, each stratum is shuffled with the
//! seeded generator, and members are dealt round-robin onto folds with an
//! offset carried across strata. Fold sizes therefore differ by at most
//! one, and every stratum is spread as evenly as its size allows.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rustc_hash::FxHashMap;

use crate::{Error, Result};

/// How samples are grouped before dealing onto folds.
#[derive(Debug, Clone, Copy)]
pub enum Strata<'a> {
    /// One categorical key per sample (subgroup tags, class label).
    Keys(&'a [String]),
    /// Consecutive blocks of `k` samples in order of this value, so each
    /// fold receives one sample from every quantile block.
    Quantile(&'a [f64]),
}

impl Strata<'_> {
    fn len(&self) -> usize {
        match self {
            Self::Keys(keys) => keys.len(),
            Self::Quantile(values) => values.len(),
        }
    }

    fn groups(&self, k: usize) -> Vec<Vec<usize>> {
        match self {
            Self::Keys(keys) => {
                let mut by_key: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
                for (i, key) in keys.iter().enumerate() {
                    by_key.entry(key.as_str()).or_default().push(i);
                }
                let mut groups: Vec<(&str, Vec<usize>)> = by_key.into_iter().collect();
                groups.sort_unstable_by(|a, b| a.0.cmp(b.0));
                groups.into_iter().map(|(_, members)| members).collect()
            }
            Self::Quantile(values) => {
                let mut order: Vec<usize> = (0..values.len()).collect();
                order.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));
                order.chunks(k).map(<[usize]>::to_vec).collect()
            }
        }
    }
}

/// Fold index for every sample.
///
/// # Errors
///
/// Returns `InvalidConfig` for `k < 2` and `InsufficientSamples` when there
/// are fewer samples than folds.
pub fn assign_folds(strata: Strata<'_>, k: usize, seed: u64) -> Result<Vec<usize>> {
    if k < 2 {
        return Err(Error::config("folds", format!("must be >= 2, got {k}")));
    }
    let n = strata.len();
    if n < k {
        return Err(Error::InsufficientSamples {
            needed: k,
            available: n,
        });
    }

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut assignment = vec![0; n];
    let mut offset = 0;
    for mut members in strata.groups(k) {
        members.shuffle(&mut rng);
        for (i, sample) in members.iter().enumerate() {
            assignment[*sample] = (offset + i) % k;
        }
        offset += members.len();
    }
    Ok(assignment)
}

/// Split positions into `(train, test)` for one fold.
#[must_use]
pub fn split(assignment: &[usize], fold: usize) -> (Vec<usize>, Vec<usize>) {
    (0..assignment.len()).partition(|&i| assignment[i] != fold)
}
