//! Object-disjoint train/validation partitioning.
//!
//! Folds are drawn over object identities, not triplets. A triplet goes to the
//! training partition only if all three objects are training objects, to the
//! validation partition only if all three are validation objects, and is
//! dropped otherwise. No validation triplet ever shares an object with a
//! training triplet.

use crate::error::{ProbeError, ProbeResult};
use crate::triplets::Triplet;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// One object-level train/validation split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    /// 1-based fold number.
    pub index: usize,
    /// Sorted training objects.
    pub train_objects: Vec<usize>,
    /// Sorted held-out objects.
    pub val_objects: Vec<usize>,
}

impl Fold {
    /// Build a fold from explicit training objects; every other object of the
    /// universe is held out.
    pub fn from_train_objects(
        index: usize,
        n_objects: usize,
        train_objects: impl IntoIterator<Item = usize>,
    ) -> ProbeResult<Self> {
        let mut mask = vec![false; n_objects];
        for o in train_objects {
            if o >= n_objects {
                return Err(ProbeError::invalid_input(format!(
                    "training object {o} outside universe of {n_objects}"
                )));
            }
            mask[o] = true;
        }
        let (train, val): (Vec<usize>, Vec<usize>) = (0..n_objects).partition(|&o| mask[o]);
        Ok(Self {
            index,
            train_objects: train,
            val_objects: val,
        })
    }

    fn train_mask(&self) -> Vec<bool> {
        let n = self
            .train_objects
            .iter()
            .chain(&self.val_objects)
            .max()
            .map_or(0, |m| m + 1);
        let mut mask = vec![false; n];
        for &o in &self.train_objects {
            mask[o] = true;
        }
        mask
    }

    /// Split `triplets` by object membership.
    pub fn partition(&self, triplets: &[Triplet]) -> TripletPartition {
        let mask = self.train_mask();
        let is_train = |o: usize| mask.get(o).copied().unwrap_or(false);
        let mut partition = TripletPartition::default();
        for &t in triplets {
            let in_train = t.objects().iter().filter(|&&o| is_train(o)).count();
            match in_train {
                3 => partition.train.push(t),
                0 => partition.val.push(t),
                _ => partition.dropped.push(t),
            }
        }
        partition
    }
}

/// Triplets assigned to each side of a fold, plus those touching both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripletPartition {
    pub train: Vec<Triplet>,
    pub val: Vec<Triplet>,
    pub dropped: Vec<Triplet>,
}

impl TripletPartition {
    /// A fold that cannot be trained or cannot be scored.
    pub fn is_degenerate(&self) -> bool {
        self.train.is_empty() || self.val.is_empty()
    }

    pub fn total(&self) -> usize {
        self.train.len() + self.val.len() + self.dropped.len()
    }
}

/// Split `triplets` given the set of training objects of a universe of
/// `n_objects`. Every other object is a validation object.
pub fn partition_triplets(
    triplets: &[Triplet],
    n_objects: usize,
    train_objects: impl IntoIterator<Item = usize>,
) -> ProbeResult<TripletPartition> {
    Ok(Fold::from_train_objects(0, n_objects, train_objects)?.partition(triplets))
}

/// Shuffled, seeded K-fold split over object indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KFold {
    pub n_splits: usize,
    pub seed: u64,
}

impl KFold {
    pub fn new(n_splits: usize, seed: u64) -> Self {
        Self { n_splits, seed }
    }

    /// Shuffle `0..n_objects` once and cut it into `n_splits` contiguous folds
    /// whose sizes differ by at most one. Fold `f` holds out the `f`-th chunk.
    pub fn split(&self, n_objects: usize) -> ProbeResult<Vec<Fold>> {
        if self.n_splits < 2 {
            return Err(ProbeError::config(format!(
                "k-fold needs at least 2 splits (got {})",
                self.n_splits
            )));
        }
        if self.n_splits > n_objects {
            return Err(ProbeError::config(format!(
                "cannot split {n_objects} objects into {} folds",
                self.n_splits
            )));
        }

        let mut order: Vec<usize> = (0..n_objects).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        order.shuffle(&mut rng);

        let base = n_objects / self.n_splits;
        let extra = n_objects % self.n_splits;
        let mut folds = Vec::with_capacity(self.n_splits);
        let mut start = 0;
        for f in 0..self.n_splits {
            let size = base + usize::from(f < extra);
            let held_out = &order[start..start + size];
            let mut val_objects = held_out.to_vec();
            val_objects.sort_unstable();
            let mut train_objects: Vec<usize> = order[..start]
                .iter()
                .chain(&order[start + size..])
                .copied()
                .collect();
            train_objects.sort_unstable();
            folds.push(Fold {
                index: f + 1,
                train_objects,
                val_objects,
            });
            start += size;
        }
        Ok(folds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn example_triplets() -> Vec<Triplet> {
        vec![
            Triplet::new(0, 1, 2),
            Triplet::new(3, 4, 5),
            Triplet::new(0, 3, 4),
            Triplet::new(1, 2, 5),
        ]
    }

    #[test]
    fn test_cross_group_triplets_dropped() {
        let partition = partition_triplets(&example_triplets(), 6, [0, 1, 2]).unwrap();
        assert_eq!(partition.train, vec![Triplet::new(0, 1, 2)]);
        assert_eq!(partition.val, vec![Triplet::new(3, 4, 5)]);
        assert_eq!(
            partition.dropped,
            vec![Triplet::new(0, 3, 4), Triplet::new(1, 2, 5)]
        );
        assert_eq!(partition.total(), 4);
    }

    #[test]
    fn test_kfold_covers_universe_disjointly() {
        let folds = KFold::new(3, 7).split(10).unwrap();
        assert_eq!(folds.len(), 3);
        let mut held_out: Vec<usize> = folds.iter().flat_map(|f| f.val_objects.clone()).collect();
        held_out.sort_unstable();
        assert_eq!(held_out, (0..10).collect::<Vec<_>>());
        let sizes: Vec<usize> = folds.iter().map(|f| f.val_objects.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        for fold in &folds {
            assert_eq!(fold.train_objects.len() + fold.val_objects.len(), 10);
            assert!(fold.train_objects.iter().all(|o| !fold.val_objects.contains(o)));
        }
    }

    #[test]
    fn test_kfold_is_deterministic() {
        let a = KFold::new(2, 0).split(6).unwrap();
        let b = KFold::new(2, 0).split(6).unwrap();
        assert_eq!(a, b);
        let triplets = example_triplets();
        for (fa, fb) in a.iter().zip(&b) {
            assert_eq!(fa.partition(&triplets), fb.partition(&triplets));
        }
    }

    #[test]
    fn test_example_scenario_membership_rule() {
        let triplets = example_triplets();
        for fold in KFold::new(2, 0).split(6).unwrap() {
            let partition = fold.partition(&triplets);
            assert_eq!(partition.total(), triplets.len());
            for t in &partition.train {
                assert!(t.objects().iter().all(|o| fold.train_objects.contains(o)));
            }
            for t in &partition.val {
                assert!(t.objects().iter().all(|o| fold.val_objects.contains(o)));
            }
            for t in &partition.dropped {
                let in_train = t.objects().iter().filter(|o| fold.train_objects.contains(o)).count();
                assert!(in_train == 1 || in_train == 2);
            }
        }
    }

    #[test]
    fn test_too_many_folds_rejected() {
        assert!(KFold::new(5, 0).split(4).is_err());
        assert!(KFold::new(1, 0).split(4).is_err());
    }

    #[test]
    fn test_degenerate_partition_is_flagged() {
        let partition = partition_triplets(&example_triplets(), 6, [0, 1]).unwrap();
        assert!(partition.train.is_empty());
        assert!(partition.is_degenerate());
    }
}
