//! Odd-one-out triplets over a fixed object universe.
//!
//! A triplet `(i, j, k)` is stored with the human-judged most similar pair in
//! the first two slots, so `k` is the human odd-one-out.

use crate::error::{ProbeError, ProbeResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Position of the human odd-one-out inside every triplet.
pub const ODD_ONE_OUT_POSITION: usize = 2;

/// Three distinct object indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[usize; 3]", into = "[usize; 3]")]
pub struct Triplet {
    pub i: usize,
    pub j: usize,
    pub k: usize,
}

impl Triplet {
    pub fn new(i: usize, j: usize, k: usize) -> Self {
        Self { i, j, k }
    }

    pub fn objects(&self) -> [usize; 3] {
        [self.i, self.j, self.k]
    }

    pub fn contains(&self, object: usize) -> bool {
        self.i == object || self.j == object || self.k == object
    }

    fn check(&self, n_objects: usize) -> ProbeResult<()> {
        if let Some(&bad) = self.objects().iter().find(|&&o| o >= n_objects) {
            return Err(ProbeError::invalid_input(format!(
                "triplet {self:?} references object {bad}, universe has {n_objects} objects"
            )));
        }
        if self.i == self.j || self.i == self.k || self.j == self.k {
            return Err(ProbeError::invalid_input(format!(
                "triplet {self:?} repeats an object"
            )));
        }
        Ok(())
    }
}

impl From<[usize; 3]> for Triplet {
    fn from([i, j, k]: [usize; 3]) -> Self {
        Self { i, j, k }
    }
}

impl From<Triplet> for [usize; 3] {
    fn from(t: Triplet) -> Self {
        t.objects()
    }
}

/// A validated, immutable triplet collection over `n_objects` objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripletSet {
    n_objects: usize,
    triplets: Vec<Triplet>,
}

impl TripletSet {
    /// Validate that every triplet has three distinct, in-range objects.
    pub fn new(n_objects: usize, triplets: Vec<Triplet>) -> ProbeResult<Self> {
        for t in &triplets {
            t.check(n_objects)?;
        }
        Ok(Self {
            n_objects,
            triplets,
        })
    }

    pub fn n_objects(&self) -> usize {
        self.n_objects
    }

    pub fn len(&self) -> usize {
        self.triplets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    pub fn as_slice(&self) -> &[Triplet] {
        &self.triplets
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Triplet> {
        self.triplets.iter()
    }

    /// Distinct objects referenced by at least one triplet.
    pub fn referenced_objects(&self) -> BTreeSet<usize> {
        self.triplets.iter().flat_map(|t| t.objects()).collect()
    }
}

impl<'a> IntoIterator for &'a TripletSet {
    type Item = &'a Triplet;
    type IntoIter = std::slice::Iter<'a, Triplet>;

    fn into_iter(self) -> Self::IntoIter {
        self.triplets.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_set() {
        let set = TripletSet::new(4, vec![Triplet::new(0, 1, 2), Triplet::new(3, 2, 1)]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.referenced_objects().into_iter().collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn test_out_of_range_rejected() {
        let result = TripletSet::new(3, vec![Triplet::new(0, 1, 3)]);
        assert!(matches!(result, Err(ProbeError::InvalidInput(_))));
    }

    #[test]
    fn test_repeated_object_rejected() {
        assert!(TripletSet::new(5, vec![Triplet::new(1, 1, 2)]).is_err());
        assert!(TripletSet::new(5, vec![Triplet::new(1, 2, 1)]).is_err());
    }

    #[test]
    fn test_serde_as_array() {
        let t = Triplet::new(4, 5, 6);
        assert_eq!(serde_json::to_string(&t).unwrap(), "[4,5,6]");
        let back: Triplet = serde_json::from_str("[4,5,6]").unwrap();
        assert_eq!(back, t);
    }
}
