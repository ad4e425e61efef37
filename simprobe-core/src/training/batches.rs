//! Mini-batching of triplets with seeded shuffling.

use crate::triplets::Triplet;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Batches over a borrowed triplet slice. Training loaders reshuffle at
/// every epoch; evaluation loaders keep the original order.
pub struct TripletBatches<'a> {
    triplets: &'a [Triplet],
    batch_size: usize,
    indices: Vec<usize>,
    position: usize,
    rng: Option<StdRng>,
}

impl<'a> TripletBatches<'a> {
    /// Shuffling loader for training.
    pub fn shuffled(triplets: &'a [Triplet], batch_size: usize, seed: u64) -> Self {
        Self {
            triplets,
            batch_size: batch_size.max(1),
            indices: (0..triplets.len()).collect(),
            position: 0,
            rng: Some(StdRng::seed_from_u64(seed)),
        }
    }

    /// Loader that yields batches in input order.
    pub fn sequential(triplets: &'a [Triplet], batch_size: usize) -> Self {
        Self {
            triplets,
            batch_size: batch_size.max(1),
            indices: (0..triplets.len()).collect(),
            position: 0,
            rng: None,
        }
    }

    pub fn len(&self) -> usize {
        self.triplets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    /// Number of batches per epoch; the last one may be short.
    pub fn num_batches(&self) -> usize {
        self.triplets.len().div_ceil(self.batch_size)
    }

    /// Rewind for a new epoch, reshuffling if this is a training loader.
    pub fn start_epoch(&mut self) {
        if let Some(rng) = self.rng.as_mut() {
            self.indices.shuffle(rng);
        }
        self.position = 0;
    }

    /// Next batch of the current epoch, or `None` when the epoch is done.
    pub fn next_batch(&mut self) -> Option<Vec<Triplet>> {
        if self.position >= self.indices.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.indices.len());
        let batch = self.indices[self.position..end]
            .iter()
            .map(|&idx| self.triplets[idx])
            .collect();
        self.position = end;
        Some(batch)
    }
}
