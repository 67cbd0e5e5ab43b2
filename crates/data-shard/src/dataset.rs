//! In-memory matrix dataset
//!
//! Iterates an input/label matrix pair in fixed-size batches. Each reset
//! starts a new pass; with shuffling enabled the row order of a pass is a
//! deterministic function of the base seed and the pass number.

use ndarray::{Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use runtime_core::{Error, RawBatch, Result};

/// Batch iterator over an input/label matrix pair
#[derive(Debug, Clone)]
pub struct MatrixDataset {
    inputs: Array2<f64>,
    labels: Array2<f64>,
    batch_size: usize,

    /// Base seed for shuffling, `None` keeps row order
    seed: Option<u64>,

    /// Number of resets so far
    pass: u64,

    /// Row order of the current pass
    order: Vec<usize>,

    /// Next position in `order`
    cursor: usize,
}

impl MatrixDataset {
    /// Create a dataset that yields rows in order
    pub fn new(inputs: Array2<f64>, labels: Array2<f64>, batch_size: usize) -> Result<Self> {
        if inputs.nrows() != labels.nrows() {
            return Err(Error::MalformedBatch {
                input_rows: inputs.nrows(),
                label_rows: labels.nrows(),
            });
        }
        if batch_size == 0 {
            return Err(Error::InvalidConfig {
                message: "batch size must be at least 1".to_string(),
            });
        }

        let order = (0..inputs.nrows()).collect();
        Ok(Self {
            inputs,
            labels,
            batch_size,
            seed: None,
            pass: 0,
            order,
            cursor: 0,
        })
    }

    /// Shuffle rows on every pass using the given base seed
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self.reshuffle();
        self
    }

    /// Total number of examples
    pub fn num_examples(&self) -> usize {
        self.inputs.nrows()
    }

    /// Number of resets so far
    pub fn pass(&self) -> u64 {
        self.pass
    }

    /// Whether another batch is available in the current pass
    pub fn has_next(&self) -> bool {
        self.cursor < self.order.len()
    }

    /// Restart iteration over the dataset
    pub fn reset(&mut self) {
        self.pass += 1;
        self.cursor = 0;
        self.reshuffle();
        tracing::debug!(pass = self.pass, "Dataset reset");
    }

    /// Next batch of the current pass, `None` once the pass is exhausted
    pub fn next_batch(&mut self) -> Option<RawBatch> {
        if !self.has_next() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let rows = &self.order[self.cursor..end];
        self.cursor = end;

        Some(RawBatch::Matrices {
            inputs: self.inputs.select(Axis(0), rows),
            labels: self.labels.select(Axis(0), rows),
        })
    }

    fn reshuffle(&mut self) {
        self.order = (0..self.inputs.nrows()).collect();
        if let Some(seed) = self.seed {
            let mut rng = ChaCha8Rng::seed_from_u64(pass_seed(seed, self.pass));
            self.order.shuffle(&mut rng);
        }
    }
}

/// Compute a pass-specific seed deterministically
fn pass_seed(seed: u64, pass: u64) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    pass.hash(&mut hasher);
    hasher.finish()
}
