//! Data partitioning for the parameter-server master
//!
//! This crate provides:
//! - **Work partitioning** of raw batches into row-level units of work
//! - **Epoch tracking** of completed reductions against the pass budget
//! - **Matrix datasets** that iterate and reshuffle deterministically per pass
//!
//! # Example
//!
//! ```rust
//! use data_shard::{split, EpochCounter};
//! use ndarray::array;
//! use runtime_core::RawBatch;
//!
//! let units = split(RawBatch::Matrices {
//!     inputs: array![[1.0, 2.0], [3.0, 4.0]],
//!     labels: array![[0.0], [1.0]],
//! })
//! .unwrap();
//! assert_eq!(units.len(), 2);
//!
//! let mut epochs = EpochCounter::new(1);
//! epochs.advance();
//! assert!(epochs.is_complete());
//! ```

mod dataset;
mod epoch;
mod partitioner;

// Re-export main types
pub use dataset::MatrixDataset;
pub use epoch::{EpochCounter, EpochCounterState};
pub use partitioner::{split, split_rows};

// Re-export types from runtime-core for convenience
pub use runtime_core::types::{Epoch, RawBatch, WorkUnit, Window};

#[cfg(test)]
mod tests {
    use super::*;

    /// Full pass: every dataset batch splits into one unit per row
    #[test]
    fn test_dataset_pass_splits_into_units() {
        let inputs = ndarray::Array::from_shape_fn((9, 3), |(r, c)| (r + c) as f64);
        let labels = ndarray::Array::from_shape_fn((9, 1), |(r, _)| r as f64);
        let mut dataset = MatrixDataset::new(inputs, labels, 4).unwrap().with_shuffle(7);

        let mut total_units = 0;
        while let Some(batch) = dataset.next_batch() {
            let rows = batch.len();
            let units = split(batch).unwrap();
            assert_eq!(units.len(), rows);
            total_units += units.len();
        }

        assert_eq!(total_units, 9);
    }
}
