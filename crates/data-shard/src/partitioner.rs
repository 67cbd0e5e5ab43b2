//! Work partitioning
//!
//! Turns a raw batch into row-level units of work. A matrix pair is split
//! into one aligned (input row, label row) unit per row; a batch that is
//! already a unit sequence passes through untouched.

use ndarray::Array2;
use runtime_core::{Error, RawBatch, Result, WorkUnit};

/// Split a raw batch into units of work
///
/// Unit order follows row order. Fails without producing any units if the
/// input and label matrices disagree on their row count.
pub fn split(batch: RawBatch) -> Result<Vec<WorkUnit>> {
    match batch {
        RawBatch::Units(units) => Ok(units),
        RawBatch::Matrices { inputs, labels } => split_rows(&inputs, &labels),
    }
}

/// Zip the rows of an input/label matrix pair into example units
pub fn split_rows(inputs: &Array2<f64>, labels: &Array2<f64>) -> Result<Vec<WorkUnit>> {
    if inputs.nrows() != labels.nrows() {
        return Err(Error::MalformedBatch {
            input_rows: inputs.nrows(),
            label_rows: labels.nrows(),
        });
    }

    let units: Vec<_> = inputs
        .outer_iter()
        .zip(labels.outer_iter())
        .map(|(input, label)| WorkUnit::Example {
            input: input.to_owned(),
            label: label.to_owned(),
        })
        .collect();

    tracing::debug!(rows = units.len(), "Split matrix pair into work units");
    Ok(units)
}
