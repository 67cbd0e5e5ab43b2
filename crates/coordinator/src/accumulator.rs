//! Reduction of worker results into a consensus update

use ndarray::Array1;
use runtime_core::{Error, Result, WorkerResult};

/// Running element-wise sum of worker payloads
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    /// Sum of all payloads seen so far
    sum: Option<Array1<f64>>,

    /// Number of payloads summed
    count: usize,
}

impl Accumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one worker's payload
    ///
    /// The first payload fixes the expected length; later payloads must
    /// match it.
    pub fn accumulate(&mut self, result: &WorkerResult) -> Result<()> {
        let payload = result.payload();

        match &mut self.sum {
            Some(sum) => {
                if sum.len() != payload.len() {
                    return Err(Error::ShapeMismatch {
                        worker_id: result.worker_id().to_string(),
                        expected: sum.len(),
                        actual: payload.len(),
                    });
                }
                *sum += payload;
            }
            None => self.sum = Some(payload.clone()),
        }

        self.count += 1;
        Ok(())
    }

    /// Number of payloads accumulated
    pub fn count(&self) -> usize {
        self.count
    }

    /// Element-wise mean of everything accumulated
    pub fn averaged(&self) -> Result<Array1<f64>> {
        match &self.sum {
            Some(sum) if self.count > 0 => Ok(sum / self.count as f64),
            _ => Err(Error::EmptyReduction),
        }
    }
}

/// Reduce a set of worker results to their element-wise mean
pub fn reduce(results: &[WorkerResult]) -> Result<Array1<f64>> {
    let mut acc = Accumulator::new();
    for result in results {
        acc.accumulate(result)?;
    }
    acc.averaged()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn result(worker: &str, payload: Array1<f64>) -> WorkerResult {
        WorkerResult::new(worker, payload)
    }

    #[test]
    fn test_mean_of_two() {
        let mean = reduce(&[result("a", array![2.0]), result("b", array![4.0])]).unwrap();
        assert_eq!(mean, array![3.0]);
    }

    #[test]
    fn test_elementwise_mean() {
        let results = vec![
            result("a", array![1.0, 10.0, -3.0]),
            result("b", array![3.0, 20.0, 0.0]),
            result("c", array![5.0, 30.0, 3.0]),
        ];
        assert_eq!(reduce(&results).unwrap(), array![3.0, 20.0, 0.0]);
    }

    #[test]
    fn test_permutation_invariance() {
        let results: Vec<_> = (0..6)
            .map(|i| {
                let x = i as f64;
                result(&format!("w{}", i), array![x * 0.1, 1.0 / (x + 1.0), -x])
            })
            .collect();

        let forward = reduce(&results).unwrap();
        let mut reversed = results.clone();
        reversed.reverse();
        let backward = reduce(&reversed).unwrap();
        let mut rotated = results.clone();
        rotated.rotate_left(2);
        let shifted = reduce(&rotated).unwrap();

        for other in [&backward, &shifted] {
            for (a, b) in forward.iter().zip(other.iter()) {
                assert!((a - b).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_empty_input_fails() {
        assert!(matches!(reduce(&[]), Err(Error::EmptyReduction)));
        assert!(matches!(Accumulator::new().averaged(), Err(Error::EmptyReduction)));
    }

    #[test]
    fn test_shape_mismatch() {
        let err = reduce(&[result("a", array![1.0, 2.0]), result("b", array![1.0])]).unwrap_err();
        match err {
            Error::ShapeMismatch {
                worker_id,
                expected,
                actual,
            } => {
                assert_eq!(worker_id, "b");
                assert_eq!(expected, 2);
                assert_eq!(actual, 1);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_incremental_accumulation() {
        let mut acc = Accumulator::new();
        acc.accumulate(&result("a", array![1.0, 1.0])).unwrap();
        assert_eq!(acc.averaged().unwrap(), array![1.0, 1.0]);

        acc.accumulate(&result("b", array![3.0, 5.0])).unwrap();
        assert_eq!(acc.count(), 2);
        assert_eq!(acc.averaged().unwrap(), array![2.0, 3.0]);
    }
}
