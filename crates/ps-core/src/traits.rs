//! Core traits for permstat
//!
//! The permutation pipeline only talks to these two seams: it does not know
//! which GLM variant produced the statistics nor which enhancement strategy
//! transforms them.

use nalgebra::DMatrix;

use crate::types::{Shuffle, TestOutput};
use crate::{Error, Result};

/// A GLM test evaluated once per shuffle.
pub trait StatisticEngine: Send + Sync {
    /// Number of observations (rows of the data / design matrix).
    fn num_inputs(&self) -> usize;

    /// Number of tested elements (columns of the data matrix).
    fn num_elements(&self) -> usize;

    /// Number of hypotheses (columns of the output).
    fn num_hypotheses(&self) -> usize;

    /// Evaluate the test for `shuffle`, writing E×H statistics into `output`.
    ///
    /// `output` must already have the E×H shape; workers reuse it across shuffles.
    fn evaluate(&self, shuffle: &Shuffle, output: &mut TestOutput) -> Result<()>;

    /// Allocating convenience wrapper around [`StatisticEngine::evaluate`].
    fn evaluate_new(&self, shuffle: &Shuffle) -> Result<TestOutput> {
        let mut output = TestOutput::zeros(self.num_elements(), self.num_hypotheses());
        self.evaluate(shuffle, &mut output)?;
        Ok(output)
    }
}

/// Statistical enhancement of a single statistic column.
pub trait Enhancer: Send + Sync {
    /// Transform one column of E per-element statistics.
    fn enhance_column(&self, input: &[f64], output: &mut [f64]) -> Result<()>;

    /// Apply [`Enhancer::enhance_column`] independently to every hypothesis column.
    fn enhance(&self, input: &DMatrix<f64>, output: &mut DMatrix<f64>) -> Result<()> {
        if input.shape() != output.shape() {
            return Err(Error::Computation(format!(
                "enhancer shape mismatch: input {:?}, output {:?}",
                input.shape(),
                output.shape()
            )));
        }
        let n = input.nrows();
        if n == 0 {
            return Ok(());
        }
        for (src, dst) in input.as_slice().chunks(n).zip(output.as_mut_slice().chunks_mut(n)) {
            self.enhance_column(src, dst)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl Enhancer for Doubler {
        fn enhance_column(&self, input: &[f64], output: &mut [f64]) -> Result<()> {
            for (o, i) in output.iter_mut().zip(input) {
                *o = 2.0 * i;
            }
            Ok(())
        }
    }

    struct Constant;

    impl StatisticEngine for Constant {
        fn num_inputs(&self) -> usize {
            3
        }
        fn num_elements(&self) -> usize {
            2
        }
        fn num_hypotheses(&self) -> usize {
            1
        }
        fn evaluate(&self, shuffle: &Shuffle, output: &mut TestOutput) -> Result<()> {
            output.statistic.fill(shuffle.index as f64);
            output.zstat.fill(-(shuffle.index as f64));
            Ok(())
        }
    }

    #[test]
    fn test_enhance_fans_out_per_column() {
        let input = DMatrix::from_column_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let mut output = DMatrix::zeros(2, 2);
        Doubler.enhance(&input, &mut output).unwrap();
        assert_eq!(output, DMatrix::from_column_slice(2, 2, &[2.0, 4.0, 6.0, 8.0]));
    }

    #[test]
    fn test_enhance_rejects_shape_mismatch() {
        let input = DMatrix::zeros(2, 2);
        let mut output = DMatrix::zeros(3, 2);
        assert!(Doubler.enhance(&input, &mut output).is_err());
    }

    #[test]
    fn test_evaluate_new_allocates_shape() {
        let out = Constant.evaluate_new(&Shuffle::identity(5, 3)).unwrap();
        assert_eq!(out.statistic.shape(), (2, 1));
        assert_eq!(out.statistic[(1, 0)], 5.0);
        assert_eq!(out.zstat[(0, 0)], -5.0);
    }
}
