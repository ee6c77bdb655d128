//! Common data types for permstat

use nalgebra::DMatrix;

/// A single shuffle: a signed permutation operator over the observation rows.
///
/// `data` is square (R×R) with at most one non-zero entry (±1) in every row
/// and column. Left-multiplying the data (or design) matrix by `data`
/// reorders and/or sign-flips the observations. An empty `data` matrix
/// marks generator exhaustion.
#[derive(Debug, Clone, PartialEq)]
pub struct Shuffle {
    /// Position of this shuffle within its generator sequence.
    pub index: usize,
    /// R×R operator matrix.
    pub data: DMatrix<f64>,
}

impl Shuffle {
    /// Identity shuffle over `rows` observations.
    pub fn identity(index: usize, rows: usize) -> Self {
        Self { index, data: DMatrix::identity(rows, rows) }
    }

    /// Materialize an operator from its compact form.
    ///
    /// `permutation[i]` is the source row that lands in row `i`; `signflips[i]`
    /// negates output row `i`. Either part may be absent.
    pub fn from_parts(
        index: usize,
        rows: usize,
        permutation: Option<&[usize]>,
        signflips: Option<&[bool]>,
    ) -> Self {
        let mut data = DMatrix::zeros(rows, rows);
        for i in 0..rows {
            let col = permutation.map_or(i, |p| p[i]);
            let sign = match signflips {
                Some(s) if s[i] => -1.0,
                _ => 1.0,
            };
            data[(i, col)] = sign;
        }
        Self { index, data }
    }

    /// Number of observation rows this operator acts on (0 when exhausted).
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// True for the exhaustion marker.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decompose the operator back into `(source_row, sign)` per output row.
    ///
    /// Rows with no non-zero entry report `None`.
    pub fn sources(&self) -> Vec<Option<(usize, f64)>> {
        (0..self.data.nrows())
            .map(|i| {
                self.data
                    .row(i)
                    .iter()
                    .position(|v| *v != 0.0)
                    .map(|j| (j, self.data[(i, j)].signum()))
            })
            .collect()
    }
}

/// Raw and Z-transformed test statistics for one shuffle (E×H each).
#[derive(Debug, Clone, PartialEq)]
pub struct TestOutput {
    /// Signed t statistic (rank-1 hypotheses) or F / G statistic.
    pub statistic: DMatrix<f64>,
    /// Normal-equivalent deviate of `statistic`.
    pub zstat: DMatrix<f64>,
}

impl TestOutput {
    /// Zero-filled output for `elements` × `hypotheses`.
    pub fn zeros(elements: usize, hypotheses: usize) -> Self {
        Self {
            statistic: DMatrix::zeros(elements, hypotheses),
            zstat: DMatrix::zeros(elements, hypotheses),
        }
    }
}
