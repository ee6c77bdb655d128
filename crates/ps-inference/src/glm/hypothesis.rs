//! Contrasts (hypotheses) and their partition of the design matrix.

use nalgebra::DMatrix;
use ps_core::{Error, Result};

use super::kernel::pinv_and_rank;

/// One tested hypothesis: a contrast matrix `C` (rank × factors).
///
/// A t-test has a single contrast row; an F-test may have several.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    name: String,
    c: DMatrix<f64>,
    is_f: bool,
    rank: usize,
    /// `I − C⁺C`: projects parameters onto the part of the model not tested.
    null_projector: DMatrix<f64>,
}

/// Freedman–Lane partition of a design against one hypothesis.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Nuisance regressors `Z = M (I − C⁺C)`.
    pub z: DMatrix<f64>,
    /// Residual-forming matrix of the nuisance model, `I − Z Z⁺`.
    pub rz: DMatrix<f64>,
    /// Rank of the tested effect.
    pub rank_x: usize,
    /// Rank of `Z`.
    pub rank_z: usize,
}

impl Hypothesis {
    /// A t-test from a single row of contrast weights.
    pub fn t_test(name: impl Into<String>, weights: &[f64]) -> Result<Self> {
        Self::build(name.into(), DMatrix::from_row_slice(1, weights.len(), weights), false)
    }

    /// An F-test from a contrast matrix (one row per contrast).
    pub fn f_test(name: impl Into<String>, c: DMatrix<f64>) -> Result<Self> {
        Self::build(name.into(), c, true)
    }

    fn build(name: String, c: DMatrix<f64>, is_f: bool) -> Result<Self> {
        if c.is_empty() {
            return Err(Error::Validation(format!("hypothesis '{}' has an empty contrast", name)));
        }
        if c.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation(format!(
                "hypothesis '{}' contains non-finite contrast weights",
                name
            )));
        }
        if !is_f && c.nrows() != 1 {
            return Err(Error::Validation(format!(
                "t-test hypothesis '{}' must have exactly one contrast row, got {}",
                name,
                c.nrows()
            )));
        }
        let (c_pinv, rank) = pinv_and_rank(&c)?;
        if rank == 0 {
            return Err(Error::Validation(format!("hypothesis '{}' is an all-zero contrast", name)));
        }
        if rank < c.nrows() {
            log::warn!(
                "F-test '{}' has {} rows but rank {}; testing the rank-{} subspace",
                name,
                c.nrows(),
                rank,
                rank
            );
        }
        let f = c.ncols();
        let null_projector = DMatrix::identity(f, f) - &c_pinv * &c;
        Ok(Self { name, c, is_f, rank, null_projector })
    }

    /// Display name (used by callers for output naming).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Contrast matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.c
    }

    /// Whether this is an F-test.
    pub fn is_f(&self) -> bool {
        self.is_f
    }

    /// Rank of the contrast.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of design factors the contrast expects.
    pub fn num_factors(&self) -> usize {
        self.c.ncols()
    }

    /// Check the contrast width against a design with `factors` columns.
    pub fn check_factors(&self, factors: usize) -> Result<()> {
        if self.c.ncols() != factors {
            return Err(Error::Validation(format!(
                "hypothesis '{}' has {} columns but the design matrix has {}",
                self.name,
                self.c.ncols(),
                factors
            )));
        }
        Ok(())
    }

    /// Partition `design` into tested and nuisance parts (Freedman–Lane).
    pub fn partition(&self, design: &DMatrix<f64>) -> Result<Partition> {
        self.check_factors(design.ncols())?;
        let z = design * &self.null_projector;
        let (z_pinv, rank_z) = pinv_and_rank(&z)?;
        let n = design.nrows();
        let rz = DMatrix::identity(n, n) - &z * &z_pinv;
        Ok(Partition { z, rz, rank_x: self.rank, rank_z })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn design() -> DMatrix<f64> {
        // intercept + slope + covariate
        DMatrix::from_row_slice(
            5,
            3,
            &[
                1.0, 0.0, 0.3, //
                1.0, 1.0, -0.2, //
                1.0, 2.0, 0.5, //
                1.0, 3.0, 0.1, //
                1.0, 4.0, -0.4,
            ],
        )
    }

    #[test]
    fn test_t_test_shape() {
        let h = Hypothesis::t_test("slope", &[0.0, 1.0, 0.0]).unwrap();
        assert!(!h.is_f());
        assert_eq!(h.rank(), 1);
        assert_eq!(h.num_factors(), 3);
        assert_eq!(h.name(), "slope");
    }

    #[test]
    fn test_rejects_bad_contrasts() {
        assert!(Hypothesis::t_test("zero", &[0.0, 0.0]).is_err());
        assert!(Hypothesis::t_test("nan", &[f64::NAN, 1.0]).is_err());
        assert!(Hypothesis::t_test("empty", &[]).is_err());
    }

    #[test]
    fn test_column_mismatch() {
        let h = Hypothesis::t_test("slope", &[0.0, 1.0]).unwrap();
        let err = h.partition(&design()).unwrap_err();
        assert!(err.to_string().contains("2 columns"));
    }

    #[test]
    fn test_partition_removes_nuisance() {
        let m = design();
        let h = Hypothesis::t_test("slope", &[0.0, 1.0, 0.0]).unwrap();
        let p = h.partition(&m).unwrap();
        assert_eq!(p.rank_z, 2);
        assert_eq!(p.rank_x, 1);
        // Rz annihilates the intercept and the covariate.
        let ones = DMatrix::from_element(5, 1, 1.0);
        let resid = &p.rz * ones;
        assert_relative_eq!(resid.norm(), 0.0, epsilon = 1e-10);
        let cov = m.column(2).into_owned();
        assert_relative_eq!((&p.rz * cov).norm(), 0.0, epsilon = 1e-10);
        // ...but not the tested regressor.
        let slope = m.column(1).into_owned();
        assert!((&p.rz * slope).norm() > 1e-3);
    }

    #[test]
    fn test_full_rank_f_test_has_empty_nuisance() {
        let m = design();
        let h = Hypothesis::f_test("all", DMatrix::identity(3, 3)).unwrap();
        let p = h.partition(&m).unwrap();
        assert_eq!(p.rank_z, 0);
        assert_relative_eq!((&p.rz - DMatrix::identity(5, 5)).norm(), 0.0, epsilon = 1e-12);
    }
}
