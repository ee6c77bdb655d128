//! GLM engines for a design matrix shared by every element.

use nalgebra::{DMatrix, DVector};
use ps_core::{Error, Result, Shuffle, StatisticEngine, TestOutput};

use super::hypothesis::Hypothesis;
use super::kernel::{
    DesignFit, VarianceGroups, ZConverter, heteroscedastic_g, residual_diag_sums,
};
use super::summary::check_design;

/// Per-hypothesis state that does not depend on the shuffle.
#[derive(Debug, Clone)]
struct Prepared {
    hypothesis: Hypothesis,
    /// Nuisance-residualised data `Rz · Y` (R×E).
    rz_y: DMatrix<f64>,
    precision: DMatrix<f64>,
    converter: ZConverter,
}

fn validate_inputs(
    measurements: &DMatrix<f64>,
    design: &DMatrix<f64>,
    hypotheses: &[Hypothesis],
) -> Result<()> {
    if hypotheses.is_empty() {
        return Err(Error::Validation("at least one hypothesis is required".to_string()));
    }
    if measurements.nrows() != design.nrows() {
        return Err(Error::Validation(format!(
            "measurement matrix has {} rows but the design matrix has {}",
            measurements.nrows(),
            design.nrows()
        )));
    }
    if measurements.ncols() == 0 {
        return Err(Error::Validation("measurement matrix has no elements".to_string()));
    }
    if measurements.iter().any(|v| !v.is_finite()) {
        return Err(Error::Validation(
            "measurement matrix contains non-finite values; use a variable-design test".to_string(),
        ));
    }
    for h in hypotheses {
        h.check_factors(design.ncols())?;
    }
    Ok(())
}

fn check_shape(shuffle: &Shuffle, rows: usize, output: &TestOutput, e: usize, h: usize) -> Result<()> {
    if shuffle.rows() != rows || shuffle.data.ncols() != rows {
        return Err(Error::Computation(format!(
            "shuffle operator is {:?}, expected {}x{}",
            shuffle.data.shape(),
            rows,
            rows
        )));
    }
    if output.statistic.shape() != (e, h) || output.zstat.shape() != (e, h) {
        return Err(Error::Computation(format!(
            "output buffers are {:?}, expected {:?}",
            output.statistic.shape(),
            (e, h)
        )));
    }
    Ok(())
}

/// Ordinary least-squares t / F test with one design for all elements.
#[derive(Debug, Clone)]
pub struct FixedHomoscedastic {
    fit: DesignFit,
    prepared: Vec<Prepared>,
    num_elements: usize,
}

impl FixedHomoscedastic {
    /// Build the test for `measurements` (R×E), `design` (R×F) and `hypotheses`.
    pub fn new(
        measurements: &DMatrix<f64>,
        design: &DMatrix<f64>,
        hypotheses: &[Hypothesis],
    ) -> Result<Self> {
        validate_inputs(measurements, design, hypotheses)?;
        check_design(design);
        let fit = DesignFit::new(design.clone())?;
        let prepared = hypotheses
            .iter()
            .map(|h| {
                let partition = h.partition(design)?;
                Ok(Prepared {
                    hypothesis: h.clone(),
                    rz_y: &partition.rz * measurements,
                    precision: fit.contrast_precision(h)?,
                    converter: ZConverter::new(h, fit.dof)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { fit, prepared, num_elements: measurements.ncols() })
    }

    /// Residual degrees of freedom.
    pub fn dof(&self) -> f64 {
        self.fit.dof
    }
}

impl StatisticEngine for FixedHomoscedastic {
    fn num_inputs(&self) -> usize {
        self.fit.m.nrows()
    }

    fn num_elements(&self) -> usize {
        self.num_elements
    }

    fn num_hypotheses(&self) -> usize {
        self.prepared.len()
    }

    fn evaluate(&self, shuffle: &Shuffle, output: &mut TestOutput) -> Result<()> {
        check_shape(shuffle, self.num_inputs(), output, self.num_elements, self.prepared.len())?;
        for (ih, p) in self.prepared.iter().enumerate() {
            let sy = &shuffle.data * &p.rz_y;
            let beta = &self.fit.pinv * &sy;
            let resid = &sy - &self.fit.m * &beta;
            let cb = p.hypothesis.matrix() * &beta;
            let rank = p.hypothesis.rank() as f64;
            for ie in 0..self.num_elements {
                let sse = resid.column(ie).norm_squared();
                let effect = cb.column(ie);
                let numerator = effect.dot(&(&p.precision * effect));
                let f = (numerator / rank) / (sse / self.fit.dof);
                let (stat, z) = p.converter.convert(f, effect[0]);
                output.statistic[(ie, ih)] = stat;
                output.zstat[(ie, ih)] = z;
            }
        }
        Ok(())
    }
}

/// Welch v / G test with variance groups and one design for all elements.
#[derive(Debug, Clone)]
pub struct FixedHeteroscedastic {
    fit: DesignFit,
    prepared: Vec<(Hypothesis, DMatrix<f64>)>,
    groups: VarianceGroups,
    rnn_sums: Vec<f64>,
    num_elements: usize,
}

impl FixedHeteroscedastic {
    /// Build the test; `groups` assigns every row to a variance group.
    pub fn new(
        measurements: &DMatrix<f64>,
        design: &DMatrix<f64>,
        hypotheses: &[Hypothesis],
        groups: VarianceGroups,
    ) -> Result<Self> {
        validate_inputs(measurements, design, hypotheses)?;
        if groups.labels().len() != design.nrows() {
            return Err(Error::Validation(format!(
                "variance groups cover {} rows but the design has {}",
                groups.labels().len(),
                design.nrows()
            )));
        }
        check_design(design);
        let fit = DesignFit::new(design.clone())?;
        let rnn_sums = residual_diag_sums(&fit, groups.labels(), groups.num_groups());
        if let Some(g) = rnn_sums.iter().position(|&s| s <= 1e-12) {
            return Err(Error::Validation(format!(
                "variance group {} has no residual degrees of freedom under this design",
                g
            )));
        }
        let prepared = hypotheses
            .iter()
            .map(|h| {
                fit.contrast_precision(h)?;
                let partition = h.partition(design)?;
                Ok((h.clone(), &partition.rz * measurements))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { fit, prepared, groups, rnn_sums, num_elements: measurements.ncols() })
    }
}

impl StatisticEngine for FixedHeteroscedastic {
    fn num_inputs(&self) -> usize {
        self.fit.m.nrows()
    }

    fn num_elements(&self) -> usize {
        self.num_elements
    }

    fn num_hypotheses(&self) -> usize {
        self.prepared.len()
    }

    fn evaluate(&self, shuffle: &Shuffle, output: &mut TestOutput) -> Result<()> {
        check_shape(shuffle, self.num_inputs(), output, self.num_elements, self.prepared.len())?;
        for (ih, (hypothesis, rz_y)) in self.prepared.iter().enumerate() {
            let sy_all = &shuffle.data * rz_y;
            for ie in 0..self.num_elements {
                let sy: DVector<f64> = sy_all.column(ie).into_owned();
                let (g, sign, dof) = heteroscedastic_g(
                    &self.fit,
                    hypothesis,
                    self.groups.labels(),
                    self.groups.counts(),
                    &self.rnn_sums,
                    &sy,
                );
                let (stat, z) = if g.is_finite() {
                    ZConverter::new(hypothesis, dof)?.convert(g, sign)
                } else {
                    (0.0, 0.0)
                };
                output.statistic[(ie, ih)] = stat;
                output.zstat[(ie, ih)] = z;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_groups() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            6,
            2,
            &[1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
        )
    }

    fn data() -> DMatrix<f64> {
        // Element 0: clear group difference; element 1: none.
        DMatrix::from_row_slice(
            6,
            2,
            &[5.0, 1.0, 6.0, 2.0, 7.0, 3.0, 1.0, 3.0, 2.0, 1.0, 3.0, 2.0],
        )
    }

    #[test]
    fn test_identity_shuffle_two_sample_t() {
        let h = Hypothesis::t_test("g1>g2", &[1.0, -1.0]).unwrap();
        let engine = FixedHomoscedastic::new(&data(), &two_groups(), &[h]).unwrap();
        assert_eq!(engine.num_inputs(), 6);
        assert_eq!(engine.num_elements(), 2);
        assert_eq!(engine.num_hypotheses(), 1);
        assert_relative_eq!(engine.dof(), 4.0);
        let out = engine.evaluate_new(&Shuffle::identity(0, 6)).unwrap();
        assert_relative_eq!(out.statistic[(0, 0)], 4.0 / (2.0f64 / 3.0).sqrt(), epsilon = 1e-10);
        assert_relative_eq!(out.statistic[(1, 0)], 0.0, epsilon = 1e-10);
        assert!(out.zstat[(0, 0)] > 2.0);
    }

    #[test]
    fn test_swapping_groups_negates_t() {
        let h = Hypothesis::t_test("g1>g2", &[1.0, -1.0]).unwrap();
        let engine = FixedHomoscedastic::new(&data(), &two_groups(), &[h]).unwrap();
        let swap = Shuffle::from_parts(1, 6, Some(&[3, 4, 5, 0, 1, 2]), None);
        let out = engine.evaluate_new(&swap).unwrap();
        let reference = engine.evaluate_new(&Shuffle::identity(0, 6)).unwrap();
        assert_relative_eq!(out.statistic[(0, 0)], -reference.statistic[(0, 0)], epsilon = 1e-10);
    }

    #[test]
    fn test_f_test_equals_squared_t_for_rank_one() {
        let t = Hypothesis::t_test("t", &[1.0, -1.0]).unwrap();
        let f = Hypothesis::f_test("f", DMatrix::from_row_slice(1, 2, &[1.0, -1.0])).unwrap();
        let engine = FixedHomoscedastic::new(&data(), &two_groups(), &[t, f]).unwrap();
        let out = engine.evaluate_new(&Shuffle::identity(0, 6)).unwrap();
        let t_val = out.statistic[(0, 0)];
        assert_relative_eq!(out.statistic[(0, 1)], t_val * t_val, epsilon = 1e-9);
    }

    #[test]
    fn test_rejects_mismatched_inputs() {
        let h = Hypothesis::t_test("bad", &[1.0, -1.0, 0.0]).unwrap();
        assert!(FixedHomoscedastic::new(&data(), &two_groups(), &[h]).is_err());
        let h = Hypothesis::t_test("ok", &[1.0, -1.0]).unwrap();
        let short = DMatrix::zeros(5, 2);
        assert!(FixedHomoscedastic::new(&short, &two_groups(), &[h.clone()]).is_err());
        let mut nan = data();
        nan[(0, 0)] = f64::NAN;
        assert!(FixedHomoscedastic::new(&nan, &two_groups(), &[h]).is_err());
    }

    #[test]
    fn test_wrong_shuffle_size_is_computation_error() {
        let h = Hypothesis::t_test("t", &[1.0, -1.0]).unwrap();
        let engine = FixedHomoscedastic::new(&data(), &two_groups(), &[h]).unwrap();
        let err = engine.evaluate_new(&Shuffle::identity(0, 5)).unwrap_err();
        assert!(matches!(err, Error::Computation(_)));
    }

    #[test]
    fn test_heteroscedastic_matches_homoscedastic_for_equal_variances() {
        let h = Hypothesis::t_test("t", &[1.0, -1.0]).unwrap();
        let groups = VarianceGroups::from_labels(&[0, 0, 0, 1, 1, 1]).unwrap();
        let hetero =
            FixedHeteroscedastic::new(&data(), &two_groups(), &[h.clone()], groups).unwrap();
        let homo = FixedHomoscedastic::new(&data(), &two_groups(), &[h]).unwrap();
        let a = hetero.evaluate_new(&Shuffle::identity(0, 6)).unwrap();
        let b = homo.evaluate_new(&Shuffle::identity(0, 6)).unwrap();
        assert_relative_eq!(a.statistic[(0, 0)], b.statistic[(0, 0)], epsilon = 1e-9);
        assert_relative_eq!(a.zstat[(0, 0)], b.zstat[(0, 0)], epsilon = 1e-6);
    }

    #[test]
    fn test_heteroscedastic_group_size_mismatch() {
        let h = Hypothesis::t_test("t", &[1.0, -1.0]).unwrap();
        let groups = VarianceGroups::from_labels(&[0, 0, 1, 1]).unwrap();
        assert!(FixedHeteroscedastic::new(&data(), &two_groups(), &[h], groups).is_err());
    }
}
