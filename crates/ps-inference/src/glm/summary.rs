//! Design diagnostics and the un-shuffled model summary.

use nalgebra::DMatrix;
use ps_core::{Error, Result};
use serde::{Deserialize, Serialize};

use super::hypothesis::Hypothesis;
use super::kernel::DesignFit;

/// Condition numbers above this trigger a warning.
pub const CONDITION_WARN: f64 = 1e5;

/// Condition number of `design` (ratio of extreme singular values).
///
/// Logs a warning above [`CONDITION_WARN`]; rank-deficient designs report `+inf`.
pub fn check_design(design: &DMatrix<f64>) -> f64 {
    if design.is_empty() {
        return f64::INFINITY;
    }
    let sv = design.clone().singular_values();
    let max = sv.iter().copied().fold(0.0f64, f64::max);
    let min = sv.iter().copied().fold(f64::INFINITY, f64::min);
    let cond = if min > 0.0 { max / min } else { f64::INFINITY };
    if cond > CONDITION_WARN {
        log::warn!(
            "design matrix is poorly conditioned (condition number {:.3e}); results may be unstable",
            cond
        );
    } else {
        log::debug!("design matrix condition number {:.3}", cond);
    }
    cond
}

/// Model quantities for the un-shuffled data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlmSummary {
    /// Regression coefficients, F×E.
    pub betas: DMatrix<f64>,
    /// Contrast effect `cβ`, E×H (NaN for F-tests).
    pub abs_effect: DMatrix<f64>,
    /// Residual standard deviation per element (E×1).
    pub stdev: DMatrix<f64>,
    /// `abs_effect / stdev`, E×H (NaN for F-tests).
    pub std_effect: DMatrix<f64>,
}

/// Fit the design to every element without shuffling.
pub fn all_stats(
    measurements: &DMatrix<f64>,
    design: &DMatrix<f64>,
    hypotheses: &[Hypothesis],
) -> Result<GlmSummary> {
    if measurements.nrows() != design.nrows() {
        return Err(Error::Validation(format!(
            "measurement matrix has {} rows but the design matrix has {}",
            measurements.nrows(),
            design.nrows()
        )));
    }
    if measurements.iter().any(|v| !v.is_finite()) {
        return Err(Error::Validation("measurement matrix contains non-finite values".to_string()));
    }
    for h in hypotheses {
        h.check_factors(design.ncols())?;
    }
    let fit = DesignFit::new(design.clone())?;
    let betas = &fit.pinv * measurements;
    let residuals = measurements - &fit.m * &betas;
    let e = measurements.ncols();
    let stdev = DMatrix::from_fn(e, 1, |ie, _| (residuals.column(ie).norm_squared() / fit.dof).sqrt());

    let mut abs_effect = DMatrix::from_element(e, hypotheses.len(), f64::NAN);
    let mut std_effect = DMatrix::from_element(e, hypotheses.len(), f64::NAN);
    for (ih, h) in hypotheses.iter().enumerate() {
        if h.is_f() {
            continue;
        }
        let effect = h.matrix() * &betas;
        for ie in 0..e {
            abs_effect[(ie, ih)] = effect[(0, ie)];
            std_effect[(ie, ih)] = effect[(0, ie)] / stdev[(ie, 0)];
        }
    }
    Ok(GlmSummary { betas, abs_effect, stdev, std_effect })
}
