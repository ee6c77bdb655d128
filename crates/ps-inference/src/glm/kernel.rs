//! Shared numeric kernels for the GLM engines.

use nalgebra::{DMatrix, DVector};
use ps_core::{Error, Result};
use ps_prob::fisher::{self, f_to_z_with};
use ps_prob::student_t::{self, t_to_z_with};
use statrs::distribution::{FisherSnedecor, StudentsT};

use super::hypothesis::Hypothesis;

/// Upper bound on the Satterthwaite degrees of freedom fed to the t / F CDFs.
const MAX_DOF: f64 = 1e6;

/// Pseudo-inverse and numerical rank of `m` (relative tolerance as in LAPACK).
pub(crate) fn pinv_and_rank(m: &DMatrix<f64>) -> Result<(DMatrix<f64>, usize)> {
    if m.is_empty() {
        return Ok((DMatrix::zeros(m.ncols(), m.nrows()), 0));
    }
    let svd = m.clone().svd(true, true);
    let max_sv = svd.singular_values.iter().copied().fold(0.0f64, f64::max);
    let tol = max_sv * (m.nrows().max(m.ncols()) as f64) * f64::EPSILON;
    let rank = svd.rank(tol);
    let pinv = svd
        .pseudo_inverse(tol)
        .map_err(|e| Error::Computation(format!("pseudo-inverse failed: {}", e)))?;
    Ok((pinv, rank))
}

/// Shuffle-independent quantities of one design matrix.
#[derive(Debug, Clone)]
pub(crate) struct DesignFit {
    pub m: DMatrix<f64>,
    pub pinv: DMatrix<f64>,
    /// Residual degrees of freedom `R − rank(M)`.
    pub dof: f64,
}

impl DesignFit {
    pub fn new(m: DMatrix<f64>) -> Result<Self> {
        if m.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation("design matrix contains non-finite values".to_string()));
        }
        let (pinv, rank) = pinv_and_rank(&m)?;
        if rank >= m.nrows() {
            return Err(Error::Validation(format!(
                "design matrix has rank {} with only {} observations: no residual degrees of freedom",
                rank,
                m.nrows()
            )));
        }
        let dof = (m.nrows() - rank) as f64;
        Ok(Self { m, pinv, dof })
    }

    /// `(C (MᵀM)⁺ Cᵀ)⁻¹`, after checking that `C` is estimable under this design.
    pub fn contrast_precision(&self, hypothesis: &Hypothesis) -> Result<DMatrix<f64>> {
        let c = hypothesis.matrix();
        let f = self.m.ncols();
        let projector = DMatrix::identity(f, f) - &self.pinv * &self.m;
        let leak = (c * projector).norm();
        if leak > 1e-6 * c.norm().max(1.0) {
            return Err(Error::Validation(format!(
                "hypothesis '{}' is not estimable under the (rank-deficient) design",
                hypothesis.name()
            )));
        }
        let mtm_pinv = &self.pinv * self.pinv.transpose();
        let cov = c * mtm_pinv * c.transpose();
        let (inv, _) = pinv_and_rank(&cov)?;
        Ok(inv)
    }
}

/// Converts an F-like statistic into the reported statistic and its z-score.
#[derive(Debug, Clone)]
pub(crate) enum ZConverter {
    T(StudentsT),
    F(FisherSnedecor),
}

impl ZConverter {
    pub fn new(hypothesis: &Hypothesis, dof: f64) -> Result<Self> {
        let dof = dof.min(MAX_DOF);
        if hypothesis.is_f() {
            Ok(Self::F(fisher::distribution(hypothesis.rank() as f64, dof)?))
        } else {
            Ok(Self::T(student_t::standard(dof)?))
        }
    }

    /// `f` is the F (or G) statistic; `sign` the sign of the rank-1 effect.
    ///
    /// Non-finite statistics are reported as 0 in both outputs.
    pub fn convert(&self, f: f64, sign: f64) -> (f64, f64) {
        if !f.is_finite() || f < 0.0 {
            return (0.0, 0.0);
        }
        match self {
            Self::T(dist) => {
                let t = sign.signum() * f.sqrt();
                (t, t_to_z_with(dist, t))
            }
            Self::F(dist) => (f, f_to_z_with(dist, f)),
        }
    }
}

/// Classic F statistic for one element: `(cβᵀ P cβ / s) / (sse / dof)`.
///
/// Returns `(F, sign of the first contrast row's effect)`.
pub(crate) fn homoscedastic_f(
    fit: &DesignFit,
    hypothesis: &Hypothesis,
    precision: &DMatrix<f64>,
    sy: &DVector<f64>,
) -> (f64, f64) {
    let beta = &fit.pinv * sy;
    let resid = sy - &fit.m * &beta;
    let sse = resid.norm_squared();
    let cb = hypothesis.matrix() * &beta;
    let numerator = cb.dot(&(precision * &cb));
    let f = (numerator / hypothesis.rank() as f64) / (sse / fit.dof);
    (f, cb[0])
}

/// Observation-to-variance-group assignment for heteroscedastic tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarianceGroups {
    labels: Vec<usize>,
    counts: Vec<usize>,
}

impl VarianceGroups {
    /// Build from one integer label per row (0- or 1-based, contiguous).
    pub fn from_labels(labels: &[i64]) -> Result<Self> {
        if labels.is_empty() {
            return Err(Error::Validation("variance group labels are empty".to_string()));
        }
        let min = labels.iter().copied().min().unwrap_or(0);
        if min != 0 && min != 1 {
            return Err(Error::Validation(format!(
                "variance group labels must start at 0 or 1, found minimum {}",
                min
            )));
        }
        let max = labels.iter().copied().max().unwrap_or(min);
        if max - min >= labels.len() as i64 {
            return Err(Error::Validation(format!(
                "variance group label {} is out of range for {} rows (labels must be contiguous)",
                max,
                labels.len()
            )));
        }
        let labels: Vec<usize> = labels.iter().map(|&l| (l - min) as usize).collect();
        let n_groups = labels.iter().copied().max().map_or(0, |m| m + 1);
        let mut counts = vec![0usize; n_groups];
        for &g in &labels {
            counts[g] += 1;
        }
        if let Some(g) = counts.iter().position(|&c| c == 0) {
            return Err(Error::Validation(format!(
                "variance group {} is empty (labels must be contiguous)",
                g as i64 + min
            )));
        }
        if n_groups < 2 {
            log::warn!("only one variance group supplied; heteroscedastic test reduces to a rescaled homoscedastic one");
        }
        Ok(Self { labels, counts })
    }

    /// 0-based group per row.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Number of groups.
    pub fn num_groups(&self) -> usize {
        self.counts.len()
    }

    /// Rows per group.
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Restrict to a subset of rows (variable designs); groups may become empty.
    pub(crate) fn restricted(&self, rows: &[usize]) -> (Vec<usize>, Vec<usize>) {
        let labels: Vec<usize> = rows.iter().map(|&r| self.labels[r]).collect();
        let mut counts = vec![0usize; self.counts.len()];
        for &g in &labels {
            counts[g] += 1;
        }
        (labels, counts)
    }
}

/// Per-group sums of the diagonal of `I − M M⁺`.
pub(crate) fn residual_diag_sums(fit: &DesignFit, labels: &[usize], n_groups: usize) -> Vec<f64> {
    let hat = &fit.m * &fit.pinv;
    let mut sums = vec![0.0; n_groups];
    for (i, &g) in labels.iter().enumerate() {
        sums[g] += 1.0 - hat[(i, i)];
    }
    sums
}

/// Welch v / G statistic for one element.
///
/// Returns `(G, sign, dof)`, with the Satterthwaite-style denominator
/// degrees of freedom `s(s+2) / (3 Σ_g (1/Σ_{n∈g} R_nn)(1 − Σ_{n∈g} W_nn / tr W)²)`.
pub(crate) fn heteroscedastic_g(
    fit: &DesignFit,
    hypothesis: &Hypothesis,
    labels: &[usize],
    counts: &[usize],
    rnn_sums: &[f64],
    sy: &DVector<f64>,
) -> (f64, f64, f64) {
    let n_groups = counts.len();
    let beta_ols = &fit.pinv * sy;
    let resid = sy - &fit.m * &beta_ols;

    let mut sse = vec![0.0; n_groups];
    for (i, &g) in labels.iter().enumerate() {
        sse[g] += resid[i] * resid[i];
    }
    let mut group_w = vec![0.0; n_groups];
    for g in 0..n_groups {
        if counts[g] == 0 {
            continue;
        }
        if sse[g] <= 0.0 || rnn_sums[g] <= 0.0 {
            return (f64::NAN, 0.0, 0.0);
        }
        group_w[g] = rnn_sums[g] / sse[g];
    }
    let w = DVector::from_iterator(labels.len(), labels.iter().map(|&g| group_w[g]));
    let trace_w: f64 = w.sum();

    // Weighted least squares: β = (MᵀWM)⁺ MᵀW y.
    let mut wm = fit.m.clone();
    for (i, mut row) in wm.row_iter_mut().enumerate() {
        row *= w[i];
    }
    let mtwm = fit.m.transpose() * &wm;
    let (mtwm_pinv, _) = match pinv_and_rank(&mtwm) {
        Ok(v) => v,
        Err(_) => return (f64::NAN, 0.0, 0.0),
    };
    let beta = &mtwm_pinv * (wm.transpose() * sy);
    let c = hypothesis.matrix();
    let cb = c * &beta;
    let (precision, _) = match pinv_and_rank(&(c * &mtwm_pinv * c.transpose())) {
        Ok(v) => v,
        Err(_) => return (f64::NAN, 0.0, 0.0),
    };
    let numerator = cb.dot(&(&precision * &cb));

    let s = hypothesis.rank() as f64;
    let mut lambda_sum = 0.0;
    for g in 0..n_groups {
        if counts[g] == 0 {
            continue;
        }
        let share = 1.0 - counts[g] as f64 * group_w[g] / trace_w;
        lambda_sum += share * share / rnn_sums[g];
    }
    let lambda = 1.0 + 2.0 * (s - 1.0) / (s * (s + 2.0)) * lambda_sum;
    let g_stat = numerator / (s * lambda);
    let dof = if lambda_sum > 0.0 { s * (s + 2.0) / (3.0 * lambda_sum) } else { MAX_DOF };
    (g_stat, cb[0], dof)
}
