//! GLM engines whose design varies per element.
//!
//! Each element gets its own design: the shared columns plus one column per
//! element-wise covariate. Rows with a non-finite measurement or covariate
//! value are dropped for that element, and the shuffle operator is
//! compressed to the surviving rows before it is applied.

use nalgebra::{DMatrix, DVector};
use ps_core::{Error, Result, Shuffle, StatisticEngine, TestOutput};

use super::hypothesis::Hypothesis;
use super::kernel::{
    DesignFit, VarianceGroups, ZConverter, heteroscedastic_g, homoscedastic_f,
    residual_diag_sums,
};

/// Fitted model of one element. `None` in the engine means the element is untestable.
#[derive(Debug, Clone)]
struct ElementModel {
    rows: Vec<usize>,
    fit: DesignFit,
    /// Per hypothesis: `Rz · y` over the kept rows.
    rz_y: Vec<DVector<f64>>,
    precision: Vec<DMatrix<f64>>,
    converters: Vec<ZConverter>,
    group_labels: Vec<usize>,
    group_counts: Vec<usize>,
    rnn_sums: Vec<f64>,
}

#[derive(Debug, Clone)]
struct VariableCore {
    hypotheses: Vec<Hypothesis>,
    elements: Vec<Option<ElementModel>>,
    num_inputs: usize,
}

impl VariableCore {
    fn build(
        measurements: &DMatrix<f64>,
        design: &DMatrix<f64>,
        covariates: &[DMatrix<f64>],
        hypotheses: &[Hypothesis],
        groups: Option<&VarianceGroups>,
    ) -> Result<Self> {
        let rows = design.nrows();
        let factors = design.ncols() + covariates.len();
        if hypotheses.is_empty() {
            return Err(Error::Validation("at least one hypothesis is required".to_string()));
        }
        if measurements.nrows() != rows {
            return Err(Error::Validation(format!(
                "measurement matrix has {} rows but the design matrix has {}",
                measurements.nrows(),
                rows
            )));
        }
        if measurements.ncols() == 0 {
            return Err(Error::Validation("measurement matrix has no elements".to_string()));
        }
        if design.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation("design matrix contains non-finite values".to_string()));
        }
        for (i, cov) in covariates.iter().enumerate() {
            if cov.shape() != measurements.shape() {
                return Err(Error::Validation(format!(
                    "element-wise covariate {} is {:?}, expected {:?}",
                    i,
                    cov.shape(),
                    measurements.shape()
                )));
            }
        }
        if let Some(g) = groups {
            if g.labels().len() != rows {
                return Err(Error::Validation(format!(
                    "variance groups cover {} rows but the design has {}",
                    g.labels().len(),
                    rows
                )));
            }
        }
        for h in hypotheses {
            h.check_factors(factors)?;
        }

        let mut elements = Vec::with_capacity(measurements.ncols());
        let mut untestable = 0usize;
        for ie in 0..measurements.ncols() {
            let model = Self::fit_element(ie, measurements, design, covariates, hypotheses, groups)?;
            if model.is_none() {
                untestable += 1;
            }
            elements.push(model);
        }
        if untestable > 0 {
            log::warn!(
                "{} of {} elements have too few valid observations and will report zero statistics",
                untestable,
                measurements.ncols()
            );
        }
        Ok(Self { hypotheses: hypotheses.to_vec(), elements, num_inputs: rows })
    }

    fn fit_element(
        ie: usize,
        measurements: &DMatrix<f64>,
        design: &DMatrix<f64>,
        covariates: &[DMatrix<f64>],
        hypotheses: &[Hypothesis],
        groups: Option<&VarianceGroups>,
    ) -> Result<Option<ElementModel>> {
        let kept: Vec<usize> = (0..design.nrows())
            .filter(|&r| {
                measurements[(r, ie)].is_finite() && covariates.iter().all(|c| c[(r, ie)].is_finite())
            })
            .collect();
        let base = design.ncols();
        let m = DMatrix::from_fn(kept.len(), base + covariates.len(), |i, j| {
            if j < base { design[(kept[i], j)] } else { covariates[j - base][(kept[i], ie)] }
        });
        let y = DVector::from_iterator(kept.len(), kept.iter().map(|&r| measurements[(r, ie)]));

        // Rank-deficient or dof-less element designs are untestable, not fatal.
        let fit = match DesignFit::new(m) {
            Ok(fit) => fit,
            Err(_) => return Ok(None),
        };
        let mut rz_y = Vec::with_capacity(hypotheses.len());
        let mut precision = Vec::with_capacity(hypotheses.len());
        let mut converters = Vec::with_capacity(hypotheses.len());
        for h in hypotheses {
            let p = match fit.contrast_precision(h) {
                Ok(p) => p,
                Err(_) => return Ok(None),
            };
            let partition = h.partition(&fit.m)?;
            rz_y.push(&partition.rz * &y);
            precision.push(p);
            converters.push(ZConverter::new(h, fit.dof)?);
        }

        let (group_labels, group_counts, rnn_sums) = match groups {
            Some(g) => {
                let (labels, counts) = g.restricted(&kept);
                let sums = residual_diag_sums(&fit, &labels, counts.len());
                let degenerate = counts.iter().zip(&sums).any(|(&n, &s)| n > 0 && s <= 1e-12);
                if degenerate {
                    return Ok(None);
                }
                (labels, counts, sums)
            }
            None => (Vec::new(), Vec::new(), Vec::new()),
        };

        Ok(Some(ElementModel {
            rows: kept,
            fit,
            rz_y,
            precision,
            converters,
            group_labels,
            group_counts,
            rnn_sums,
        }))
    }

    fn check(&self, shuffle: &Shuffle, output: &TestOutput) -> Result<()> {
        if shuffle.rows() != self.num_inputs || shuffle.data.ncols() != self.num_inputs {
            return Err(Error::Computation(format!(
                "shuffle operator is {:?}, expected {}x{}",
                shuffle.data.shape(),
                self.num_inputs,
                self.num_inputs
            )));
        }
        let shape = (self.elements.len(), self.hypotheses.len());
        if output.statistic.shape() != shape || output.zstat.shape() != shape {
            return Err(Error::Computation(format!(
                "output buffers are {:?}, expected {:?}",
                output.statistic.shape(),
                shape
            )));
        }
        Ok(())
    }

    fn evaluate_with<F>(&self, shuffle: &Shuffle, output: &mut TestOutput, stat: F) -> Result<()>
    where
        F: Fn(&ElementModel, usize, &DVector<f64>) -> Result<(f64, f64)>,
    {
        self.check(shuffle, output)?;
        let sources = shuffle.sources();
        for (ie, element) in self.elements.iter().enumerate() {
            let Some(model) = element else {
                for ih in 0..self.hypotheses.len() {
                    output.statistic[(ie, ih)] = 0.0;
                    output.zstat[(ie, ih)] = 0.0;
                }
                continue;
            };
            let compressed = compress(&sources, &model.rows);
            for ih in 0..self.hypotheses.len() {
                let sy = apply(&compressed, &model.rz_y[ih]);
                let (s, z) = stat(model, ih, &sy)?;
                output.statistic[(ie, ih)] = s;
                output.zstat[(ie, ih)] = z;
            }
        }
        Ok(())
    }
}

/// Restrict a signed permutation to the `kept` rows.
///
/// Returned entry `a` is `(b, sign)`: kept position `a` draws from kept
/// position `b`. Kept rows whose source was dropped are paired, in ascending
/// order, with the kept sources no kept row draws from; the sign is preserved.
fn compress(sources: &[Option<(usize, f64)>], kept: &[usize]) -> Vec<(usize, f64)> {
    let mut position = vec![usize::MAX; sources.len()];
    for (a, &r) in kept.iter().enumerate() {
        position[r] = a;
    }
    let mut used = vec![false; kept.len()];
    let mut out = vec![(usize::MAX, 1.0); kept.len()];
    let mut orphans = Vec::new();
    for (a, &r) in kept.iter().enumerate() {
        let (src, sign) = sources[r].unwrap_or((r, 1.0));
        match position.get(src).copied() {
            Some(b) if b != usize::MAX => {
                out[a] = (b, sign);
                used[b] = true;
            }
            _ => orphans.push((a, sign)),
        }
    }
    let free = used.iter().enumerate().filter(|(_, u)| !**u).map(|(b, _)| b);
    for ((a, sign), b) in orphans.into_iter().zip(free) {
        out[a] = (b, sign);
    }
    out
}

fn apply(compressed: &[(usize, f64)], v: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(compressed.len(), compressed.iter().map(|&(b, sign)| sign * v[b]))
}

/// Ordinary least-squares test with per-element designs and missing data.
#[derive(Debug, Clone)]
pub struct VariableHomoscedastic {
    core: VariableCore,
}

impl VariableHomoscedastic {
    /// `covariates` holds one R×E matrix per extra design column; hypotheses
    /// address `design.ncols() + covariates.len()` factors.
    pub fn new(
        measurements: &DMatrix<f64>,
        design: &DMatrix<f64>,
        covariates: &[DMatrix<f64>],
        hypotheses: &[Hypothesis],
    ) -> Result<Self> {
        Ok(Self { core: VariableCore::build(measurements, design, covariates, hypotheses, None)? })
    }

    /// Whether element `ie` had enough valid rows to be tested.
    pub fn is_testable(&self, ie: usize) -> bool {
        self.core.elements.get(ie).is_some_and(Option::is_some)
    }
}

impl StatisticEngine for VariableHomoscedastic {
    fn num_inputs(&self) -> usize {
        self.core.num_inputs
    }

    fn num_elements(&self) -> usize {
        self.core.elements.len()
    }

    fn num_hypotheses(&self) -> usize {
        self.core.hypotheses.len()
    }

    fn evaluate(&self, shuffle: &Shuffle, output: &mut TestOutput) -> Result<()> {
        let hypotheses = &self.core.hypotheses;
        self.core.evaluate_with(shuffle, output, |model, ih, sy| {
            let (f, sign) = homoscedastic_f(&model.fit, &hypotheses[ih], &model.precision[ih], sy);
            Ok(model.converters[ih].convert(f, sign))
        })
    }
}

/// Welch v / G test with per-element designs, missing data and variance groups.
#[derive(Debug, Clone)]
pub struct VariableHeteroscedastic {
    core: VariableCore,
}

impl VariableHeteroscedastic {
    /// See [`VariableHomoscedastic::new`]; `groups` covers all R rows.
    pub fn new(
        measurements: &DMatrix<f64>,
        design: &DMatrix<f64>,
        covariates: &[DMatrix<f64>],
        hypotheses: &[Hypothesis],
        groups: &VarianceGroups,
    ) -> Result<Self> {
        Ok(Self {
            core: VariableCore::build(measurements, design, covariates, hypotheses, Some(groups))?,
        })
    }

    /// Whether element `ie` had enough valid rows to be tested.
    pub fn is_testable(&self, ie: usize) -> bool {
        self.core.elements.get(ie).is_some_and(Option::is_some)
    }
}

impl StatisticEngine for VariableHeteroscedastic {
    fn num_inputs(&self) -> usize {
        self.core.num_inputs
    }

    fn num_elements(&self) -> usize {
        self.core.elements.len()
    }

    fn num_hypotheses(&self) -> usize {
        self.core.hypotheses.len()
    }

    fn evaluate(&self, shuffle: &Shuffle, output: &mut TestOutput) -> Result<()> {
        let hypotheses = &self.core.hypotheses;
        self.core.evaluate_with(shuffle, output, |model, ih, sy| {
            let (g, sign, dof) = heteroscedastic_g(
                &model.fit,
                &hypotheses[ih],
                &model.group_labels,
                &model.group_counts,
                &model.rnn_sums,
                sy,
            );
            if !g.is_finite() {
                return Ok((0.0, 0.0));
            }
            Ok(ZConverter::new(&hypotheses[ih], dof)?.convert(g, sign))
        })
    }
}
