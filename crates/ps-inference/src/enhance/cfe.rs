//! Connectivity-based fixel enhancement.

use ps_core::{Enhancer, Error, Result};

use super::graph::ConnectivityMatrix;
use super::tfce::{TfceParams, check_len};

/// TFCE with extent measured as summed connectivity `w(i,j)^C` to supra-threshold elements.
///
/// The normalised form divides each element's extent by its total
/// connectivity `Σ_j w(i,j)^C`; the legacy form uses the raw sum.
#[derive(Debug, Clone)]
pub struct Cfe {
    /// Per element: `(j, w^C)`.
    weights: Vec<Vec<(usize, f64)>>,
    /// Per element `1 / Σ_j w^C`, or 1 in legacy mode.
    scale: Vec<f64>,
    params: TfceParams,
}

impl Cfe {
    /// Precompute powered weights; `c` is the connectivity exponent.
    pub fn new(connectivity: &ConnectivityMatrix, params: TfceParams, c: f64, legacy: bool) -> Result<Self> {
        params.validate()?;
        if !c.is_finite() || c < 0.0 {
            return Err(Error::Validation(format!(
                "connectivity exponent must be finite and non-negative, got {}",
                c
            )));
        }
        let weights: Vec<Vec<(usize, f64)>> = (0..connectivity.num_elements())
            .map(|i| connectivity.row(i).iter().map(|&(j, w)| (j, w.powf(c))).collect())
            .collect();
        let scale = weights
            .iter()
            .map(|row| {
                let total: f64 = row.iter().map(|&(_, w)| w).sum();
                if legacy || total <= 0.0 { 1.0 } else { 1.0 / total }
            })
            .collect();
        Ok(Self { weights, scale, params })
    }
}

impl Enhancer for Cfe {
    fn enhance_column(&self, input: &[f64], output: &mut [f64]) -> Result<()> {
        check_len(input, output, self.weights.len())?;
        self.params.integrate(input, output, |height| {
            self.weights
                .iter()
                .zip(&self.scale)
                .enumerate()
                .map(|(i, (row, scale))| {
                    if input[i] <= height {
                        return 0.0;
                    }
                    let extent: f64 =
                        row.iter().filter(|&&(j, _)| input[j] > height).map(|&(_, w)| w).sum();
                    extent * scale
                })
                .collect()
        });
        Ok(())
    }
}
