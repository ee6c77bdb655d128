//! Threshold-free cluster enhancement over an element adjacency.

use ps_core::{Enhancer, Error, Result};
use serde::{Deserialize, Serialize};

use super::graph::Adjacency;

/// Height-integration settings shared by the threshold-free enhancers.
///
/// Each step `h = k·dh` below the column maximum adds `extent^e · h^h · dh`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TfceParams {
    /// Height step.
    pub dh: f64,
    /// Extent exponent.
    pub e: f64,
    /// Height exponent.
    pub h: f64,
}

impl Default for TfceParams {
    fn default() -> Self {
        Self { dh: 0.1, e: 0.5, h: 2.0 }
    }
}

impl TfceParams {
    /// Defaults for connectivity-based fixel enhancement.
    pub fn fixel() -> Self {
        Self { dh: 0.1, e: 2.0, h: 3.0 }
    }

    /// Defaults for connectome edge enhancement.
    pub fn connectome() -> Self {
        Self { dh: 0.1, e: 0.4, h: 3.0 }
    }

    /// Reject non-positive step sizes and non-finite exponents.
    pub fn validate(&self) -> Result<()> {
        if !(self.dh.is_finite() && self.dh > 0.0) {
            return Err(Error::Validation(format!("dh must be positive and finite, got {}", self.dh)));
        }
        if !self.e.is_finite() || !self.h.is_finite() || self.e < 0.0 || self.h < 0.0 {
            return Err(Error::Validation(format!(
                "extent / height exponents must be finite and non-negative, got E={} H={}",
                self.e, self.h
            )));
        }
        Ok(())
    }

    /// Integrate over heights; `extents(h)` yields one extent per element (0 = not clustered).
    pub(crate) fn integrate<F>(&self, input: &[f64], output: &mut [f64], mut extents: F)
    where
        F: FnMut(f64) -> Vec<f64>,
    {
        output.fill(0.0);
        let max = input.iter().copied().filter(|v| v.is_finite()).fold(0.0f64, f64::max);
        let mut k = 1usize;
        loop {
            let height = k as f64 * self.dh;
            if height >= max {
                break;
            }
            let weight = height.powf(self.h) * self.dh;
            for (o, extent) in output.iter_mut().zip(extents(height)) {
                if extent > 0.0 {
                    *o += extent.powf(self.e) * weight;
                }
            }
            k += 1;
        }
    }
}

pub(crate) fn check_len(input: &[f64], output: &[f64], expected: usize) -> Result<()> {
    if input.len() != expected || output.len() != expected {
        return Err(Error::Computation(format!(
            "enhancer expects {} elements, got input {} / output {}",
            expected,
            input.len(),
            output.len()
        )));
    }
    Ok(())
}

/// TFCE with cluster extent measured in adjacent elements.
#[derive(Debug, Clone)]
pub struct Tfce {
    adjacency: Adjacency,
    params: TfceParams,
}

impl Tfce {
    /// Build after validating `params`.
    pub fn new(adjacency: Adjacency, params: TfceParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { adjacency, params })
    }
}

impl Enhancer for Tfce {
    fn enhance_column(&self, input: &[f64], output: &mut [f64]) -> Result<()> {
        check_len(input, output, self.adjacency.num_elements())?;
        self.params.integrate(input, output, |height| {
            self.adjacency.cluster_sizes(input, height).into_iter().map(|s| s as f64).collect()
        });
        Ok(())
    }
}
