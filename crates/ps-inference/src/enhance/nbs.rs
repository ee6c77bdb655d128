//! Connectome edge enhancement: network-based statistic and edge TFCE.

use ps_core::{Enhancer, Error, Result};

use super::graph::EdgeIndex;
use super::tfce::{TfceParams, check_len};

/// Network-based statistic: supra-threshold edges take their component's edge count.
#[derive(Debug, Clone)]
pub struct Nbs {
    edges: EdgeIndex,
    threshold: f64,
}

impl Nbs {
    /// `threshold` must be finite and non-negative.
    pub fn new(edges: EdgeIndex, threshold: f64) -> Result<Self> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(Error::Validation(format!(
                "NBS threshold must be finite and non-negative, got {}",
                threshold
            )));
        }
        Ok(Self { edges, threshold })
    }
}

impl Enhancer for Nbs {
    fn enhance_column(&self, input: &[f64], output: &mut [f64]) -> Result<()> {
        check_len(input, output, self.edges.num_edges())?;
        for (o, s) in output.iter_mut().zip(self.edges.component_sizes(input, self.threshold)) {
            *o = s as f64;
        }
        Ok(())
    }
}

/// TFCE over the connectome, with extent measured in component edges.
#[derive(Debug, Clone)]
pub struct ConnectomeTfce {
    edges: EdgeIndex,
    params: TfceParams,
}

impl ConnectomeTfce {
    /// Build after validating `params`.
    pub fn new(edges: EdgeIndex, params: TfceParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { edges, params })
    }
}

impl Enhancer for ConnectomeTfce {
    fn enhance_column(&self, input: &[f64], output: &mut [f64]) -> Result<()> {
        check_len(input, output, self.edges.num_edges())?;
        self.params.integrate(input, output, |height| {
            self.edges.component_sizes(input, height).into_iter().map(|s| s as f64).collect()
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_nbs_component_sizes() {
        let idx = EdgeIndex::new(3);
        // Edges: (0,0) (0,1) (0,2) (1,1) (1,2) (2,2)
        let nbs = Nbs::new(idx, 2.0).unwrap();
        let mut out = [0.0; 6];
        nbs.enhance_column(&[0.0, 3.0, 0.0, 0.0, 2.5, 1.0], &mut out).unwrap();
        assert_eq!(out, [0.0, 2.0, 0.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_connectome_tfce_single_edge() {
        let e = ConnectomeTfce::new(EdgeIndex::new(2), TfceParams { dh: 1.0, e: 1.0, h: 1.0 }).unwrap();
        let mut out = [0.0; 3];
        e.enhance_column(&[0.0, 2.5, 0.0], &mut out).unwrap();
        // Heights 1 and 2, extent 1 each.
        assert_relative_eq!(out[1], 3.0, epsilon = 1e-12);
        assert_eq!(out[0], 0.0);
        assert!(e.enhance_column(&[0.0; 4], &mut [0.0; 4]).is_err());
    }
}
