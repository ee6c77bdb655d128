//! Supra-threshold cluster size.

use ps_core::{Enhancer, Error, Result};

use super::graph::Adjacency;
use super::tfce::check_len;

/// Replaces each supra-threshold element by the size of its cluster.
#[derive(Debug, Clone)]
pub struct ClusterSize {
    adjacency: Adjacency,
    threshold: f64,
}

impl ClusterSize {
    /// `threshold` must be finite and non-negative.
    pub fn new(adjacency: Adjacency, threshold: f64) -> Result<Self> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(Error::Validation(format!(
                "cluster-forming threshold must be finite and non-negative, got {}",
                threshold
            )));
        }
        Ok(Self { adjacency, threshold })
    }
}

impl Enhancer for ClusterSize {
    fn enhance_column(&self, input: &[f64], output: &mut [f64]) -> Result<()> {
        check_len(input, output, self.adjacency.num_elements())?;
        for (o, s) in output.iter_mut().zip(self.adjacency.cluster_sizes(input, self.threshold)) {
            *o = s as f64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_size() {
        let e = ClusterSize::new(Adjacency::chain(6), 1.0).unwrap();
        let mut out = [0.0; 6];
        e.enhance_column(&[2.0, 3.0, 1.0, 4.0, -5.0, 1.5], &mut out).unwrap();
        assert_eq!(out, [2.0, 2.0, 0.0, 1.0, 0.0, 1.0]);
        assert!(ClusterSize::new(Adjacency::chain(2), -1.0).is_err());
    }
}
