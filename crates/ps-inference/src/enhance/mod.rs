//! Statistical enhancement of per-element statistics.
//!
//! Every strategy transforms one statistic column at a time; the
//! [`Enhancer`] trait fans it out over hypotheses. Only positive statistics
//! are enhanced: non-positive inputs map to 0, except in [`PassThrough`].

pub mod cfe;
pub mod cluster;
pub mod graph;
pub mod nbs;
pub mod tfce;

use ps_core::{Enhancer, Result};

pub use cfe::Cfe;
pub use cluster::ClusterSize;
pub use graph::{Adjacency, ConnectivityMatrix, EdgeIndex};
pub use nbs::{ConnectomeTfce, Nbs};
pub use tfce::{Tfce, TfceParams};

/// Identity enhancement for plain per-element testing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassThrough;

impl Enhancer for PassThrough {
    fn enhance_column(&self, input: &[f64], output: &mut [f64]) -> Result<()> {
        output.copy_from_slice(input);
        Ok(())
    }
}

/// The closed set of enhancement strategies, chosen once per analysis.
#[derive(Debug, Clone)]
pub enum Enhancement {
    /// No enhancement.
    PassThrough,
    /// Supra-threshold cluster size.
    ClusterSize(ClusterSize),
    /// Threshold-free cluster enhancement.
    Tfce(Tfce),
    /// Connectivity-based fixel enhancement.
    Cfe(Cfe),
    /// Threshold-free enhancement of connectome edges.
    ConnectomeTfce(ConnectomeTfce),
    /// Network-based statistic.
    Nbs(Nbs),
}

impl Enhancement {
    /// Short label for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PassThrough => "none",
            Self::ClusterSize(_) => "cluster-size",
            Self::Tfce(_) => "tfce",
            Self::Cfe(_) => "cfe",
            Self::ConnectomeTfce(_) => "connectome-tfce",
            Self::Nbs(_) => "nbs",
        }
    }
}

impl Enhancer for Enhancement {
    fn enhance_column(&self, input: &[f64], output: &mut [f64]) -> Result<()> {
        match self {
            Self::PassThrough => PassThrough.enhance_column(input, output),
            Self::ClusterSize(e) => e.enhance_column(input, output),
            Self::Tfce(e) => e.enhance_column(input, output),
            Self::Cfe(e) => e.enhance_column(input, output),
            Self::ConnectomeTfce(e) => e.enhance_column(input, output),
            Self::Nbs(e) => e.enhance_column(input, output),
        }
    }
}

impl From<ClusterSize> for Enhancement {
    fn from(e: ClusterSize) -> Self {
        Self::ClusterSize(e)
    }
}

impl From<Tfce> for Enhancement {
    fn from(e: Tfce) -> Self {
        Self::Tfce(e)
    }
}

impl From<Cfe> for Enhancement {
    fn from(e: Cfe) -> Self {
        Self::Cfe(e)
    }
}

impl From<ConnectomeTfce> for Enhancement {
    fn from(e: ConnectomeTfce) -> Self {
        Self::ConnectomeTfce(e)
    }
}

impl From<Nbs> for Enhancement {
    fn from(e: Nbs) -> Self {
        Self::Nbs(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    #[test]
    fn test_pass_through_matrix() {
        let input = DMatrix::from_row_slice(3, 2, &[1.0, -2.0, 0.0, 3.5, -1.0, 0.0]);
        let mut out = DMatrix::zeros(3, 2);
        Enhancement::PassThrough.enhance(&input, &mut out).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_dispatch_per_column() {
        let e: Enhancement = ClusterSize::new(Adjacency::chain(3), 0.5).unwrap().into();
        assert_eq!(e.name(), "cluster-size");
        let input = DMatrix::from_column_slice(3, 2, &[1.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
        let mut out = DMatrix::zeros(3, 2);
        e.enhance(&input, &mut out).unwrap();
        assert_eq!(out, DMatrix::from_column_slice(3, 2, &[2.0, 2.0, 0.0, 1.0, 0.0, 1.0]));
    }
}
