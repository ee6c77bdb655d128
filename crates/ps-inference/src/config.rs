//! Run configuration for a permutation analysis.

use ps_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::shuffle::ErrorModel;

/// Settings of one permutation analysis, loadable from JSON.
///
/// Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermutationConfig {
    /// Error model for shuffle generation.
    pub error_model: ErrorModel,
    /// Requested shuffles in the main pass.
    pub nshuffles: usize,
    /// Requested shuffles in the non-stationarity pre-pass.
    pub nshuffles_nonstationarity: usize,
    /// Run the non-stationarity pre-pass.
    pub nonstationarity: bool,
    /// Skew exponent of the empirical baseline.
    pub skew_nonstationarity: f64,
    /// Strong (one shared null column) vs weak (one per hypothesis) FWE control.
    pub strong_fwe: bool,
    /// Worker threads; `None` uses rayon's default.
    pub num_threads: Option<usize>,
    /// Seed for random shuffle generation; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for PermutationConfig {
    fn default() -> Self {
        Self {
            error_model: ErrorModel::Ee,
            nshuffles: 5000,
            nshuffles_nonstationarity: 5000,
            nonstationarity: false,
            skew_nonstationarity: 1.0,
            strong_fwe: true,
            num_threads: None,
            seed: None,
        }
    }
}

impl PermutationConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot produce a run.
    pub fn validate(&self) -> Result<()> {
        if self.nshuffles == 0 {
            return Err(Error::Validation("nshuffles must be positive".to_string()));
        }
        if self.nonstationarity && self.nshuffles_nonstationarity == 0 {
            return Err(Error::Validation(
                "nshuffles_nonstationarity must be positive when nonstationarity is enabled"
                    .to_string(),
            ));
        }
        if !(self.skew_nonstationarity.is_finite() && self.skew_nonstationarity > 0.0) {
            return Err(Error::Validation(format!(
                "skew_nonstationarity must be positive and finite, got {}",
                self.skew_nonstationarity
            )));
        }
        if self.num_threads == Some(0) {
            return Err(Error::Validation("num_threads must be at least 1".to_string()));
        }
        Ok(())
    }
}
