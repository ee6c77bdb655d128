//! Fisher–Snedecor F distribution utilities.

use ps_core::{Error, Result};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::normal::{Z_CLAMP, z_from_upper_tail};

/// F distribution with `(d1, d2)` degrees of freedom.
pub fn distribution(d1: f64, d2: f64) -> Result<FisherSnedecor> {
    if !(d1.is_finite() && d1 > 0.0 && d2.is_finite() && d2 > 0.0) {
        return Err(Error::Validation(format!(
            "F degrees of freedom must be finite and > 0, got ({}, {})",
            d1, d2
        )));
    }
    FisherSnedecor::new(d1, d2)
        .map_err(|e| Error::Validation(format!("invalid F distribution ({}, {}): {}", d1, d2, e)))
}

/// Convert an F statistic to the z-score with the same upper-tail probability.
pub fn f_to_z(f: f64, d1: f64, d2: f64) -> Result<f64> {
    let dist = distribution(d1, d2)?;
    Ok(f_to_z_with(&dist, f))
}

/// [`f_to_z`] against a prebuilt distribution (hot-loop variant).
pub fn f_to_z_with(dist: &FisherSnedecor, f: f64) -> f64 {
    if f.is_nan() {
        return 0.0;
    }
    if f == f64::INFINITY {
        return Z_CLAMP;
    }
    if f <= 0.0 {
        return -Z_CLAMP;
    }
    z_from_upper_tail(dist.sf(f))
}
