//! Student-t distribution utilities.

use ps_core::{Error, Result};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::normal::{Z_CLAMP, z_from_upper_tail};

/// Standard Student-t with `dof` degrees of freedom.
pub fn standard(dof: f64) -> Result<StudentsT> {
    if !dof.is_finite() || dof <= 0.0 {
        return Err(Error::Validation(format!("dof must be finite and > 0, got {}", dof)));
    }
    StudentsT::new(0.0, 1.0, dof)
        .map_err(|e| Error::Validation(format!("invalid Student-t (dof={}): {}", dof, e)))
}

/// Convert a t statistic to the z-score with the same tail probability.
///
/// Symmetric: `t_to_z(-t) == -t_to_z(t)`. Infinite inputs clamp to `±Z_CLAMP`.
pub fn t_to_z(t: f64, dof: f64) -> Result<f64> {
    let dist = standard(dof)?;
    Ok(t_to_z_with(&dist, t))
}

/// [`t_to_z`] against a prebuilt distribution (hot-loop variant).
pub fn t_to_z_with(dist: &StudentsT, t: f64) -> f64 {
    if t.is_nan() {
        return 0.0;
    }
    if t.is_infinite() {
        return Z_CLAMP.copysign(t);
    }
    // Work in the upper tail so large |t| keep their precision.
    let z = z_from_upper_tail(dist.sf(t.abs()));
    if t < 0.0 { -z } else { z }
}
