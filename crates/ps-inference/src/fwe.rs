//! Family-wise error corrected significance from a max-statistic null distribution.

use nalgebra::DMatrix;
use ps_core::{Error, Result};

/// Map observed enhanced statistics (E×H) to `1 − p` under FWE control.
///
/// `null` is S×1 (strong control, shared by every hypothesis) or S×H (weak
/// control, one column per hypothesis). The value for a positive observation
/// is the fraction of null values not exceeding it; non-positive observations
/// map to 0 and observations at or above the whole null map to 1.
pub fn fwe_pvalue(null: &DMatrix<f64>, observed: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let shuffles = null.nrows();
    if shuffles == 0 {
        return Err(Error::Validation("null distribution is empty".to_string()));
    }
    let shared = null.ncols() == 1;
    if !shared && null.ncols() != observed.ncols() {
        return Err(Error::Validation(format!(
            "null distribution has {} columns, expected 1 or {}",
            null.ncols(),
            observed.ncols()
        )));
    }

    let sorted: Vec<Vec<f64>> = null
        .column_iter()
        .map(|c| {
            let mut v: Vec<f64> = c.iter().copied().collect();
            v.sort_unstable_by(f64::total_cmp);
            v
        })
        .collect();

    let mut out = DMatrix::zeros(observed.nrows(), observed.ncols());
    for ih in 0..observed.ncols() {
        let column = &sorted[if shared { 0 } else { ih }];
        for ie in 0..observed.nrows() {
            let value = observed[(ie, ih)];
            if value.is_nan() || value <= 0.0 {
                continue;
            }
            let rank = column.partition_point(|&v| v <= value);
            out[(ie, ih)] = rank as f64 / shuffles as f64;
        }
    }
    Ok(out)
}
