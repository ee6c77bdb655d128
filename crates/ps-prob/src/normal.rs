//! Standard normal utilities.

use statrs::function::erf::{erfc, erfc_inv};

/// Largest magnitude a converted z-score may take.
///
/// `Φ⁻¹(f64::MIN_POSITIVE)` is about −37.5; anything beyond that is not
/// representable as a tail probability anyway.
pub const Z_CLAMP: f64 = 37.5;

/// Standard normal CDF `Φ(x)`.
#[inline]
pub fn cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Standard normal survival function `1 − Φ(x)`, accurate in the upper tail.
#[inline]
pub fn sf(x: f64) -> f64 {
    0.5 * erfc(x / std::f64::consts::SQRT_2)
}

/// The z-score whose upper-tail probability is `p`, i.e. `Φ⁻¹(1 − p)`.
///
/// Clamped to `±Z_CLAMP`; `p <= 0` maps to `+Z_CLAMP`, `p >= 1` to `−Z_CLAMP`.
pub fn z_from_upper_tail(p: f64) -> f64 {
    if p.is_nan() {
        return 0.0;
    }
    if p <= 0.0 {
        return Z_CLAMP;
    }
    if p >= 1.0 {
        return -Z_CLAMP;
    }
    (std::f64::consts::SQRT_2 * erfc_inv(2.0 * p)).clamp(-Z_CLAMP, Z_CLAMP)
}
