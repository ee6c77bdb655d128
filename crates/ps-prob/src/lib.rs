//! Probability building blocks for permstat.
//!
//! The GLM engines report signed t statistics and F / G statistics; the
//! permutation pipeline enhances their normal-equivalent deviates. This
//! crate hosts those conversions:
//! - standard normal tail helpers
//! - Student-t → z
//! - Fisher F → z

pub mod fisher;
pub mod normal;
pub mod student_t;

pub use normal::Z_CLAMP;
