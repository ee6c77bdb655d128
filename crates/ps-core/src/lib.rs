//! # ps-core
//!
//! Shared building blocks for permstat: the error type, the shuffle and
//! statistic containers exchanged between crates, and the two traits the
//! permutation pipeline is written against (`StatisticEngine`, `Enhancer`).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{Enhancer, StatisticEngine};
pub use types::{Shuffle, TestOutput};
