//! # ps-inference
//!
//! Non-parametric inference for mass-univariate general linear models.
//!
//! This crate provides:
//! - Exchangeability blocks and overflow-safe shuffle-space counting
//! - Permutation / sign-flip shuffle generation (exhaustive or random)
//! - GLM engines (fixed or per-element design, pooled or grouped variance)
//! - Statistical enhancement (TFCE, CFE, NBS, cluster size, pass-through)
//! - A parallel permutation pipeline and FWE-corrected p-values
//!
//! ## Architecture
//!
//! The pipeline in [`permtest`] only sees the `StatisticEngine` and
//! `Enhancer` traits from ps-core, so engines and enhancers are swapped
//! without touching the parallel code.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// End-to-end analysis driver.
pub mod analysis;
/// Exchangeability blocks.
pub mod blocks;
/// Saturating factorials, powers of two and lexicographic permutation stepping.
pub mod combinatorics;
/// JSON-loadable run configuration.
pub mod config;
/// Enhancement strategies and their neighbourhood structures.
pub mod enhance;
/// FWE-corrected p-values from the null distribution.
pub mod fwe;
/// GLM hypotheses and statistic engines.
pub mod glm;
/// Plain-text loaders and the mapped data importer.
pub mod io;
/// Parallel permutation passes.
pub mod permtest;
/// Shuffle generation.
pub mod shuffle;

pub use analysis::{AnalysisOutput, Exchangeability, run_analysis};
pub use blocks::ExchangeabilityBlocks;
pub use config::PermutationConfig;
pub use enhance::{Enhancement, PassThrough};
pub use fwe::fwe_pvalue;
pub use glm::{
    FixedHeteroscedastic, FixedHomoscedastic, Hypothesis, VariableHeteroscedastic,
    VariableHomoscedastic, VarianceGroups,
};
pub use io::{
    MappedImporter, load_exchangeability_blocks, load_permutations, load_variance_groups,
    read_matrix,
};
pub use permtest::{
    DefaultPermutation, PermutationOutput, precompute_default_permutation,
    precompute_empirical_stat, run_permutations,
};
pub use shuffle::{ErrorModel, ShuffleConfig, ShuffleGenerator};
