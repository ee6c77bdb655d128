//! End-to-end permutation analysis.

use nalgebra::DMatrix;
use ps_core::{Enhancer, Result, StatisticEngine};
use serde::{Deserialize, Serialize};

use crate::blocks::ExchangeabilityBlocks;
use crate::config::PermutationConfig;
use crate::fwe::fwe_pvalue;
use crate::permtest::{
    DefaultPermutation, PermutationOutput, precompute_default_permutation,
    precompute_empirical_stat, run_permutations,
};
use crate::shuffle::{ShuffleConfig, ShuffleGenerator};

/// Exchangeability restrictions; at most one of the two may be set.
#[derive(Debug, Clone, Default)]
pub struct Exchangeability {
    /// Permute only within blocks.
    pub within_blocks: Option<ExchangeabilityBlocks>,
    /// Permute / sign-flip whole blocks.
    pub whole_blocks: Option<ExchangeabilityBlocks>,
}

/// Every output of one analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    /// Observed statistic, z-statistic and enhanced statistic (E×H each).
    pub observed: DefaultPermutation,
    /// Non-stationarity baseline (E×H), when requested.
    pub empirical: Option<DMatrix<f64>>,
    /// Null distribution, contribution counts and uncorrected p-values.
    pub permutations: PermutationOutput,
    /// FWE-corrected `1 − p` (E×H).
    pub fwe_pvalues: DMatrix<f64>,
    /// Shuffles actually run in the main pass.
    pub nshuffles: usize,
    /// Wall-clock time of the whole run.
    pub wall_time_s: f64,
}

/// Run the pre-pass (optional), the default pass, the main pass and FWE mapping.
///
/// All shuffle generators are built, and therefore validated, before any
/// worker starts.
pub fn run_analysis(
    engine: &dyn StatisticEngine,
    enhancer: &dyn Enhancer,
    config: &PermutationConfig,
    blocks: &Exchangeability,
    manual_permutations: Option<Vec<Vec<usize>>>,
) -> Result<AnalysisOutput> {
    let start = std::time::Instant::now();
    config.validate()?;
    let rows = engine.num_inputs();

    let mut main = ShuffleGenerator::new(
        rows,
        ShuffleConfig {
            error_model: config.error_model,
            nshuffles: config.nshuffles,
            include_default: true,
            seed: config.seed,
            within_blocks: blocks.within_blocks.clone(),
            whole_blocks: blocks.whole_blocks.clone(),
            permutations: manual_permutations,
        },
    )?;
    let mut prepass = if config.nonstationarity {
        Some(ShuffleGenerator::new(
            rows,
            ShuffleConfig {
                error_model: config.error_model,
                nshuffles: config.nshuffles_nonstationarity,
                include_default: false,
                seed: config.seed.map(|s| s.wrapping_add(1)),
                within_blocks: blocks.within_blocks.clone(),
                whole_blocks: blocks.whole_blocks.clone(),
                permutations: None,
            },
        )?)
    } else {
        None
    };

    let empirical = match prepass.as_mut() {
        Some(generator) => Some(precompute_empirical_stat(
            engine,
            enhancer,
            generator,
            config.skew_nonstationarity,
            config.num_threads,
        )?),
        None => None,
    };

    log::info!("evaluating default permutation");
    let observed = precompute_default_permutation(engine, enhancer, empirical.as_ref())?;

    let permutations = run_permutations(
        engine,
        enhancer,
        &mut main,
        empirical.as_ref(),
        &observed.enhanced,
        config.strong_fwe,
        config.num_threads,
    )?;
    let fwe_pvalues = fwe_pvalue(&permutations.null_distribution, &observed.enhanced)?;
    let wall_time_s = start.elapsed().as_secs_f64();
    log::info!("permutation analysis finished in {:.2}s", wall_time_s);

    Ok(AnalysisOutput {
        observed,
        empirical,
        permutations,
        fwe_pvalues,
        nshuffles: main.size(),
        wall_time_s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhance::PassThrough;
    use crate::glm::{FixedHomoscedastic, Hypothesis};
    use crate::shuffle::ErrorModel;

    fn engine() -> FixedHomoscedastic {
        let design = DMatrix::from_fn(6, 2, |i, j| if (i < 3) == (j == 0) { 1.0 } else { 0.0 });
        let data = DMatrix::from_row_slice(
            6,
            3,
            &[
                9.0, 1.0, 2.0, 10.0, 2.0, 1.0, 11.0, 3.0, 3.0, //
                1.0, 1.5, 2.5, 2.0, 2.5, 1.5, 3.0, 2.0, 2.0,
            ],
        );
        let h = Hypothesis::t_test("g1>g2", &[1.0, -1.0]).unwrap();
        FixedHomoscedastic::new(&data, &design, &[h]).unwrap()
    }

    #[test]
    fn test_exhaustive_run() {
        let config = PermutationConfig { nshuffles: 720, num_threads: Some(2), ..Default::default() };
        let out = run_analysis(&engine(), &PassThrough, &config, &Exchangeability::default(), None).unwrap();
        assert_eq!(out.nshuffles, 720);
        assert_eq!(out.permutations.null_distribution.nrows(), 720);
        assert!(out.empirical.is_none());
        // The strong effect beats all but the group-preserving relabelings.
        assert!(out.fwe_pvalues[(0, 0)] > 0.9);
        assert!(out.fwe_pvalues[(0, 0)] <= 1.0);
        assert!(out.permutations.uncorrected_pvalues[(0, 0)] < 0.1);
    }

    #[test]
    fn test_nonstationarity_and_weak_fwe() {
        let config = PermutationConfig {
            nshuffles: 100,
            nonstationarity: true,
            nshuffles_nonstationarity: 50,
            strong_fwe: false,
            seed: Some(11),
            num_threads: Some(2),
            ..Default::default()
        };
        let out = run_analysis(&engine(), &PassThrough, &config, &Exchangeability::default(), None).unwrap();
        let empirical = out.empirical.unwrap();
        assert_eq!(empirical.shape(), (3, 1));
        assert!(empirical.iter().all(|v| *v > 0.0));
        assert_eq!(out.permutations.null_distribution.shape(), (100, 1));
    }

    #[test]
    fn test_configuration_errors_surface_before_running() {
        let blocks = ExchangeabilityBlocks::from_labels(&[0, 0, 1, 1, 2, 2], true).unwrap();
        let both = Exchangeability { within_blocks: Some(blocks.clone()), whole_blocks: Some(blocks) };
        let config = PermutationConfig::default();
        assert!(run_analysis(&engine(), &PassThrough, &config, &both, None).is_err());

        let ise = PermutationConfig { error_model: ErrorModel::Ise, ..Default::default() };
        let manual = vec![(0..6).collect::<Vec<usize>>()];
        assert!(
            run_analysis(&engine(), &PassThrough, &ise, &Exchangeability::default(), Some(manual)).is_err()
        );
    }
}
