//! Property tests for shuffle generation, enhancement and FWE mapping.

use nalgebra::DMatrix;
use proptest::prelude::*;
use ps_core::Enhancer;
use ps_inference::enhance::{Adjacency, ClusterSize, PassThrough, Tfce, TfceParams};
use ps_inference::{ErrorModel, ExchangeabilityBlocks, ShuffleConfig, ShuffleGenerator, fwe_pvalue};

/// How block labels restrict the generator.
#[derive(Debug, Clone, Copy)]
enum BlockMode {
    Free,
    Within,
    Whole,
}

fn error_model() -> impl Strategy<Value = ErrorModel> {
    prop_oneof![Just(ErrorModel::Ee), Just(ErrorModel::Ise), Just(ErrorModel::Both)]
}

fn block_mode() -> impl Strategy<Value = BlockMode> {
    prop_oneof![Just(BlockMode::Free), Just(BlockMode::Within), Just(BlockMode::Whole)]
}

/// Whether the generator promises pairwise distinct shuffles for this request.
fn expects_unique(generator: &ShuffleGenerator, model: ErrorModel, include_default: bool) -> bool {
    if model != ErrorModel::Both {
        return true;
    }
    let excluded = usize::from(!include_default);
    let n = generator.size();
    let perms = generator.max_permutations();
    let flips = generator.max_signflips();
    (n + excluded <= perms && n + excluded <= flips) || n + excluded == perms.saturating_mul(flips)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_shuffles_are_valid_signed_permutations(
        num_blocks in 2usize..=3,
        block_size in 2usize..=3,
        mode in block_mode(),
        model in error_model(),
        include_default in any::<bool>(),
        seed in any::<u64>(),
        nshuffles in 1usize..=60,
    ) {
        let rows = num_blocks * block_size;
        // Interleaved labels so blocks are not contiguous row ranges.
        let labels: Vec<i64> = (0..rows).map(|i| (i % num_blocks) as i64).collect();
        let blocks = ExchangeabilityBlocks::from_labels(&labels, true).unwrap();
        let config = ShuffleConfig {
            error_model: model,
            nshuffles,
            include_default,
            seed: Some(seed),
            within_blocks: matches!(mode, BlockMode::Within).then(|| blocks.clone()),
            whole_blocks: matches!(mode, BlockMode::Whole).then(|| blocks.clone()),
            permutations: None,
        };
        let mut generator = ShuffleGenerator::new(rows, config).unwrap();
        prop_assert!(generator.size() <= nshuffles);
        let unique = expects_unique(&generator, model, include_default);

        let mut seen: Vec<DMatrix<f64>> = Vec::new();
        for (k, shuffle) in generator.by_ref().enumerate() {
            prop_assert_eq!(shuffle.index, k);
            let op = &shuffle.data;
            prop_assert_eq!(op.shape(), (rows, rows));
            prop_assert!(op.iter().all(|&v| v == 0.0 || v == 1.0 || v == -1.0));
            for i in 0..rows {
                prop_assert_eq!(op.row(i).iter().filter(|&&v| v != 0.0).count(), 1);
                prop_assert_eq!(op.column(i).iter().filter(|&&v| v != 0.0).count(), 1);
            }

            let sources: Vec<(usize, f64)> = shuffle.sources().into_iter().map(Option::unwrap).collect();
            if !model.permutes() {
                prop_assert!(sources.iter().enumerate().all(|(i, &(src, _))| src == i));
            }
            match mode {
                BlockMode::Free => {}
                BlockMode::Within => {
                    for (i, &(src, _)) in sources.iter().enumerate() {
                        prop_assert_eq!(blocks.block_of(i), blocks.block_of(src));
                    }
                }
                BlockMode::Whole => {
                    for members in blocks.indices() {
                        let first = sources[members[0]];
                        for &row in members {
                            prop_assert_eq!(sources[row].1, first.1);
                            prop_assert_eq!(blocks.block_of(sources[row].0), blocks.block_of(first.0));
                        }
                    }
                }
            }

            if unique {
                prop_assert!(!seen.contains(op), "shuffle {} repeats an earlier operator", k);
            }
            seen.push(shuffle.data);
        }
        prop_assert_eq!(seen.len(), generator.size());
    }

    #[test]
    fn prop_pass_through_is_identity(values in proptest::collection::vec(-1e6f64..1e6, 0..64)) {
        let mut out = vec![f64::NAN; values.len()];
        PassThrough.enhance_column(&values, &mut out).unwrap();
        prop_assert_eq!(&out, &values);
    }

    #[test]
    fn prop_pass_through_non_positive_columns(n in 1usize..32, negative in any::<bool>()) {
        let values: Vec<f64> = (0..n).map(|i| if negative { -(i as f64) - 0.5 } else { 0.0 }).collect();
        let input = DMatrix::from_column_slice(n, 1, &values);
        let mut out = DMatrix::zeros(n, 1);
        PassThrough.enhance(&input, &mut out).unwrap();
        prop_assert_eq!(out, input);
    }

    #[test]
    fn prop_fwe_monotone_in_observed(
        null in proptest::collection::vec(0.0f64..10.0, 1..100),
        a in -5.0f64..15.0,
        b in -5.0f64..15.0,
    ) {
        let null = DMatrix::from_column_slice(null.len(), 1, &null);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let observed = DMatrix::from_column_slice(2, 1, &[lo, hi]);
        let p = fwe_pvalue(&null, &observed).unwrap();
        prop_assert!(p[(0, 0)] <= p[(1, 0)]);
        if lo <= 0.0 {
            prop_assert_eq!(p[(0, 0)], 0.0);
        }
        prop_assert!((0.0..=1.0).contains(&p[(1, 0)]));
    }

    #[test]
    fn prop_enhancers_ignore_non_positive(values in proptest::collection::vec(-10.0f64..0.0, 1..40)) {
        let n = values.len();
        let mut out = vec![1.0; n];
        Tfce::new(Adjacency::chain(n), TfceParams::default()).unwrap().enhance_column(&values, &mut out).unwrap();
        prop_assert!(out.iter().all(|v| *v == 0.0));
        ClusterSize::new(Adjacency::chain(n), 0.0).unwrap().enhance_column(&values, &mut out).unwrap();
        prop_assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn prop_tfce_monotone_in_height(base in 0.1f64..5.0, bump in 0.0f64..5.0) {
        let tfce = Tfce::new(Adjacency::chain(3), TfceParams::default()).unwrap();
        let mut low = [0.0; 3];
        let mut high = [0.0; 3];
        tfce.enhance_column(&[base, base, 0.0], &mut low).unwrap();
        tfce.enhance_column(&[base + bump, base, 0.0], &mut high).unwrap();
        prop_assert!(high[0] >= low[0]);
    }
}
