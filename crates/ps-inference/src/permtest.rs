//! Parallel permutation testing.
//!
//! Workers run on a dedicated rayon pool and pull shuffles from one shared
//! generator. Each worker owns its accumulator and merges it into the shared
//! totals exactly once, after its last shuffle. Null-distribution rows are
//! addressed by shuffle index, so results do not depend on scheduling.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::DMatrix;
use ps_core::{Enhancer, Error, Result, Shuffle, StatisticEngine, TestOutput};
use serde::{Deserialize, Serialize};

use crate::shuffle::ShuffleGenerator;

/// Observed statistics for the un-shuffled data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultPermutation {
    /// Raw statistic, E×H.
    pub statistic: DMatrix<f64>,
    /// Z-transformed statistic, E×H.
    pub zstat: DMatrix<f64>,
    /// Enhanced z-statistic (divided by the empirical baseline when one is used), E×H.
    pub enhanced: DMatrix<f64>,
}

/// Accumulated results of the main permutation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermutationOutput {
    /// S×1 (strong FWE) or S×H (weak FWE) maxima of the enhanced statistic.
    pub null_distribution: DMatrix<f64>,
    /// E×H counts of how often each element supplied a null-distribution maximum.
    pub contributions: DMatrix<usize>,
    /// E×H counts of shuffles whose enhanced statistic strictly exceeded the observed one.
    pub uncorrected_counts: DMatrix<usize>,
    /// `uncorrected_counts / S`.
    pub uncorrected_pvalues: DMatrix<f64>,
}

fn build_pool(num_threads: Option<usize>) -> Result<rayon::ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = num_threads {
        if n == 0 {
            return Err(Error::Validation("num_threads must be at least 1".to_string()));
        }
        builder = builder.num_threads(n);
    }
    builder
        .thread_name(|i| format!("permstat-worker-{i}"))
        .build()
        .map_err(|e| Error::Computation(format!("failed to create thread pool: {e}")))
}

fn record_error(slot: &Mutex<Option<Error>>, abort: &AtomicBool, error: Error) {
    abort.store(true, Ordering::SeqCst);
    if let Ok(mut first) = slot.lock() {
        if first.is_none() {
            *first = Some(error);
        }
    }
}

fn worker_loop<A>(
    source: &Mutex<&mut ShuffleGenerator>,
    abort: &AtomicBool,
    rows: usize,
    init: &(impl Fn() -> A + Sync),
    step: &(impl Fn(&mut A, &Shuffle) -> Result<()> + Sync),
) -> Result<A> {
    let mut acc = init();
    let mut shuffle = Shuffle::identity(0, rows);
    while !abort.load(Ordering::Relaxed) {
        let more = source
            .lock()
            .map_err(|_| Error::Computation("shuffle generator lock poisoned".to_string()))?
            .next_into(&mut shuffle);
        if !more || shuffle.is_empty() {
            break;
        }
        step(&mut acc, &shuffle)?;
    }
    Ok(acc)
}

/// Feed every shuffle of `generator` through `step` on `num_threads` workers.
///
/// Each worker starts from `init()` and is folded into `shared` with `merge`
/// once. The first error aborts the remaining workers and is returned.
fn drive<A, M>(
    generator: &mut ShuffleGenerator,
    num_threads: Option<usize>,
    shared: &Mutex<M>,
    init: impl Fn() -> A + Sync,
    step: impl Fn(&mut A, &Shuffle) -> Result<()> + Sync,
    merge: impl Fn(&mut M, A) + Sync,
) -> Result<()>
where
    A: Send,
    M: Send,
{
    generator.reset();
    let rows = generator.rows();
    let pool = build_pool(num_threads)?;
    let workers = pool.current_num_threads().max(1);
    log::debug!("running {} shuffles on {} worker threads", generator.size(), workers);

    let source = Mutex::new(generator);
    let abort = AtomicBool::new(false);
    let first_error: Mutex<Option<Error>> = Mutex::new(None);

    pool.scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|_| match worker_loop(&source, &abort, rows, &init, &step) {
                Ok(acc) => match shared.lock() {
                    Ok(mut totals) => merge(&mut totals, acc),
                    Err(_) => record_error(
                        &first_error,
                        &abort,
                        Error::Computation("accumulator lock poisoned".to_string()),
                    ),
                },
                Err(e) => record_error(&first_error, &abort, e),
            });
        }
    });

    let first = first_error
        .into_inner()
        .map_err(|_| Error::Computation("error slot lock poisoned".to_string()))?;
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn check_enhancer_shape(engine: &dyn StatisticEngine, rows: usize) -> Result<(usize, usize)> {
    if engine.num_inputs() != rows {
        return Err(Error::Validation(format!(
            "shuffle generator covers {} rows but the test has {} inputs",
            rows,
            engine.num_inputs()
        )));
    }
    let (e, h) = (engine.num_elements(), engine.num_hypotheses());
    if e == 0 || h == 0 {
        return Err(Error::Validation(format!(
            "statistic engine reports {} elements and {} hypotheses; both must be positive",
            e, h
        )));
    }
    Ok((e, h))
}

fn divide_by_baseline(enhanced: &mut DMatrix<f64>, empirical: Option<&DMatrix<f64>>) -> Result<()> {
    if let Some(baseline) = empirical {
        if baseline.shape() != enhanced.shape() {
            return Err(Error::Validation(format!(
                "empirical baseline is {:?}, expected {:?}",
                baseline.shape(),
                enhanced.shape()
            )));
        }
        enhanced.component_div_assign(baseline);
    }
    Ok(())
}

struct EmpiricalWorker {
    output: TestOutput,
    enhanced: DMatrix<f64>,
    sums: DMatrix<f64>,
    counts: DMatrix<usize>,
}

/// Non-stationarity baseline: `(mean of enhanced^skew over positive shuffles)^(1/skew)`.
///
/// `generator` should exclude the identity. Elements that are never positive
/// get `+inf`, which drives their normalised statistic to 0.
pub fn precompute_empirical_stat(
    engine: &dyn StatisticEngine,
    enhancer: &dyn Enhancer,
    generator: &mut ShuffleGenerator,
    skew: f64,
    num_threads: Option<usize>,
) -> Result<DMatrix<f64>> {
    if !(skew.is_finite() && skew > 0.0) {
        return Err(Error::Validation(format!("skew must be positive and finite, got {}", skew)));
    }
    let (e, h) = check_enhancer_shape(engine, generator.rows())?;
    log::info!("estimating empirical enhancement baseline from {} shuffles", generator.size());

    let totals = Mutex::new((DMatrix::<f64>::zeros(e, h), DMatrix::<usize>::zeros(e, h)));
    drive(
        generator,
        num_threads,
        &totals,
        || EmpiricalWorker {
            output: TestOutput::zeros(e, h),
            enhanced: DMatrix::zeros(e, h),
            sums: DMatrix::zeros(e, h),
            counts: DMatrix::zeros(e, h),
        },
        |w, shuffle| {
            engine.evaluate(shuffle, &mut w.output)?;
            enhancer.enhance(&w.output.zstat, &mut w.enhanced)?;
            for (i, &v) in w.enhanced.iter().enumerate() {
                if v > 0.0 {
                    w.sums[i] += v.powf(skew);
                    w.counts[i] += 1;
                }
            }
            Ok(())
        },
        |(sums, counts), w| {
            *sums += &w.sums;
            *counts += &w.counts;
        },
    )?;

    let (sums, counts) = totals
        .into_inner()
        .map_err(|_| Error::Computation("accumulator lock poisoned".to_string()))?;
    Ok(sums.zip_map(&counts, |s, n| {
        if n == 0 { f64::INFINITY } else { (s / n as f64).powf(1.0 / skew) }
    }))
}

/// Evaluate and enhance the identity shuffle.
pub fn precompute_default_permutation(
    engine: &dyn StatisticEngine,
    enhancer: &dyn Enhancer,
    empirical: Option<&DMatrix<f64>>,
) -> Result<DefaultPermutation> {
    let output = engine.evaluate_new(&Shuffle::identity(0, engine.num_inputs()))?;
    let mut enhanced = DMatrix::zeros(output.zstat.nrows(), output.zstat.ncols());
    enhancer.enhance(&output.zstat, &mut enhanced)?;
    divide_by_baseline(&mut enhanced, empirical)?;
    Ok(DefaultPermutation { statistic: output.statistic, zstat: output.zstat, enhanced })
}

struct MainWorker {
    output: TestOutput,
    enhanced: DMatrix<f64>,
    null_rows: Vec<(usize, Vec<f64>)>,
    contributions: DMatrix<usize>,
    uncorrected: DMatrix<usize>,
}

struct MainTotals {
    null: DMatrix<f64>,
    contributions: DMatrix<usize>,
    uncorrected: DMatrix<usize>,
}

/// Position and value of the largest entry; NaN never wins.
fn argmax(values: impl Iterator<Item = f64>) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.enumerate() {
        if !v.is_nan() && best.is_none_or(|(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best
}

/// Run the main pass: null distribution, contribution and uncorrected counts.
///
/// `default_enhanced` is the observed enhanced statistic (E×H); `empirical`
/// is the optional non-stationarity baseline applied to every shuffle.
pub fn run_permutations(
    engine: &dyn StatisticEngine,
    enhancer: &dyn Enhancer,
    generator: &mut ShuffleGenerator,
    empirical: Option<&DMatrix<f64>>,
    default_enhanced: &DMatrix<f64>,
    strong_fwe: bool,
    num_threads: Option<usize>,
) -> Result<PermutationOutput> {
    let (e, h) = check_enhancer_shape(engine, generator.rows())?;
    if default_enhanced.shape() != (e, h) {
        return Err(Error::Validation(format!(
            "observed statistic is {:?}, expected {:?}",
            default_enhanced.shape(),
            (e, h)
        )));
    }
    if let Some(baseline) = empirical {
        if baseline.shape() != (e, h) {
            return Err(Error::Validation(format!(
                "empirical baseline is {:?}, expected {:?}",
                baseline.shape(),
                (e, h)
            )));
        }
    }
    let shuffles = generator.size();
    let null_cols = if strong_fwe { 1 } else { h };
    log::info!(
        "running {} shuffles ({} FWE control)",
        shuffles,
        if strong_fwe { "strong" } else { "weak" }
    );

    let totals = Mutex::new(MainTotals {
        null: DMatrix::zeros(shuffles, null_cols),
        contributions: DMatrix::zeros(e, h),
        uncorrected: DMatrix::zeros(e, h),
    });
    drive(
        generator,
        num_threads,
        &totals,
        || MainWorker {
            output: TestOutput::zeros(e, h),
            enhanced: DMatrix::zeros(e, h),
            null_rows: Vec::new(),
            contributions: DMatrix::zeros(e, h),
            uncorrected: DMatrix::zeros(e, h),
        },
        |w, shuffle| {
            engine.evaluate(shuffle, &mut w.output)?;
            enhancer.enhance(&w.output.zstat, &mut w.enhanced)?;
            divide_by_baseline(&mut w.enhanced, empirical)?;

            let row = if strong_fwe {
                // Column-major storage: flat index i is (i % e, i / e).
                match argmax(w.enhanced.iter().copied()) {
                    Some((i, max)) => {
                        w.contributions[(i % e, i / e)] += 1;
                        vec![max]
                    }
                    // All NaN: no element attains the maximum.
                    None => vec![0.0],
                }
            } else {
                (0..h)
                    .map(|ih| match argmax(w.enhanced.column(ih).iter().copied()) {
                        Some((ie, max)) => {
                            w.contributions[(ie, ih)] += 1;
                            max
                        }
                        None => 0.0,
                    })
                    .collect()
            };
            w.null_rows.push((shuffle.index, row));

            for (count, (&shuffled, &observed)) in
                w.uncorrected.iter_mut().zip(w.enhanced.iter().zip(default_enhanced.iter()))
            {
                if shuffled > observed {
                    *count += 1;
                }
            }
            Ok(())
        },
        |t, w| {
            for (index, row) in w.null_rows {
                for (j, v) in row.into_iter().enumerate() {
                    t.null[(index, j)] = v;
                }
            }
            t.contributions += &w.contributions;
            t.uncorrected += &w.uncorrected;
        },
    )?;

    let totals = totals
        .into_inner()
        .map_err(|_| Error::Computation("accumulator lock poisoned".to_string()))?;
    let uncorrected_pvalues = totals.uncorrected.map(|c| c as f64 / shuffles as f64);
    Ok(PermutationOutput {
        null_distribution: totals.null,
        contributions: totals.contributions,
        uncorrected_counts: totals.uncorrected,
        uncorrected_pvalues,
    })
}
