//! Shuffle generation: permutations and/or sign-flips of the observation rows.
//!
//! The generator decides up front, from the requested count and the size of
//! the admissible shuffle space, whether to enumerate exhaustively or sample
//! at random, and stores every shuffle in compact form (a relabeling and/or
//! a per-row sign vector). Operator matrices are only materialized one at a
//! time by [`ShuffleGenerator::next_into`].
//!
//! Notes:
//! - Random generation is deterministic for a fixed `seed`; without a seed
//!   the RNG is seeded from OS entropy.
//! - In the combined (`Both`) space with a request above one sub-space's
//!   size, that sub-space is sampled with duplicates allowed: distinctness
//!   comes from the pairing with the other sub-space.

use std::collections::HashSet;

use nalgebra::DMatrix;
use ps_core::{Error, Result, Shuffle};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::blocks::ExchangeabilityBlocks;
use crate::combinatorics::{factorial, next_permutation, pow2, saturating_product};

/// Assumed error structure under the null hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorModel {
    /// Exchangeable errors: permutations only.
    #[default]
    Ee,
    /// Independent symmetric errors: sign-flips only.
    Ise,
    /// Both: one permutation composed with one sign-flip per shuffle.
    Both,
}

impl ErrorModel {
    /// Whether rows are permuted.
    pub fn permutes(self) -> bool {
        matches!(self, Self::Ee | Self::Both)
    }

    /// Whether rows are sign-flipped.
    pub fn flips_signs(self) -> bool {
        matches!(self, Self::Ise | Self::Both)
    }
}

impl std::str::FromStr for ErrorModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ee" => Ok(Self::Ee),
            "ise" => Ok(Self::Ise),
            "both" => Ok(Self::Both),
            other => Err(Error::Validation(format!(
                "unknown error model '{}' (expected ee, ise or both)",
                other
            ))),
        }
    }
}

/// Inputs to [`ShuffleGenerator::new`].
#[derive(Debug, Clone)]
pub struct ShuffleConfig {
    /// Error model.
    pub error_model: ErrorModel,
    /// Requested number of shuffles (clamped to what is available).
    pub nshuffles: usize,
    /// Force the identity to be shuffle 0; when false it is never generated on purpose.
    pub include_default: bool,
    /// RNG seed for random generation.
    pub seed: Option<u64>,
    /// Permute only within these blocks.
    pub within_blocks: Option<ExchangeabilityBlocks>,
    /// Permute / sign-flip these (equal-sized) blocks as units.
    pub whole_blocks: Option<ExchangeabilityBlocks>,
    /// Explicit 0-based relabelings overriding permutation generation.
    pub permutations: Option<Vec<Vec<usize>>>,
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        Self {
            error_model: ErrorModel::Ee,
            nshuffles: 5000,
            include_default: true,
            seed: None,
            within_blocks: None,
            whole_blocks: None,
            permutations: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Restriction<'a> {
    None,
    Within(&'a ExchangeabilityBlocks),
    Whole(&'a ExchangeabilityBlocks),
}

/// Finite, resettable sequence of shuffles.
#[derive(Debug, Clone)]
pub struct ShuffleGenerator {
    rows: usize,
    nshuffles: usize,
    counter: usize,
    max_permutations: usize,
    max_signflips: usize,
    permutations: Vec<Vec<usize>>,
    signflips: Vec<Vec<bool>>,
}

impl ShuffleGenerator {
    /// Validate `config` against `rows` observations and generate the shuffle set.
    pub fn new(rows: usize, config: ShuffleConfig) -> Result<Self> {
        let ShuffleConfig {
            error_model,
            nshuffles,
            include_default,
            seed,
            within_blocks,
            whole_blocks,
            permutations: manual,
        } = config;

        if rows == 0 {
            return Err(Error::Validation("cannot shuffle zero observations".to_string()));
        }
        if nshuffles == 0 {
            return Err(Error::Validation("number of shuffles must be > 0".to_string()));
        }
        let restriction = match (&within_blocks, &whole_blocks) {
            (Some(_), Some(_)) => {
                return Err(Error::Validation(
                    "within-block and whole-block exchangeability are mutually exclusive"
                        .to_string(),
                ));
            }
            (Some(b), None) => {
                b.check_rows(rows)?;
                Restriction::Within(b)
            }
            (None, Some(b)) => {
                b.check_rows(rows)?;
                if b.uniform_size().is_none() {
                    return Err(Error::Validation(
                        "whole-block exchangeability requires equal block sizes".to_string(),
                    ));
                }
                Restriction::Whole(b)
            }
            (None, None) => Restriction::None,
        };
        if let Some(m) = &manual {
            if !error_model.permutes() {
                return Err(Error::Validation(
                    "manual permutations require an error model that includes exchangeable errors (ee or both)"
                        .to_string(),
                ));
            }
            validate_manual_permutations(m, rows, include_default)?;
        }

        let max_permutations = if !error_model.permutes() {
            1
        } else if let Some(m) = &manual {
            m.len()
        } else {
            match restriction {
                Restriction::None => factorial(rows),
                Restriction::Within(b) => saturating_product(b.indices().iter().map(|r| factorial(r.len()))),
                Restriction::Whole(b) => factorial(b.num_blocks()),
            }
        };
        let max_signflips = if !error_model.flips_signs() {
            1
        } else {
            match restriction {
                Restriction::Whole(b) => pow2(b.num_blocks()),
                _ => pow2(rows),
            }
        };
        let max_shuffles = saturating_product([max_permutations, max_signflips]);

        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };

        let (nshuffles, permutations, signflips) = if let Some(manual) = manual {
            if nshuffles != manual.len() {
                log::info!(
                    "using {} manually supplied permutations (requested {})",
                    manual.len(),
                    nshuffles
                );
            }
            let n = manual.len();
            let signflips = if error_model.flips_signs() {
                let permit_duplicates = n > available(max_signflips, include_default);
                random_signflips(&mut rng, rows, restriction, n, include_default, permit_duplicates)
            } else {
                Vec::new()
            };
            (n, manual, signflips)
        } else {
            let available_shuffles = available(max_shuffles, include_default);
            if available_shuffles == 0 {
                return Err(Error::Validation(format!(
                    "no non-default shuffles exist for {} observations under the {:?} error model",
                    rows, error_model
                )));
            }
            let nshuffles = if nshuffles > available_shuffles {
                log::warn!(
                    "requested {} shuffles but only {} are available; using {} (minimum achievable p-value {:.3e})",
                    nshuffles,
                    available_shuffles,
                    available_shuffles,
                    1.0 / max_shuffles as f64
                );
                available_shuffles
            } else {
                nshuffles
            };

            let (permutations, signflips) = if error_model == ErrorModel::Both
                && nshuffles == available_shuffles
            {
                cross_product(rows, restriction, max_signflips, include_default)
            } else {
                let permutations = if error_model.permutes() {
                    generate_permutations(&mut rng, rows, restriction, nshuffles, max_permutations, include_default)
                } else {
                    Vec::new()
                };
                let signflips = if error_model.flips_signs() {
                    generate_signflips(&mut rng, rows, restriction, nshuffles, max_signflips, include_default)
                } else {
                    Vec::new()
                };
                (permutations, signflips)
            };
            (nshuffles, permutations, signflips)
        };

        debug_assert!(permutations.is_empty() || permutations.len() == nshuffles);
        debug_assert!(signflips.is_empty() || signflips.len() == nshuffles);
        log::debug!(
            "shuffle generator: {} shuffles over {} rows (max permutations {}, max sign-flips {})",
            nshuffles,
            rows,
            max_permutations,
            max_signflips
        );

        Ok(Self { rows, nshuffles, counter: 0, max_permutations, max_signflips, permutations, signflips })
    }

    /// Number of shuffles this generator yields.
    pub fn size(&self) -> usize {
        self.nshuffles
    }

    /// Number of observation rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Size of the admissible permutation space (saturating).
    pub fn max_permutations(&self) -> usize {
        self.max_permutations
    }

    /// Size of the admissible sign-flip space (saturating).
    pub fn max_signflips(&self) -> usize {
        self.max_signflips
    }

    /// Whether another shuffle remains.
    pub fn has_next(&self) -> bool {
        self.counter < self.nshuffles
    }

    /// Rewind to shuffle 0.
    pub fn reset(&mut self) {
        self.counter = 0;
    }

    /// Compact form of shuffle `k`: relabeling and sign vector, where present.
    pub fn parts(&self, k: usize) -> (Option<&[usize]>, Option<&[bool]>) {
        (
            self.permutations.get(k).map(Vec::as_slice),
            self.signflips.get(k).map(Vec::as_slice),
        )
    }

    /// Materialize the next shuffle into `out`, reusing its allocation.
    ///
    /// Returns `false` once exhausted, leaving `out` as the empty marker.
    pub fn next_into(&mut self, out: &mut Shuffle) -> bool {
        out.index = self.counter;
        if self.counter >= self.nshuffles {
            out.data = DMatrix::zeros(0, 0);
            return false;
        }
        if out.data.shape() != (self.rows, self.rows) {
            out.data = DMatrix::zeros(self.rows, self.rows);
        } else {
            out.data.fill(0.0);
        }
        let (perm, flips) = self.parts(self.counter);
        for i in 0..self.rows {
            let col = perm.map_or(i, |p| p[i]);
            let sign = if flips.is_some_and(|f| f[i]) { -1.0 } else { 1.0 };
            out.data[(i, col)] = sign;
        }
        self.counter += 1;
        true
    }
}

impl Iterator for ShuffleGenerator {
    type Item = Shuffle;

    fn next(&mut self) -> Option<Shuffle> {
        let mut out = Shuffle { index: 0, data: DMatrix::zeros(0, 0) };
        self.next_into(&mut out).then_some(out)
    }
}

fn available(max: usize, include_default: bool) -> usize {
    if include_default { max } else { max.saturating_sub(1) }
}

fn is_identity(p: &[usize]) -> bool {
    p.iter().enumerate().all(|(i, &v)| i == v)
}

fn validate_manual_permutations(perms: &[Vec<usize>], rows: usize, include_default: bool) -> Result<()> {
    if perms.is_empty() {
        return Err(Error::Validation("manual permutation set is empty".to_string()));
    }
    let mut seen = vec![false; rows];
    for (k, p) in perms.iter().enumerate() {
        if p.len() != rows {
            return Err(Error::Validation(format!(
                "manual permutation {} has {} entries, expected {}",
                k,
                p.len(),
                rows
            )));
        }
        seen.fill(false);
        for &v in p {
            if v >= rows || seen[v] {
                return Err(Error::Validation(format!(
                    "manual permutation {} is not a relabeling of 0..{} (offending index {})",
                    k, rows, v
                )));
            }
            seen[v] = true;
        }
    }
    if include_default && !is_identity(&perms[0]) {
        return Err(Error::Validation(
            "first manual permutation must be the default (identity) relabeling".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Permutations
// ---------------------------------------------------------------------------

fn generate_permutations(
    rng: &mut StdRng,
    rows: usize,
    restriction: Restriction<'_>,
    nshuffles: usize,
    max_permutations: usize,
    include_default: bool,
) -> Vec<Vec<usize>> {
    if nshuffles == available(max_permutations, include_default) {
        let mut all = all_permutations(rows, restriction);
        if !include_default {
            all.remove(0);
        }
        all
    } else {
        let permit_duplicates = nshuffles > available(max_permutations, include_default);
        random_permutations(rng, rows, restriction, nshuffles, include_default, permit_duplicates)
    }
}

fn random_permutation(rng: &mut StdRng, rows: usize, restriction: Restriction<'_>) -> Vec<usize> {
    let mut labels: Vec<usize> = (0..rows).collect();
    match restriction {
        Restriction::None => labels.shuffle(rng),
        Restriction::Within(blocks) => {
            for block in blocks.indices() {
                let mut shuffled = block.clone();
                shuffled.shuffle(rng);
                for (&row, &src) in block.iter().zip(&shuffled) {
                    labels[row] = src;
                }
            }
        }
        Restriction::Whole(blocks) => {
            let mut order: Vec<usize> = (0..blocks.num_blocks()).collect();
            order.shuffle(rng);
            write_block_relabeling(blocks, &order, &mut labels);
        }
    }
    labels
}

fn write_block_relabeling(blocks: &ExchangeabilityBlocks, order: &[usize], labels: &mut [usize]) {
    let idx = blocks.indices();
    for (b, &src_block) in order.iter().enumerate() {
        for (&row, &src) in idx[b].iter().zip(&idx[src_block]) {
            labels[row] = src;
        }
    }
}

fn random_permutations(
    rng: &mut StdRng,
    rows: usize,
    restriction: Restriction<'_>,
    count: usize,
    include_default: bool,
    permit_duplicates: bool,
) -> Vec<Vec<usize>> {
    let mut out = Vec::with_capacity(count);
    let mut seen: HashSet<Vec<usize>> = HashSet::new();
    let identity: Vec<usize> = (0..rows).collect();
    if include_default {
        out.push(identity.clone());
    }
    if !permit_duplicates {
        seen.insert(identity);
    }
    while out.len() < count {
        let candidate = random_permutation(rng, rows, restriction);
        if permit_duplicates || seen.insert(candidate.clone()) {
            out.push(candidate);
        }
    }
    out
}

/// Every admissible relabeling, identity first.
fn all_permutations(rows: usize, restriction: Restriction<'_>) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    match restriction {
        Restriction::None => {
            let mut labels: Vec<usize> = (0..rows).collect();
            loop {
                out.push(labels.clone());
                if !next_permutation(&mut labels) {
                    break;
                }
            }
        }
        Restriction::Within(blocks) => {
            // Odometer over per-block lexicographic orders.
            let mut state: Vec<Vec<usize>> = blocks.indices().to_vec();
            loop {
                let mut labels = vec![0usize; rows];
                for (block, current) in blocks.indices().iter().zip(&state) {
                    for (&row, &src) in block.iter().zip(current) {
                        labels[row] = src;
                    }
                }
                out.push(labels);
                let advanced = state.iter_mut().any(|s| next_permutation(s));
                if !advanced {
                    break;
                }
            }
        }
        Restriction::Whole(blocks) => {
            let mut order: Vec<usize> = (0..blocks.num_blocks()).collect();
            loop {
                let mut labels = vec![0usize; rows];
                write_block_relabeling(blocks, &order, &mut labels);
                out.push(labels);
                if !next_permutation(&mut order) {
                    break;
                }
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Sign-flips
// ---------------------------------------------------------------------------

fn generate_signflips(
    rng: &mut StdRng,
    rows: usize,
    restriction: Restriction<'_>,
    nshuffles: usize,
    max_signflips: usize,
    include_default: bool,
) -> Vec<Vec<bool>> {
    if nshuffles == available(max_signflips, include_default) {
        let mut all = all_signflips(rows, restriction, max_signflips);
        if !include_default {
            all.remove(0);
        }
        all
    } else {
        let permit_duplicates = nshuffles > available(max_signflips, include_default);
        random_signflips(rng, rows, restriction, nshuffles, include_default, permit_duplicates)
    }
}

fn expand_unit_flips(units: &[bool], rows: usize, restriction: Restriction<'_>) -> Vec<bool> {
    match restriction {
        Restriction::Whole(blocks) => (0..rows).map(|r| units[blocks.block_of(r)]).collect(),
        _ => units.to_vec(),
    }
}

fn flip_units(rows: usize, restriction: Restriction<'_>) -> usize {
    match restriction {
        Restriction::Whole(blocks) => blocks.num_blocks(),
        _ => rows,
    }
}

fn random_signflips(
    rng: &mut StdRng,
    rows: usize,
    restriction: Restriction<'_>,
    count: usize,
    include_default: bool,
    permit_duplicates: bool,
) -> Vec<Vec<bool>> {
    let units = flip_units(rows, restriction);
    let mut out = Vec::with_capacity(count);
    let mut seen: HashSet<Vec<bool>> = HashSet::new();
    let default = vec![false; rows];
    if include_default {
        out.push(default.clone());
    }
    if !permit_duplicates {
        seen.insert(default);
    }
    let mut unit_flips = vec![false; units];
    while out.len() < count {
        for u in unit_flips.iter_mut() {
            *u = rng.random::<bool>();
        }
        let candidate = expand_unit_flips(&unit_flips, rows, restriction);
        if permit_duplicates || seen.insert(candidate.clone()) {
            out.push(candidate);
        }
    }
    out
}

/// Every sign pattern in binary-counter order, all-positive first.
fn all_signflips(rows: usize, restriction: Restriction<'_>, max_signflips: usize) -> Vec<Vec<bool>> {
    let units = flip_units(rows, restriction);
    let mut unit_flips = vec![false; units];
    (0..max_signflips)
        .map(|c| {
            for (j, u) in unit_flips.iter_mut().enumerate() {
                *u = j < usize::BITS as usize && (c >> j) & 1 == 1;
            }
            expand_unit_flips(&unit_flips, rows, restriction)
        })
        .collect()
}

/// Full permutation × sign-flip product, pair (identity, all-positive) first.
fn cross_product(
    rows: usize,
    restriction: Restriction<'_>,
    max_signflips: usize,
    include_default: bool,
) -> (Vec<Vec<usize>>, Vec<Vec<bool>>) {
    let perms = all_permutations(rows, restriction);
    let flips = all_signflips(rows, restriction, max_signflips);
    let total = perms.len() * flips.len();
    let mut permutations = Vec::with_capacity(total);
    let mut signflips = Vec::with_capacity(total);
    for p in &perms {
        for f in &flips {
            permutations.push(p.clone());
            signflips.push(f.clone());
        }
    }
    if !include_default {
        permutations.remove(0);
        signflips.remove(0);
    }
    (permutations, signflips)
}
