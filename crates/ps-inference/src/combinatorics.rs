//! Overflow-safe counting of the shuffle space.
//!
//! All counts saturate at `usize::MAX` instead of wrapping: a wrapped count
//! would make an infeasible request look feasible.

/// `n!`, saturating at `usize::MAX`.
pub fn factorial(n: usize) -> usize {
    let mut result: usize = 1;
    for k in 2..=n {
        match result.checked_mul(k) {
            Some(v) => result = v,
            None => return usize::MAX,
        }
    }
    result
}

/// `2^n`, saturating at `usize::MAX`.
pub fn pow2(n: usize) -> usize {
    if n >= usize::BITS as usize { usize::MAX } else { 1usize << n }
}

/// Product of factors, saturating at `usize::MAX`.
pub fn saturating_product<I: IntoIterator<Item = usize>>(factors: I) -> usize {
    let mut result: usize = 1;
    for f in factors {
        match result.checked_mul(f) {
            Some(v) => result = v,
            None => return usize::MAX,
        }
    }
    result
}

/// Advance `v` to the next lexicographic permutation.
///
/// Returns `false` (and leaves `v` sorted ascending) once the last
/// permutation has been passed.
pub fn next_permutation<T: Ord>(v: &mut [T]) -> bool {
    if v.len() < 2 {
        return false;
    }
    let mut i = v.len() - 1;
    while i > 0 && v[i - 1] >= v[i] {
        i -= 1;
    }
    if i == 0 {
        v.reverse();
        return false;
    }
    let mut j = v.len() - 1;
    while v[j] <= v[i - 1] {
        j -= 1;
    }
    v.swap(i - 1, j);
    v[i..].reverse();
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factorial_small() {
        assert_eq!(factorial(0), 1);
        assert_eq!(factorial(1), 1);
        assert_eq!(factorial(4), 24);
        assert_eq!(factorial(6), 720);
        assert_eq!(factorial(20), 2_432_902_008_176_640_000);
    }

    #[test]
    fn test_factorial_saturates() {
        assert_eq!(factorial(21), usize::MAX);
        assert_eq!(factorial(1000), usize::MAX);
    }

    #[test]
    fn test_pow2() {
        assert_eq!(pow2(0), 1);
        assert_eq!(pow2(4), 16);
        assert_eq!(pow2(63), 1usize << 63);
        assert_eq!(pow2(64), usize::MAX);
        assert_eq!(pow2(500), usize::MAX);
    }

    #[test]
    fn test_saturating_product() {
        assert_eq!(saturating_product([2, 2, 2]), 8);
        assert_eq!(saturating_product(std::iter::empty()), 1);
        assert_eq!(saturating_product([usize::MAX, 2]), usize::MAX);
        assert_eq!(saturating_product([factorial(15), factorial(15)]), usize::MAX);
    }

    #[test]
    fn test_next_permutation_enumerates_all() {
        let mut v = vec![0, 1, 2, 3];
        let mut count = 1;
        while next_permutation(&mut v) {
            count += 1;
        }
        assert_eq!(count, 24);
        assert_eq!(v, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_next_permutation_order() {
        let mut v = vec![1, 2, 3];
        assert!(next_permutation(&mut v));
        assert_eq!(v, vec![1, 3, 2]);
        assert!(next_permutation(&mut v));
        assert_eq!(v, vec![2, 1, 3]);
    }
}
