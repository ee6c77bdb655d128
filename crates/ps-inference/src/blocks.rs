//! Exchangeability blocks: which observations may be shuffled together.

use ps_core::{Error, Result};

/// A validated partition of observation rows into exchangeability blocks.
///
/// Block ids are 0-based and contiguous; every block has at least two rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeabilityBlocks {
    labels: Vec<usize>,
    blocks: Vec<Vec<usize>>,
}

impl ExchangeabilityBlocks {
    /// Build blocks from one integer label per row (0- or 1-based).
    ///
    /// With `equal_sizes` (whole-block exchange) every block must have the
    /// same number of rows.
    pub fn from_labels(labels: &[i64], equal_sizes: bool) -> Result<Self> {
        if labels.is_empty() {
            return Err(Error::Validation("exchangeability block labels are empty".to_string()));
        }
        let min = labels.iter().copied().min().unwrap_or(0);
        let offset = match min {
            0 => 0,
            1 => 1,
            _ => {
                return Err(Error::Validation(format!(
                    "exchangeability block labels must start at 0 or 1, found minimum {}",
                    min
                )));
            }
        };
        let max = labels.iter().copied().max().unwrap_or(offset);
        if max - offset >= labels.len() as i64 {
            return Err(Error::Validation(format!(
                "exchangeability block label {} is out of range for {} rows (labels must be contiguous)",
                max,
                labels.len()
            )));
        }
        let normalized: Vec<usize> = labels.iter().map(|&l| (l - offset) as usize).collect();
        let num_blocks = normalized.iter().copied().max().map_or(0, |m| m + 1);

        let mut blocks: Vec<Vec<usize>> = vec![Vec::new(); num_blocks];
        for (row, &b) in normalized.iter().enumerate() {
            blocks[b].push(row);
        }
        for (b, rows) in blocks.iter().enumerate() {
            match rows.len() {
                0 => {
                    return Err(Error::Validation(format!(
                        "exchangeability block {} is empty (labels must be contiguous)",
                        b + offset as usize
                    )));
                }
                1 => {
                    return Err(Error::Validation(format!(
                        "exchangeability block {} contains only one observation (row {})",
                        b + offset as usize,
                        rows[0]
                    )));
                }
                _ => {}
            }
        }
        if equal_sizes {
            let first = blocks[0].len();
            if let Some((b, rows)) = blocks.iter().enumerate().find(|(_, r)| r.len() != first) {
                return Err(Error::Validation(format!(
                    "whole-block exchange requires equal block sizes: block {} has {} rows, block {} has {}",
                    offset,
                    first,
                    b + offset as usize,
                    rows.len()
                )));
            }
        }

        Ok(Self { labels: normalized, blocks })
    }

    /// Number of observation rows covered.
    pub fn num_rows(&self) -> usize {
        self.labels.len()
    }

    /// Number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// 0-based block id per row.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Block id of `row`.
    pub fn block_of(&self, row: usize) -> usize {
        self.labels[row]
    }

    /// Row indices of every block, ascending within each block.
    pub fn indices(&self) -> &[Vec<usize>] {
        &self.blocks
    }

    /// Common block size, if all blocks have the same cardinality.
    pub fn uniform_size(&self) -> Option<usize> {
        let first = self.blocks.first()?.len();
        self.blocks.iter().all(|b| b.len() == first).then_some(first)
    }

    /// Check that the blocks cover exactly `rows` observations.
    pub fn check_rows(&self, rows: usize) -> Result<()> {
        if self.labels.len() != rows {
            return Err(Error::Validation(format!(
                "exchangeability blocks cover {} rows but the design has {}",
                self.labels.len(),
                rows
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_based() {
        let b = ExchangeabilityBlocks::from_labels(&[0, 0, 1, 1, 2, 2], false).unwrap();
        assert_eq!(b.num_blocks(), 3);
        assert_eq!(b.indices(), &[vec![0, 1], vec![2, 3], vec![4, 5]]);
        assert_eq!(b.uniform_size(), Some(2));
    }

    #[test]
    fn test_one_based_interleaved() {
        let b = ExchangeabilityBlocks::from_labels(&[1, 2, 1, 2, 2], false).unwrap();
        assert_eq!(b.labels(), &[0, 1, 0, 1, 1]);
        assert_eq!(b.indices(), &[vec![0, 2], vec![1, 3, 4]]);
        assert_eq!(b.block_of(4), 1);
        assert_eq!(b.uniform_size(), None);
    }

    #[test]
    fn test_rejects_singleton() {
        let err = ExchangeabilityBlocks::from_labels(&[0, 0, 1], false).unwrap_err();
        assert!(err.to_string().contains("only one observation"));
    }

    #[test]
    fn test_rejects_gap() {
        assert!(ExchangeabilityBlocks::from_labels(&[0, 0, 2, 2], false).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_label() {
        let err = ExchangeabilityBlocks::from_labels(&[0, 0, 1, 1, i64::MAX], false).unwrap_err();
        assert!(matches!(err, Error::Validation(msg) if msg.contains("out of range")));
        assert!(ExchangeabilityBlocks::from_labels(&[1, 1, 1, 5], false).is_err());
    }

    #[test]
    fn test_rejects_bad_base() {
        assert!(ExchangeabilityBlocks::from_labels(&[2, 2, 3, 3], false).is_err());
        assert!(ExchangeabilityBlocks::from_labels(&[-1, -1, 0, 0], false).is_err());
        assert!(ExchangeabilityBlocks::from_labels(&[], false).is_err());
    }

    #[test]
    fn test_equal_sizes_required() {
        assert!(ExchangeabilityBlocks::from_labels(&[0, 0, 1, 1, 1], true).is_err());
        assert!(ExchangeabilityBlocks::from_labels(&[0, 0, 0, 1, 1, 1], true).is_ok());
    }

    #[test]
    fn test_check_rows() {
        let b = ExchangeabilityBlocks::from_labels(&[0, 0, 1, 1], false).unwrap();
        assert!(b.check_rows(4).is_ok());
        assert!(b.check_rows(5).is_err());
    }
}
