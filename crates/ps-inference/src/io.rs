//! Plain-text loaders for matrices, labels and manual permutations.
//!
//! Numeric files hold one row per line, values separated by whitespace or
//! commas; `#` starts a comment and blank lines are skipped.

use std::path::Path;

use nalgebra::DMatrix;
use ps_core::{Error, Result};

use crate::blocks::ExchangeabilityBlocks;
use crate::glm::VarianceGroups;

fn parse_f64(s: &str, line: usize) -> Result<f64> {
    s.parse::<f64>()
        .map_err(|_| Error::Validation(format!("invalid number {s:?} on line {line}")))
}

/// Parse a numeric matrix from text.
pub fn parse_matrix(text: &str) -> Result<DMatrix<f64>> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (n, raw) in text.lines().enumerate() {
        let content = raw.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }
        let row = content
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| parse_f64(s, n + 1))
            .collect::<Result<Vec<_>>>()?;
        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                return Err(Error::Validation(format!(
                    "line {} has {} columns, expected {}",
                    n + 1,
                    row.len(),
                    first.len()
                )));
            }
        }
        rows.push(row);
    }
    let ncols = rows.first().map_or(0, Vec::len);
    Ok(DMatrix::from_fn(rows.len(), ncols, |i, j| rows[i][j]))
}

/// Read a numeric matrix file.
pub fn read_matrix(path: impl AsRef<Path>) -> Result<DMatrix<f64>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    parse_matrix(&text).map_err(|e| match e {
        Error::Validation(msg) => Error::Validation(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Integer labels from a single row or single column matrix.
fn integer_vector(m: &DMatrix<f64>, what: &str) -> Result<Vec<i64>> {
    if m.nrows() != 1 && m.ncols() != 1 {
        return Err(Error::Validation(format!(
            "{what} must be a single row or column, got {}x{}",
            m.nrows(),
            m.ncols()
        )));
    }
    m.iter()
        .map(|&v| {
            if v.fract() != 0.0 || !v.is_finite() {
                Err(Error::Validation(format!("{what} contains non-integer value {v}")))
            } else {
                Ok(v as i64)
            }
        })
        .collect()
}

/// Load block labels (0- or 1-based); `equal_sizes` for whole-block exchangeability.
pub fn load_exchangeability_blocks(
    path: impl AsRef<Path>,
    equal_sizes: bool,
) -> Result<ExchangeabilityBlocks> {
    let labels = integer_vector(&read_matrix(&path)?, "exchangeability block file")?;
    ExchangeabilityBlocks::from_labels(&labels, equal_sizes).map_err(|e| match e {
        Error::Validation(msg) => Error::Validation(format!("{}: {}", path.as_ref().display(), msg)),
        other => other,
    })
}

/// Load variance-group labels (0- or 1-based), one per observation.
pub fn load_variance_groups(path: impl AsRef<Path>) -> Result<VarianceGroups> {
    let labels = integer_vector(&read_matrix(&path)?, "variance group file")?;
    VarianceGroups::from_labels(&labels)
}

/// Convert a matrix whose columns are relabelings into 0-based permutations.
///
/// Indices may be 0- or 1-based; 1-based input is detected by the absence of 0.
pub fn permutations_from_matrix(m: &DMatrix<f64>, num_rows: usize) -> Result<Vec<Vec<usize>>> {
    if m.nrows() != num_rows {
        return Err(Error::Validation(format!(
            "manual permutations have {} rows, expected {}",
            m.nrows(),
            num_rows
        )));
    }
    if m.iter().any(|&v| v.fract() != 0.0 || !v.is_finite() || v < 0.0) {
        return Err(Error::Validation(
            "manual permutations must contain non-negative integers".to_string(),
        ));
    }
    let one_based = m.iter().all(|&v| v != 0.0);
    let offset = usize::from(one_based);
    Ok(m.column_iter().map(|c| c.iter().map(|&v| v as usize - offset).collect()).collect())
}

/// Load manual permutations: each column is one relabeling of `num_rows` observations.
pub fn load_permutations(path: impl AsRef<Path>, num_rows: usize) -> Result<Vec<Vec<usize>>> {
    permutations_from_matrix(&read_matrix(path)?, num_rows)
}

/// Assembles the subject-by-element data matrix from per-subject raw vectors.
///
/// The raw-index to element mapping is supplied at construction; raw entries
/// mapped to `None` (outside the analysis mask) are ignored.
#[derive(Debug, Clone)]
pub struct MappedImporter {
    mapping: Vec<Option<usize>>,
    num_elements: usize,
    subjects: Vec<(String, Vec<f64>)>,
}

impl MappedImporter {
    /// `mapping[raw]` is the element index of raw entry `raw`; every element must be hit once.
    pub fn new(mapping: Vec<Option<usize>>) -> Result<Self> {
        let num_elements = mapping.iter().flatten().map(|&e| e + 1).max().unwrap_or(0);
        let mut hits = vec![0usize; num_elements];
        for &e in mapping.iter().flatten() {
            hits[e] += 1;
        }
        if let Some(e) = hits.iter().position(|&n| n != 1) {
            return Err(Error::Validation(format!(
                "element {} is mapped from {} raw entries, expected exactly 1",
                e, hits[e]
            )));
        }
        if num_elements == 0 {
            return Err(Error::Validation("mapping selects no elements".to_string()));
        }
        Ok(Self { mapping, num_elements, subjects: Vec::new() })
    }

    /// Append one subject's raw data.
    pub fn add_subject(&mut self, name: impl Into<String>, raw: &[f64]) -> Result<()> {
        let name = name.into();
        if raw.len() != self.mapping.len() {
            return Err(Error::Validation(format!(
                "subject '{}' has {} raw values, mapping expects {}",
                name,
                raw.len(),
                self.mapping.len()
            )));
        }
        let mut values = vec![f64::NAN; self.num_elements];
        for (v, e) in raw.iter().zip(&self.mapping) {
            if let Some(e) = e {
                values[*e] = *v;
            }
        }
        self.subjects.push((name, values));
        Ok(())
    }

    /// Number of elements E.
    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    /// Number of subjects added so far.
    pub fn num_subjects(&self) -> usize {
        self.subjects.len()
    }

    /// Subject names in row order.
    pub fn subject_names(&self) -> impl Iterator<Item = &str> {
        self.subjects.iter().map(|(n, _)| n.as_str())
    }

    /// R×E data matrix, one row per subject.
    pub fn build(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.subjects.len(), self.num_elements, |i, j| self.subjects[i].1[j])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_parse_matrix_separators_and_comments() {
        let m = parse_matrix("# design\n1, 0 2\n\n1\t1,3 # trailing\n").unwrap();
        assert_eq!(m, DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 2.0, 1.0, 1.0, 3.0]));
        assert!(parse_matrix("1 2\n3\n").is_err());
        assert!(parse_matrix("1 x\n").is_err());
        assert_eq!(parse_matrix("").unwrap().shape(), (0, 0));
    }

    #[test]
    fn test_read_matrix_missing_file() {
        assert!(matches!(read_matrix("/nonexistent/design.txt"), Err(Error::Io(_))));
    }

    #[test]
    fn test_load_blocks_one_based() {
        let f = write_temp("1\n1\n2\n2\n3\n3\n");
        let blocks = load_exchangeability_blocks(f.path(), true).unwrap();
        assert_eq!(blocks.num_blocks(), 3);
        assert_eq!(blocks.labels(), &[0, 0, 1, 1, 2, 2]);
        let bad = write_temp("0 0 1\n");
        let err = load_exchangeability_blocks(bad.path(), false).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_load_permutations_columns() {
        let f = write_temp("1 2\n2 3\n3 1\n");
        let perms = load_permutations(f.path(), 3).unwrap();
        assert_eq!(perms, vec![vec![0, 1, 2], vec![1, 2, 0]]);
        let zero = write_temp("0 1\n1 0\n");
        assert_eq!(load_permutations(zero.path(), 2).unwrap(), vec![vec![0, 1], vec![1, 0]]);
        assert!(load_permutations(zero.path(), 3).is_err());
    }

    #[test]
    fn test_load_variance_groups() {
        let f = write_temp("1 1 2 2\n");
        let g = load_variance_groups(f.path()).unwrap();
        assert_eq!(g.num_groups(), 2);
        assert_eq!(g.labels(), &[0, 0, 1, 1]);
    }

    #[test]
    fn test_mapped_importer() {
        let mut importer = MappedImporter::new(vec![Some(1), None, Some(0)]).unwrap();
        importer.add_subject("s1", &[1.0, 9.0, 2.0]).unwrap();
        importer.add_subject("s2", &[3.0, 9.0, 4.0]).unwrap();
        assert!(importer.add_subject("s3", &[1.0]).is_err());
        assert_eq!(importer.num_elements(), 2);
        assert_eq!(importer.num_subjects(), 2);
        assert_eq!(importer.subject_names().collect::<Vec<_>>(), vec!["s1", "s2"]);
        assert_eq!(importer.build(), DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 4.0, 3.0]));
        assert!(MappedImporter::new(vec![Some(0), Some(0)]).is_err());
        assert!(MappedImporter::new(vec![Some(1)]).is_err());
        assert!(MappedImporter::new(vec![None]).is_err());
    }
}
