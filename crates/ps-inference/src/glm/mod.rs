//! General linear model tests evaluated under shuffling.
//!
//! Hypotheses are partitioned against the design (Freedman–Lane), and the
//! shuffle is applied to the nuisance-residualised data. Four engines cover
//! fixed or per-element designs, each with a pooled or per-group variance.

pub mod fixed;
pub mod hypothesis;
mod kernel;
pub mod summary;
pub mod variable;

pub use fixed::{FixedHeteroscedastic, FixedHomoscedastic};
pub use hypothesis::{Hypothesis, Partition};
pub use kernel::VarianceGroups;
pub use summary::{GlmSummary, all_stats, check_design};
pub use variable::{VariableHeteroscedastic, VariableHomoscedastic};
