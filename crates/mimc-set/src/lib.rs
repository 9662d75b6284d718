#![deny(missing_docs)]
#![doc = "Reference level set for MIMC runs: storage, boundary queries, profit-driven expansion and the multi-dimensional difference expansion."]

/// Difference-estimator expansion of a level.
pub mod delta;
/// Insertion-ordered multi-index set.
pub mod index_set;
/// Profit calculators driving set expansion.
pub mod profit;

pub use delta::expand_delta;
pub use index_set::IndexSet;
pub use profit::TotalDegreeProfit;
