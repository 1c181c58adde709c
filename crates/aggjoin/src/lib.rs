//! Pairwise SUM aggregates over the natural join of N relations.
//!
//! The engine never materializes the join. Every relation is sorted in place on the columns it
//! joins on, and one cursor per relation walks the (virtual) join depth-first:
//! - [`plan_join`] assigns attribute keys, chooses a join order and precomputes all bookkeeping.
//! - Cursors locate matching rows with sort-merge or binary search instead of auxiliary indexes.
//! - Three aggregate strategies share the same driver: materialize, eager and pushdown.
//!
//! Memory beyond the relations themselves is bounded by the number of distinct attributes.

#![forbid(unsafe_code)]

mod aggregate;
mod cursor;
mod driver;
mod error;
mod loader;
mod options;
mod plan;
mod pushdown;
mod relation;
mod result;
mod triangular;

pub use crate::aggregate::{run, run_eager, run_materialize, run_pushdown, Strategy};
pub use crate::cursor::CursorKind;
pub use crate::error::{JoinError, JoinResult};
pub use crate::loader::{load_delimited, parse_delimited, DEFAULT_SEPARATOR};
pub use crate::options::{CursorPolicy, ExecutionOptions};
pub use crate::plan::{plan_join, AttrKey, JoinPlan, JoinStep};
pub use crate::relation::Relation;
pub use crate::result::{AggregateResult, ExecutionStats};
pub use crate::triangular::TriangularMatrix;
