use crate::aggregate::Strategy;
use crate::cursor::CursorKind;
use crate::plan::{AttrKey, PlanLayout};
use crate::triangular::TriangularMatrix;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Counters collected while executing a plan.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionStats {
    pub strategy: Strategy,
    /// Cursor kind used at each step, in join order.
    pub cursor_kinds: Vec<CursorKind>,
    /// Rows of the (virtual) join result. For the pushdown strategy this is the logical clock,
    /// which also counts rows that were never enumerated individually.
    pub tuples: u64,
    /// Number of `advance` calls per step.
    pub advances: Vec<u64>,
    /// Number of `synchronize` calls per step.
    pub synchronizations: Vec<u64>,
    /// Times the materialize strategy folded its buffer into the result.
    pub flushes: u64,
    pub elapsed: Duration,
}

impl ExecutionStats {
    pub(crate) fn new(strategy: Strategy, cursor_kinds: Vec<CursorKind>) -> Self {
        let steps = cursor_kinds.len();
        Self {
            strategy,
            cursor_kinds,
            tuples: 0,
            advances: vec![0; steps],
            synchronizations: vec![0; steps],
            flushes: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// `SUM(a * b)` for every aggregated attribute pair of a join.
#[derive(Clone, Debug)]
pub struct AggregateResult {
    attributes: Vec<String>,
    attribute_index: HashMap<String, AttrKey>,
    requested: Option<Vec<(AttrKey, AttrKey)>>,
    matrix: TriangularMatrix<f64>,
    stats: ExecutionStats,
}

impl AggregateResult {
    pub(crate) fn new(
        layout: PlanLayout,
        matrix: TriangularMatrix<f64>,
        stats: ExecutionStats,
    ) -> Self {
        debug_assert_eq!(matrix.dim(), layout.attributes.len());
        Self {
            attributes: layout.attributes,
            attribute_index: layout.attribute_index,
            requested: layout.requested,
            matrix,
            stats,
        }
    }

    /// Attribute names indexed by attribute key.
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// `SUM(a * b)` over the join, or `None` if either attribute is unknown or the pair was not
    /// requested. The pair is unordered.
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let a = *self.attribute_index.get(a)?;
        let b = *self.attribute_index.get(b)?;
        self.get_by_key(a, b)
    }

    pub fn get_by_key(&self, a: AttrKey, b: AttrKey) -> Option<f64> {
        let (a, b) = (a.min(b), a.max(b));
        if b >= self.attributes.len() || !self.is_populated(a, b) {
            return None;
        }
        Some(self.matrix.get(a, b))
    }

    fn is_populated(&self, a: AttrKey, b: AttrKey) -> bool {
        self.requested
            .as_ref()
            .map_or(true, |pairs| pairs.contains(&(a, b)))
    }

    /// Populated pairs as `(a, b, sum)`: requested pairs in request order, or every pair with
    /// `key(a) <= key(b)` in key order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (&str, &str, f64)> + '_> {
        let name = |key: AttrKey| self.attributes[key].as_str();
        match &self.requested {
            Some(pairs) => Box::new(
                pairs
                    .iter()
                    .map(move |&(a, b)| (name(a), name(b), self.matrix.get(a, b))),
            ),
            None => Box::new(
                self.matrix
                    .iter()
                    .map(move |(a, b, &sum)| (name(a), name(b), sum)),
            ),
        }
    }

    pub fn matrix(&self) -> &TriangularMatrix<f64> {
        &self.matrix
    }

    pub fn into_matrix(self) -> TriangularMatrix<f64> {
        self.matrix
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    /// Largest absolute difference between the populated sums of two results over the same
    /// attributes, or `None` when they do not cover the same pairs.
    pub fn max_abs_difference(&self, other: &AggregateResult) -> Option<f64> {
        let mut max = 0.0f64;
        let mut ours = self.iter();
        let mut theirs = other.iter();
        loop {
            match (ours.next(), theirs.next()) {
                (None, None) => return Some(max),
                (Some((a1, b1, x)), Some((a2, b2, y))) if a1 == a2 && b1 == b2 => {
                    max = max.max((x - y).abs());
                }
                _ => return None,
            }
        }
    }
}

impl fmt::Display for AggregateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (a, b, sum) in self.iter() {
            writeln!(f, "SUM({a}*{b}) = {sum}")?;
        }
        Ok(())
    }
}
