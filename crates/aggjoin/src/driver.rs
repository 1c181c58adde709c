use crate::aggregate::Strategy;
use crate::cursor::{Cursor, CursorKind, JoinCursor};
use crate::options::{CursorPolicy, ExecutionOptions};
use crate::plan::{AttrKey, JoinPlan, PlanLayout};
use crate::result::ExecutionStats;

/// Current value of every attribute fixed along the active path through the join order.
///
/// This is the only state cursors share. Unset attributes hold NaN; values compare under the
/// same total order used for sorting, so NaN keys join with each other.
#[derive(Clone, Debug)]
pub(crate) struct KeyValues {
    values: Vec<f64>,
}

impl KeyValues {
    pub(crate) fn new(num_keys: usize) -> Self {
        Self {
            values: vec![f64::NAN; num_keys],
        }
    }

    #[inline]
    pub(crate) fn get(&self, key: AttrKey) -> f64 {
        self.values[key]
    }

    #[inline]
    pub(crate) fn set(&mut self, key: AttrKey, value: f64) {
        self.values[key] = value;
    }

    pub(crate) fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// Receives every row of the virtual join result from [`Execution::walk`].
pub(crate) trait TupleSink {
    fn accept(&mut self, keys: &KeyValues);
}

/// Runtime state of one execution of a plan: one cursor per relation plus the shared key values.
#[derive(Debug)]
pub(crate) struct Execution {
    pub(crate) layout: PlanLayout,
    pub(crate) cursors: Vec<Cursor>,
    pub(crate) keys: KeyValues,
    pub(crate) stats: ExecutionStats,
}

impl Execution {
    /// Build cursors for every step. This is where relations get sorted.
    pub(crate) fn new(plan: JoinPlan, strategy: Strategy, options: &ExecutionOptions) -> Self {
        let (layout, relations) = plan.into_parts();
        let cursors: Vec<Cursor> = relations
            .into_iter()
            .zip(&layout.steps)
            .map(|(relation, step)| {
                let kind = match (options.cursor_policy, step.cursor_kind()) {
                    (_, CursorKind::Start) => CursorKind::Start,
                    (CursorPolicy::LinearBaseline, _) => CursorKind::Linear,
                    (CursorPolicy::Planned, kind) => kind,
                };
                Cursor::new(kind, relation, step)
            })
            .collect();

        let keys = KeyValues::new(layout.num_attributes());
        let kinds = cursors.iter().map(Cursor::kind).collect();
        let stats = ExecutionStats::new(strategy, kinds);

        Self {
            layout,
            cursors,
            keys,
            stats,
        }
    }

    pub(crate) fn num_steps(&self) -> usize {
        self.cursors.len()
    }

    #[inline]
    pub(crate) fn has_next(&self, step: usize) -> bool {
        self.cursors[step].has_next()
    }

    #[inline]
    pub(crate) fn advance(&mut self, step: usize) -> bool {
        self.stats.advances[step] += 1;
        self.cursors[step].advance(&mut self.keys)
    }

    #[inline]
    pub(crate) fn synchronize(&mut self, step: usize) {
        self.stats.synchronizations[step] += 1;
        self.cursors[step].synchronize(&self.keys);
    }

    /// Depth-first walk producing every row of the join, one at a time, into `sink`.
    ///
    /// At most one row per relation is live at any point; nothing is materialized.
    pub(crate) fn walk(&mut self, sink: &mut impl TupleSink) {
        let last = self.num_steps() - 1;
        let mut curr = 0usize;

        loop {
            if self.has_next(curr) {
                self.advance(curr);
                if curr == last {
                    self.stats.tuples += 1;
                    sink.accept(&self.keys);
                } else {
                    curr += 1;
                    self.synchronize(curr);
                }
            } else if curr == 0 {
                break;
            } else {
                curr -= 1;
            }
        }
    }
}
