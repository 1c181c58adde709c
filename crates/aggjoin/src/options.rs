/// How cursors for steps after the start relation are chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CursorPolicy {
    /// Use the cursor kinds chosen by the planner (sort-merge, then binary search).
    #[default]
    Planned,
    /// Replace every non-start cursor with an unsorted linear scan.
    ///
    /// Only useful as a baseline: every probe scans the whole relation.
    LinearBaseline,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutionOptions {
    /// Number of join rows the materialize strategy buffers before folding them into the result.
    pub materialize_flush_rows: usize,
    pub cursor_policy: CursorPolicy,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            materialize_flush_rows: 1_000_000,
            cursor_policy: CursorPolicy::Planned,
        }
    }
}

impl ExecutionOptions {
    pub(crate) fn flush_threshold(&self) -> usize {
        self.materialize_flush_rows.max(1)
    }
}
