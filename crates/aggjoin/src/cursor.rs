use crate::driver::KeyValues;
use crate::plan::{AttrKey, JoinStep};
use crate::relation::{same_value, Relation};
use std::cmp::Ordering;

/// Strategy a cursor uses to find rows matching its incoming join keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CursorKind {
    /// Linear scan of the first relation in the join order.
    Start,
    /// Merge against an incoming stream already sorted on this step's join keys.
    SortMerge,
    /// Binary search on a relation sorted by its own join keys.
    BinarySearch,
    /// Unsorted full scan per probe. Baseline only; never chosen by the planner.
    Linear,
}

/// The protocol every cursor implements.
///
/// The driver calls [`synchronize`](JoinCursor::synchronize) whenever an upstream cursor moved,
/// then alternates [`has_next`](JoinCursor::has_next) and [`advance`](JoinCursor::advance) until
/// the rows matching the current join keys are exhausted.
pub(crate) trait JoinCursor {
    /// Position the lookahead on the first row matching the current join key values.
    ///
    /// Calling this repeatedly without an intervening `advance` yields the same lookahead.
    fn synchronize(&mut self, keys: &KeyValues);

    fn has_next(&self) -> bool;

    /// Move to the lookahead row, publish its first-appearing attributes and compute the next
    /// lookahead.
    ///
    /// Returns `true` (dirty) when a published attribute that a later step joins on changed.
    fn advance(&mut self, keys: &mut KeyValues) -> bool;

    fn current_row(&self) -> Option<usize>;

    fn relation(&self) -> &Relation;
}

/// State shared by every cursor strategy.
#[derive(Debug)]
struct RowCursor {
    relation: Relation,
    join_keys: Vec<AttrKey>,
    join_cols: Vec<usize>,
    first_appearing: Vec<(AttrKey, usize)>,
    join_keys_after: Vec<bool>,
    /// Join key values the cursor was last positioned for.
    probe: Vec<f64>,
    primed: bool,
    published: bool,
    current: Option<usize>,
    next: Option<usize>,
}

impl RowCursor {
    fn new(relation: Relation, step: &JoinStep) -> Self {
        Self {
            relation,
            join_keys: step.join_keys().to_vec(),
            join_cols: step.join_cols.clone(),
            first_appearing: step
                .first_appearing_keys()
                .iter()
                .copied()
                .zip(step.first_appearing_cols.iter().copied())
                .collect(),
            join_keys_after: step.join_keys_after.clone(),
            probe: vec![0.0; step.join_keys().len()],
            primed: false,
            published: false,
            current: None,
            next: None,
        }
    }

    /// Refresh `probe` from the shared key values. Returns whether any value changed; the first
    /// call always reports a change.
    fn refresh_probe(&mut self, keys: &KeyValues) -> bool {
        let mut changed = !self.primed;
        for (slot, &key) in self.probe.iter_mut().zip(&self.join_keys) {
            let value = keys.get(key);
            if !same_value(*slot, value) {
                *slot = value;
                changed = true;
            }
        }
        self.primed = true;
        changed
    }

    /// Commit the lookahead row and publish its first-appearing attributes. The first commit
    /// always counts as a change.
    fn commit(&mut self, keys: &mut KeyValues) -> (usize, bool) {
        let row = self
            .next
            .expect("advance called without a pending row; check has_next first");
        self.current = Some(row);

        let values = self.relation.row(row);
        let fresh = !self.published;
        let mut dirty = false;
        for &(key, col) in &self.first_appearing {
            let value = values[col];
            if fresh || !same_value(keys.get(key), value) {
                dirty |= self.join_keys_after[key];
                keys.set(key, value);
            }
        }
        self.published = true;
        (row, dirty)
    }

    /// The row after `row` if it still matches the probe; rows with equal join keys are adjacent
    /// in a relation sorted on its join columns.
    fn adjacent_match(&self, row: usize) -> Option<usize> {
        let next = row + 1;
        (next < self.relation.row_count()
            && self.relation.matches(next, &self.join_cols, &self.probe))
        .then_some(next)
    }
}

#[derive(Debug)]
pub(crate) struct StartCursor {
    inner: RowCursor,
}

impl StartCursor {
    fn new(mut relation: Relation, step: &JoinStep) -> Self {
        relation.sort(step.sort_cols(), &step.remembered_cols);
        let mut inner = RowCursor::new(relation, step);
        inner.next = (!inner.relation.is_empty()).then_some(0);
        Self { inner }
    }
}

impl JoinCursor for StartCursor {
    fn synchronize(&mut self, _keys: &KeyValues) {
        self.inner.current = None;
        self.inner.next = (!self.inner.relation.is_empty()).then_some(0);
    }

    fn has_next(&self) -> bool {
        self.inner.next.is_some()
    }

    fn advance(&mut self, keys: &mut KeyValues) -> bool {
        let (row, dirty) = self.inner.commit(keys);
        self.inner.next = (row + 1 < self.inner.relation.row_count()).then_some(row + 1);
        dirty
    }

    fn current_row(&self) -> Option<usize> {
        self.inner.current
    }

    fn relation(&self) -> &Relation {
        &self.inner.relation
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MergeFront {
    /// Never synchronized.
    Unset,
    /// Ran off the end of the relation; incoming keys only grow, so it stays there.
    Exhausted,
    /// First row at or after the last probed key.
    At(usize),
}

/// Cursor for a step whose incoming tuples arrive sorted on its join keys.
///
/// Each new key is searched forward from where the previous key's search ended, so the relation
/// is traversed at most once per execution apart from rewinds for repeated keys.
#[derive(Debug)]
pub(crate) struct SortMergeCursor {
    inner: RowCursor,
    front: MergeFront,
    found_match: bool,
}

impl SortMergeCursor {
    fn new(mut relation: Relation, step: &JoinStep) -> Self {
        relation.sort(step.sort_cols(), &step.join_cols);
        Self {
            inner: RowCursor::new(relation, step),
            front: MergeFront::Unset,
            found_match: false,
        }
    }

    fn compare(&self, row: usize) -> Ordering {
        self.inner
            .relation
            .compare_row_with_key(row, &self.inner.join_cols, &self.inner.probe)
    }
}

impl JoinCursor for SortMergeCursor {
    fn synchronize(&mut self, keys: &KeyValues) {
        let changed = self.inner.refresh_probe(keys);
        let rows = self.inner.relation.row_count();

        let mut candidate = match self.front {
            MergeFront::Exhausted => {
                self.inner.next = None;
                return;
            }
            MergeFront::Unset => {
                if rows == 0 {
                    self.front = MergeFront::Exhausted;
                    self.inner.next = None;
                    return;
                }
                0
            }
            MergeFront::At(start) if self.found_match => {
                if !changed {
                    self.inner.next = Some(start);
                    return;
                }
                self.found_match = false;
                // Every row up to the last match holds a smaller key.
                let after = self.inner.current.map_or(start, |row| row + 1);
                if after == rows {
                    self.front = MergeFront::Exhausted;
                    self.inner.next = None;
                    return;
                }
                after
            }
            MergeFront::At(_) if !changed => {
                self.inner.next = None;
                return;
            }
            MergeFront::At(start) => start,
        };

        let mut ord = self.compare(candidate);
        while ord == Ordering::Less {
            candidate += 1;
            if candidate == rows {
                self.front = MergeFront::Exhausted;
                self.inner.next = None;
                return;
            }
            ord = self.compare(candidate);
        }

        self.front = MergeFront::At(candidate);
        self.found_match = ord == Ordering::Equal;
        self.inner.next = self.found_match.then_some(candidate);
    }

    fn has_next(&self) -> bool {
        self.inner.next.is_some()
    }

    fn advance(&mut self, keys: &mut KeyValues) -> bool {
        let (row, dirty) = self.inner.commit(keys);
        self.inner.next = self.inner.adjacent_match(row);
        dirty
    }

    fn current_row(&self) -> Option<usize> {
        self.inner.current
    }

    fn relation(&self) -> &Relation {
        &self.inner.relation
    }
}

/// Where the rows for the last probed key start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StartRow {
    Unset,
    NoMatch,
    At(usize),
}

impl StartRow {
    fn from_search(row: Option<usize>) -> Self {
        row.map_or(StartRow::NoMatch, StartRow::At)
    }

    fn row(self) -> Option<usize> {
        match self {
            StartRow::At(row) => Some(row),
            StartRow::Unset | StartRow::NoMatch => None,
        }
    }
}

/// Cursor that sorts its relation on its own join keys and binary searches each distinct key.
#[derive(Debug)]
pub(crate) struct BinarySearchCursor {
    inner: RowCursor,
    last_start: StartRow,
}

impl BinarySearchCursor {
    fn new(mut relation: Relation, step: &JoinStep) -> Self {
        relation.sort(step.sort_cols(), &step.join_cols);
        Self {
            inner: RowCursor::new(relation, step),
            last_start: StartRow::Unset,
        }
    }
}

impl JoinCursor for BinarySearchCursor {
    fn synchronize(&mut self, keys: &KeyValues) {
        let changed = self.inner.refresh_probe(keys);
        if !changed && self.last_start != StartRow::Unset {
            self.inner.next = self.last_start.row();
            return;
        }
        self.last_start = StartRow::from_search(self.inner.relation.binary_search(&self.inner.probe));
        self.inner.next = self.last_start.row();
    }

    fn has_next(&self) -> bool {
        self.inner.next.is_some()
    }

    fn advance(&mut self, keys: &mut KeyValues) -> bool {
        let (row, dirty) = self.inner.commit(keys);
        self.inner.next = self.inner.adjacent_match(row);
        dirty
    }

    fn current_row(&self) -> Option<usize> {
        self.inner.current
    }

    fn relation(&self) -> &Relation {
        &self.inner.relation
    }
}

/// Cursor that leaves its relation unsorted and scans it for every probe.
#[derive(Debug)]
pub(crate) struct LinearCursor {
    inner: RowCursor,
    last_start: StartRow,
}

impl LinearCursor {
    fn new(relation: Relation, step: &JoinStep) -> Self {
        Self {
            inner: RowCursor::new(relation, step),
            last_start: StartRow::Unset,
        }
    }
}

impl JoinCursor for LinearCursor {
    fn synchronize(&mut self, keys: &KeyValues) {
        let changed = self.inner.refresh_probe(keys);
        if !changed && self.last_start != StartRow::Unset {
            self.inner.next = self.last_start.row();
            return;
        }
        let first = self
            .inner
            .relation
            .find_after(&self.inner.join_cols, &self.inner.probe, 0);
        self.last_start = StartRow::from_search(first);
        self.inner.next = self.last_start.row();
    }

    fn has_next(&self) -> bool {
        self.inner.next.is_some()
    }

    fn advance(&mut self, keys: &mut KeyValues) -> bool {
        let (row, dirty) = self.inner.commit(keys);
        let next = self
            .inner
            .relation
            .find_after(&self.inner.join_cols, &self.inner.probe, row + 1);
        self.inner.next = next;
        dirty
    }

    fn current_row(&self) -> Option<usize> {
        self.inner.current
    }

    fn relation(&self) -> &Relation {
        &self.inner.relation
    }
}

/// A cursor of any kind; chosen once per step when an execution starts.
#[derive(Debug)]
pub(crate) enum Cursor {
    Start(StartCursor),
    SortMerge(SortMergeCursor),
    BinarySearch(BinarySearchCursor),
    Linear(LinearCursor),
}

impl Cursor {
    /// Build the cursor for `step`, sorting `relation` as the strategy requires.
    pub(crate) fn new(kind: CursorKind, relation: Relation, step: &JoinStep) -> Self {
        match kind {
            CursorKind::Start => Cursor::Start(StartCursor::new(relation, step)),
            CursorKind::SortMerge => Cursor::SortMerge(SortMergeCursor::new(relation, step)),
            CursorKind::BinarySearch => {
                Cursor::BinarySearch(BinarySearchCursor::new(relation, step))
            }
            CursorKind::Linear => Cursor::Linear(LinearCursor::new(relation, step)),
        }
    }

    pub(crate) fn kind(&self) -> CursorKind {
        match self {
            Cursor::Start(_) => CursorKind::Start,
            Cursor::SortMerge(_) => CursorKind::SortMerge,
            Cursor::BinarySearch(_) => CursorKind::BinarySearch,
            Cursor::Linear(_) => CursorKind::Linear,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $cursor:ident => $body:expr) => {
        match $self {
            Cursor::Start($cursor) => $body,
            Cursor::SortMerge($cursor) => $body,
            Cursor::BinarySearch($cursor) => $body,
            Cursor::Linear($cursor) => $body,
        }
    };
}

impl JoinCursor for Cursor {
    fn synchronize(&mut self, keys: &KeyValues) {
        dispatch!(self, c => c.synchronize(keys))
    }

    fn has_next(&self) -> bool {
        dispatch!(self, c => c.has_next())
    }

    fn advance(&mut self, keys: &mut KeyValues) -> bool {
        dispatch!(self, c => c.advance(keys))
    }

    fn current_row(&self) -> Option<usize> {
        dispatch!(self, c => c.current_row())
    }

    fn relation(&self) -> &Relation {
        dispatch!(self, c => c.relation())
    }
}
