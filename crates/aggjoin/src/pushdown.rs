//! Pushdown aggregation.
//!
//! Every pair `(a, b)` is accumulated at the step where the later of its two attributes first
//! appears. While a step walks a run of rows whose keys that later steps join on do not change,
//! the subtree below it is identical for every row of the run, so the subtree is walked once and
//! its partial sums are scaled by the run length instead of being recomputed per row.
//!
//! The walk keeps a logical clock counting join rows. A step records the clock when it hands
//! control to the next step (`snapshot`); when control comes back, `clock - snapshot` is the
//! number of join rows each of its rows multiplies into.

use crate::cursor::JoinCursor;
use crate::driver::Execution;
use crate::triangular::TriangularMatrix;

/// Runs the pushdown walk over `execution` and returns the aggregated pair sums.
pub(crate) fn aggregate(execution: &mut Execution) -> TriangularMatrix<f64> {
    let num_keys = execution.layout.num_attributes();
    let num_steps = execution.num_steps();
    let mut state = PushdownState {
        execution,
        partials: (0..=num_steps).map(|_| TriangularMatrix::new(num_keys)).collect(),
        sums: vec![vec![0.0; num_keys]; num_steps + 1],
        snapshots: vec![None; num_steps],
        run: Vec::new(),
        clock: 0,
    };
    state.walk();

    let PushdownState {
        execution,
        mut partials,
        clock,
        ..
    } = state;
    execution.stats.tuples = clock;
    log::trace!("pushdown walk covered {clock} join rows");
    partials.swap_remove(0)
}

struct PushdownState<'a> {
    execution: &'a mut Execution,
    /// Partial pair sums per step; index `n` is an always-empty sentinel below the last step.
    partials: Vec<TriangularMatrix<f64>>,
    /// Partial attribute sums per step, indexed by attribute key.
    sums: Vec<Vec<f64>>,
    /// Clock value when a step last handed control to the next one, `None` if it has no open run.
    snapshots: Vec<Option<u64>>,
    /// Rows the resumed step committed during its current run. Linear cursors may skip rows, so
    /// a run is not a contiguous range.
    run: Vec<usize>,
    clock: u64,
}

impl PushdownState<'_> {
    fn walk(&mut self) {
        let last = self.execution.num_steps() - 1;
        let mut curr = 0usize;

        loop {
            if curr == last {
                if self.execution.has_next(curr) {
                    self.execution.advance(curr);
                    self.clock += 1;
                    self.accumulate_last_row();
                } else if curr == 0 {
                    break;
                } else {
                    curr -= 1;
                }
                continue;
            }

            if !self.execution.has_next(curr) {
                if self.snapshots[curr].is_some() {
                    self.run.clear();
                    self.run.push(self.current_row(curr));
                    self.compute(curr);
                }
                self.snapshots[curr] = None;
                if curr == 0 {
                    break;
                }
                curr -= 1;
                continue;
            }

            if self.snapshots[curr].is_none() {
                self.snapshots[curr] = Some(self.clock);
                self.execution.advance(curr);
                curr += 1;
                self.execution.synchronize(curr);
                continue;
            }

            // Resume the open run: keep advancing until a key a later step joins on changes.
            self.run.clear();
            self.run.push(self.current_row(curr));
            loop {
                let dirty = self.execution.advance(curr);
                if dirty {
                    // The new row opens the next run.
                    self.compute(curr);
                    self.snapshots[curr] = Some(self.clock);
                    curr += 1;
                    self.execution.synchronize(curr);
                    break;
                }
                self.run.push(self.current_row(curr));
                if !self.execution.has_next(curr) {
                    self.compute(curr);
                    self.snapshots[curr] = None;
                    curr = curr.saturating_sub(1);
                    break;
                }
            }

            if curr == 0 && self.snapshots[0].is_none() && !self.execution.has_next(0) {
                break;
            }
        }
    }

    fn current_row(&self, step: usize) -> usize {
        self.execution.cursors[step]
            .current_row()
            .unwrap_or_else(|| unreachable!("step {step} has advanced at least once"))
    }

    /// The last step's rows are each exactly one join row.
    fn accumulate_last_row(&mut self) {
        let t = self.execution.num_steps() - 1;
        let row_idx = self.current_row(t);
        let row = self.execution.cursors[t].relation().row(row_idx);
        let plan = &self.execution.layout.pushdown[t];
        let step = &self.execution.layout.steps[t];

        let partial = &mut self.partials[t];
        for agg in &plan.same_table {
            partial[agg.offset] += row[agg.left_col] * row[agg.right_col];
        }
        let sums = &mut self.sums[t];
        for (&key, &col) in step.first_appearing_keys().iter().zip(&step.first_appearing_cols) {
            sums[key] += row[col];
        }
    }

    /// Folds the rows of step `t` listed in `run`, together with everything below them, into the
    /// partial sums of step `t`.
    fn compute(&mut self, t: usize) {
        let Some(snapshot) = self.snapshots[t] else {
            return;
        };
        let elapsed = self.clock - snapshot;
        if elapsed == 0 {
            return;
        }
        let scale = elapsed as f64;

        let relation = self.execution.cursors[t].relation();
        let plan = &self.execution.layout.pushdown[t];
        let step = &self.execution.layout.steps[t];

        let (partials_here, partials_below) = self.partials.split_at_mut(t + 1);
        let (partial, below) = (&mut partials_here[t], &mut partials_below[0]);
        let (sums_here, sums_below) = self.sums.split_at_mut(t + 1);
        let (sums, sums_next) = (&mut sums_here[t], &mut sums_below[0]);

        for &row in &self.run {
            let row = relation.row(row);
            for agg in &plan.same_table {
                partial[agg.offset] += row[agg.left_col] * row[agg.right_col] * scale;
            }
            for (&key, &col) in step.first_appearing_keys().iter().zip(&step.first_appearing_cols) {
                sums_next[key] += row[col];
            }
        }

        for agg in &plan.mixed {
            partial[agg.offset] += sums_next[agg.after] * sums_next[agg.here];
        }

        let rows = self.run.len() as f64;
        for &key in &plan.keys_after {
            sums[key] += rows * sums_next[key];
            sums_next[key] = 0.0;
        }
        for &offset in &plan.later {
            partial[offset] += rows * below[offset];
            below[offset] = 0.0;
        }
        for &key in step.first_appearing_keys() {
            sums[key] += sums_next[key] * scale;
            sums_next[key] = 0.0;
        }

        self.clock += (self.run.len() as u64 - 1) * elapsed;
    }
}

#[cfg(test)]
mod tests {
    use crate::aggregate::{run, run_eager, run_pushdown, Strategy};
    use crate::options::{CursorPolicy, ExecutionOptions};
    use crate::plan::plan_join;
    use crate::relation::Relation;
    use pretty_assertions::assert_eq;

    fn fan_out(m: usize) -> Vec<Relation> {
        vec![
            Relation::new("R1", vec!["A", "B"], vec![vec![1.0, 1.0]]).unwrap(),
            Relation::new(
                "R2",
                vec!["B", "C", "X"],
                (0..m).map(|i| vec![1.0, 5.0, i as f64]).collect(),
            )
            .unwrap(),
            Relation::new(
                "R3",
                vec!["C", "D"],
                (0..10).map(|d| vec![5.0, d as f64]).collect(),
            )
            .unwrap(),
        ]
    }

    #[test]
    fn repeated_join_keys_walk_the_subtree_once() {
        for m in [1, 7, 40] {
            let pushdown = run_pushdown(plan_join(fan_out(m), None).unwrap());
            let eager = run_eager(plan_join(fan_out(m), None).unwrap());

            assert_eq!(pushdown.stats().advances[2], 10, "m = {m}");
            assert_eq!(eager.stats().advances[2], 10 * m as u64, "m = {m}");
            assert_eq!(pushdown.stats().tuples, eager.stats().tuples);
            assert_eq!(pushdown.max_abs_difference(&eager), Some(0.0));
        }
    }

    #[test]
    fn single_relation_sums_its_own_rows() {
        let plan = plan_join(
            vec![Relation::new("T", vec!["x", "y"], vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap()],
            None,
        )
        .unwrap();
        let result = run(plan, Strategy::Pushdown, &ExecutionOptions::default());
        assert_eq!(result.get("x", "y"), Some(14.0));
        assert_eq!(result.get("x", "x"), Some(10.0));
        assert_eq!(result.get("y", "y"), Some(20.0));
        assert_eq!(result.stats().tuples, 2);
    }

    #[test]
    fn empty_relation_yields_zero_sums() {
        let plan = plan_join(
            vec![
                Relation::new("L", vec!["k", "v"], vec![vec![1.0, 2.0]]).unwrap(),
                Relation::new("R", vec!["k", "w"], Vec::<Vec<f64>>::new()).unwrap(),
            ],
            None,
        )
        .unwrap();
        let result = run_pushdown(plan);
        assert_eq!(result.stats().tuples, 0);
        assert!(result.iter().all(|(_, _, sum)| sum == 0.0));
    }

    #[test]
    fn rows_without_partners_do_not_contribute() {
        let relations = || {
            vec![
                Relation::new(
                    "L",
                    vec!["k", "v"],
                    vec![vec![1.0, 2.0], vec![2.0, 5.0], vec![3.0, 7.0]],
                )
                .unwrap(),
                Relation::new("R", vec!["k", "w"], vec![vec![1.0, 10.0], vec![3.0, 100.0]])
                    .unwrap(),
            ]
        };
        let pushdown = run_pushdown(plan_join(relations(), None).unwrap());
        assert_eq!(pushdown.get("v", "w"), Some(2.0 * 10.0 + 7.0 * 100.0));
        assert_eq!(pushdown.stats().tuples, 2);
        let eager = run_eager(plan_join(relations(), None).unwrap());
        assert_eq!(pushdown.max_abs_difference(&eager), Some(0.0));
    }

    #[test]
    fn linear_scan_folds_only_matching_rows() {
        // R's rows for k = 1 are not adjacent; the row in between must not be folded in.
        let relations = || {
            vec![
                Relation::new("L", vec!["k", "v"], vec![vec![1.0, 2.0]]).unwrap(),
                Relation::new(
                    "R",
                    vec!["k", "w"],
                    vec![vec![1.0, 10.0], vec![3.0, 1000.0], vec![1.0, 20.0]],
                )
                .unwrap(),
                Relation::new("S", vec!["v", "z"], vec![vec![2.0, 1.0]]).unwrap(),
            ]
        };
        let options = ExecutionOptions {
            cursor_policy: CursorPolicy::LinearBaseline,
            ..ExecutionOptions::default()
        };

        let pushdown = run(
            plan_join(relations(), None).unwrap(),
            Strategy::Pushdown,
            &options,
        );
        assert_eq!(pushdown.get("w", "w"), Some(500.0));
        assert_eq!(pushdown.get("w", "z"), Some(30.0));
        assert_eq!(pushdown.stats().tuples, 2);

        let eager = run(plan_join(relations(), None).unwrap(), Strategy::Eager, &options);
        assert_eq!(pushdown.max_abs_difference(&eager), Some(0.0));
    }
}
