use crate::driver::{Execution, KeyValues, TupleSink};
use crate::options::ExecutionOptions;
use crate::plan::{AttrKey, JoinPlan};
use crate::pushdown;
use crate::result::AggregateResult;
use crate::triangular::TriangularMatrix;
use std::fmt;
use std::time::Instant;

/// How aggregates are computed on top of the join driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Buffer every join row, then fold the buffer into the result.
    Materialize,
    /// Add every pair product for each join row as it is produced.
    Eager,
    /// Aggregate each pair at the earliest step that determines it and reuse work while the
    /// keys later steps join on repeat.
    Pushdown,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::Materialize, Strategy::Eager, Strategy::Pushdown];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Materialize => "materialize",
            Strategy::Eager => "eager",
            Strategy::Pushdown => "pushdown",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn run_eager(plan: JoinPlan) -> AggregateResult {
    run(plan, Strategy::Eager, &ExecutionOptions::default())
}

pub fn run_pushdown(plan: JoinPlan) -> AggregateResult {
    run(plan, Strategy::Pushdown, &ExecutionOptions::default())
}

pub fn run_materialize(plan: JoinPlan) -> AggregateResult {
    run(plan, Strategy::Materialize, &ExecutionOptions::default())
}

/// Execute `plan` with `strategy`. The plan's relations are sorted in place and consumed.
pub fn run(plan: JoinPlan, strategy: Strategy, options: &ExecutionOptions) -> AggregateResult {
    let started = Instant::now();
    let mut execution = Execution::new(plan, strategy, options);
    let num_keys = execution.layout.num_attributes();

    let matrix = match strategy {
        Strategy::Eager => {
            let mut sink = EagerSink {
                pairs: execution.layout.pairs.clone(),
                matrix: TriangularMatrix::new(num_keys),
            };
            execution.walk(&mut sink);
            sink.matrix
        }
        Strategy::Materialize => {
            let mut sink = MaterializeSink::new(
                execution.layout.pairs.clone(),
                num_keys,
                options.flush_threshold(),
            );
            execution.walk(&mut sink);
            sink.flush();
            execution.stats.flushes = sink.flushes;
            sink.matrix
        }
        Strategy::Pushdown => pushdown::aggregate(&mut execution),
    };

    let Execution {
        layout, mut stats, ..
    } = execution;
    stats.elapsed = started.elapsed();
    log::debug!(
        "{strategy} aggregation over {} join rows finished in {:?} (advances per step: {:?})",
        stats.tuples,
        stats.elapsed,
        stats.advances
    );
    AggregateResult::new(layout, matrix, stats)
}

/// Adds every pair product for each join row.
struct EagerSink {
    pairs: Vec<(AttrKey, AttrKey, usize)>,
    matrix: TriangularMatrix<f64>,
}

impl TupleSink for EagerSink {
    fn accept(&mut self, keys: &KeyValues) {
        for &(a, b, offset) in &self.pairs {
            self.matrix[offset] += keys.get(a) * keys.get(b);
        }
    }
}

/// Copies join rows into a buffer and folds it into the result once it fills up.
struct MaterializeSink {
    pairs: Vec<(AttrKey, AttrKey, usize)>,
    width: usize,
    buffer: Vec<f64>,
    capacity_rows: usize,
    matrix: TriangularMatrix<f64>,
    flushes: u64,
}

impl MaterializeSink {
    fn new(pairs: Vec<(AttrKey, AttrKey, usize)>, width: usize, capacity_rows: usize) -> Self {
        Self {
            pairs,
            width,
            buffer: Vec::new(),
            capacity_rows,
            matrix: TriangularMatrix::new(width),
            flushes: 0,
        }
    }

    fn buffered_rows(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.buffer.len() / self.width
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        log::trace!("folding {} materialized join rows", self.buffered_rows());
        for row in self.buffer.chunks_exact(self.width) {
            for &(a, b, offset) in &self.pairs {
                self.matrix[offset] += row[a] * row[b];
            }
        }
        self.buffer.clear();
        self.flushes += 1;
    }
}

impl TupleSink for MaterializeSink {
    fn accept(&mut self, keys: &KeyValues) {
        self.buffer.extend_from_slice(keys.as_slice());
        if self.buffered_rows() >= self.capacity_rows {
            self.flush();
        }
    }
}
