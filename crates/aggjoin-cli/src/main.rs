use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use aggjoin::{
    load_delimited, plan_join, run, AggregateResult, CursorKind, CursorPolicy, ExecutionOptions,
    JoinPlan, Strategy,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

#[derive(Debug, Parser)]
#[command(name = "aggjoin")]
#[command(about = "Compute SUM(a*b) for attribute pairs over the natural join of delimited files.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one aggregation strategy and print the pair sums.
    Run(RunArgs),
    /// Print the join order, join keys and cursor kinds without executing anything.
    Plan(InputArgs),
    /// Run every strategy and check that they agree.
    Compare(CompareArgs),
}

#[derive(Debug, Args)]
struct InputArgs {
    /// Relation to join, as `NAME=PATH:COL1,COL2,...`. Repeat for every relation.
    #[arg(long = "relation", required = true)]
    relations: Vec<RelationArg>,

    /// Only aggregate these pairs, as `A,B`. Defaults to every pair.
    #[arg(long = "pair")]
    pairs: Vec<PairArg>,

    /// Field separator of the input files: one ASCII character, or `\t` for tabs.
    #[arg(long, value_parser = parse_separator, default_value = "|")]
    separator: u8,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    input: InputArgs,

    #[arg(long, value_enum, default_value_t = StrategyArg::Pushdown)]
    strategy: StrategyArg,

    /// Use unsorted linear scans for every relation after the first (baseline only).
    #[arg(long = "linear-baseline")]
    linear_baseline: bool,

    /// Join rows the materialize strategy buffers before folding them.
    #[arg(long = "flush-rows")]
    flush_rows: Option<usize>,

    /// Emit a JSON report instead of `SUM(a*b) = value` lines.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct CompareArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Largest accepted difference, relative to the largest absolute sum (or 1).
    #[arg(long, default_value_t = 1e-9)]
    tolerance: f64,

    /// Also run every strategy with linear scans.
    #[arg(long = "linear-baseline")]
    linear_baseline: bool,

    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Pushdown,
    Eager,
    Materialize,
}

impl From<StrategyArg> for Strategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Pushdown => Strategy::Pushdown,
            StrategyArg::Eager => Strategy::Eager,
            StrategyArg::Materialize => Strategy::Materialize,
        }
    }
}

#[derive(Debug, Clone)]
struct RelationArg {
    name: String,
    path: PathBuf,
    columns: Vec<String>,
}

impl FromStr for RelationArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) = s
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=PATH:COLUMNS, got {s:?}"))?;
        let (path, columns) = rest
            .rsplit_once(':')
            .ok_or_else(|| format!("missing :COLUMNS in {s:?}"))?;
        let columns: Vec<String> = columns
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        if name.trim().is_empty() || path.is_empty() || columns.is_empty() {
            return Err(format!("expected NAME=PATH:COLUMNS, got {s:?}"));
        }
        Ok(Self {
            name: name.trim().to_string(),
            path: PathBuf::from(path),
            columns,
        })
    }
}

fn parse_separator(s: &str) -> Result<u8, String> {
    match s.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        b"\\t" => Ok(b'\t'),
        _ => Err(format!("separator must be a single ASCII character, got {s:?}")),
    }
}

#[derive(Debug, Clone)]
struct PairArg(String, String);

impl FromStr for PairArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(',') {
            Some((a, b)) if !a.trim().is_empty() && !b.trim().is_empty() => {
                Ok(Self(a.trim().to_string(), b.trim().to_string()))
            }
            _ => Err(format!("expected a pair as A,B, got {s:?}")),
        }
    }
}

#[derive(Debug, Serialize)]
struct PairSum {
    a: String,
    b: String,
    sum: f64,
}

#[derive(Debug, Serialize)]
struct RunReport {
    strategy: String,
    join_order: Vec<String>,
    cursor_kinds: Vec<String>,
    tuples: u64,
    advances: Vec<u64>,
    flushes: u64,
    elapsed_ms: f64,
    sums: Vec<PairSum>,
}

impl RunReport {
    fn new(join_order: &[String], result: &AggregateResult) -> Self {
        let stats = result.stats();
        Self {
            strategy: stats.strategy.to_string(),
            join_order: join_order.to_vec(),
            cursor_kinds: stats.cursor_kinds.iter().map(|k| kind_name(*k).to_string()).collect(),
            tuples: stats.tuples,
            advances: stats.advances.clone(),
            flushes: stats.flushes,
            elapsed_ms: stats.elapsed.as_secs_f64() * 1_000.0,
            sums: result
                .iter()
                .map(|(a, b, sum)| PairSum {
                    a: a.to_string(),
                    b: b.to_string(),
                    sum,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CompareReport {
    runs: Vec<RunReport>,
    max_abs_difference: f64,
    tolerance: f64,
    agree: bool,
}

fn kind_name(kind: CursorKind) -> &'static str {
    match kind {
        CursorKind::Start => "start",
        CursorKind::SortMerge => "sort-merge",
        CursorKind::BinarySearch => "binary-search",
        CursorKind::Linear => "linear",
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_command(args),
        Command::Plan(args) => plan_command(args),
        Command::Compare(args) => compare_command(args),
    }
}

fn build_plan(input: &InputArgs) -> Result<JoinPlan> {
    let mut relations = Vec::with_capacity(input.relations.len());
    for arg in &input.relations {
        let columns: Vec<&str> = arg.columns.iter().map(String::as_str).collect();
        let started = Instant::now();
        let relation = load_delimited(&arg.path, input.separator, &columns, &arg.name)
            .with_context(|| format!("load relation {} from {}", arg.name, arg.path.display()))?;
        log::info!(
            "loaded {} ({} rows) in {:?}",
            arg.name,
            relation.row_count(),
            started.elapsed()
        );
        relations.push(relation);
    }

    let pairs: Vec<(&str, &str)> = input
        .pairs
        .iter()
        .map(|PairArg(a, b)| (a.as_str(), b.as_str()))
        .collect();
    let requested = if pairs.is_empty() {
        None
    } else {
        Some(pairs.as_slice())
    };
    plan_join(relations, requested).context("plan join")
}

fn join_order(plan: &JoinPlan) -> Vec<String> {
    plan.join_order().into_iter().map(str::to_string).collect()
}

fn run_command(args: RunArgs) -> Result<()> {
    let plan = build_plan(&args.input)?;
    let order = join_order(&plan);
    let mut options = ExecutionOptions::default();
    if args.linear_baseline {
        options.cursor_policy = CursorPolicy::LinearBaseline;
    }
    if let Some(rows) = args.flush_rows {
        options.materialize_flush_rows = rows;
    }

    let result = run(plan, args.strategy.into(), &options);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&RunReport::new(&order, &result))?);
    } else {
        print!("{result}");
    }
    Ok(())
}

fn plan_command(args: InputArgs) -> Result<()> {
    let plan = build_plan(&args)?;
    for (t, step) in plan.steps().iter().enumerate() {
        let keys: Vec<&str> = step
            .join_keys()
            .iter()
            .filter_map(|&k| plan.attribute_name(k))
            .collect();
        println!(
            "{t}: {} [{}] joins on ({})",
            step.relation(),
            kind_name(step.cursor_kind()),
            keys.join(", ")
        );
    }
    Ok(())
}

fn compare_command(args: CompareArgs) -> Result<()> {
    let plan = build_plan(&args.input)?;
    let order = join_order(&plan);

    let mut policies = vec![CursorPolicy::Planned];
    if args.linear_baseline {
        policies.push(CursorPolicy::LinearBaseline);
    }

    let mut results: Vec<AggregateResult> = Vec::new();
    for policy in policies {
        let options = ExecutionOptions {
            cursor_policy: policy,
            ..ExecutionOptions::default()
        };
        for strategy in Strategy::ALL {
            results.push(run(plan.clone(), strategy, &options));
        }
    }

    let reference = results
        .first()
        .ok_or_else(|| anyhow!("no strategy was run"))?;
    let mut max_diff = 0.0f64;
    for result in &results[1..] {
        let diff = result
            .max_abs_difference(reference)
            .ok_or_else(|| anyhow!("{} produced a different set of pairs", result.stats().strategy))?;
        max_diff = max_diff.max(diff);
    }
    let scale = reference
        .iter()
        .map(|(_, _, sum)| sum.abs())
        .fold(1.0f64, f64::max);
    let agree = max_diff <= args.tolerance * scale;

    if args.json {
        let report = CompareReport {
            runs: results.iter().map(|r| RunReport::new(&order, r)).collect(),
            max_abs_difference: max_diff,
            tolerance: args.tolerance,
            agree,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for result in &results {
            let stats = result.stats();
            let linear = stats.cursor_kinds.contains(&CursorKind::Linear);
            println!(
                "{:<12} {:<8} tuples={} elapsed={:?}",
                stats.strategy.name(),
                if linear { "linear" } else { "planned" },
                stats.tuples,
                stats.elapsed
            );
        }
        println!("max abs difference: {max_diff}");
    }

    if !agree {
        bail!("strategies disagree: max abs difference {max_diff} exceeds tolerance");
    }
    Ok(())
}
