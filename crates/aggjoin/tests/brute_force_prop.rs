use aggjoin::{plan_join, run, CursorPolicy, ExecutionOptions, Relation};
use proptest::prelude::*;
use std::collections::HashMap;

const ATTRIBUTES: [&str; 6] = ["A", "B", "C", "D", "E", "F"];

/// A generated relation: a bit mask over `ATTRIBUTES` plus full-width rows that get projected
/// onto the mask.
type RawRelation = (u8, Vec<Vec<u8>>);

fn arb_relation() -> impl Strategy<Value = RawRelation> {
    (
        1u8..64,
        proptest::collection::vec(proptest::collection::vec(0u8..3, ATTRIBUTES.len()), 0..6),
    )
}

/// Turn generated input into relations whose join graph is connected: a relation that shares no
/// attribute with the ones before it borrows the lowest attribute they cover.
fn build(raw: &[RawRelation]) -> Vec<(String, Vec<&'static str>, Vec<Vec<f64>>)> {
    let mut covered = 0u8;
    raw.iter()
        .enumerate()
        .map(|(idx, (mask, rows))| {
            let mut mask = *mask;
            if idx > 0 && mask & covered == 0 {
                mask |= covered & covered.wrapping_neg();
            }
            covered |= mask;

            let columns: Vec<usize> = (0..ATTRIBUTES.len())
                .filter(|&c| mask & (1u8 << c) != 0)
                .collect();
            let schema = columns.iter().map(|&c| ATTRIBUTES[c]).collect();
            let rows = rows
                .iter()
                .map(|row| columns.iter().map(|&c| f64::from(row[c])).collect())
                .collect();
            (format!("R{idx}"), schema, rows)
        })
        .collect()
}

fn relations(built: &[(String, Vec<&'static str>, Vec<Vec<f64>>)]) -> Vec<Relation> {
    built
        .iter()
        .map(|(name, schema, rows)| {
            Relation::new(name.as_str(), schema.clone(), rows.clone()).unwrap()
        })
        .collect()
}

/// Nested-loop natural join, aggregated by attribute name pair.
fn brute_force(
    built: &[(String, Vec<&'static str>, Vec<Vec<f64>>)],
) -> (u64, HashMap<(&'static str, &'static str), f64>) {
    let mut tuples: Vec<HashMap<&'static str, f64>> = vec![HashMap::new()];
    for (_, schema, rows) in built {
        let mut extended = Vec::new();
        for tuple in &tuples {
            for row in rows {
                let consistent = schema
                    .iter()
                    .zip(row)
                    .all(|(attr, value)| tuple.get(attr).map_or(true, |v| v == value));
                if consistent {
                    let mut next = tuple.clone();
                    next.extend(schema.iter().copied().zip(row.iter().copied()));
                    extended.push(next);
                }
            }
        }
        tuples = extended;
    }

    let mut attributes: Vec<&'static str> = Vec::new();
    for (_, schema, _) in built {
        for attr in schema {
            if !attributes.contains(attr) {
                attributes.push(*attr);
            }
        }
    }

    let mut sums = HashMap::new();
    for (i, &a) in attributes.iter().enumerate() {
        for &b in &attributes[i..] {
            let sum = tuples.iter().map(|t| t[a] * t[b]).sum::<f64>();
            sums.insert((a, b), sum);
        }
    }
    (tuples.len() as u64, sums)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn strategies_match_nested_loop_join(raw in proptest::collection::vec(arb_relation(), 1..5)) {
        let built = build(&raw);
        let (cardinality, expected) = brute_force(&built);

        for strategy in aggjoin::Strategy::ALL {
            for cursor_policy in [CursorPolicy::Planned, CursorPolicy::LinearBaseline] {
                let options = ExecutionOptions { cursor_policy, ..ExecutionOptions::default() };
                let plan = plan_join(relations(&built), None).unwrap();
                let result = run(plan, strategy, &options);

                prop_assert_eq!(result.stats().tuples, cardinality);
                for (&(a, b), &sum) in &expected {
                    let actual = result.get(a, b).unwrap();
                    prop_assert!(
                        (actual - sum).abs() < 1e-6,
                        "{} / {:?}: SUM({}*{}) = {} but expected {}",
                        strategy, cursor_policy, a, b, actual, sum
                    );
                }
            }
        }
    }

    #[test]
    fn requested_pairs_are_a_subset_of_all_pairs(
        raw in proptest::collection::vec(arb_relation(), 1..5),
        picks in proptest::collection::vec((0usize..6, 0usize..6), 1..4),
    ) {
        let built = build(&raw);
        let (_, expected) = brute_force(&built);
        let present: Vec<&str> = {
            let mut names: Vec<&str> = expected.keys().map(|&(a, _)| a).collect();
            names.sort_unstable();
            names.dedup();
            names
        };
        let requested: Vec<(&str, &str)> = picks
            .iter()
            .map(|&(i, j)| (present[i % present.len()], present[j % present.len()]))
            .collect();

        let plan = plan_join(relations(&built), Some(requested.as_slice())).unwrap();
        let result = aggjoin::run_pushdown(plan);
        for &(a, b) in &requested {
            let sum = expected
                .get(&(a, b))
                .or_else(|| expected.get(&(b, a)))
                .copied()
                .unwrap();
            prop_assert!((result.get(a, b).unwrap() - sum).abs() < 1e-6);
        }
    }
}
