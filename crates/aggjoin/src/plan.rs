use crate::cursor::CursorKind;
use crate::error::{JoinError, JoinResult};
use crate::relation::Relation;
use crate::triangular::triangular_offset;
use std::collections::{BTreeSet, HashMap};

/// Integer identity of a distinct attribute name across all relations of a plan.
pub type AttrKey = usize;

/// Per-step bookkeeping for one relation of the join order.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinStep {
    relation: String,
    join_keys: Vec<AttrKey>,
    pub(crate) join_cols: Vec<usize>,
    sort_cols: Vec<usize>,
    pub(crate) remembered_cols: Vec<usize>,
    first_appearing_keys: Vec<AttrKey>,
    pub(crate) first_appearing_cols: Vec<usize>,
    pub(crate) join_keys_after: Vec<bool>,
    cursor: CursorKind,
}

impl JoinStep {
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Attribute keys shared with the relations before this step, ascending.
    pub fn join_keys(&self) -> &[AttrKey] {
        &self.join_keys
    }

    /// Columns the relation is physically sorted on before execution.
    pub fn sort_cols(&self) -> &[usize] {
        &self.sort_cols
    }

    /// Attribute keys whose first occurrence in the join order is this step.
    pub fn first_appearing_keys(&self) -> &[AttrKey] {
        &self.first_appearing_keys
    }

    pub fn cursor_kind(&self) -> CursorKind {
        self.cursor
    }

    /// Whether `key` is a join key of some later step.
    pub fn is_join_key_after(&self, key: AttrKey) -> bool {
        self.join_keys_after.get(key).copied().unwrap_or(false)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SameTableAgg {
    pub(crate) offset: usize,
    pub(crate) left_col: usize,
    pub(crate) right_col: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MixedAgg {
    pub(crate) after: AttrKey,
    pub(crate) here: AttrKey,
    pub(crate) offset: usize,
}

/// Instructions the pushdown strategy follows at one step; computed once so the hot loop never
/// has to decide which aggregates a row contributes to.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct PushdownStep {
    /// Keys first appearing strictly after this step.
    pub(crate) keys_after: Vec<AttrKey>,
    /// Pairs first appearing together at this step.
    pub(crate) same_table: Vec<SameTableAgg>,
    /// Pairs with one key from this step and one from a later step.
    pub(crate) mixed: Vec<MixedAgg>,
    /// Offsets of pairs that both first appear after this step.
    pub(crate) later: Vec<usize>,
}

/// Everything an execution needs besides the relations themselves.
#[derive(Clone, Debug)]
pub(crate) struct PlanLayout {
    pub(crate) attributes: Vec<String>,
    pub(crate) attribute_index: HashMap<String, AttrKey>,
    pub(crate) steps: Vec<JoinStep>,
    pub(crate) requested: Option<Vec<(AttrKey, AttrKey)>>,
    /// `(k1, k2, offset)` for every aggregated pair, `k1 <= k2`.
    pub(crate) pairs: Vec<(AttrKey, AttrKey, usize)>,
    pub(crate) pushdown: Vec<PushdownStep>,
}

impl PlanLayout {
    pub(crate) fn num_attributes(&self) -> usize {
        self.attributes.len()
    }
}

/// A planned join: relations in join order plus all precomputed bookkeeping.
///
/// Executing a plan consumes it because cursors sort their relations in place. Clone the plan to
/// run it again.
#[derive(Clone, Debug)]
pub struct JoinPlan {
    pub(crate) layout: PlanLayout,
    pub(crate) relations: Vec<Relation>,
}

impl JoinPlan {
    /// Attribute names indexed by [`AttrKey`].
    pub fn attributes(&self) -> &[String] {
        &self.layout.attributes
    }

    pub fn num_attributes(&self) -> usize {
        self.layout.num_attributes()
    }

    pub fn attribute_key(&self, name: &str) -> Option<AttrKey> {
        self.layout.attribute_index.get(name).copied()
    }

    pub fn attribute_name(&self, key: AttrKey) -> Option<&str> {
        self.layout.attributes.get(key).map(String::as_str)
    }

    pub fn steps(&self) -> &[JoinStep] {
        &self.layout.steps
    }

    /// Relation names in join order.
    pub fn join_order(&self) -> Vec<&str> {
        self.relations.iter().map(Relation::name).collect()
    }

    /// Relations in join order.
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Requested pairs as `(k1, k2)` with `k1 <= k2`, or `None` when every pair is aggregated.
    pub fn requested_pairs(&self) -> Option<&[(AttrKey, AttrKey)]> {
        self.layout.requested.as_deref()
    }

    pub(crate) fn into_parts(self) -> (PlanLayout, Vec<Relation>) {
        (self.layout, self.relations)
    }
}

/// Plan the natural join of `relations`.
///
/// With `requested_pairs`, only `SUM(a * b)` for the listed attribute-name pairs is computed;
/// otherwise every pair is.
pub fn plan_join(
    mut relations: Vec<Relation>,
    requested_pairs: Option<&[(&str, &str)]>,
) -> JoinResult<JoinPlan> {
    if relations.is_empty() {
        return Err(JoinError::EmptyJoin);
    }

    let (attributes, attribute_index) = assign_attribute_keys(&mut relations);
    let num_keys = attributes.len();

    let requested = match requested_pairs {
        Some(pairs) => Some(resolve_pairs(pairs, &attribute_index)?),
        None => None,
    };

    let (relations, join_keys) = choose_join_order(relations)?;
    let sort_cols = sort_columns(&relations, &join_keys);
    let first_appearing = first_appearing_keys(&relations, num_keys);
    let join_keys_after = join_keys_after(&join_keys, num_keys);
    let cursors = cursor_kinds(&join_keys);

    let steps: Vec<JoinStep> = relations
        .iter()
        .enumerate()
        .map(|(t, relation)| {
            let join_cols = columns_for(relation, &join_keys[t]);
            let remembered_cols = if t == 0 {
                join_keys
                    .get(1)
                    .map(|next| columns_for(relation, next))
                    .unwrap_or_default()
            } else {
                join_cols.clone()
            };
            JoinStep {
                relation: relation.name().to_string(),
                join_keys: join_keys[t].clone(),
                join_cols,
                sort_cols: sort_cols[t].clone(),
                remembered_cols,
                first_appearing_cols: columns_for(relation, &first_appearing[t]),
                first_appearing_keys: first_appearing[t].clone(),
                join_keys_after: join_keys_after[t].clone(),
                cursor: cursors[t],
            }
        })
        .collect();

    let pairs = aggregated_pairs(num_keys, requested.as_deref());
    let pushdown = pushdown_steps(&steps, num_keys, requested.as_deref());

    log::debug!(
        "planned join over {} relations and {} attributes: {}",
        relations.len(),
        num_keys,
        steps
            .iter()
            .map(|s| format!("{}({:?})", s.relation, s.cursor))
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    Ok(JoinPlan {
        layout: PlanLayout {
            attributes,
            attribute_index,
            steps,
            requested,
            pairs,
            pushdown,
        },
        relations,
    })
}

fn assign_attribute_keys(relations: &mut [Relation]) -> (Vec<String>, HashMap<String, AttrKey>) {
    let mut attributes: Vec<String> = Vec::new();
    let mut index: HashMap<String, AttrKey> = HashMap::new();

    for relation in relations.iter_mut() {
        let keys = relation
            .schema()
            .iter()
            .map(|name| {
                *index.entry(name.clone()).or_insert_with(|| {
                    attributes.push(name.clone());
                    attributes.len() - 1
                })
            })
            .collect();
        relation.assign_keys(keys);
    }

    (attributes, index)
}

fn resolve_pairs(
    pairs: &[(&str, &str)],
    index: &HashMap<String, AttrKey>,
) -> JoinResult<Vec<(AttrKey, AttrKey)>> {
    let lookup = |name: &str| {
        index
            .get(name)
            .copied()
            .ok_or_else(|| JoinError::UnknownAttribute(name.to_string()))
    };

    let mut resolved: Vec<(AttrKey, AttrKey)> = Vec::with_capacity(pairs.len());
    for &(a, b) in pairs {
        let (a, b) = (lookup(a)?, lookup(b)?);
        let pair = (a.min(b), a.max(b));
        if !resolved.contains(&pair) {
            resolved.push(pair);
        }
    }
    Ok(resolved)
}

/// Greedy join order: start from the first relation, then repeatedly take the first remaining
/// relation joining on the same keys as the previous step, falling back to the first relation
/// sharing any key with the accumulated schema.
fn choose_join_order(relations: Vec<Relation>) -> JoinResult<(Vec<Relation>, Vec<Vec<AttrKey>>)> {
    let mut remaining: Vec<Option<Relation>> = relations.into_iter().map(Some).collect();
    let mut order: Vec<Relation> = Vec::with_capacity(remaining.len());
    let mut join_keys: Vec<Vec<AttrKey>> = Vec::with_capacity(remaining.len());

    let first = remaining[0].take().expect("relations is non-empty");
    let mut schema: BTreeSet<AttrKey> = first.keys().iter().copied().collect();
    order.push(first);
    join_keys.push(Vec::new());

    let mut last_shared: Option<BTreeSet<AttrKey>> = None;

    while order.len() < remaining.len() {
        let mut best: Option<(usize, BTreeSet<AttrKey>)> = None;
        for (idx, candidate) in remaining.iter().enumerate() {
            let Some(candidate) = candidate else {
                continue;
            };
            let shared: BTreeSet<AttrKey> = candidate
                .keys()
                .iter()
                .copied()
                .filter(|key| schema.contains(key))
                .collect();
            if shared.is_empty() {
                continue;
            }
            if last_shared.as_ref() == Some(&shared) {
                best = Some((idx, shared));
                break;
            }
            if best.is_none() {
                best = Some((idx, shared));
            }
        }

        let Some((idx, shared)) = best else {
            let relation = remaining
                .iter()
                .flatten()
                .next()
                .map(|r| r.name().to_string())
                .unwrap_or_default();
            return Err(JoinError::DisconnectedSchema {
                relation,
                placed: order.iter().map(|r| r.name().to_string()).collect(),
            });
        };

        let relation = remaining[idx].take().expect("candidate is still unplaced");
        schema.extend(relation.keys().iter().copied());
        // BTreeSet iteration is ascending, which is the canonical join key order.
        join_keys.push(shared.iter().copied().collect());
        last_shared = Some(shared);
        order.push(relation);
    }

    Ok((order, join_keys))
}

/// Sort order per step: the step's own join columns first, then columns later steps join on, in
/// the order they are needed. The start relation is sorted for the steps after it.
fn sort_columns(relations: &[Relation], join_keys: &[Vec<AttrKey>]) -> Vec<Vec<usize>> {
    relations
        .iter()
        .enumerate()
        .map(|(t, relation)| {
            let mut cols: Vec<usize> = Vec::new();
            for keys in &join_keys[t.max(1)..] {
                for &key in keys {
                    if let Some(col) = relation.key_to_col(key) {
                        if !cols.contains(&col) {
                            cols.push(col);
                        }
                    }
                }
            }
            cols
        })
        .collect()
}

fn first_appearing_keys(relations: &[Relation], num_keys: usize) -> Vec<Vec<AttrKey>> {
    let mut seen = vec![false; num_keys];
    relations
        .iter()
        .map(|relation| {
            relation
                .keys()
                .iter()
                .copied()
                .filter(|&key| !std::mem::replace(&mut seen[key], true))
                .collect()
        })
        .collect()
}

fn join_keys_after(join_keys: &[Vec<AttrKey>], num_keys: usize) -> Vec<Vec<bool>> {
    let mut after = vec![vec![false; num_keys]; join_keys.len()];
    for t in (0..join_keys.len().saturating_sub(1)).rev() {
        let (head, tail) = after.split_at_mut(t + 1);
        head[t].clone_from(&tail[0]);
        for &key in &join_keys[t + 1] {
            head[t][key] = true;
        }
    }
    after
}

fn cursor_kinds(join_keys: &[Vec<AttrKey>]) -> Vec<CursorKind> {
    let mut merging = true;
    join_keys
        .iter()
        .enumerate()
        .map(|(t, keys)| match t {
            0 => CursorKind::Start,
            1 => CursorKind::SortMerge,
            _ if merging && *keys == join_keys[t - 1] => CursorKind::SortMerge,
            _ => {
                merging = false;
                CursorKind::BinarySearch
            }
        })
        .collect()
}

fn columns_for(relation: &Relation, keys: &[AttrKey]) -> Vec<usize> {
    keys.iter()
        .map(|&key| {
            relation
                .key_to_col(key)
                .expect("planned keys always belong to the relation")
        })
        .collect()
}

fn aggregated_pairs(
    num_keys: usize,
    requested: Option<&[(AttrKey, AttrKey)]>,
) -> Vec<(AttrKey, AttrKey, usize)> {
    match requested {
        Some(pairs) => pairs
            .iter()
            .map(|&(a, b)| (a, b, triangular_offset(num_keys, a, b)))
            .collect(),
        None => (0..num_keys)
            .flat_map(|a| (a..num_keys).map(move |b| (a, b)))
            .map(|(a, b)| (a, b, triangular_offset(num_keys, a, b)))
            .collect(),
    }
}

fn pushdown_steps(
    steps: &[JoinStep],
    num_keys: usize,
    requested: Option<&[(AttrKey, AttrKey)]>,
) -> Vec<PushdownStep> {
    let wanted = |a: AttrKey, b: AttrKey| {
        requested.map_or(true, |pairs| pairs.contains(&(a.min(b), a.max(b))))
    };

    let mut keys_after: BTreeSet<AttrKey> = BTreeSet::new();
    let mut out = vec![PushdownStep::default(); steps.len()];

    for (t, step) in steps.iter().enumerate().rev() {
        let after: Vec<AttrKey> = keys_after.iter().copied().collect();
        let here: Vec<(AttrKey, usize)> = step
            .first_appearing_keys
            .iter()
            .copied()
            .zip(step.first_appearing_cols.iter().copied())
            .collect();

        let later = after
            .iter()
            .enumerate()
            .flat_map(|(i, &a)| after[i..].iter().map(move |&b| (a, b)))
            .filter(|&(a, b)| wanted(a, b))
            .map(|(a, b)| triangular_offset(num_keys, a, b))
            .collect();

        let mut mixed = Vec::new();
        for &a in &after {
            for &(h, _) in &here {
                if wanted(a, h) {
                    mixed.push(MixedAgg {
                        after: a,
                        here: h,
                        offset: triangular_offset(num_keys, a, h),
                    });
                }
            }
        }

        let mut same_table = Vec::new();
        for &(k1, c1) in &here {
            for &(k2, c2) in &here {
                if k2 < k1 || !wanted(k1, k2) {
                    continue;
                }
                same_table.push(SameTableAgg {
                    offset: triangular_offset(num_keys, k1, k2),
                    left_col: c1,
                    right_col: c2,
                });
            }
        }

        out[t] = PushdownStep {
            keys_after: after,
            same_table,
            mixed,
            later,
        };
        keys_after.extend(step.first_appearing_keys.iter().copied());
    }

    debug_assert_eq!(keys_after.len(), num_keys);
    out
}
