use crate::error::{JoinError, JoinResult};
use crate::plan::AttrKey;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::collections::HashMap;

/// A rectangular numeric relation with a named schema.
///
/// Relations are sorted in place by the cursor that owns them during an execution; nothing else
/// mutates them. `sorted_by` may be shorter than the column list the rows were physically sorted
/// on, which lets searches only consider the leading join columns.
#[derive(Clone, Debug)]
pub struct Relation {
    name: String,
    schema: Vec<String>,
    column_index: HashMap<String, usize>,
    rows: Vec<Vec<f64>>,
    keys: Vec<AttrKey>,
    sorted_by: Option<Vec<usize>>,
}

impl Relation {
    pub fn new(
        name: impl Into<String>,
        schema: Vec<impl Into<String>>,
        rows: Vec<Vec<f64>>,
    ) -> JoinResult<Self> {
        let name = name.into();
        let schema: Vec<String> = schema.into_iter().map(Into::into).collect();

        let mut column_index = HashMap::with_capacity(schema.len());
        for (idx, column) in schema.iter().enumerate() {
            if column_index.insert(column.clone(), idx).is_some() {
                return Err(JoinError::DuplicateColumn {
                    relation: name,
                    column: column.clone(),
                });
            }
        }

        if let Some((row, values)) = rows
            .iter()
            .enumerate()
            .find(|(_, values)| values.len() != schema.len())
        {
            return Err(JoinError::RowWidthMismatch {
                relation: name,
                row,
                expected: schema.len(),
                actual: values.len(),
            });
        }

        Ok(Self {
            name,
            schema,
            column_index,
            rows,
            keys: Vec::new(),
            sorted_by: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.schema.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_idx(&self, column: &str) -> Option<usize> {
        self.column_index.get(column).copied()
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.rows[row]
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[f64]> + '_ {
        self.rows.iter().map(Vec::as_slice)
    }

    pub fn value_at(&self, row: usize, col: usize) -> f64 {
        self.rows[row][col]
    }

    /// Columns the relation is currently considered sorted on.
    pub fn sorted_by(&self) -> Option<&[usize]> {
        self.sorted_by.as_deref()
    }

    /// Sort rows by `columns` and remember the relation as sorted on `columns`.
    pub fn sort_by(&mut self, columns: &[usize]) {
        self.sort(columns, columns);
    }

    /// Sort rows by `columns` but only remember `remembered` (a prefix of `columns`) as the sort
    /// key.
    pub fn sort(&mut self, columns: &[usize], remembered: &[usize]) {
        debug_assert!(
            columns.starts_with(remembered),
            "remembered sort columns must prefix the physical sort order"
        );
        self.rows.sort_by(|a, b| compare_rows(a, b, columns));
        self.sorted_by = Some(remembered.to_vec());
    }

    /// Index of the first row whose `sorted_by` columns equal `key`.
    ///
    /// `key[i]` holds the value for `sorted_by()[i]`. Returns `None` when the relation was never
    /// sorted or no row matches.
    pub fn binary_search(&self, key: &[f64]) -> Option<usize> {
        let columns = self.sorted_by.as_deref()?;
        debug_assert_eq!(columns.len(), key.len());
        let first = self
            .rows
            .partition_point(|row| compare_prefix(row, columns, key) == Ordering::Less);
        (first < self.rows.len() && self.matches(first, columns, key)).then_some(first)
    }

    /// Index of the first row at or after `start` whose `columns` equal `key`, by linear scan.
    pub fn find_after(&self, columns: &[usize], key: &[f64], start: usize) -> Option<usize> {
        (start..self.rows.len()).find(|&row| self.matches(row, columns, key))
    }

    pub(crate) fn matches(&self, row: usize, columns: &[usize], key: &[f64]) -> bool {
        let values = &self.rows[row];
        columns
            .iter()
            .zip(key)
            .all(|(&col, &value)| same_value(values[col], value))
    }

    pub(crate) fn compare_row_with_key(&self, row: usize, columns: &[usize], key: &[f64]) -> Ordering {
        compare_prefix(&self.rows[row], columns, key)
    }

    pub(crate) fn assign_keys(&mut self, keys: Vec<AttrKey>) {
        debug_assert_eq!(keys.len(), self.schema.len());
        self.keys = keys;
    }

    /// Attribute keys per column, assigned by the planner.
    pub(crate) fn keys(&self) -> &[AttrKey] {
        &self.keys
    }

    pub(crate) fn key_to_col(&self, key: AttrKey) -> Option<usize> {
        self.keys.iter().position(|&k| k == key)
    }
}

/// Equality under the same total order used for sorting, so NaN keys match each other.
#[inline]
pub(crate) fn same_value(a: f64, b: f64) -> bool {
    OrderedFloat(a) == OrderedFloat(b)
}

fn compare_rows(a: &[f64], b: &[f64], columns: &[usize]) -> Ordering {
    for &col in columns {
        let ord = OrderedFloat(a[col]).cmp(&OrderedFloat(b[col]));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_prefix(row: &[f64], columns: &[usize], key: &[f64]) -> Ordering {
    for (&col, &value) in columns.iter().zip(key) {
        let ord = OrderedFloat(row[col]).cmp(&OrderedFloat(value));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn relation() -> Relation {
        Relation::new(
            "R",
            vec!["a", "b", "c"],
            vec![
                vec![2.0, 1.0, 9.0],
                vec![1.0, 5.0, 8.0],
                vec![2.0, 0.0, 7.0],
                vec![1.0, 5.0, 6.0],
                vec![3.0, 4.0, 5.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn sort_remembers_only_the_requested_prefix() {
        let mut rel = relation();
        rel.sort(&[0, 1], &[0]);
        assert_eq!(rel.sorted_by(), Some(&[0usize][..]));
        let firsts: Vec<(f64, f64)> = rel.rows().map(|r| (r[0], r[1])).collect();
        assert_eq!(
            firsts,
            vec![(1.0, 5.0), (1.0, 5.0), (2.0, 0.0), (2.0, 1.0), (3.0, 4.0)]
        );
    }

    #[test]
    fn binary_search_returns_first_matching_row() {
        let mut rel = relation();
        rel.sort_by(&[0]);
        assert_eq!(rel.binary_search(&[1.0]), Some(0));
        assert_eq!(rel.binary_search(&[2.0]), Some(2));
        assert_eq!(rel.binary_search(&[3.0]), Some(4));
        assert_eq!(rel.binary_search(&[0.5]), None);
        assert_eq!(rel.binary_search(&[4.0]), None);
    }

    #[test]
    fn binary_search_requires_a_sort_order() {
        let rel = relation();
        assert_eq!(rel.binary_search(&[1.0]), None);
    }

    #[test]
    fn find_after_scans_linearly() {
        let rel = relation();
        assert_eq!(rel.find_after(&[0, 1], &[1.0, 5.0], 0), Some(1));
        assert_eq!(rel.find_after(&[0, 1], &[1.0, 5.0], 2), Some(3));
        assert_eq!(rel.find_after(&[0, 1], &[1.0, 5.0], 4), None);
    }

    #[test]
    fn nan_keys_match_under_every_search() {
        let mut rel = Relation::new(
            "R",
            vec!["k", "v"],
            vec![vec![f64::NAN, 1.0], vec![2.0, 2.0], vec![f64::NAN, 3.0]],
        )
        .unwrap();
        assert_eq!(rel.find_after(&[0], &[f64::NAN], 0), Some(0));
        assert_eq!(rel.find_after(&[0], &[f64::NAN], 1), Some(2));
        rel.sort_by(&[0]);
        assert_eq!(rel.binary_search(&[f64::NAN]), Some(1));
        assert_eq!(rel.binary_search(&[2.0]), Some(0));
    }

    #[test]
    fn rejects_ragged_rows_and_duplicate_columns() {
        let err = Relation::new("R", vec!["a", "b"], vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(
            err,
            JoinError::RowWidthMismatch {
                row: 1,
                expected: 2,
                actual: 1,
                ..
            }
        ));

        let err = Relation::new("R", vec!["a", "a"], Vec::new()).unwrap_err();
        assert!(matches!(err, JoinError::DuplicateColumn { .. }));
    }
}
