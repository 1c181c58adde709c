use std::ops::{AddAssign, Index, IndexMut};

/// Upper-triangular `dim x dim` matrix stored as a flat row-major array of `dim * (dim + 1) / 2`
/// cells.
///
/// Cell `(i, j)` and `(j, i)` are the same entry; callers may pass the indices in either order.
#[derive(Clone, Debug, PartialEq)]
pub struct TriangularMatrix<T> {
    dim: usize,
    cells: Vec<T>,
}

impl<T: Copy + Default> TriangularMatrix<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            cells: vec![T::default(); cell_count(dim)],
        }
    }

    pub fn get(&self, i: usize, j: usize) -> T {
        self.cells[self.offset(i, j)]
    }

    pub fn set(&mut self, i: usize, j: usize, value: T) {
        let offset = self.offset(i, j);
        self.cells[offset] = value;
    }
}

impl<T: Copy + Default + AddAssign> TriangularMatrix<T> {
    pub fn add(&mut self, i: usize, j: usize, value: T) {
        let offset = self.offset(i, j);
        self.cells[offset] += value;
    }
}

impl<T> TriangularMatrix<T> {
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Flat offset of cell `(i, j)`; the pair is normalized so `min(i, j)` is the row.
    pub fn offset(&self, i: usize, j: usize) -> usize {
        triangular_offset(self.dim, i, j)
    }

    /// Cells in flat order.
    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    /// Iterate `(row, col, &value)` for every cell with `row <= col`, in flat order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> + '_ {
        let dim = self.dim;
        (0..dim)
            .flat_map(move |row| (row..dim).map(move |col| (row, col)))
            .zip(self.cells.iter())
            .map(|((row, col), value)| (row, col, value))
    }
}

impl<T> Index<usize> for TriangularMatrix<T> {
    type Output = T;

    fn index(&self, offset: usize) -> &T {
        &self.cells[offset]
    }
}

impl<T> IndexMut<usize> for TriangularMatrix<T> {
    fn index_mut(&mut self, offset: usize) -> &mut T {
        &mut self.cells[offset]
    }
}

fn cell_count(dim: usize) -> usize {
    dim * (dim + 1) / 2
}

/// Flat offset of `(i, j)` in a `dim x dim` upper-triangular layout.
pub(crate) fn triangular_offset(dim: usize, i: usize, j: usize) -> usize {
    let (row, col) = if i <= j { (i, j) } else { (j, i) };
    assert!(col < dim, "cell ({i}, {j}) out of bounds for dimension {dim}");
    row * (2 * dim - row + 1) / 2 + (col - row)
}
