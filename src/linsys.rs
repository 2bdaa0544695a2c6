use crate::{CellFlags, CellType, Field2, Grid2};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StencilRow {
    pub center: f32,
    pub right: f32,
    pub up: f32,
}

// Symmetric stencil matrix shaped like the grid: the left/down couplings
// are the right/up entries of the neighboring rows.
#[derive(Clone, Debug, PartialEq)]
pub struct StencilMatrix2 {
    grid: Grid2,
    rows: Vec<StencilRow>,
}

impl StencilMatrix2 {
    pub fn new(grid: Grid2) -> Self {
        let rows = vec![StencilRow::default(); grid.size()];
        Self { grid, rows }
    }

    pub fn grid(&self) -> Grid2 {
        self.grid
    }

    pub fn row(&self, x: usize, y: usize) -> StencilRow {
        self.rows[self.grid.idx(x, y)]
    }

    pub fn row_mut(&mut self, x: usize, y: usize) -> &mut StencilRow {
        let idx = self.grid.idx(x, y);
        &mut self.rows[idx]
    }

    pub fn apply_at(&self, v: &Field2, x: usize, y: usize) -> f32 {
        let row = self.row(x, y);
        let mut sum = row.center * v.get(x, y);
        if x + 1 < self.grid.width() {
            sum += row.right * v.get(x + 1, y);
        }
        if y + 1 < self.grid.height() {
            sum += row.up * v.get(x, y + 1);
        }
        if x > 0 {
            sum += self.row(x - 1, y).right * v.get(x - 1, y);
        }
        if y > 0 {
            sum += self.row(x, y - 1).up * v.get(x, y - 1);
        }
        sum
    }

    pub fn off_diagonal_at(&self, v: &Field2, x: usize, y: usize) -> f32 {
        self.apply_at(v, x, y) - self.row(x, y).center * v.get(x, y)
    }
}

#[derive(Clone, Debug)]
pub struct LinearSystem2 {
    pub a: StencilMatrix2,
    pub x: Field2,
    pub b: Field2,
}

impl LinearSystem2 {
    pub fn new(grid: Grid2) -> Self {
        Self {
            a: StencilMatrix2::new(grid),
            x: Field2::new(grid, 0.0),
            b: Field2::new(grid, 0.0),
        }
    }

    pub fn grid(&self) -> Grid2 {
        self.a.grid()
    }
}

// Flattened sparse form for coefficient patterns the stencil shape cannot
// express. Rows hold every non-zero, diagonal included.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompressedMatrix {
    size: usize,
    row_ptr: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f32>,
}

impl CompressedMatrix {
    pub fn from_rows(rows: &[Vec<(usize, f32)>]) -> Self {
        let size = rows.len();
        let mut row_ptr = Vec::with_capacity(size + 1);
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        row_ptr.push(0);
        for row in rows {
            for (col, val) in row {
                assert!(*col < size, "column {col} out of range for size {size}");
                cols.push(*col);
                vals.push(*val);
            }
            row_ptr.push(cols.len());
        }
        Self {
            size,
            row_ptr,
            cols,
            vals,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn apply_at(&self, v: &[f32], row: usize) -> f32 {
        let mut sum = 0.0;
        for k in self.row_ptr[row]..self.row_ptr[row + 1] {
            sum += self.vals[k] * v[self.cols[k]];
        }
        sum
    }

    pub fn diagonal(&self, row: usize) -> f32 {
        for k in self.row_ptr[row]..self.row_ptr[row + 1] {
            if self.cols[k] == row {
                return self.vals[k];
            }
        }
        0.0
    }

    pub fn off_diagonal_at(&self, v: &[f32], row: usize) -> f32 {
        let mut sum = 0.0;
        for k in self.row_ptr[row]..self.row_ptr[row + 1] {
            if self.cols[k] != row {
                sum += self.vals[k] * v[self.cols[k]];
            }
        }
        sum
    }
}

#[derive(Clone, Debug, Default)]
pub struct CompressedSystem {
    pub a: CompressedMatrix,
    pub x: Vec<f32>,
    pub b: Vec<f32>,
}

impl CompressedSystem {
    pub fn new(a: CompressedMatrix, b: Vec<f32>) -> Self {
        assert_eq!(a.size(), b.len(), "matrix/rhs size mismatch");
        let x = vec![0.0; a.size()];
        Self { a, x, b }
    }

    pub fn size(&self) -> usize {
        self.a.size()
    }
}

// Representation-agnostic primitives. Solver code is written once against
// this trait and runs unchanged over both system forms.
pub trait Blas {
    type Vector: Clone;
    type Matrix;

    fn set(out: &mut Self::Vector, value: f32);
    fn copy(src: &Self::Vector, out: &mut Self::Vector);
    fn dot(a: &Self::Vector, b: &Self::Vector) -> f32;
    fn axpy(a: f32, x: &Self::Vector, y: &mut Self::Vector);
    fn scale(v: &mut Self::Vector, factor: f32);
    fn mvm(m: &Self::Matrix, v: &Self::Vector, out: &mut Self::Vector);
    fn residual(m: &Self::Matrix, x: &Self::Vector, b: &Self::Vector, out: &mut Self::Vector);
    fn l2_norm(v: &Self::Vector) -> f32;
}

pub struct StencilBlas2;

impl Blas for StencilBlas2 {
    type Vector = Field2;
    type Matrix = StencilMatrix2;

    fn set(out: &mut Field2, value: f32) {
        out.fill(value);
    }

    fn copy(src: &Field2, out: &mut Field2) {
        out.clone_from_field(src);
    }

    fn dot(a: &Field2, b: &Field2) -> f32 {
        a.dot(b)
    }

    fn axpy(a: f32, x: &Field2, y: &mut Field2) {
        y.add_scaled_in_place(x, a);
    }

    fn scale(v: &mut Field2, factor: f32) {
        v.scale_in_place(factor);
    }

    fn mvm(m: &StencilMatrix2, v: &Field2, out: &mut Field2) {
        debug_assert_eq!(m.grid(), v.grid(), "matrix/vector grid mismatch");
        out.fill_with_index(|x, y| m.apply_at(v, x, y));
    }

    fn residual(m: &StencilMatrix2, x: &Field2, b: &Field2, out: &mut Field2) {
        debug_assert_eq!(m.grid(), x.grid(), "matrix/vector grid mismatch");
        out.fill_with_index(|i, j| b.get(i, j) - m.apply_at(x, i, j));
    }

    fn l2_norm(v: &Field2) -> f32 {
        v.dot(v).sqrt()
    }
}

pub struct CompressedBlas;

impl Blas for CompressedBlas {
    type Vector = Vec<f32>;
    type Matrix = CompressedMatrix;

    fn set(out: &mut Vec<f32>, value: f32) {
        out.fill(value);
    }

    fn copy(src: &Vec<f32>, out: &mut Vec<f32>) {
        out.clone_from(src);
    }

    fn dot(a: &Vec<f32>, b: &Vec<f32>) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "vector length mismatch");
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    fn axpy(a: f32, x: &Vec<f32>, y: &mut Vec<f32>) {
        debug_assert_eq!(x.len(), y.len(), "vector length mismatch");
        for (yv, xv) in y.iter_mut().zip(x.iter()) {
            *yv += a * xv;
        }
    }

    fn scale(v: &mut Vec<f32>, factor: f32) {
        for value in v.iter_mut() {
            *value *= factor;
        }
    }

    fn mvm(m: &CompressedMatrix, v: &Vec<f32>, out: &mut Vec<f32>) {
        debug_assert_eq!(m.size(), v.len(), "matrix/vector size mismatch");
        out.clear();
        out.extend((0..m.size()).map(|row| m.apply_at(v, row)));
    }

    fn residual(m: &CompressedMatrix, x: &Vec<f32>, b: &Vec<f32>, out: &mut Vec<f32>) {
        debug_assert_eq!(m.size(), x.len(), "matrix/vector size mismatch");
        out.clear();
        out.extend((0..m.size()).map(|row| b[row] - m.apply_at(x, row)));
    }

    fn l2_norm(v: &Vec<f32>) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }
}

// Single calling interface shared by every solver variant. Variants that
// do not support a representation return false without touching it.
pub trait LinearSolver2 {
    fn solve(&mut self, system: &mut LinearSystem2) -> bool;
    fn solve_compressed(&mut self, system: &mut CompressedSystem) -> bool;
    fn last_iterations(&self) -> usize;
    fn last_residual(&self) -> f32;
}

// Poisson assembly from cell markers: the negative Laplacian over fluid
// cells, Dirichlet across air faces, closed across solid faces. Optional
// per-face open fractions scale the couplings for the fractional boundary
// policy.
pub fn assemble_pressure_system(
    divergence: &Field2,
    flags: &CellFlags,
    face_weights: Option<(&crate::StaggeredField2, &crate::StaggeredField2)>,
) -> LinearSystem2 {
    let grid = divergence.grid();
    assert_eq!(grid, flags.grid(), "divergence/flags grid mismatch");
    let mut system = LinearSystem2::new(grid);
    let inv_dx2 = 1.0 / (grid.dx() * grid.dx());
    let width = grid.width();
    let height = grid.height();
    let weight_u = |x: usize, y: usize| match face_weights {
        Some((u, _)) => u.get(x, y).clamp(0.0, 1.0),
        None => 1.0,
    };
    let weight_v = |x: usize, y: usize| match face_weights {
        Some((_, v)) => v.get(x, y).clamp(0.0, 1.0),
        None => 1.0,
    };
    for y in 0..height {
        for x in 0..width {
            if flags.get(x, y) != CellType::Fluid {
                system.b.set(x, y, 0.0);
                continue;
            }
            let mut row = StencilRow::default();
            if x + 1 < width && flags.get(x + 1, y) != CellType::Solid {
                let w = weight_u(x + 1, y);
                row.center += w * inv_dx2;
                if flags.get(x + 1, y) == CellType::Fluid {
                    row.right = -w * inv_dx2;
                }
            }
            if x > 0 && flags.get(x - 1, y) != CellType::Solid {
                row.center += weight_u(x, y) * inv_dx2;
            }
            if y + 1 < height && flags.get(x, y + 1) != CellType::Solid {
                let w = weight_v(x, y + 1);
                row.center += w * inv_dx2;
                if flags.get(x, y + 1) == CellType::Fluid {
                    row.up = -w * inv_dx2;
                }
            }
            if y > 0 && flags.get(x, y - 1) != CellType::Solid {
                row.center += weight_v(x, y) * inv_dx2;
            }
            *system.a.row_mut(x, y) = row;
            system.b.set(x, y, -divergence.get(x, y));
        }
    }
    system
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    fn laplacian_matrix(grid: Grid2) -> StencilMatrix2 {
        let inv_dx2 = 1.0 / (grid.dx() * grid.dx());
        let mut m = StencilMatrix2::new(grid);
        for y in 0..grid.height() {
            for x in 0..grid.width() {
                let row = m.row_mut(x, y);
                row.center = 4.0 * inv_dx2;
                row.right = if x + 1 < grid.width() { -inv_dx2 } else { 0.0 };
                row.up = if y + 1 < grid.height() { -inv_dx2 } else { 0.0 };
            }
        }
        m
    }

    #[test]
    fn stencil_apply_uses_implied_symmetric_entries() {
        let grid = Grid2::new(3, 3, 1.0);
        let m = laplacian_matrix(grid);
        let v = Field2::from_fn(grid, |x, y| (x + y * 3) as f32);
        // Interior cell (1,1): 4*4 - 5 - 3 - 7 - 1 = 0
        assert_close(m.apply_at(&v, 1, 1), 0.0, 1e-6);
        // Corner cell (0,0): 4*0 - 1 - 3 = -4
        assert_close(m.apply_at(&v, 0, 0), -4.0, 1e-6);
    }

    #[test]
    fn residual_is_b_minus_ax() {
        let grid = Grid2::new(4, 4, 1.0);
        let m = laplacian_matrix(grid);
        let x = Field2::from_fn(grid, |i, j| (i * j) as f32 * 0.1);
        let b = Field2::new(grid, 1.0);
        let mut r = Field2::new(grid, 0.0);
        StencilBlas2::residual(&m, &x, &b, &mut r);
        let mut ax = Field2::new(grid, 0.0);
        StencilBlas2::mvm(&m, &x, &mut ax);
        for j in 0..4 {
            for i in 0..4 {
                assert_close(r.get(i, j), b.get(i, j) - ax.get(i, j), 1e-6);
            }
        }
    }

    #[test]
    fn compressed_residual_matches_manual() {
        let a = CompressedMatrix::from_rows(&[
            vec![(0, 4.0), (1, 1.0)],
            vec![(0, 1.0), (1, 3.0)],
        ]);
        let x = vec![1.0, 2.0];
        let b = vec![7.0, 8.0];
        let mut r = Vec::new();
        CompressedBlas::residual(&a, &x, &b, &mut r);
        assert_close(r[0], 7.0 - 6.0, 1e-6);
        assert_close(r[1], 8.0 - 7.0, 1e-6);
    }

    #[test]
    fn zero_sized_compressed_system_has_empty_residual() {
        let a = CompressedMatrix::from_rows(&[]);
        let system = CompressedSystem::new(a, Vec::new());
        let mut r = Vec::new();
        CompressedBlas::residual(&system.a, &system.x, &system.b, &mut r);
        assert!(r.is_empty());
        assert_close(CompressedBlas::l2_norm(&r), 0.0, 1e-12);
    }

    #[test]
    fn axpy_and_dot_agree_across_representations() {
        let grid = Grid2::new(2, 2, 1.0);
        let xf = Field2::from_fn(grid, |x, y| (x + 2 * y) as f32);
        let mut yf = Field2::from_fn(grid, |x, y| (y + 2 * x) as f32);
        let dot_f = StencilBlas2::dot(&xf, &yf);
        StencilBlas2::axpy(0.5, &xf, &mut yf);
        let xv = vec![0.0, 1.0, 2.0, 3.0];
        let mut yv = vec![0.0, 2.0, 1.0, 3.0];
        let dot_v = CompressedBlas::dot(&xv, &yv);
        CompressedBlas::axpy(0.5, &xv, &mut yv);
        for i in 0..4 {
            let x = i % 2;
            let y = i / 2;
            assert_close(yf.get(x, y), yv[i], 1e-6);
        }
        assert_close(dot_f, dot_v, 1e-6);
    }

    #[test]
    fn pressure_assembly_is_symmetric_and_zero_on_non_fluid() {
        let grid = Grid2::new(4, 4, 0.5);
        let flags = CellFlags::from_fn(grid, |x, y| {
            if x == 0 {
                CellType::Solid
            } else if y == 3 {
                CellType::Air
            } else {
                CellType::Fluid
            }
        });
        let div = Field2::new(grid, 1.0);
        let system = assemble_pressure_system(&div, &flags, None);
        // Solid column contributes nothing.
        assert_eq!(system.a.row(0, 1), StencilRow::default());
        assert_close(system.b.get(0, 1), 0.0, 1e-6);
        // Fluid cell beside solid: three open neighbors, no coupling left.
        let row = system.a.row(1, 1);
        assert_close(row.center, 3.0 * 4.0, 1e-4);
        // Coupling toward air cells appears in center but not off-diagonal;
        // the solid left neighbor still contributes nothing.
        let below_air = system.a.row(1, 2);
        assert_close(below_air.up, 0.0, 1e-6);
        assert_close(below_air.center, 3.0 * 4.0, 1e-4);
    }
}
