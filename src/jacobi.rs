use crate::linsys::{
    Blas, CompressedBlas, CompressedSystem, LinearSolver2, LinearSystem2, StencilBlas2,
};
use crate::Field2;
use log::warn;

#[derive(Clone, Debug)]
pub struct JacobiSolver2 {
    pub max_iterations: usize,
    pub residual_check_interval: usize,
    pub tolerance: f32,
    last_iterations: usize,
    last_residual: f32,
    scratch: Option<Field2>,
    scratch_compressed: Vec<f32>,
}

impl Default for JacobiSolver2 {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            residual_check_interval: 10,
            tolerance: 1e-5,
            last_iterations: 0,
            last_residual: 0.0,
            scratch: None,
            scratch_compressed: Vec::new(),
        }
    }
}

impl JacobiSolver2 {
    pub fn new(max_iterations: usize, residual_check_interval: usize, tolerance: f32) -> Self {
        Self {
            max_iterations,
            residual_check_interval,
            tolerance,
            ..Self::default()
        }
    }

    // One weighted sweep: x_new = (b - off_diagonal . x) / center, every
    // cell from the previous iterate, then the caller swaps buffers.
    pub fn relax(system: &LinearSystem2, x_new: &mut Field2) {
        debug_assert_eq!(system.grid(), x_new.grid(), "system grid mismatch");
        let a = &system.a;
        let b = &system.b;
        let x = &system.x;
        x_new.fill_with_index(|i, j| {
            let center = a.row(i, j).center;
            if center == 0.0 {
                return 0.0;
            }
            (b.get(i, j) - a.off_diagonal_at(x, i, j)) / center
        });
    }

    pub fn relax_compressed(system: &CompressedSystem, x_new: &mut Vec<f32>) {
        let size = system.size();
        x_new.clear();
        x_new.extend((0..size).map(|row| {
            let center = system.a.diagonal(row);
            if center == 0.0 {
                return 0.0;
            }
            (system.b[row] - system.a.off_diagonal_at(&system.x, row)) / center
        }));
    }
}

impl LinearSolver2 for JacobiSolver2 {
    fn solve(&mut self, system: &mut LinearSystem2) -> bool {
        let grid = system.grid();
        let scratch_stale = self
            .scratch
            .as_ref()
            .map(|s| s.grid() != grid)
            .unwrap_or(true);
        if scratch_stale {
            self.scratch = Some(Field2::new(grid, 0.0));
        }
        let mut x_new = self.scratch.take().unwrap_or_else(|| Field2::new(grid, 0.0));
        let mut residual = Field2::new(grid, 0.0);
        let check_interval = self.residual_check_interval.max(1);
        self.last_iterations = 0;
        let mut converged = false;
        for iter in 0..self.max_iterations {
            Self::relax(system, &mut x_new);
            system.x.swap(&mut x_new);
            self.last_iterations = iter + 1;
            if (iter + 1) % check_interval == 0 {
                StencilBlas2::residual(&system.a, &system.x, &system.b, &mut residual);
                if StencilBlas2::l2_norm(&residual) <= self.tolerance {
                    converged = true;
                    break;
                }
            }
        }
        StencilBlas2::residual(&system.a, &system.x, &system.b, &mut residual);
        self.last_residual = StencilBlas2::l2_norm(&residual);
        self.scratch = Some(x_new);
        converged || self.last_residual <= self.tolerance
    }

    fn solve_compressed(&mut self, system: &mut CompressedSystem) -> bool {
        if system.size() == 0 {
            warn!("jacobi: empty system, nothing to solve");
            self.last_iterations = 0;
            self.last_residual = 0.0;
            return true;
        }
        let mut x_new = std::mem::take(&mut self.scratch_compressed);
        let mut residual = Vec::new();
        let check_interval = self.residual_check_interval.max(1);
        self.last_iterations = 0;
        let mut converged = false;
        for iter in 0..self.max_iterations {
            Self::relax_compressed(system, &mut x_new);
            std::mem::swap(&mut system.x, &mut x_new);
            self.last_iterations = iter + 1;
            if (iter + 1) % check_interval == 0 {
                CompressedBlas::residual(&system.a, &system.x, &system.b, &mut residual);
                if CompressedBlas::l2_norm(&residual) <= self.tolerance {
                    converged = true;
                    break;
                }
            }
        }
        CompressedBlas::residual(&system.a, &system.x, &system.b, &mut residual);
        self.last_residual = CompressedBlas::l2_norm(&residual);
        self.scratch_compressed = x_new;
        converged || self.last_residual <= self.tolerance
    }

    fn last_iterations(&self) -> usize {
        self.last_iterations
    }

    fn last_residual(&self) -> f32 {
        self.last_residual
    }
}
