use crate::linsys::{
    Blas, CompressedBlas, CompressedSystem, LinearSolver2, LinearSystem2, StencilBlas2,
    StencilMatrix2,
};
use crate::Field2;
use log::warn;

pub trait Preconditioner<B: Blas> {
    fn build(&mut self, a: &B::Matrix);
    fn solve(&mut self, b: &B::Vector, x: &mut B::Vector);
}

pub struct NullPreconditioner;

impl<B: Blas> Preconditioner<B> for NullPreconditioner {
    fn build(&mut self, _a: &B::Matrix) {}

    fn solve(&mut self, b: &B::Vector, x: &mut B::Vector) {
        B::copy(b, x);
    }
}

// Inverse-diagonal scaling, the cheapest preconditioner that still helps
// the stretched spectra pressure systems produce.
#[derive(Default)]
pub struct DiagonalPreconditioner2 {
    inv_diag: Option<Field2>,
}

impl Preconditioner<StencilBlas2> for DiagonalPreconditioner2 {
    fn build(&mut self, a: &StencilMatrix2) {
        let grid = a.grid();
        let mut inv = Field2::new(grid, 0.0);
        inv.fill_with_index(|x, y| {
            let center = a.row(x, y).center;
            if center != 0.0 {
                1.0 / center
            } else {
                0.0
            }
        });
        self.inv_diag = Some(inv);
    }

    fn solve(&mut self, b: &Field2, x: &mut Field2) {
        match &self.inv_diag {
            Some(inv) => x.fill_with_index(|i, j| b.get(i, j) * inv.get(i, j)),
            None => x.clone_from_field(b),
        }
    }
}

// Standard preconditioned conjugate gradient over the shared primitives.
// Returns (iterations run, final residual norm). With max_iterations == 0
// the initial guess is untouched and the original residual is reported.
pub fn pcg<B: Blas, P: Preconditioner<B>>(
    a: &B::Matrix,
    b: &B::Vector,
    max_iterations: usize,
    tolerance: f32,
    precond: &mut P,
    x: &mut B::Vector,
    r: &mut B::Vector,
    d: &mut B::Vector,
    q: &mut B::Vector,
    s: &mut B::Vector,
) -> (usize, f32) {
    B::residual(a, x, b, r);
    let mut res_norm = B::l2_norm(r);
    // A relative epsilon floor keeps a zero tolerance from spinning on
    // rounding noise once the solve is exact to working precision.
    let stop = tolerance.max(16.0 * f32::EPSILON * B::l2_norm(b));
    if max_iterations == 0 || res_norm <= stop {
        return (0, res_norm);
    }
    precond.build(a);
    precond.solve(r, d);
    let mut sigma = B::dot(r, d);
    let mut iterations = 0;
    for _ in 0..max_iterations {
        B::mvm(a, d, q);
        let dq = B::dot(d, q);
        if dq.abs() < 1e-20 {
            break;
        }
        let alpha = sigma / dq;
        B::axpy(alpha, d, x);
        B::axpy(-alpha, q, r);
        iterations += 1;
        res_norm = B::l2_norm(r);
        if res_norm <= stop {
            break;
        }
        precond.solve(r, s);
        let sigma_new = B::dot(r, s);
        if sigma.abs() < 1e-20 {
            break;
        }
        let beta = sigma_new / sigma;
        B::scale(d, beta);
        B::axpy(1.0, s, d);
        sigma = sigma_new;
    }
    (iterations, res_norm)
}

pub struct CgSolver2 {
    pub max_iterations: usize,
    pub tolerance: f32,
    pub use_diagonal_preconditioner: bool,
    last_iterations: usize,
    last_residual: f32,
    scratch: Option<[Field2; 4]>,
}

impl Default for CgSolver2 {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-5,
            use_diagonal_preconditioner: false,
            last_iterations: 0,
            last_residual: 0.0,
            scratch: None,
        }
    }
}

impl CgSolver2 {
    pub fn new(max_iterations: usize, tolerance: f32) -> Self {
        Self {
            max_iterations,
            tolerance,
            ..Self::default()
        }
    }

    pub fn preconditioned(max_iterations: usize, tolerance: f32) -> Self {
        Self {
            max_iterations,
            tolerance,
            use_diagonal_preconditioner: true,
            ..Self::default()
        }
    }
}

impl LinearSolver2 for CgSolver2 {
    fn solve(&mut self, system: &mut LinearSystem2) -> bool {
        let grid = system.grid();
        let scratch_stale = self
            .scratch
            .as_ref()
            .map(|s| s[0].grid() != grid)
            .unwrap_or(true);
        if scratch_stale {
            self.scratch = Some([
                Field2::new(grid, 0.0),
                Field2::new(grid, 0.0),
                Field2::new(grid, 0.0),
                Field2::new(grid, 0.0),
            ]);
        }
        let mut bufs = self.scratch.take().expect("scratch just built");
        let [r, d, q, s] = &mut bufs;
        let (iterations, residual) = if self.use_diagonal_preconditioner {
            let mut precond = DiagonalPreconditioner2::default();
            pcg::<StencilBlas2, _>(
                &system.a,
                &system.b,
                self.max_iterations,
                self.tolerance,
                &mut precond,
                &mut system.x,
                r,
                d,
                q,
                s,
            )
        } else {
            pcg::<StencilBlas2, _>(
                &system.a,
                &system.b,
                self.max_iterations,
                self.tolerance,
                &mut NullPreconditioner,
                &mut system.x,
                r,
                d,
                q,
                s,
            )
        };
        self.scratch = Some(bufs);
        self.last_iterations = iterations;
        self.last_residual = residual;
        residual <= self.tolerance
    }

    fn solve_compressed(&mut self, system: &mut CompressedSystem) -> bool {
        if system.size() == 0 {
            warn!("cg: empty system, nothing to solve");
            self.last_iterations = 0;
            self.last_residual = 0.0;
            return true;
        }
        let n = system.size();
        let mut r = vec![0.0; n];
        let mut d = vec![0.0; n];
        let mut q = vec![0.0; n];
        let mut s = vec![0.0; n];
        let (iterations, residual) = pcg::<CompressedBlas, _>(
            &system.a,
            &system.b,
            self.max_iterations,
            self.tolerance,
            &mut NullPreconditioner,
            &mut system.x,
            &mut r,
            &mut d,
            &mut q,
            &mut s,
        );
        self.last_iterations = iterations;
        self.last_residual = residual;
        residual <= self.tolerance
    }

    fn last_iterations(&self) -> usize {
        self.last_iterations
    }

    fn last_residual(&self) -> f32 {
        self.last_residual
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linsys::{CompressedMatrix, StencilBlas2, StencilRow};
    use crate::Grid2;
    use approx::assert_relative_eq;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    fn two_by_two() -> CompressedSystem {
        let a = CompressedMatrix::from_rows(&[
            vec![(0, 4.0), (1, 1.0)],
            vec![(0, 1.0), (1, 3.0)],
        ]);
        CompressedSystem::new(a, vec![1.0, 2.0])
    }

    #[test]
    fn zero_iteration_cap_reports_original_residual() {
        let mut system = two_by_two();
        let mut solver = CgSolver2::new(0, 0.0);
        let converged = solver.solve_compressed(&mut system);
        assert!(!converged);
        assert_close(system.x[0], 0.0, 1e-12);
        assert_close(system.x[1], 0.0, 1e-12);
        assert_eq!(solver.last_iterations(), 0);
        assert_close(solver.last_residual(), 5.0_f32.sqrt(), 1e-6);
    }

    #[test]
    fn exact_solve_of_two_by_two_within_two_iterations() {
        let mut system = two_by_two();
        let mut solver = CgSolver2::new(10, 0.0);
        solver.solve_compressed(&mut system);
        assert!(solver.last_iterations() <= 2);
        assert_relative_eq!(system.x[0], 1.0 / 11.0, max_relative = 1e-4);
        assert_relative_eq!(system.x[1], 7.0 / 11.0, max_relative = 1e-4);
        assert!(solver.last_residual() <= 1e-5);
    }

    fn poisson_system(n: usize) -> LinearSystem2 {
        let grid = Grid2::new(n, n, 1.0);
        let mut system = LinearSystem2::new(grid);
        for y in 0..n {
            for x in 0..n {
                let mut row = StencilRow::default();
                row.center = 4.0;
                if x + 1 < n {
                    row.right = -1.0;
                }
                if y + 1 < n {
                    row.up = -1.0;
                }
                *system.a.row_mut(x, y) = row;
                system.b.set(x, y, ((x * 3 + y) % 5) as f32 - 2.0);
            }
        }
        system
    }

    fn residual_norm(system: &LinearSystem2) -> f32 {
        let mut r = Field2::new(system.grid(), 0.0);
        StencilBlas2::residual(&system.a, &system.x, &system.b, &mut r);
        StencilBlas2::l2_norm(&r)
    }

    #[test]
    fn cg_never_increases_residual_on_spd_system() {
        let mut system = poisson_system(10);
        let before = residual_norm(&system);
        let mut solver = CgSolver2::new(4, 0.0);
        solver.solve(&mut system);
        let after = residual_norm(&system);
        assert!(after <= before, "residual grew: {before} -> {after}");
    }

    #[test]
    fn cg_converges_on_stencil_poisson() {
        let mut system = poisson_system(16);
        let mut solver = CgSolver2::new(300, 1e-4);
        let converged = solver.solve(&mut system);
        assert!(converged, "residual {}", solver.last_residual());
    }

    #[test]
    fn diagonal_preconditioner_reaches_the_same_solution() {
        let mut plain = poisson_system(8);
        let mut precond = poisson_system(8);
        CgSolver2::new(200, 1e-6).solve(&mut plain);
        CgSolver2::preconditioned(200, 1e-6).solve(&mut precond);
        for y in 0..8 {
            for x in 0..8 {
                assert_close(plain.x.get(x, y), precond.x.get(x, y), 1e-3);
            }
        }
    }

    #[test]
    fn randomized_spd_system_converges_within_dimension_iterations() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(7);
        // A = L L^T + n I is SPD by construction.
        let n = 6;
        let mut dense = vec![vec![0.0_f32; n]; n];
        let mut l = vec![vec![0.0_f32; n]; n];
        for (i, row) in l.iter_mut().enumerate() {
            for value in row.iter_mut().take(i + 1) {
                *value = rng.gen_range(-1.0..1.0);
            }
        }
        for i in 0..n {
            for j in 0..n {
                let mut sum = 0.0;
                for (li, lj) in l[i].iter().zip(l[j].iter()) {
                    sum += li * lj;
                }
                dense[i][j] = sum;
            }
            dense[i][i] += n as f32;
        }
        let rows: Vec<Vec<(usize, f32)>> = dense
            .iter()
            .map(|row| row.iter().cloned().enumerate().collect())
            .collect();
        let b: Vec<f32> = (0..n).map(|_| rng.gen_range(-2.0..2.0)).collect();
        let mut system = CompressedSystem::new(CompressedMatrix::from_rows(&rows), b);
        let mut solver = CgSolver2::new(n, 1e-3);
        let converged = solver.solve_compressed(&mut system);
        assert!(
            converged,
            "finite termination violated: residual {}",
            solver.last_residual()
        );
    }
}
