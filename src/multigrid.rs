use crate::linsys::{
    Blas, CompressedSystem, LinearSolver2, LinearSystem2, StencilBlas2,
};
use crate::{Field2, Grid2};
use log::warn;

#[derive(Clone, Debug)]
pub struct MgLinearSystem2 {
    levels: Vec<LinearSystem2>,
}

impl MgLinearSystem2 {
    // Level 0 is the finest. Every level must be exactly double the next
    // coarser one per axis.
    pub fn from_levels(levels: Vec<LinearSystem2>) -> Self {
        assert!(!levels.is_empty(), "hierarchy needs at least one level");
        for pair in levels.windows(2) {
            let fine = pair[0].grid();
            let coarse = pair[1].grid();
            assert_eq!(
                fine.width(),
                coarse.width() * 2,
                "level widths must halve exactly"
            );
            assert_eq!(
                fine.height(),
                coarse.height() * 2,
                "level heights must halve exactly"
            );
        }
        Self { levels }
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn finest(&self) -> &LinearSystem2 {
        &self.levels[0]
    }

    pub fn finest_mut(&mut self) -> &mut LinearSystem2 {
        &mut self.levels[0]
    }

    pub fn into_finest(self) -> LinearSystem2 {
        self.levels
            .into_iter()
            .next()
            .expect("hierarchy is never empty")
    }

    pub fn level(&self, index: usize) -> &LinearSystem2 {
        &self.levels[index]
    }

    pub fn max_levels_for(grid: Grid2) -> usize {
        let mut width = grid.width();
        let mut height = grid.height();
        let mut levels = 1;
        while width % 2 == 0 && height % 2 == 0 && width > 2 && height > 2 {
            width /= 2;
            height /= 2;
            levels += 1;
        }
        levels
    }
}

pub struct MgSolver2 {
    pub max_cycles: usize,
    pub pre_smooth: usize,
    pub post_smooth: usize,
    pub coarse_iterations: usize,
    pub sor_factor: f32,
    pub use_red_black: bool,
    pub tolerance: f32,
    last_cycles: usize,
    last_residual: f32,
}

impl Default for MgSolver2 {
    fn default() -> Self {
        Self {
            max_cycles: 4,
            pre_smooth: 2,
            post_smooth: 2,
            coarse_iterations: 40,
            sor_factor: 1.5,
            use_red_black: false,
            tolerance: 1e-5,
            last_cycles: 0,
            last_residual: 0.0,
        }
    }
}

impl MgSolver2 {
    pub fn new(max_cycles: usize, tolerance: f32) -> Self {
        Self {
            max_cycles,
            tolerance,
            ..Self::default()
        }
    }

    pub fn solve_levels(&mut self, system: &mut MgLinearSystem2) -> bool {
        let level_count = system.levels.len();
        let mut residuals: Vec<Field2> = system
            .levels
            .iter()
            .map(|level| Field2::new(level.grid(), 0.0))
            .collect();
        self.last_cycles = 0;
        let mut converged = false;
        for cycle in 0..self.max_cycles.max(1) {
            self.v_cycle(&mut system.levels, &mut residuals, 0, level_count);
            self.last_cycles = cycle + 1;
            let finest = &system.levels[0];
            StencilBlas2::residual(&finest.a, &finest.x, &finest.b, &mut residuals[0]);
            self.last_residual = StencilBlas2::l2_norm(&residuals[0]);
            if self.last_residual <= self.tolerance {
                converged = true;
                break;
            }
        }
        converged
    }

    fn v_cycle(
        &self,
        levels: &mut [LinearSystem2],
        residuals: &mut [Field2],
        level: usize,
        level_count: usize,
    ) {
        if level + 1 >= level_count {
            self.smooth(&mut levels[level], self.coarse_iterations);
            return;
        }
        self.smooth(&mut levels[level], self.pre_smooth);
        {
            let (fine_levels, coarse_levels) = levels.split_at_mut(level + 1);
            let fine = &fine_levels[level];
            let coarse = &mut coarse_levels[0];
            StencilBlas2::residual(&fine.a, &fine.x, &fine.b, &mut residuals[level]);
            restrict(fine, &residuals[level], coarse);
            coarse.x.fill(0.0);
        }
        self.v_cycle(levels, residuals, level + 1, level_count);
        {
            let (fine_levels, coarse_levels) = levels.split_at_mut(level + 1);
            let fine = &mut fine_levels[level];
            let coarse = &coarse_levels[0];
            prolongate_and_add(coarse, fine);
        }
        self.smooth(&mut levels[level], self.post_smooth);
    }

    fn smooth(&self, system: &mut LinearSystem2, iterations: usize) {
        for _ in 0..iterations {
            if self.use_red_black {
                relax_sor_sweep(system, self.sor_factor, Some(0));
                relax_sor_sweep(system, self.sor_factor, Some(1));
            } else {
                relax_sor_sweep(system, self.sor_factor, None);
            }
        }
    }
}

fn relax_sor_sweep(system: &mut LinearSystem2, omega: f32, parity: Option<usize>) {
    let grid = system.grid();
    for y in 0..grid.height() {
        for x in 0..grid.width() {
            if let Some(p) = parity {
                if (x + y) % 2 != p {
                    continue;
                }
            }
            let center = system.a.row(x, y).center;
            if center == 0.0 {
                continue;
            }
            let off = system.a.off_diagonal_at(&system.x, x, y);
            let relaxed = (system.b.get(x, y) - off) / center;
            let old = system.x.get(x, y);
            system.x.set(x, y, old + omega * (relaxed - old));
        }
    }
}

// 2x2 full-weighting over active rows only: each coarse cell takes the
// average of the fine residuals it covers, skipping rows the operator does
// not touch (zero center).
fn restrict(fine: &LinearSystem2, residual: &Field2, coarse: &mut LinearSystem2) {
    let fine_a = &fine.a;
    let coarse_a = &coarse.a;
    coarse.b.fill_with_index(|cx, cy| {
        if coarse_a.row(cx, cy).center == 0.0 {
            return 0.0;
        }
        let fx = cx * 2;
        let fy = cy * 2;
        let mut sum = 0.0;
        let mut samples = 0.0;
        for (x, y) in [(fx, fy), (fx + 1, fy), (fx, fy + 1), (fx + 1, fy + 1)] {
            if fine_a.row(x, y).center != 0.0 {
                sum += residual.get(x, y);
                samples += 1.0;
            }
        }
        if samples == 0.0 {
            0.0
        } else {
            sum / samples
        }
    });
}

fn prolongate_and_add(coarse: &LinearSystem2, fine: &mut LinearSystem2) {
    let coarse_grid = coarse.grid();
    let coarse_value = |x: i32, y: i32| {
        let cx = (x.max(0) as usize).min(coarse_grid.width() - 1);
        let cy = (y.max(0) as usize).min(coarse_grid.height() - 1);
        if coarse.a.row(cx, cy).center == 0.0 {
            0.0
        } else {
            coarse.x.get(cx, cy)
        }
    };
    let fine_a = &fine.a;
    fine.x.update_with_index(|x, y, value| {
        if fine_a.row(x, y).center == 0.0 {
            return value;
        }
        let gx = (x as f32 - 0.5) * 0.5;
        let gy = (y as f32 - 0.5) * 0.5;
        let cx = gx.floor() as i32;
        let cy = gy.floor() as i32;
        let tx = gx - cx as f32;
        let ty = gy - cy as f32;
        let c00 = coarse_value(cx, cy);
        let c10 = coarse_value(cx + 1, cy);
        let c01 = coarse_value(cx, cy + 1);
        let c11 = coarse_value(cx + 1, cy + 1);
        let interp_x0 = c00 + (c10 - c00) * tx;
        let interp_x1 = c01 + (c11 - c01) * tx;
        value + interp_x0 + (interp_x1 - interp_x0) * ty
    });
}

impl LinearSolver2 for MgSolver2 {
    // Multigrid needs the hierarchy-specific entry point; the plain solve
    // is defined to fail without touching its argument.
    fn solve(&mut self, _system: &mut LinearSystem2) -> bool {
        warn!("multigrid: plain solve entry point is unsupported, use solve_levels");
        false
    }

    // No generic coarsening exists for compressed systems.
    fn solve_compressed(&mut self, _system: &mut CompressedSystem) -> bool {
        warn!("multigrid: compressed systems are unsupported");
        false
    }

    fn last_iterations(&self) -> usize {
        self.last_cycles
    }

    fn last_residual(&self) -> f32 {
        self.last_residual
    }
}
