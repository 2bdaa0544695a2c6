use crate::{Field2, Grid2, Vec2};
use rayon::prelude::*;
use std::sync::OnceLock;

const PAR_THRESHOLD_DEFAULT: usize = 262_144;
const PAR_MIN_WORK_PER_THREAD: usize = 4096;

fn parallel_threshold() -> usize {
    static THRESHOLD: OnceLock<usize> = OnceLock::new();
    *THRESHOLD.get_or_init(|| {
        std::env::var("SIM_PAR_THRESHOLD")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(PAR_THRESHOLD_DEFAULT)
    })
}

fn should_parallel(len: usize) -> bool {
    if len < parallel_threshold() {
        return false;
    }
    let threads = rayon::current_num_threads().max(1);
    len / threads >= PAR_MIN_WORK_PER_THREAD
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MacGrid2 {
    width: usize,
    height: usize,
    dx: f32,
    origin: (f32, f32),
}

impl MacGrid2 {
    pub fn new(width: usize, height: usize, dx: f32) -> Self {
        Self::with_origin(width, height, dx, (0.0, 0.0))
    }

    pub fn with_origin(width: usize, height: usize, dx: f32, origin: (f32, f32)) -> Self {
        assert!(width > 0, "width must be > 0");
        assert!(height > 0, "height must be > 0");
        assert!(dx > 0.0, "dx must be > 0");
        Self {
            width,
            height,
            dx,
            origin,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dx(&self) -> f32 {
        self.dx
    }

    pub fn origin(&self) -> (f32, f32) {
        self.origin
    }

    pub fn cell_grid(&self) -> Grid2 {
        Grid2::with_origin(self.width, self.height, self.dx, self.origin)
    }

    pub fn u_grid(&self) -> StaggeredGrid2 {
        StaggeredGrid2::new(
            self.width + 1,
            self.height,
            self.dx,
            (self.origin.0, self.origin.1 + 0.5 * self.dx),
        )
    }

    pub fn v_grid(&self) -> StaggeredGrid2 {
        StaggeredGrid2::new(
            self.width,
            self.height + 1,
            self.dx,
            (self.origin.0 + 0.5 * self.dx, self.origin.1),
        )
    }

    pub fn cell_center(&self, x: usize, y: usize) -> (f32, f32) {
        (
            self.origin.0 + (x as f32 + 0.5) * self.dx,
            self.origin.1 + (y as f32 + 0.5) * self.dx,
        )
    }

    pub fn domain_min(&self) -> (f32, f32) {
        self.origin
    }

    pub fn domain_max(&self) -> (f32, f32) {
        (
            self.origin.0 + self.width as f32 * self.dx,
            self.origin.1 + self.height as f32 * self.dx,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StaggeredGrid2 {
    width: usize,
    height: usize,
    dx: f32,
    origin: (f32, f32),
}

impl StaggeredGrid2 {
    pub fn new(width: usize, height: usize, dx: f32, origin: (f32, f32)) -> Self {
        assert!(width > 0, "width must be > 0");
        assert!(height > 0, "height must be > 0");
        assert!(dx > 0.0, "dx must be > 0");
        Self {
            width,
            height,
            dx,
            origin,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dx(&self) -> f32 {
        self.dx
    }

    pub fn origin(&self) -> (f32, f32) {
        self.origin
    }

    pub fn size(&self) -> usize {
        self.width * self.height
    }

    pub fn idx(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.width && y < self.height);
        y * self.width + x
    }

    pub fn clamp_coord(&self, x: i32, y: i32) -> (usize, usize) {
        let max_x = (self.width - 1) as i32;
        let max_y = (self.height - 1) as i32;
        let cx = x.clamp(0, max_x) as usize;
        let cy = y.clamp(0, max_y) as usize;
        (cx, cy)
    }

    pub fn index_position(&self, x: usize, y: usize) -> (f32, f32) {
        (
            self.origin.0 + x as f32 * self.dx,
            self.origin.1 + y as f32 * self.dx,
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StaggeredField2 {
    grid: StaggeredGrid2,
    data: Vec<f32>,
}

impl StaggeredField2 {
    pub fn new(grid: StaggeredGrid2, fill: f32) -> Self {
        let data = vec![fill; grid.size()];
        Self { grid, data }
    }

    pub fn from_fn(grid: StaggeredGrid2, f: impl Fn(usize, usize) -> f32 + Sync) -> Self {
        let width = grid.width();
        let mut data = vec![0.0; grid.size()];
        if should_parallel(data.len()) {
            data.par_iter_mut().enumerate().for_each(|(i, value)| {
                let x = i % width;
                let y = i / width;
                *value = f(x, y);
            });
        } else {
            for (i, value) in data.iter_mut().enumerate() {
                let x = i % width;
                let y = i / width;
                *value = f(x, y);
            }
        }
        Self { grid, data }
    }

    pub fn grid(&self) -> StaggeredGrid2 {
        self.grid
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[self.grid.idx(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        let idx = self.grid.idx(x, y);
        self.data[idx] = value;
    }

    pub fn sample_clamped(&self, x: i32, y: i32) -> f32 {
        let (cx, cy) = self.grid.clamp_coord(x, y);
        self.get(cx, cy)
    }

    pub fn sample_linear(&self, pos: (f32, f32)) -> f32 {
        let dx = self.grid.dx();
        let origin = self.grid.origin();
        let gx = (pos.0 - origin.0) / dx;
        let gy = (pos.1 - origin.1) / dx;
        let x0 = gx.floor() as i32;
        let y0 = gy.floor() as i32;
        let x1 = x0 + 1;
        let y1 = y0 + 1;
        let sx = gx - x0 as f32;
        let sy = gy - y0 as f32;
        let v00 = self.sample_clamped(x0, y0);
        let v10 = self.sample_clamped(x1, y0);
        let v01 = self.sample_clamped(x0, y1);
        let v11 = self.sample_clamped(x1, y1);
        let vx0 = v00 + (v10 - v00) * sx;
        let vx1 = v01 + (v11 - v01) * sx;
        vx0 + (vx1 - vx0) * sy
    }

    pub fn map_with_index(&self, f: impl Fn(usize, usize, f32) -> f32 + Sync) -> Self {
        let width = self.grid.width();
        let mut data = vec![0.0; self.data.len()];
        if should_parallel(data.len()) {
            data.par_iter_mut().enumerate().for_each(|(i, value)| {
                let x = i % width;
                let y = i / width;
                *value = f(x, y, self.data[i]);
            });
        } else {
            for (i, value) in data.iter_mut().enumerate() {
                let x = i % width;
                let y = i / width;
                *value = f(x, y, self.data[i]);
            }
        }
        Self {
            grid: self.grid,
            data,
        }
    }

    pub fn fill_with_index(&mut self, f: impl Fn(usize, usize) -> f32 + Sync) {
        let width = self.grid.width();
        if should_parallel(self.data.len()) {
            self.data.par_iter_mut().enumerate().for_each(|(i, value)| {
                let x = i % width;
                let y = i / width;
                *value = f(x, y);
            });
        } else {
            for (i, value) in self.data.iter_mut().enumerate() {
                let x = i % width;
                let y = i / width;
                *value = f(x, y);
            }
        }
    }

    pub fn update_with_index(&mut self, f: impl Fn(usize, usize, f32) -> f32 + Sync) {
        let width = self.grid.width();
        if should_parallel(self.data.len()) {
            self.data.par_iter_mut().enumerate().for_each(|(i, value)| {
                let x = i % width;
                let y = i / width;
                *value = f(x, y, *value);
            });
        } else {
            for (i, value) in self.data.iter_mut().enumerate() {
                let x = i % width;
                let y = i / width;
                *value = f(x, y, *value);
            }
        }
    }

    pub fn clone_from_field(&mut self, other: &Self) {
        assert_eq!(self.grid, other.grid, "staggered grid mismatch");
        self.data.clone_from(&other.data);
    }

    pub fn max_abs(&self) -> f32 {
        if should_parallel(self.data.len()) {
            self.data
                .par_iter()
                .map(|value| value.abs())
                .reduce(|| 0.0_f32, f32::max)
        } else {
            self.data
                .iter()
                .map(|value| value.abs())
                .fold(0.0_f32, f32::max)
        }
    }

    pub fn abs_sum(&self) -> f32 {
        if should_parallel(self.data.len()) {
            self.data.par_iter().map(|value| value.abs()).sum()
        } else {
            self.data.iter().map(|value| value.abs()).sum()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellType {
    Fluid,
    Solid,
    Air,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellFlags {
    grid: Grid2,
    data: Vec<CellType>,
}

impl CellFlags {
    pub fn new(grid: Grid2, fill: CellType) -> Self {
        let data = vec![fill; grid.size()];
        Self { grid, data }
    }

    pub fn from_fn(grid: Grid2, f: impl Fn(usize, usize) -> CellType) -> Self {
        let width = grid.width();
        let data = (0..grid.size())
            .map(|i| {
                let x = i % width;
                let y = i / width;
                f(x, y)
            })
            .collect();
        Self { grid, data }
    }

    pub fn grid(&self) -> Grid2 {
        self.grid
    }

    pub fn get(&self, x: usize, y: usize) -> CellType {
        self.data[self.grid.idx(x, y)]
    }

    pub fn get_clamped(&self, x: i32, y: i32) -> CellType {
        let (cx, cy) = self.grid.clamp_coord(x, y);
        self.get(cx, cy)
    }

    pub fn clone_from_flags(&mut self, other: &Self) {
        assert_eq!(self.grid, other.grid, "cell flag grid mismatch");
        self.data.clone_from(&other.data);
    }

    pub fn fill_with_index(&mut self, f: impl Fn(usize, usize) -> CellType) {
        let width = self.grid.width();
        for (i, value) in self.data.iter_mut().enumerate() {
            let x = i % width;
            let y = i / width;
            *value = f(x, y);
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MacVelocity2 {
    grid: MacGrid2,
    u: StaggeredField2,
    v: StaggeredField2,
}

impl MacVelocity2 {
    pub fn new(grid: MacGrid2, fill: Vec2) -> Self {
        let u = StaggeredField2::new(grid.u_grid(), fill.x);
        let v = StaggeredField2::new(grid.v_grid(), fill.y);
        Self { grid, u, v }
    }

    pub fn from_components(grid: MacGrid2, u: StaggeredField2, v: StaggeredField2) -> Self {
        assert_eq!(u.grid(), grid.u_grid(), "u grid mismatch");
        assert_eq!(v.grid(), grid.v_grid(), "v grid mismatch");
        Self { grid, u, v }
    }

    pub fn grid(&self) -> MacGrid2 {
        self.grid
    }

    pub fn u(&self) -> &StaggeredField2 {
        &self.u
    }

    pub fn v(&self) -> &StaggeredField2 {
        &self.v
    }

    pub fn u_mut(&mut self) -> &mut StaggeredField2 {
        &mut self.u
    }

    pub fn v_mut(&mut self) -> &mut StaggeredField2 {
        &mut self.v
    }

    pub fn clone_from_velocity(&mut self, other: &Self) {
        self.u.clone_from_field(&other.u);
        self.v.clone_from_field(&other.v);
    }

    pub fn sample_linear(&self, pos: (f32, f32)) -> Vec2 {
        Vec2::new(self.u.sample_linear(pos), self.v.sample_linear(pos))
    }

    pub fn max_abs(&self) -> f32 {
        self.u.max_abs().max(self.v.max_abs())
    }

    pub fn divergence_into(&self, out: &mut Field2) {
        debug_assert_eq!(out.grid(), self.grid.cell_grid(), "cell grid mismatch");
        let dx = self.grid.dx();
        let u = &self.u;
        let v = &self.v;
        out.fill_with_index(|x, y| {
            let u_r = u.get(x + 1, y);
            let u_l = u.get(x, y);
            let v_t = v.get(x, y + 1);
            let v_b = v.get(x, y);
            (u_r - u_l + v_t - v_b) / dx
        });
    }

    pub fn divergence(&self) -> Field2 {
        let mut out = Field2::new(self.grid.cell_grid(), 0.0);
        self.divergence_into(&mut out);
        out
    }
}
