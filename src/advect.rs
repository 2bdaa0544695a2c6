use crate::{Field2, MacVelocity2, StaggeredField2};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sampling {
    Linear,
    MonotonicCubic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvectionScheme {
    SemiLagrangian,
    Bfecc,
}

#[derive(Clone, Copy, Debug)]
pub struct SemiLagrangian2 {
    pub sampling: Sampling,
    pub scheme: AdvectionScheme,
}

impl Default for SemiLagrangian2 {
    fn default() -> Self {
        Self {
            sampling: Sampling::Linear,
            scheme: AdvectionScheme::SemiLagrangian,
        }
    }
}

impl SemiLagrangian2 {
    pub fn linear() -> Self {
        Self::default()
    }

    pub fn monotonic_cubic() -> Self {
        Self {
            sampling: Sampling::MonotonicCubic,
            scheme: AdvectionScheme::SemiLagrangian,
        }
    }

    pub fn advect_scalar(&self, field: &Field2, velocity: &MacVelocity2, dt: f32) -> Field2 {
        if dt == 0.0 {
            return field.clone();
        }
        match self.scheme {
            AdvectionScheme::SemiLagrangian => self.advect_scalar_plain(field, velocity, dt),
            AdvectionScheme::Bfecc => {
                let forward = self.advect_scalar_plain(field, velocity, dt);
                let backward = self.advect_scalar_plain(&forward, velocity, -dt);
                clamp_scalar_to_neighbors(field, &forward, &backward)
            }
        }
    }

    fn advect_scalar_plain(&self, field: &Field2, velocity: &MacVelocity2, dt: f32) -> Field2 {
        let grid = field.grid();
        let domain_min = velocity.grid().domain_min();
        let domain_max = velocity.grid().domain_max();
        let sampling = self.sampling;
        field.map_with_index(|x, y, _| {
            let pos = grid.cell_center(x, y);
            let back = back_trace(velocity, pos, dt, domain_min, domain_max);
            sample_field(field, back, sampling)
        })
    }

    pub fn advect_velocity(
        &self,
        field: &MacVelocity2,
        velocity: &MacVelocity2,
        dt: f32,
    ) -> MacVelocity2 {
        if dt == 0.0 {
            return field.clone();
        }
        match self.scheme {
            AdvectionScheme::SemiLagrangian => self.advect_velocity_plain(field, velocity, dt),
            AdvectionScheme::Bfecc => {
                let forward = self.advect_velocity_plain(field, velocity, dt);
                let backward = self.advect_velocity_plain(&forward, velocity, -dt);
                let u = clamp_staggered_to_neighbors(field.u(), forward.u(), backward.u());
                let v = clamp_staggered_to_neighbors(field.v(), forward.v(), backward.v());
                MacVelocity2::from_components(field.grid(), u, v)
            }
        }
    }

    // Each component back-traces against its own staggered grid: u and v
    // live at different sub-cell offsets.
    fn advect_velocity_plain(
        &self,
        field: &MacVelocity2,
        velocity: &MacVelocity2,
        dt: f32,
    ) -> MacVelocity2 {
        let domain_min = velocity.grid().domain_min();
        let domain_max = velocity.grid().domain_max();
        let sampling = self.sampling;
        let u_grid = field.u().grid();
        let v_grid = field.v().grid();
        let u = field.u().map_with_index(|x, y, _| {
            let pos = u_grid.index_position(x, y);
            let back = back_trace(velocity, pos, dt, domain_min, domain_max);
            sample_staggered(field.u(), back, sampling)
        });
        let v = field.v().map_with_index(|x, y, _| {
            let pos = v_grid.index_position(x, y);
            let back = back_trace(velocity, pos, dt, domain_min, domain_max);
            sample_staggered(field.v(), back, sampling)
        });
        MacVelocity2::from_components(field.grid(), u, v)
    }
}

// Mid-point trace: one half-step to estimate the velocity along the path,
// then the full step with it. Positions clamp to the domain, never
// extrapolating beyond the grid.
fn back_trace(
    velocity: &MacVelocity2,
    pos: (f32, f32),
    dt: f32,
    domain_min: (f32, f32),
    domain_max: (f32, f32),
) -> (f32, f32) {
    let v0 = velocity.sample_linear(pos);
    let mid = clamp_to_domain(
        (pos.0 - 0.5 * dt * v0.x, pos.1 - 0.5 * dt * v0.y),
        domain_min,
        domain_max,
    );
    let v_mid = velocity.sample_linear(mid);
    clamp_to_domain(
        (pos.0 - dt * v_mid.x, pos.1 - dt * v_mid.y),
        domain_min,
        domain_max,
    )
}

fn clamp_to_domain(pos: (f32, f32), min: (f32, f32), max: (f32, f32)) -> (f32, f32) {
    (pos.0.clamp(min.0, max.0), pos.1.clamp(min.1, max.1))
}

fn sample_field(field: &Field2, pos: (f32, f32), sampling: Sampling) -> f32 {
    match sampling {
        Sampling::Linear => field.sample_linear(pos),
        Sampling::MonotonicCubic => {
            let grid = field.grid();
            let origin = grid.origin();
            let gx = (pos.0 - origin.0) / grid.dx() - 0.5;
            let gy = (pos.1 - origin.1) / grid.dx() - 0.5;
            cubic_2d(gx, gy, |x, y| field.sample_clamped(x, y))
        }
    }
}

fn sample_staggered(field: &StaggeredField2, pos: (f32, f32), sampling: Sampling) -> f32 {
    match sampling {
        Sampling::Linear => field.sample_linear(pos),
        Sampling::MonotonicCubic => {
            let grid = field.grid();
            let origin = grid.origin();
            let gx = (pos.0 - origin.0) / grid.dx();
            let gy = (pos.1 - origin.1) / grid.dx();
            cubic_2d(gx, gy, |x, y| field.sample_clamped(x, y))
        }
    }
}

fn cubic_2d(gx: f32, gy: f32, sample: impl Fn(i32, i32) -> f32) -> f32 {
    let x0 = gx.floor() as i32;
    let y0 = gy.floor() as i32;
    let tx = gx - x0 as f32;
    let ty = gy - y0 as f32;
    let mut rows = [0.0; 4];
    for (j, row) in rows.iter_mut().enumerate() {
        let y = y0 - 1 + j as i32;
        *row = monotonic_catmull_rom(
            sample(x0 - 1, y),
            sample(x0, y),
            sample(x0 + 1, y),
            sample(x0 + 2, y),
            tx,
        );
    }
    monotonic_catmull_rom(rows[0], rows[1], rows[2], rows[3], ty)
}

// Catmull-Rom with slope limiting: tangents that disagree with the local
// trend are zeroed, which clamps overshoot near extrema and keeps the
// result monotone between the bracketing samples.
fn monotonic_catmull_rom(f0: f32, f1: f32, f2: f32, f3: f32, t: f32) -> f32 {
    let delta = f2 - f1;
    let mut d1 = 0.5 * (f2 - f0);
    let mut d2 = 0.5 * (f3 - f1);
    if delta.abs() < f32::EPSILON {
        d1 = 0.0;
        d2 = 0.0;
    }
    if d1 * delta < 0.0 {
        d1 = 0.0;
    }
    if d2 * delta < 0.0 {
        d2 = 0.0;
    }
    let a = d1 + d2 - 2.0 * delta;
    let b = 3.0 * delta - 2.0 * d1 - d2;
    f1 + t * (d1 + t * (b + t * a))
}

fn clamp_scalar_to_neighbors(source: &Field2, forward: &Field2, backward: &Field2) -> Field2 {
    forward.map_with_index(|x, y, fwd| {
        let xi = x as i32;
        let yi = y as i32;
        let corrected = fwd + 0.5 * (source.get(x, y) - backward.get(x, y));
        let mut min_value = source.sample_clamped(xi, yi);
        if !min_value.is_finite() {
            return 0.0;
        }
        let mut max_value = min_value;
        for (nx, ny) in [(xi - 1, yi), (xi + 1, yi), (xi, yi - 1), (xi, yi + 1)] {
            let sample = source.sample_clamped(nx, ny);
            if sample.is_finite() {
                min_value = min_value.min(sample);
                max_value = max_value.max(sample);
            }
        }
        let sanitized = if corrected.is_finite() {
            corrected
        } else {
            min_value
        };
        sanitized.clamp(min_value, max_value)
    })
}

fn clamp_staggered_to_neighbors(
    source: &StaggeredField2,
    forward: &StaggeredField2,
    backward: &StaggeredField2,
) -> StaggeredField2 {
    forward.map_with_index(|x, y, fwd| {
        let xi = x as i32;
        let yi = y as i32;
        let corrected = fwd + 0.5 * (source.get(x, y) - backward.get(x, y));
        let mut min_value = source.sample_clamped(xi, yi);
        if !min_value.is_finite() {
            return 0.0;
        }
        let mut max_value = min_value;
        for (nx, ny) in [(xi - 1, yi), (xi + 1, yi), (xi, yi - 1), (xi, yi + 1)] {
            let sample = source.sample_clamped(nx, ny);
            if sample.is_finite() {
                min_value = min_value.min(sample);
                max_value = max_value.max(sample);
            }
        }
        let sanitized = if corrected.is_finite() {
            corrected
        } else {
            min_value
        };
        sanitized.clamp(min_value, max_value)
    })
}
