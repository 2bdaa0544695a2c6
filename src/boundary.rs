use crate::{CellFlags, CellType, Collider2, Field2, MacGrid2, MacVelocity2, Vec2};
use log::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DomainEdge {
    Closed,
    Open,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DomainBoundaries {
    pub left: DomainEdge,
    pub right: DomainEdge,
    pub bottom: DomainEdge,
    pub top: DomainEdge,
}

impl DomainBoundaries {
    pub fn all_closed() -> Self {
        Self {
            left: DomainEdge::Closed,
            right: DomainEdge::Closed,
            bottom: DomainEdge::Closed,
            top: DomainEdge::Closed,
        }
    }

    pub fn all_open() -> Self {
        Self {
            left: DomainEdge::Open,
            right: DomainEdge::Open,
            bottom: DomainEdge::Open,
            top: DomainEdge::Open,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryPolicy {
    // Whole-cell rasterization, faces beside obstacle cells fully closed.
    Blocked,
    // Sub-cell open fractions from the collider SDF at face corners.
    Fractional,
}

struct BoundaryCache {
    collider_id: usize,
    grid: MacGrid2,
    markers: CellFlags,
    sdf: Field2,
}

pub struct BoundaryConditionSolver2 {
    pub policy: BoundaryPolicy,
    pub domain: DomainBoundaries,
    pub extrapolation_depth: usize,
    cache: Option<BoundaryCache>,
}

impl BoundaryConditionSolver2 {
    pub fn new(policy: BoundaryPolicy, domain: DomainBoundaries) -> Self {
        Self {
            policy,
            domain,
            extrapolation_depth: 3,
            cache: None,
        }
    }

    // Cache rebuilds are keyed on the collider identity and the grid shape
    // only. Callers that mutate a collider's pose in place must call this,
    // or they keep the stale geometry.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    pub fn markers(&self) -> Option<&CellFlags> {
        self.cache.as_ref().map(|c| &c.markers)
    }

    pub fn collider_sdf(&self) -> Option<&Field2> {
        self.cache.as_ref().map(|c| &c.sdf)
    }

    fn refresh_cache(&mut self, grid: MacGrid2, collider: Option<&Collider2>) {
        let collider_id = collider.map_or(0, |c| c as *const Collider2 as usize);
        let fresh = self
            .cache
            .as_ref()
            .map(|c| c.collider_id == collider_id && c.grid == grid)
            .unwrap_or(false);
        if fresh {
            return;
        }
        let cell_grid = grid.cell_grid();
        let mut sdf = Field2::new(cell_grid, f32::MAX);
        if let Some(collider) = collider {
            let surface = collider.surface();
            sdf.fill_with_position(|px, py| surface.signed_distance(Vec2::new(px, py)));
        }
        let markers = CellFlags::from_fn(cell_grid, |x, y| {
            if sdf.get(x, y) < 0.0 {
                CellType::Solid
            } else {
                CellType::Fluid
            }
        });
        self.cache = Some(BoundaryCache {
            collider_id,
            grid,
            markers,
            sdf,
        });
    }

    // Open fraction of every face, from the SDF snapshot sampled at the
    // face corners. 1 everywhere without a collider.
    pub fn face_fractions(
        &self,
        grid: MacGrid2,
    ) -> (crate::StaggeredField2, crate::StaggeredField2) {
        let u_grid = grid.u_grid();
        let v_grid = grid.v_grid();
        let half = 0.5 * grid.dx();
        match self.cache.as_ref().filter(|c| c.grid == grid) {
            Some(cache) => {
                let sdf = &cache.sdf;
                let u = crate::StaggeredField2::from_fn(u_grid, |x, y| {
                    let (px, py) = u_grid.index_position(x, y);
                    let phi0 = sdf.sample_linear((px, py - half));
                    let phi1 = sdf.sample_linear((px, py + half));
                    1.0 - fraction_inside(phi0, phi1)
                });
                let v = crate::StaggeredField2::from_fn(v_grid, |x, y| {
                    let (px, py) = v_grid.index_position(x, y);
                    let phi0 = sdf.sample_linear((px - half, py));
                    let phi1 = sdf.sample_linear((px + half, py));
                    1.0 - fraction_inside(phi0, phi1)
                });
                (u, v)
            }
            None => (
                crate::StaggeredField2::new(u_grid, 1.0),
                crate::StaggeredField2::new(v_grid, 1.0),
            ),
        }
    }

    pub fn constrain_velocity(
        &mut self,
        velocity: &mut MacVelocity2,
        collider: Option<&Collider2>,
    ) {
        let grid = velocity.grid();
        if grid.width() == 0 || grid.height() == 0 {
            warn!("boundary: empty velocity grid, skipping constraint");
            return;
        }
        self.refresh_cache(grid, collider);
        // Fill obstacle-interior faces from the fluid side first, so the
        // constraint below projects meaningful velocities instead of
        // uninitialized data.
        self.extrapolate_into_obstacles(velocity);
        match self.policy {
            BoundaryPolicy::Blocked => self.constrain_blocked(velocity, collider),
            BoundaryPolicy::Fractional => self.constrain_fractional(velocity, collider),
        }
        self.apply_domain_edges(velocity);
    }

    fn constrain_blocked(&self, velocity: &mut MacVelocity2, collider: Option<&Collider2>) {
        let cache = self.cache.as_ref().expect("cache refreshed above");
        let markers = &cache.markers;
        let grid = velocity.grid();
        let w = grid.width();
        let h = grid.height();
        let u_grid = velocity.u().grid();
        let v_grid = velocity.v().grid();
        velocity.u_mut().update_with_index(|x, y, value| {
            let left_solid = x > 0 && markers.get(x - 1, y) == CellType::Solid;
            let right_solid = x < w && markers.get(x.min(w - 1), y) == CellType::Solid;
            if left_solid || right_solid {
                match collider {
                    Some(c) => {
                        let (px, py) = u_grid.index_position(x, y);
                        c.velocity_at(Vec2::new(px, py)).x
                    }
                    None => 0.0,
                }
            } else {
                value
            }
        });
        velocity.v_mut().update_with_index(|x, y, value| {
            let bottom_solid = y > 0 && markers.get(x, y - 1) == CellType::Solid;
            let top_solid = y < h && markers.get(x, y.min(h - 1)) == CellType::Solid;
            if bottom_solid || top_solid {
                match collider {
                    Some(c) => {
                        let (px, py) = v_grid.index_position(x, y);
                        c.velocity_at(Vec2::new(px, py)).y
                    }
                    None => 0.0,
                }
            } else {
                value
            }
        });
    }

    // Faces whose sample point lies inside the obstacle keep only the
    // non-penetrating part of their (extrapolated) velocity, relative to
    // the obstacle's own motion, with friction eating into the slip.
    fn constrain_fractional(&self, velocity: &mut MacVelocity2, collider: Option<&Collider2>) {
        let Some(collider) = collider else {
            return;
        };
        let cache = self.cache.as_ref().expect("cache refreshed above");
        let sdf = &cache.sdf;
        let friction = collider.friction();
        let source = velocity.clone();
        let u_grid = velocity.u().grid();
        let v_grid = velocity.v().grid();
        velocity.u_mut().update_with_index(|x, y, value| {
            let (px, py) = u_grid.index_position(x, y);
            if sdf.sample_linear((px, py)) < 0.0 {
                constrained_component(&source, collider, sdf, Vec2::new(px, py), friction).x
            } else {
                value
            }
        });
        velocity.v_mut().update_with_index(|x, y, value| {
            let (px, py) = v_grid.index_position(x, y);
            if sdf.sample_linear((px, py)) < 0.0 {
                constrained_component(&source, collider, sdf, Vec2::new(px, py), friction).y
            } else {
                value
            }
        });
    }

    fn apply_domain_edges(&self, velocity: &mut MacVelocity2) {
        let grid = velocity.grid();
        let w = grid.width();
        let h = grid.height();
        let domain = self.domain;
        velocity.u_mut().update_with_index(|x, _y, value| {
            if x == 0 && domain.left == DomainEdge::Closed {
                return 0.0;
            }
            if x == w && domain.right == DomainEdge::Closed {
                return 0.0;
            }
            value
        });
        velocity.v_mut().update_with_index(|_x, y, value| {
            if y == 0 && domain.bottom == DomainEdge::Closed {
                return 0.0;
            }
            if y == h && domain.top == DomainEdge::Closed {
                return 0.0;
            }
            value
        });
    }

    // Outward breadth-first propagation: each expansion ring receives the
    // average of its already-resolved neighbors, so later stencil reads
    // inside the obstacle never see uninitialized faces. The fractional
    // policy seeds from faces the projection never rewrites (face-center
    // phi >= 0), which keeps the whole constraint pass idempotent.
    fn extrapolate_into_obstacles(&self, velocity: &mut MacVelocity2) {
        if self.extrapolation_depth == 0 {
            return;
        }
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let grid = velocity.grid();
        let u_grid = velocity.u().grid();
        let v_grid = velocity.v().grid();
        let (mut u_mask, mut v_mask) = match self.policy {
            BoundaryPolicy::Blocked => (
                build_u_face_mask(&cache.markers, grid.width()),
                build_v_face_mask(&cache.markers, grid.height()),
            ),
            BoundaryPolicy::Fractional => (
                build_face_mask_from_sdf(&cache.sdf, u_grid),
                build_face_mask_from_sdf(&cache.sdf, v_grid),
            ),
        };
        for _ in 0..self.extrapolation_depth {
            let next_u_mask = expand_mask(&u_mask, u_grid.width(), u_grid.height());
            let next_v_mask = expand_mask(&v_mask, v_grid.width(), v_grid.height());
            extrapolate_staggered(velocity.u_mut(), &u_mask, &next_u_mask);
            extrapolate_staggered(velocity.v_mut(), &v_mask, &next_v_mask);
            u_mask = next_u_mask;
            v_mask = next_v_mask;
        }
    }
}

// Fraction of the segment between two SDF samples that lies inside the
// obstacle (phi < 0).
pub fn fraction_inside(phi0: f32, phi1: f32) -> f32 {
    if phi0 < 0.0 && phi1 < 0.0 {
        1.0
    } else if phi0 < 0.0 {
        phi0 / (phi0 - phi1)
    } else if phi1 < 0.0 {
        phi1 / (phi1 - phi0)
    } else {
        0.0
    }
}

fn constrained_component(
    source: &MacVelocity2,
    collider: &Collider2,
    sdf: &Field2,
    point: Vec2,
    friction: f32,
) -> Vec2 {
    let dx = sdf.grid().dx();
    let gx = (sdf.sample_linear((point.x + dx, point.y))
        - sdf.sample_linear((point.x - dx, point.y)))
        / (2.0 * dx);
    let gy = (sdf.sample_linear((point.x, point.y + dx))
        - sdf.sample_linear((point.x, point.y - dx)))
        / (2.0 * dx);
    let n = Vec2::new(gx, gy).normalized_or_zero();
    let collider_vel = collider.velocity_at(point);
    let sampled = source.sample_linear((point.x, point.y));
    let relative = sampled.sub(collider_vel);
    let vn = relative.dot(n);
    if vn >= 0.0 {
        return sampled;
    }
    let normal_part = n.scale(vn);
    let mut tangential = relative.sub(normal_part);
    let vt = tangential.length();
    if vt > 1e-6 && friction > 0.0 {
        let scale = (1.0 - friction * vn.abs() / vt).max(0.0);
        tangential = tangential.scale(scale);
    }
    tangential.add(collider_vel)
}

fn build_u_face_mask(markers: &CellFlags, width: usize) -> Vec<bool> {
    let height = markers.grid().height();
    let u_width = width + 1;
    (0..u_width * height)
        .map(|i| {
            let x = i % u_width;
            let y = i / u_width;
            let left_open = x > 0 && markers.get(x - 1, y) != CellType::Solid;
            let right_open = x < width && markers.get(x, y) != CellType::Solid;
            left_open || right_open
        })
        .collect()
}

fn build_v_face_mask(markers: &CellFlags, height: usize) -> Vec<bool> {
    let width = markers.grid().width();
    let v_height = height + 1;
    (0..width * v_height)
        .map(|i| {
            let x = i % width;
            let y = i / width;
            let bottom_open = y > 0 && markers.get(x, y - 1) != CellType::Solid;
            let top_open = y < height && markers.get(x, y) != CellType::Solid;
            bottom_open || top_open
        })
        .collect()
}

fn build_face_mask_from_sdf(sdf: &Field2, grid: crate::StaggeredGrid2) -> Vec<bool> {
    let width = grid.width();
    (0..grid.size())
        .map(|i| {
            let x = i % width;
            let y = i / width;
            let (px, py) = grid.index_position(x, y);
            sdf.sample_linear((px, py)) >= 0.0
        })
        .collect()
}

fn expand_mask(mask: &[bool], width: usize, height: usize) -> Vec<bool> {
    (0..mask.len())
        .map(|i| {
            if mask[i] {
                return true;
            }
            let x = i % width;
            let y = i / width;
            (x > 0 && mask[i - 1])
                || (x + 1 < width && mask[i + 1])
                || (y > 0 && mask[i - width])
                || (y + 1 < height && mask[i + width])
        })
        .collect()
}

fn extrapolate_staggered(
    field: &mut crate::StaggeredField2,
    mask: &[bool],
    next_mask: &[bool],
) {
    let grid = field.grid();
    let width = grid.width();
    let height = grid.height();
    let source = field.clone();
    field.update_with_index(|x, y, value| {
        let idx = y * width + x;
        if mask[idx] || !next_mask[idx] {
            return value;
        }
        let mut sum = 0.0;
        let mut count = 0.0;
        if x > 0 && mask[idx - 1] {
            sum += source.get(x - 1, y);
            count += 1.0;
        }
        if x + 1 < width && mask[idx + 1] {
            sum += source.get(x + 1, y);
            count += 1.0;
        }
        if y > 0 && mask[idx - width] {
            sum += source.get(x, y - 1);
            count += 1.0;
        }
        if y + 1 < height && mask[idx + width] {
            sum += source.get(x, y + 1);
            count += 1.0;
        }
        if count > 0.0 {
            sum / count
        } else {
            value
        }
    });
}
