use crate::Field2;
use log::warn;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

#[derive(PartialEq)]
struct Trial {
    distance: f32,
    idx: usize,
}

impl Eq for Trial {}

impl PartialOrd for Trial {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Trial {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.idx.cmp(&other.idx))
    }
}

// Fast-marching rebuild of a signed-distance field. The zero crossing of
// the input stays put: cells next to it seed the march with sub-cell
// distances estimated from the neighboring sign change, everything else is
// solved outward in non-decreasing distance order. Cells farther than
// max_distance keep the sentinel instead of being computed.
pub fn reinitialize(phi: &Field2, max_distance: f32) -> Field2 {
    let grid = phi.grid();
    let dx = grid.dx();
    let width = grid.width();
    let height = grid.height();
    let size = grid.size();
    let sign = |idx: usize| {
        let value = phi.get(idx % width, idx / width);
        if value < 0.0 {
            -1.0
        } else {
            1.0
        }
    };

    let mut distance = vec![f32::INFINITY; size];
    let mut accepted = vec![false; size];
    let mut heap: BinaryHeap<Reverse<Trial>> = BinaryHeap::new();

    // Interface band: any cell whose value changes sign toward a neighbor
    // gets a first-guess distance from the linear sub-cell crossing.
    for y in 0..height {
        for x in 0..width {
            let center = phi.get(x, y);
            let idx = y * width + x;
            let mut best = f32::INFINITY;
            let neighbors = [
                (x.wrapping_sub(1), y, x > 0),
                (x + 1, y, x + 1 < width),
                (x, y.wrapping_sub(1), y > 0),
                (x, y + 1, y + 1 < height),
            ];
            for (nx, ny, valid) in neighbors {
                if !valid {
                    continue;
                }
                let neighbor = phi.get(nx, ny);
                if (center < 0.0) != (neighbor < 0.0) {
                    let denom = center.abs() + neighbor.abs();
                    let d = if denom > f32::EPSILON {
                        dx * center.abs() / denom
                    } else {
                        0.0
                    };
                    best = best.min(d);
                }
            }
            if best.is_finite() {
                distance[idx] = best;
                heap.push(Reverse(Trial {
                    distance: best,
                    idx,
                }));
            }
        }
    }

    if heap.is_empty() {
        warn!("reinitialize: field has no zero crossing, returning sentinel distances");
        return phi.map(|value| if value < 0.0 { -max_distance } else { max_distance });
    }

    while let Some(Reverse(trial)) = heap.pop() {
        let idx = trial.idx;
        if accepted[idx] || trial.distance > distance[idx] {
            continue;
        }
        if trial.distance > max_distance {
            break;
        }
        accepted[idx] = true;
        let x = idx % width;
        let y = idx / width;
        let neighbors = [
            (x.wrapping_sub(1), y, x > 0),
            (x + 1, y, x + 1 < width),
            (x, y.wrapping_sub(1), y > 0),
            (x, y + 1, y + 1 < height),
        ];
        for (nx, ny, valid) in neighbors {
            if !valid {
                continue;
            }
            let nidx = ny * width + nx;
            if accepted[nidx] {
                continue;
            }
            let updated = solve_eikonal_at(&distance, &accepted, nx, ny, width, height, dx);
            if updated < distance[nidx] {
                distance[nidx] = updated;
                heap.push(Reverse(Trial {
                    distance: updated,
                    idx: nidx,
                }));
            }
        }
    }

    Field2::from_fn(grid, |x, y| {
        let idx = y * width + x;
        let d = if accepted[idx] {
            distance[idx].min(max_distance)
        } else {
            max_distance
        };
        sign(idx) * d
    })
}

// 2D upwind Eikonal update from the accepted neighbors: the quadratic
// (d - a)^2 + (d - b)^2 = dx^2 when both axes contribute, the 1D step
// otherwise.
fn solve_eikonal_at(
    distance: &[f32],
    accepted: &[bool],
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    dx: f32,
) -> f32 {
    let axis_min = |a: Option<usize>, b: Option<usize>| {
        let mut best = f32::INFINITY;
        for idx in [a, b].into_iter().flatten() {
            if accepted[idx] {
                best = best.min(distance[idx]);
            }
        }
        best
    };
    let idx = |x: usize, y: usize| y * width + x;
    let phi_x = axis_min(
        (x > 0).then(|| idx(x - 1, y)),
        (x + 1 < width).then(|| idx(x + 1, y)),
    );
    let phi_y = axis_min(
        (y > 0).then(|| idx(x, y - 1)),
        (y + 1 < height).then(|| idx(x, y + 1)),
    );
    if !phi_x.is_finite() && !phi_y.is_finite() {
        return f32::INFINITY;
    }
    let (a, b) = if phi_x <= phi_y {
        (phi_x, phi_y)
    } else {
        (phi_y, phi_x)
    };
    if !b.is_finite() || b - a >= dx {
        return a + dx;
    }
    let sum = a + b;
    let disc = 2.0 * dx * dx - (a - b) * (a - b);
    0.5 * (sum + disc.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Grid2;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    fn circle_phi(grid: Grid2, cx: f32, cy: f32, r: f32, scale: f32) -> Field2 {
        Field2::from_fn(grid, |x, y| {
            let (px, py) = grid.cell_center(x, y);
            let d = ((px - cx).powi(2) + (py - cy).powi(2)).sqrt() - r;
            d * scale
        })
    }

    #[test]
    fn reinit_recovers_unit_gradient_from_a_stretched_field() {
        let grid = Grid2::new(32, 32, 1.0);
        // Same zero crossing as a circle of radius 8, gradient stretched 3x.
        let stretched = circle_phi(grid, 16.0, 16.0, 8.0, 3.0);
        let rebuilt = reinitialize(&stretched, 1e9);
        let truth = circle_phi(grid, 16.0, 16.0, 8.0, 1.0);
        for y in 4..28 {
            for x in 4..28 {
                let got = rebuilt.get(x, y);
                let expected = truth.get(x, y);
                assert!(
                    (got - expected).abs() <= 1.2,
                    "cell ({x},{y}): got {got}, true distance {expected}"
                );
            }
        }
    }

    #[test]
    fn reinit_preserves_signs_strictly_inside_and_outside() {
        let grid = Grid2::new(24, 24, 0.5);
        let phi = circle_phi(grid, 6.0, 6.0, 3.0, 5.0);
        let rebuilt = reinitialize(&phi, 1e9);
        for y in 0..24 {
            for x in 0..24 {
                let before = phi.get(x, y);
                let after = rebuilt.get(x, y);
                if before < -0.5 {
                    assert!(after < 0.0, "inside cell ({x},{y}) flipped: {after}");
                }
                if before > 0.5 {
                    assert!(after > 0.0, "outside cell ({x},{y}) flipped: {after}");
                }
            }
        }
    }

    #[test]
    fn interface_cells_get_sub_cell_distances() {
        let grid = Grid2::new(16, 4, 1.0);
        // Zero crossing a quarter cell past column 7's center.
        let phi = Field2::from_fn(grid, |x, _y| (x as f32 - 7.25) * 4.0);
        let rebuilt = reinitialize(&phi, 1e9);
        assert!(rebuilt.get(7, 1) < 0.0);
        assert_close(rebuilt.get(7, 1), -0.25, 0.05);
        assert_close(rebuilt.get(8, 1), 0.75, 0.05);
    }

    #[test]
    fn cells_beyond_the_cutoff_keep_the_sentinel() {
        let grid = Grid2::new(32, 32, 1.0);
        let phi = circle_phi(grid, 16.0, 16.0, 4.0, 1.0);
        let cutoff = 5.0;
        let rebuilt = reinitialize(&phi, cutoff);
        let mut sentinel_count = 0;
        for y in 0..32 {
            for x in 0..32 {
                let value = rebuilt.get(x, y);
                assert!(value.abs() <= cutoff + 1e-4);
                if (value.abs() - cutoff).abs() < 1e-4 {
                    sentinel_count += 1;
                }
            }
        }
        assert!(sentinel_count > 0, "nothing was cut off on a 32x32 grid");
        // Near-interface values are still real distances.
        assert!(rebuilt.get(16, 20).abs() < 1.5);
    }

    #[test]
    fn uniform_sign_field_warns_and_returns_sentinels() {
        let grid = Grid2::new(8, 8, 1.0);
        let phi = Field2::new(grid, 2.0);
        let rebuilt = reinitialize(&phi, 10.0);
        for y in 0..8 {
            for x in 0..8 {
                assert_close(rebuilt.get(x, y), 10.0, 1e-6);
            }
        }
    }

    #[test]
    fn gradient_magnitude_is_near_one_after_reinit() {
        let grid = Grid2::new(32, 32, 1.0);
        let stretched = circle_phi(grid, 16.0, 16.0, 7.0, 0.2);
        let rebuilt = reinitialize(&stretched, 1e9);
        let mut worst: f32 = 0.0;
        for y in 10..22 {
            for x in 10..22 {
                // The distance field has a genuine kink at the circle
                // center; stay off it.
                let dcx = x as f32 - 16.0;
                let dcy = y as f32 - 16.0;
                if (dcx * dcx + dcy * dcy).sqrt() < 3.5 {
                    continue;
                }
                let gx = 0.5 * (rebuilt.get(x + 1, y) - rebuilt.get(x - 1, y));
                let gy = 0.5 * (rebuilt.get(x, y + 1) - rebuilt.get(x, y - 1));
                let mag = (gx * gx + gy * gy).sqrt();
                worst = worst.max((mag - 1.0).abs());
            }
        }
        assert!(worst < 0.35, "gradient magnitude drifted: {worst}");
    }
}
