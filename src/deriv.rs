pub const WENO_EPSILON: f32 = 1e-8;

pub fn upwind1(values: &[f32; 3], dx: f32) -> [f32; 2] {
    let inv = 1.0 / dx;
    [
        (values[1] - values[0]) * inv,
        (values[2] - values[1]) * inv,
    ]
}

pub fn upwind1_biased(values: &[f32; 3], dx: f32, positive_flow: bool) -> f32 {
    let both = upwind1(values, dx);
    if positive_flow {
        both[0]
    } else {
        both[1]
    }
}

pub fn cd2(values: &[f32; 3], dx: f32) -> f32 {
    (values[2] - values[0]) / (2.0 * dx)
}

// Window center is index 3. Successive Newton divided differences, each
// stage extending toward the side with the smaller difference so the
// stencil never spans a discontinuity.
pub fn eno3(values: &[f32; 7], dx: f32) -> [f32; 2] {
    let inv = 1.0 / dx;
    let mut d1 = [0.0; 6];
    for j in 0..6 {
        d1[j] = (values[j + 1] - values[j]) * inv;
    }
    let mut d2 = [0.0; 5];
    for j in 0..5 {
        d2[j] = (d1[j + 1] - d1[j]) * inv * 0.5;
    }
    let mut d3 = [0.0; 4];
    for j in 0..4 {
        d3[j] = (d2[j + 1] - d2[j]) * inv / 3.0;
    }
    [
        eno3_side(&d1, &d2, &d3, dx, false),
        eno3_side(&d1, &d2, &d3, dx, true),
    ]
}

pub fn eno3_biased(values: &[f32; 7], dx: f32, positive_flow: bool) -> f32 {
    let both = eno3(values, dx);
    if positive_flow {
        both[0]
    } else {
        both[1]
    }
}

fn eno3_side(d1: &[f32; 6], d2: &[f32; 5], d3: &[f32; 4], dx: f32, plus: bool) -> f32 {
    // k is the left endpoint of the current 2-point stencil around index 3.
    let k = if plus { 3 } else { 2 };
    let q1 = d1[k];
    let (c, k_star) = if d2[k - 1].abs() <= d2[k].abs() {
        (d2[k - 1], k - 1)
    } else {
        (d2[k], k)
    };
    let q2 = if plus { -c * dx } else { c * dx };
    let c_star = if d3[k_star - 1].abs() <= d3[k_star].abs() {
        d3[k_star - 1]
    } else {
        d3[k_star]
    };
    // Coefficient of the cubic term at the center: product of (x_3 - z)
    // over the other two nodes of the stage-two stencil.
    let stencil_left = k_star == k - 1;
    let q3 = match (plus, stencil_left) {
        (false, true) => 2.0 * c_star * dx * dx,
        (false, false) => -c_star * dx * dx,
        (true, true) => -c_star * dx * dx,
        (true, false) => 2.0 * c_star * dx * dx,
    };
    q1 + q2 + q3
}

pub fn weno5(values: &[f32; 7], dx: f32, eps: f32) -> [f32; 2] {
    let inv = 1.0 / dx;
    let mut d1 = [0.0; 6];
    for j in 0..6 {
        d1[j] = (values[j + 1] - values[j]) * inv;
    }
    [
        weno5_blend(d1[0], d1[1], d1[2], d1[3], d1[4], eps),
        weno5_blend(d1[5], d1[4], d1[3], d1[2], d1[1], eps),
    ]
}

pub fn weno5_biased(values: &[f32; 7], dx: f32, eps: f32, positive_flow: bool) -> f32 {
    let both = weno5(values, dx, eps);
    if positive_flow {
        both[0]
    } else {
        both[1]
    }
}

fn weno5_blend(v1: f32, v2: f32, v3: f32, v4: f32, v5: f32, eps: f32) -> f32 {
    let phi1 = v1 / 3.0 - 7.0 * v2 / 6.0 + 11.0 * v3 / 6.0;
    let phi2 = -v2 / 6.0 + 5.0 * v3 / 6.0 + v4 / 3.0;
    let phi3 = v3 / 3.0 + 5.0 * v4 / 6.0 - v5 / 6.0;
    let s1 = 13.0 / 12.0 * (v1 - 2.0 * v2 + v3).powi(2) + 0.25 * (v1 - 4.0 * v2 + 3.0 * v3).powi(2);
    let s2 = 13.0 / 12.0 * (v2 - 2.0 * v3 + v4).powi(2) + 0.25 * (v2 - v4).powi(2);
    let s3 = 13.0 / 12.0 * (v3 - 2.0 * v4 + v5).powi(2) + 0.25 * (3.0 * v3 - 4.0 * v4 + v5).powi(2);
    let a1 = 0.1 / (s1 + eps).powi(2);
    let a2 = 0.6 / (s2 + eps).powi(2);
    let a3 = 0.3 / (s3 + eps).powi(2);
    (a1 * phi1 + a2 * phi2 + a3 * phi3) / (a1 + a2 + a3)
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

    fn window7(f: impl Fn(f32) -> f32, center: f32, dx: f32) -> [f32; 7] {
        let mut out = [0.0; 7];
        for (j, value) in out.iter_mut().enumerate() {
            *value = f(center + (j as f32 - 3.0) * dx);
        }
        out
    }

    #[test]
    fn upwind_matches_one_sided_slopes() {
        let both = upwind1(&[1.0, 3.0, 4.0], 0.5);
        assert_close(both[0], 4.0, 1e-6);
        assert_close(both[1], 2.0, 1e-6);
        assert_close(upwind1_biased(&[1.0, 3.0, 4.0], 0.5, true), 4.0, 1e-6);
        assert_close(upwind1_biased(&[1.0, 3.0, 4.0], 0.5, false), 2.0, 1e-6);
    }

    #[test]
    fn cd2_is_exact_for_quadratic() {
        let window = [1.0, 0.0, 1.0];
        assert_close(cd2(&window, 1.0), 0.0, 1e-6);
        let slope = [0.0, 1.5, 3.0];
        assert_close(cd2(&slope, 1.0), 1.5, 1e-6);
    }

    #[test]
    fn eno3_is_exact_for_linear_input() {
        let window = window7(|x| 2.5 * x - 1.0, 0.7, 0.25);
        let both = eno3(&window, 0.25);
        assert_close(both[0], 2.5, 1e-4);
        assert_close(both[1], 2.5, 1e-4);
    }

    #[test]
    fn eno3_is_exact_for_cubic_input() {
        let window = window7(|x| x * x * x, 0.0, 1.0);
        let both = eno3(&window, 1.0);
        assert_close(both[0], 0.0, 1e-4);
        assert_close(both[1], 0.0, 1e-4);
    }

    #[test]
    fn eno3_matches_cd2_on_smooth_input() {
        let dx = 0.1;
        let window = window7(|x| x.sin(), 0.3, dx);
        let central = cd2(&[window[2], window[3], window[4]], dx);
        let both = eno3(&window, dx);
        // Truncation error: ENO3 is higher order than CD2, both near cos(0.3).
        assert_close(both[0], central, 5e-3);
        assert_close(both[1], central, 5e-3);
    }

    #[test]
    fn eno3_stays_bounded_across_a_jump() {
        let window = [0.0, 0.0, 0.0, 0.0, 100.0, 100.0, 100.0];
        let naive = cd2(&[window[2], window[3], window[4]], 1.0);
        assert!(naive.abs() >= 50.0);
        let both = eno3(&window, 1.0);
        // The one-sided stencil avoids spanning the jump.
        assert!(both[0].abs() < 1.0, "minus side leaked the jump: {}", both[0]);
    }

    #[test]
    fn weno5_is_exact_for_linear_input() {
        let window = window7(|x| -1.25 * x + 4.0, 2.0, 0.5);
        let both = weno5(&window, 0.5, WENO_EPSILON);
        assert_close(both[0], -1.25, 1e-4);
        assert_close(both[1], -1.25, 1e-4);
    }

    #[test]
    fn weno5_matches_cd2_on_smooth_input() {
        let dx = 0.1;
        let window = window7(|x| (2.0 * x).cos(), -0.2, dx);
        let central = cd2(&[window[2], window[3], window[4]], dx);
        let both = weno5(&window, dx, WENO_EPSILON);
        assert_close(both[0], central, 1e-2);
        assert_close(both[1], central, 1e-2);
    }

    #[test]
    fn weno5_stays_bounded_across_a_jump() {
        let window = [0.0, 0.0, 0.0, 0.0, 100.0, 100.0, 100.0];
        let both = weno5(&window, 1.0, WENO_EPSILON);
        assert!(both[0].abs() < 1.0, "minus side leaked the jump: {}", both[0]);
    }

    #[test]
    fn weno5_zero_smoothness_does_not_divide_by_zero() {
        let window = [0.0; 7];
        let both = weno5(&window, 1.0, WENO_EPSILON);
        assert!(both[0].is_finite());
        assert!(both[1].is_finite());
        assert_close(both[0], 0.0, 1e-6);
    }
}
