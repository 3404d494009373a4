//! Ellipse representations and conversions.
//!
//! Pupil boundaries travel through the crate in the "transparent" form
//! (center, area, eccentricity, angle), whose parameters can be bounded and
//! constrained independently. Projection internals use the explicit
//! geometric form and general conic coefficients.

use nalgebra::{Matrix3, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// Ellipse in transparent parameters.
///
/// An all-NaN value is the designed "no boundary found" signal from the
/// upstream fitter; conversions and projections pass NaN through rather
/// than treating it as an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransparentEllipse {
    /// Center (x, y) in image-plane units.
    pub center: [f64; 2],
    /// Enclosed area.
    pub area: f64,
    /// Eccentricity in [0, 1). Zero denotes a circle, in which case the
    /// angle is arbitrary.
    pub eccentricity: f64,
    /// Major-axis angle from +x, in radians, normalized to [0, π).
    pub theta: f64,
}

impl TransparentEllipse {
    /// All components NaN.
    pub fn nan() -> Self {
        Self {
            center: [f64::NAN, f64::NAN],
            area: f64::NAN,
            eccentricity: f64::NAN,
            theta: f64::NAN,
        }
    }

    /// `true` when every component is finite.
    pub fn is_finite(&self) -> bool {
        self.center[0].is_finite()
            && self.center[1].is_finite()
            && self.area.is_finite()
            && self.eccentricity.is_finite()
            && self.theta.is_finite()
    }

    /// `true` when either center coordinate is NaN (no valid upstream fit).
    pub fn has_nan_center(&self) -> bool {
        self.center[0].is_nan() || self.center[1].is_nan()
    }

    /// Convert to the explicit geometric form.
    ///
    /// NaN inputs yield NaN axes; a degenerate eccentricity ≥ 1 yields NaN
    /// as well, never a panic.
    pub fn to_explicit(&self) -> Ellipse {
        let ratio = 1.0 - self.eccentricity * self.eccentricity;
        let ratio = if ratio > 0.0 { ratio.sqrt() } else { f64::NAN };
        // area = π a b, b = a·ratio
        let a = (self.area / (std::f64::consts::PI * ratio)).sqrt();
        let b = a * ratio;
        Ellipse {
            cx: self.center[0],
            cy: self.center[1],
            a,
            b,
            angle: self.theta,
        }
    }

    /// Shape descriptor `e·[cos 2θ, sin 2θ]`, continuous across the circle
    /// degeneracy (e → 0) and the θ → θ+π wrap.
    pub fn shape_vector(&self) -> [f64; 2] {
        [
            self.eccentricity * (2.0 * self.theta).cos(),
            self.eccentricity * (2.0 * self.theta).sin(),
        ]
    }
}

/// Geometric ellipse parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    /// Center x.
    pub cx: f64,
    /// Center y.
    pub cy: f64,
    /// Semi-major axis length.
    pub a: f64,
    /// Semi-minor axis length.
    pub b: f64,
    /// Rotation angle of the major axis from +x, in radians.
    pub angle: f64,
}

impl Ellipse {
    /// Check basic validity: positive semi-axes, finite values.
    pub fn is_valid(&self) -> bool {
        self.a > 0.0
            && self.b > 0.0
            && self.a.is_finite()
            && self.b.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.angle.is_finite()
    }

    /// Convert to transparent parameters.
    pub fn to_transparent(&self) -> TransparentEllipse {
        let (a, b) = if self.a >= self.b {
            (self.a, self.b)
        } else {
            (self.b, self.a)
        };
        let ecc = (1.0 - (b / a) * (b / a)).max(0.0).sqrt();
        TransparentEllipse {
            center: [self.cx, self.cy],
            area: std::f64::consts::PI * a * b,
            eccentricity: ecc,
            theta: normalize_angle_half_turn(if self.a >= self.b {
                self.angle
            } else {
                self.angle + std::f64::consts::FRAC_PI_2
            }),
        }
    }

    /// Sample `n` points on the ellipse boundary.
    pub fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        let cos_a = self.angle.cos();
        let sin_a = self.angle.sin();
        (0..n)
            .map(|i| {
                let t = 2.0 * std::f64::consts::PI * (i as f64) / (n as f64);
                let px = self.a * t.cos();
                let py = self.b * t.sin();
                [
                    self.cx + cos_a * px - sin_a * py,
                    self.cy + sin_a * px + cos_a * py,
                ]
            })
            .collect()
    }
}

/// General conic: A x² + B xy + C y² + D x + E y + F = 0.
/// Stored as [A, B, C, D, E, F].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConicCoeffs(pub [f64; 6]);

impl ConicCoeffs {
    /// Check whether the conic represents an ellipse (B² − 4AC < 0).
    pub fn is_ellipse(&self) -> bool {
        let [a, b, c, ..] = self.0;
        b * b - 4.0 * a * c < 0.0
    }

    /// Convert to geometric ellipse parameters.
    /// Returns `None` if the conic is not a proper ellipse.
    pub fn to_ellipse(&self) -> Option<Ellipse> {
        conic_to_ellipse(self)
    }
}

/// Convert general conic coefficients to geometric ellipse parameters.
///
/// Returns `None` for non-elliptical or degenerate conics.
pub fn conic_to_ellipse(c: &ConicCoeffs) -> Option<Ellipse> {
    let [a, b, c_coeff, d, e, f] = c.0;

    let disc = b * b - 4.0 * a * c_coeff;
    if !(disc < 0.0) {
        return None;
    }

    // Center from the gradient zero:
    //   2A·cx + B·cy + D = 0
    //   B·cx + 2C·cy + E = 0
    let denom = 4.0 * a * c_coeff - b * b;
    let cx = (b * e - 2.0 * c_coeff * d) / denom;
    let cy = (b * d - 2.0 * a * e) / denom;

    let angle = if (a - c_coeff).abs() < 1e-15 {
        if b > 0.0 {
            std::f64::consts::FRAC_PI_4
        } else if b < 0.0 {
            -std::f64::consts::FRAC_PI_4
        } else {
            0.0
        }
    } else {
        0.5 * b.atan2(a - c_coeff)
    };

    // Semi-axes from the eigenvalues of the quadratic part.
    let sum = a + c_coeff;
    let diff = ((a - c_coeff).powi(2) + b * b).sqrt();
    let lambda1 = (sum + diff) / 2.0;
    let lambda2 = (sum - diff) / 2.0;

    // Conic value at the center.
    let f_prime = a * cx * cx + b * cx * cy + c_coeff * cy * cy + d * cx + e * cy + f;
    if f_prime.abs() < 1e-18 {
        return None;
    }

    let a_sq = -f_prime / lambda1;
    let b_sq = -f_prime / lambda2;
    if a_sq <= 0.0 || b_sq <= 0.0 {
        return None;
    }

    let semi_a = a_sq.sqrt();
    let semi_b = b_sq.sqrt();

    let (semi_a, semi_b, angle) = if semi_a >= semi_b {
        (semi_a, semi_b, angle)
    } else {
        (semi_b, semi_a, angle + std::f64::consts::FRAC_PI_2)
    };

    Some(Ellipse {
        cx,
        cy,
        a: semi_a,
        b: semi_b,
        angle,
    })
}

/// Convert geometric ellipse parameters to general conic coefficients.
pub fn ellipse_to_conic(e: &Ellipse) -> ConicCoeffs {
    let cos_a = e.angle.cos();
    let sin_a = e.angle.sin();
    let a2 = e.a * e.a;
    let b2 = e.b * e.b;

    let ca = cos_a * cos_a / a2 + sin_a * sin_a / b2;
    let cb = 2.0 * cos_a * sin_a * (1.0 / a2 - 1.0 / b2);
    let cc = sin_a * sin_a / a2 + cos_a * cos_a / b2;
    let cd = -2.0 * ca * e.cx - cb * e.cy;
    let ce = -cb * e.cx - 2.0 * cc * e.cy;
    let cf = ca * e.cx * e.cx + cb * e.cx * e.cy + cc * e.cy * e.cy - 1.0;

    ConicCoeffs([ca, cb, cc, cd, ce, cf])
}

/// Normalize an angle to [0, π).
pub fn normalize_angle_half_turn(mut angle: f64) -> f64 {
    let pi = std::f64::consts::PI;
    if !angle.is_finite() {
        return angle;
    }
    angle %= pi;
    if angle < 0.0 {
        angle += pi;
    }
    angle
}

// ── Direct least-squares conic fit ─────────────────────────────────────────

/// Fit a conic to boundary points via direct least squares with the ellipse
/// constraint (Fitzgibbon), returning the transparent form.
///
/// Requires at least 6 points. Points are normalized to centroid/√2 scale
/// before building the scatter matrix. Any NaN input point makes the result
/// all-NaN.
pub fn fit_transparent_ellipse(points: &[[f64; 2]]) -> TransparentEllipse {
    if points.iter().any(|p| p[0].is_nan() || p[1].is_nan()) {
        return TransparentEllipse::nan();
    }
    match fit_conic_direct(points).and_then(|c| c.to_ellipse()) {
        Some(e) if e.is_valid() => e.to_transparent(),
        _ => TransparentEllipse::nan(),
    }
}

/// Direct least-squares conic fit. Returns `None` for fewer than 6 points
/// or a numerically degenerate system.
pub fn fit_conic_direct(points: &[[f64; 2]]) -> Option<ConicCoeffs> {
    let n = points.len();
    if n < 6 {
        return None;
    }

    let (mean_x, mean_y, scale) = normalization_params(points);

    // Scatter matrix S = Dᵀ D for D rows [x², xy, y², x, y, 1], accumulated
    // without materializing D.
    let mut s = nalgebra::Matrix6::<f64>::zeros();
    for &[px, py] in points {
        let x = (px - mean_x) * scale;
        let y = (py - mean_y) * scale;
        let row = Vector6::new(x * x, x * y, y * y, x, y, 1.0);
        s += row * row.transpose();
    }

    let s11 = s.fixed_view::<3, 3>(0, 0).into_owned();
    let s12 = s.fixed_view::<3, 3>(0, 3).into_owned();
    let s22 = s.fixed_view::<3, 3>(3, 3).into_owned();

    // Ellipse constraint matrix: aᵀ C1 a = 4AC − B².
    let c1 = Matrix3::new(0.0, 0.0, 2.0, 0.0, -1.0, 0.0, 2.0, 0.0, 0.0);

    let s22_inv = s22.try_inverse()?;
    let m = s11 - s12 * s22_inv * s12.transpose();
    let c1_inv = c1.try_inverse()?;

    let a1 = constrained_eigenvector(&(c1_inv * m))?;
    let a2 = -s22_inv * s12.transpose() * a1;

    let coeffs = denormalize_conic(
        &Vector6::new(a1[0], a1[1], a1[2], a2[0], a2[1], a2[2]),
        mean_x,
        mean_y,
        scale,
    );

    let conic = ConicCoeffs(coeffs);
    if conic.is_ellipse() {
        Some(conic)
    } else {
        None
    }
}

/// Eigenvector of the reduced system satisfying the ellipse constraint
/// 4 v₀ v₂ − v₁² > 0.
///
/// Eigenvalues via the characteristic cubic, eigenvectors via the adjugate
/// null-space trick; the system matrix is not symmetric, so the symmetric
/// eigensolver does not apply.
fn constrained_eigenvector(system: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let a = system;
    let tr = a[(0, 0)] + a[(1, 1)] + a[(2, 2)];
    let minor_sum = a[(0, 0)] * a[(1, 1)] - a[(0, 1)] * a[(1, 0)] + a[(0, 0)] * a[(2, 2)]
        - a[(0, 2)] * a[(2, 0)]
        + a[(1, 1)] * a[(2, 2)]
        - a[(1, 2)] * a[(2, 1)];
    let det = a.determinant();

    let mut best: Option<Vector3<f64>> = None;
    let mut best_ev = f64::MAX;
    for ev in solve_cubic_real(1.0, -tr, minor_sum, -det) {
        let shifted = system - Matrix3::identity() * ev;
        let Some(v) = null_vector_3x3(&shifted) else {
            continue;
        };
        if 4.0 * v[0] * v[2] - v[1] * v[1] > 0.0 && ev.abs() < best_ev {
            best_ev = ev.abs();
            best = Some(v);
        }
    }
    best
}

/// Null vector of a (near-)singular 3×3 matrix: the largest-norm row of the
/// adjugate.
fn null_vector_3x3(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let cofactors = [
        Vector3::new(
            m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)],
            -(m[(1, 0)] * m[(2, 2)] - m[(1, 2)] * m[(2, 0)]),
            m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)],
        ),
        Vector3::new(
            -(m[(0, 1)] * m[(2, 2)] - m[(0, 2)] * m[(2, 1)]),
            m[(0, 0)] * m[(2, 2)] - m[(0, 2)] * m[(2, 0)],
            -(m[(0, 0)] * m[(2, 1)] - m[(0, 1)] * m[(2, 0)]),
        ),
        Vector3::new(
            m[(0, 1)] * m[(1, 2)] - m[(0, 2)] * m[(1, 1)],
            -(m[(0, 0)] * m[(1, 2)] - m[(0, 2)] * m[(1, 0)]),
            m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)],
        ),
    ];

    let mut best = &cofactors[0];
    let mut best_norm = best.norm_squared();
    for c in &cofactors[1..] {
        let n = c.norm_squared();
        if n > best_norm {
            best = c;
            best_norm = n;
        }
    }

    if best_norm < 1e-30 {
        return None;
    }
    Some(best / best_norm.sqrt())
}

/// Real roots of a x³ + b x² + c x + d = 0 (one or three).
fn solve_cubic_real(a: f64, b: f64, c: f64, d: f64) -> Vec<f64> {
    let a_inv = 1.0 / a;
    let b_ = b * a_inv;
    let c_ = c * a_inv;
    let d_ = d * a_inv;

    let p = c_ - b_ * b_ / 3.0;
    let q = 2.0 * b_ * b_ * b_ / 27.0 - b_ * c_ / 3.0 + d_;

    let disc = -4.0 * p * p * p - 27.0 * q * q;
    let shift = -b_ / 3.0;

    if disc >= 0.0 {
        let r = (-p / 3.0).sqrt();
        let cos_arg = if r.abs() < 1e-15 {
            0.0
        } else {
            (-q / (2.0 * r * r * r)).clamp(-1.0, 1.0)
        };
        let theta = cos_arg.acos();
        let two_r = 2.0 * r;
        vec![
            two_r * (theta / 3.0).cos() + shift,
            two_r * ((theta + 2.0 * std::f64::consts::PI) / 3.0).cos() + shift,
            two_r * ((theta + 4.0 * std::f64::consts::PI) / 3.0).cos() + shift,
        ]
    } else {
        let sqrt_disc = (q * q / 4.0 + p * p * p / 27.0).sqrt();
        let u = (-q / 2.0 + sqrt_disc).cbrt();
        let v = (-q / 2.0 - sqrt_disc).cbrt();
        vec![u + v + shift]
    }
}

/// Normalization parameters: centroid and √2 mean-distance scale.
fn normalization_params(points: &[[f64; 2]]) -> (f64, f64, f64) {
    let n = points.len() as f64;
    let mean_x: f64 = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let mean_y: f64 = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist: f64 = points
        .iter()
        .map(|p| ((p[0] - mean_x).powi(2) + (p[1] - mean_y).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let scale = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    (mean_x, mean_y, scale)
}

/// Map conic coefficients fitted in normalized coordinates x' = s(x − mx),
/// y' = s(y − my) back to the original frame.
fn denormalize_conic(c: &Vector6<f64>, mx: f64, my: f64, s: f64) -> [f64; 6] {
    let [a_, b_, c_, d_, e_, f_] = [c[0], c[1], c[2], c[3], c[4], c[5]];
    let s2 = s * s;

    let a = a_ * s2;
    let b = b_ * s2;
    let cc = c_ * s2;
    let d = -2.0 * a_ * s2 * mx - b_ * s2 * my + d_ * s;
    let e = -b_ * s2 * mx - 2.0 * c_ * s2 * my + e_ * s;
    let f =
        a_ * s2 * mx * mx + b_ * s2 * mx * my + c_ * s2 * my * my - d_ * s * mx - e_ * s * my + f_;

    [a, b, cc, d, e, f]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_transparent() -> TransparentEllipse {
        TransparentEllipse {
            center: [3.2, -1.4],
            area: 12.5,
            eccentricity: 0.45,
            theta: 1.1,
        }
    }

    #[test]
    fn transparent_explicit_roundtrip() {
        let t = sample_transparent();
        let back = t.to_explicit().to_transparent();
        assert_relative_eq!(back.center[0], t.center[0], epsilon = 1e-12);
        assert_relative_eq!(back.center[1], t.center[1], epsilon = 1e-12);
        assert_relative_eq!(back.area, t.area, epsilon = 1e-10);
        assert_relative_eq!(back.eccentricity, t.eccentricity, epsilon = 1e-12);
        assert_relative_eq!(back.theta, t.theta, epsilon = 1e-12);
    }

    #[test]
    fn circle_has_zero_eccentricity() {
        let e = Ellipse {
            cx: 0.0,
            cy: 0.0,
            a: 2.0,
            b: 2.0,
            angle: 0.7,
        };
        let t = e.to_transparent();
        assert_eq!(t.eccentricity, 0.0);
        assert_relative_eq!(t.area, std::f64::consts::PI * 4.0, epsilon = 1e-12);
    }

    #[test]
    fn nan_passes_through_conversions() {
        let t = TransparentEllipse::nan();
        let e = t.to_explicit();
        assert!(e.cx.is_nan() && e.a.is_nan());
        assert!(e.to_transparent().area.is_nan());
    }

    #[test]
    fn fit_recovers_sampled_ellipse() {
        let e = Ellipse {
            cx: 10.0,
            cy: -4.0,
            a: 5.0,
            b: 3.0,
            angle: 0.6,
        };
        let pts = e.sample_points(24);
        let t = fit_transparent_ellipse(&pts);
        let expected = e.to_transparent();
        assert_relative_eq!(t.center[0], expected.center[0], epsilon = 1e-8);
        assert_relative_eq!(t.center[1], expected.center[1], epsilon = 1e-8);
        assert_relative_eq!(t.area, expected.area, epsilon = 1e-6);
        assert_relative_eq!(t.eccentricity, expected.eccentricity, epsilon = 1e-8);
        assert_relative_eq!(t.theta, expected.theta, epsilon = 1e-8);
    }

    #[test]
    fn fit_with_nan_point_is_nan() {
        let e = Ellipse {
            cx: 0.0,
            cy: 0.0,
            a: 2.0,
            b: 1.0,
            angle: 0.0,
        };
        let mut pts = e.sample_points(12);
        pts[3][0] = f64::NAN;
        assert!(fit_transparent_ellipse(&pts).area.is_nan());
    }

    #[test]
    fn angle_normalization_wraps_into_half_turn() {
        let pi = std::f64::consts::PI;
        assert_relative_eq!(normalize_angle_half_turn(pi + 0.3), 0.3, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle_half_turn(-0.3), pi - 0.3, epsilon = 1e-12);
        assert!(normalize_angle_half_turn(0.0) == 0.0);
    }
}
