//! Corneal refraction model.
//!
//! The camera never sees the pupil aperture directly: it sees its virtual
//! image formed by refraction at the corneal surfaces. [`OpticsModel`]
//! captures the surfaces once per set of optical constants and maps eye
//! points to their virtual counterparts; camera translation is a query
//! parameter, so a built model is reused unchanged across candidate scene
//! geometries and across threads.

use serde::{Deserialize, Serialize};

use crate::eye::EyeModel;
use crate::scene::CameraExtrinsics;

/// One centered refracting spherical surface.
///
/// The surface apex sits on the optical axis at `apex_z` (mm behind the
/// corneal apex) and curves away from the camera; the center of curvature
/// is at `apex_z + radius`. Rays traverse from `n_before` (eye side) into
/// `n_after` (camera side).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefractingSurface {
    /// Radius of curvature (mm, positive).
    pub radius: f64,
    /// Apex depth behind the corneal apex (mm).
    pub apex_z: f64,
    /// Refractive index on the eye side.
    pub n_before: f64,
    /// Refractive index on the camera side.
    pub n_after: f64,
}

/// Reusable ray-trace function set derived from an eye model's optical
/// constants.
///
/// Read-only after construction and safely shared across concurrent
/// forward/inverse calls. Rebuild only when the optical constants change;
/// translation and rotation-center changes do not require it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpticsModel {
    surfaces: Vec<RefractingSurface>,
}

/// Iteration budget for the launch-angle solve.
const ANGLE_SCAN_STEPS: usize = 24;
const ANGLE_BISECT_ITERS: usize = 36;
const ANGLE_HALF_SPAN: f64 = 0.5;

impl OpticsModel {
    /// Build the surface set for an eye model: posterior then anterior
    /// corneal surface, traversed outward.
    pub fn new(eye: &EyeModel) -> Self {
        Self {
            surfaces: vec![
                RefractingSurface {
                    radius: eye.cornea_back_radius,
                    apex_z: eye.cornea_thickness,
                    n_before: eye.index_aqueous,
                    n_after: eye.index_cornea,
                },
                RefractingSurface {
                    radius: eye.cornea_front_radius,
                    apex_z: 0.0,
                    n_before: eye.index_cornea,
                    n_after: 1.0,
                },
            ],
        }
    }

    /// Virtual image of an eye point as seen by the camera.
    ///
    /// Solves for the launch angle whose refracted ray meets the camera
    /// nodal point, then back-extends the exiting ray to the source depth.
    /// Returns an all-NaN point for total internal reflection, a missed
    /// surface, or NaN input; callers propagate it.
    pub fn virtual_point(&self, point: [f64; 3], camera: &CameraExtrinsics) -> [f64; 3] {
        if point.iter().any(|v| v.is_nan()) {
            return [f64::NAN, f64::NAN, f64::NAN];
        }

        let t = camera.translation;
        // Meridional plane: spanned by the optical axis and the point's
        // lateral offset (falling back to the camera's when the point is
        // on axis).
        let lat_p = (point[0] * point[0] + point[1] * point[1]).sqrt();
        let (ux, uy) = if lat_p > 1e-9 {
            (point[0] / lat_p, point[1] / lat_p)
        } else {
            let lat_c = (t[0] * t[0] + t[1] * t[1]).sqrt();
            if lat_c > 1e-9 {
                (t[0] / lat_c, t[1] / lat_c)
            } else {
                return point;
            }
        };

        let cam_lat = t[0] * ux + t[1] * uy;
        let cam_z = -t[2];

        // Launch angle of the straight line to the camera, as the scan
        // center.
        let direct = (cam_lat - lat_p).atan2(point[2] - cam_z);

        let miss = |angle: f64| -> Option<f64> {
            let ray = self.trace_meridional(lat_p, point[2], angle)?;
            // Lateral position of the exit ray at the camera plane.
            let step = (cam_z - ray.z) / ray.dz;
            if !step.is_finite() || step < 0.0 {
                return None;
            }
            Some(ray.lat + step * ray.dl - cam_lat)
        };

        let nan3 = [f64::NAN, f64::NAN, f64::NAN];
        let Some(angle) = solve_launch_angle(&miss, direct) else {
            return nan3;
        };
        let Some(ray) = self.trace_meridional(lat_p, point[2], angle) else {
            return nan3;
        };

        // Back-extend the exit ray to the source depth. Any depth along the
        // exit ray projects identically through the nodal point; keeping the
        // source depth keeps per-point magnification comparable.
        let back = (point[2] - ray.z) / ray.dz;
        let v_lat = ray.lat + back * ray.dl;
        if !v_lat.is_finite() {
            return [f64::NAN, f64::NAN, f64::NAN];
        }
        [v_lat * ux, v_lat * uy, point[2]]
    }

    /// Trace one meridional ray from `(lat, z)` at `angle` (radians from
    /// the −z axis, positive toward +lat) through all surfaces.
    fn trace_meridional(&self, lat: f64, z: f64, angle: f64) -> Option<Ray2> {
        let mut ray = Ray2 {
            lat,
            z,
            dl: angle.sin(),
            dz: -angle.cos(),
        };
        for surface in &self.surfaces {
            ray = refract_at_surface(&ray, surface)?;
        }
        Some(ray)
    }
}

/// Meridional ray: position (lat, z), unit direction (dl, dz) with dz < 0.
#[derive(Debug, Clone, Copy)]
struct Ray2 {
    lat: f64,
    z: f64,
    dl: f64,
    dz: f64,
}

/// Intersect a ray with a surface sphere and apply Snell's law.
///
/// Returns `None` when the ray misses the surface cap or undergoes total
/// internal reflection.
fn refract_at_surface(ray: &Ray2, surface: &RefractingSurface) -> Option<Ray2> {
    let cz = surface.apex_z + surface.radius;
    let r = surface.radius;

    // |P + s·d − C|² = r², with C = (0, cz).
    let pl = ray.lat;
    let pz = ray.z - cz;
    let b = pl * ray.dl + pz * ray.dz;
    let c = pl * pl + pz * pz - r * r;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    // Exit intersection along the propagation direction.
    let s = -b + disc.sqrt();
    if !(s > 0.0) {
        return None;
    }

    let xl = ray.lat + s * ray.dl;
    let xz = ray.z + s * ray.dz;

    // Outward normal, oriented against the incoming ray.
    let mut nl = (xl - 0.0) / r;
    let mut nz = (xz - cz) / r;
    let mut cos_i = -(ray.dl * nl + ray.dz * nz);
    if cos_i < 0.0 {
        nl = -nl;
        nz = -nz;
        cos_i = -cos_i;
    }

    let eta = surface.n_before / surface.n_after;
    let k = 1.0 - eta * eta * (1.0 - cos_i * cos_i);
    if k < 0.0 {
        return None;
    }
    let coef = eta * cos_i - k.sqrt();
    let dl = eta * ray.dl + coef * nl;
    let dz = eta * ray.dz + coef * nz;
    if !(dz < 0.0) {
        return None;
    }

    Some(Ray2 {
        lat: xl,
        z: xz,
        dl,
        dz,
    })
}

/// Find the launch angle whose miss distance at the camera plane is zero.
///
/// Scans a symmetric span around the straight-line angle for a sign change,
/// then bisects; deterministic with a fixed evaluation budget.
fn solve_launch_angle(miss: &dyn Fn(f64) -> Option<f64>, center: f64) -> Option<f64> {
    let lo = center - ANGLE_HALF_SPAN;
    let step = 2.0 * ANGLE_HALF_SPAN / ANGLE_SCAN_STEPS as f64;

    let mut prev: Option<(f64, f64)> = None;
    let mut bracket = None;
    for i in 0..=ANGLE_SCAN_STEPS {
        let a = lo + step * i as f64;
        let Some(m) = miss(a) else {
            prev = None;
            continue;
        };
        if m == 0.0 {
            return Some(a);
        }
        if let Some((pa, pm)) = prev {
            if pm * m < 0.0 {
                bracket = Some((pa, a, pm));
                break;
            }
        }
        prev = Some((a, m));
    }

    let (mut a, mut b, mut fa) = bracket?;
    for _ in 0..ANGLE_BISECT_ITERS {
        let mid = 0.5 * (a + b);
        let Some(fm) = miss(mid) else {
            return None;
        };
        if fa * fm <= 0.0 {
            b = mid;
        } else {
            a = mid;
            fa = fm;
        }
    }
    Some(0.5 * (a + b))
}
