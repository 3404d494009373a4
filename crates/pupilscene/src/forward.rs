//! Forward projection: eye pose → image-plane ellipse.

use nalgebra::Vector3;

use crate::ellipse::{fit_transparent_ellipse, TransparentEllipse};
use crate::eye::EyePose;
use crate::optics::OpticsModel;
use crate::scene::SceneGeometry;

/// Perimeter points sampled on the pupil aperture before projection.
const PERIMETER_POINTS: usize = 16;

/// Project the pupil aperture of `pose` under `scene` onto the image plane.
///
/// The aperture is a circle of the pose's radius in the pupil plane,
/// rotated about the scaled elevational then azimuthal rotation centers
/// (the aperture is rotationally symmetric, so the pinned-zero torsion has
/// no effect on it). With an optics model each perimeter point is replaced
/// by its corneal virtual image before projection. Projection is the
/// depth-scaled orthogonal approximation: magnification `t_z / (t_z + z)`
/// (unity at the apex plane) with the camera's lateral translation removed,
/// equivalent to a nodal-point projection with no intrinsic camera model.
///
/// Pure function: identical inputs give bit-identical output. Degenerate
/// geometry and NaN poses yield an all-NaN ellipse.
pub fn project_pupil(
    pose: &EyePose,
    scene: &SceneGeometry,
    optics: Option<&OpticsModel>,
) -> TransparentEllipse {
    if !pose.is_finite() {
        return TransparentEllipse::nan();
    }

    let centers = scene.eye.scaled_centers();
    let azi = pose.azimuth_deg.to_radians();
    let ele = pose.elevation_deg.to_radians();

    let (sin_a, cos_a) = azi.sin_cos();
    let (sin_e, cos_e) = ele.sin_cos();

    let pupil_z = scene.eye.pupil_depth;
    let t = scene.camera.translation;

    let mut projected = Vec::with_capacity(PERIMETER_POINTS);
    for i in 0..PERIMETER_POINTS {
        let phi = 2.0 * std::f64::consts::PI * (i as f64) / (PERIMETER_POINTS as f64);
        let p = Vector3::new(
            pose.pupil_radius * phi.cos(),
            pose.pupil_radius * phi.sin(),
            pupil_z,
        );

        // Elevation about the x axis through the elevational center;
        // positive elevation moves the pupil toward +y.
        let pe = Vector3::new(
            p.x,
            (p.y) * cos_e - (p.z - centers.ele_depth) * sin_e,
            (p.y) * sin_e + (p.z - centers.ele_depth) * cos_e + centers.ele_depth,
        );

        // Azimuth about the y axis through the azimuthal center; positive
        // azimuth moves the pupil toward +x.
        let pa = Vector3::new(
            pe.x * cos_a - (pe.z - centers.azi_depth) * sin_a,
            pe.y,
            pe.x * sin_a + (pe.z - centers.azi_depth) * cos_a + centers.azi_depth,
        );

        let world = match optics {
            Some(model) => {
                let v = model.virtual_point([pa.x, pa.y, pa.z], &scene.camera);
                Vector3::new(v[0], v[1], v[2])
            }
            None => pa,
        };

        let depth = t[2] + world.z;
        if !(depth > 0.0) {
            return TransparentEllipse::nan();
        }
        let m = t[2] / depth;
        projected.push([(world.x - t[0]) * m, (world.y - t[1]) * m]);
    }

    fit_transparent_ellipse(&projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{CameraExtrinsics, SceneGeometry};

    fn scene() -> SceneGeometry {
        SceneGeometry {
            camera: CameraExtrinsics {
                translation: [-1.2, 0.9, 108.0],
            },
            ..SceneGeometry::default()
        }
    }

    #[test]
    fn primary_gaze_projects_near_circle() {
        let e = project_pupil(&EyePose::new(0.0, 0.0, 2.0), &scene(), None);
        assert!(e.is_finite());
        // Centered pupil: only the camera offset displaces the image.
        assert!((e.center[0] - 1.2 * 108.0 / (108.0 + 3.7)).abs() < 1e-6);
        assert!((e.center[1] + 0.9 * 108.0 / (108.0 + 3.7)).abs() < 1e-6);
        assert!(e.eccentricity < 1e-6, "ecc = {}", e.eccentricity);
        let m = 108.0 / (108.0 + 3.7);
        let expected_area = std::f64::consts::PI * (2.0 * m) * (2.0 * m);
        assert!((e.area - expected_area).abs() / expected_area < 1e-4);
    }

    #[test]
    fn azimuth_moves_center_and_elongates() {
        let base = project_pupil(&EyePose::new(0.0, 0.0, 2.0), &scene(), None);
        let turned = project_pupil(&EyePose::new(15.0, 0.0, 2.0), &scene(), None);
        assert!(turned.center[0] > base.center[0] + 1.0);
        assert!((turned.center[1] - base.center[1]).abs() < 0.2);
        assert!(turned.eccentricity > 0.2);
    }

    #[test]
    fn elevation_moves_center_up() {
        let base = project_pupil(&EyePose::new(0.0, 0.0, 2.0), &scene(), None);
        let up = project_pupil(&EyePose::new(0.0, 10.0, 2.0), &scene(), None);
        assert!(up.center[1] > base.center[1] + 0.5);
    }

    #[test]
    fn projection_is_idempotent() {
        let pose = EyePose::new(-7.0, 4.0, 1.8);
        let a = project_pupil(&pose, &scene(), None);
        let b = project_pupil(&pose, &scene(), None);
        assert_eq!(a, b);
    }

    #[test]
    fn nan_pose_projects_to_nan() {
        let e = project_pupil(&EyePose::nan(), &scene(), None);
        assert!(e.area.is_nan() && e.center[0].is_nan());
    }

    #[test]
    fn ray_traced_projection_enlarges_apparent_pupil() {
        let s = scene();
        let optics = OpticsModel::new(&s.eye);
        let plain = project_pupil(&EyePose::new(0.0, 0.0, 2.0), &s, None);
        let traced = project_pupil(&EyePose::new(0.0, 0.0, 2.0), &s, Some(&optics));
        assert!(traced.is_finite());
        assert!(traced.area > plain.area * 1.05, "traced = {:?}", traced);
        assert!(traced.area < plain.area * 1.8);
    }
}
