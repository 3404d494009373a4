//! Inverse projection: observed ellipse → eye pose.
//!
//! The search minimizes the distance between predicted and observed ellipse
//! centers while the predicted shape and area are constrained to match the
//! observation within the scene's constraint tolerance. Only the correct
//! combination of scene geometry and eye pose satisfies both at once; the
//! outer scene search relies on the residual shape/area errors this leaves
//! behind.

use serde::{Deserialize, Serialize};

use crate::ellipse::TransparentEllipse;
use crate::eye::EyePose;
use crate::forward::project_pupil;
use crate::optics::OpticsModel;
use crate::optimizer::{minimize_bounded, SimplexOptions};
use crate::scene::SceneGeometry;

/// Hard bounds for the eye-pose search. Torsion is pinned to zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyePoseBounds {
    /// Azimuth bounds in degrees.
    pub azimuth_deg: [f64; 2],
    /// Elevation bounds in degrees.
    pub elevation_deg: [f64; 2],
    /// Torsion bounds in degrees; must stay [0, 0].
    pub torsion_deg: [f64; 2],
    /// Pupil radius bounds in millimeters.
    pub pupil_radius: [f64; 2],
}

impl Default for EyePoseBounds {
    fn default() -> Self {
        Self {
            azimuth_deg: [-35.0, 35.0],
            elevation_deg: [-35.0, 35.0],
            torsion_deg: [0.0, 0.0],
            pupil_radius: [0.25, 5.0],
        }
    }
}

/// How the pose search terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitFlag {
    /// Shape and area constraints satisfied at the optimum.
    Converged,
    /// The optimizer stopped with the constraints still violated, even
    /// after the perturbed re-run; the (possibly suboptimal) result is
    /// still usable by the outer search.
    LocalMinimum,
    /// Observed center was NaN; the optimizer was never invoked.
    NoFit,
}

/// Result of one inverse projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseFit {
    /// Recovered eye pose (torsion zero).
    pub pose: EyePose,
    /// Forward projection of the recovered pose.
    pub predicted: TransparentEllipse,
    /// Euclidean distance between predicted and observed centers.
    pub center_error: f64,
    /// Distance between the `e·[cos 2θ, sin 2θ]` shape vectors.
    pub shape_error: f64,
    /// Relative area mismatch |predicted − observed| / observed.
    pub area_error: f64,
    /// Termination condition.
    pub exit: ExitFlag,
}

impl PoseFit {
    fn no_fit() -> Self {
        Self {
            pose: EyePose::nan(),
            predicted: TransparentEllipse::nan(),
            center_error: f64::NAN,
            shape_error: f64::NAN,
            area_error: f64::NAN,
            exit: ExitFlag::NoFit,
        }
    }
}

/// Center/shape/area errors of a prediction against an observation.
pub fn ellipse_errors(
    observed: &TransparentEllipse,
    predicted: &TransparentEllipse,
) -> (f64, f64, f64) {
    let dx = predicted.center[0] - observed.center[0];
    let dy = predicted.center[1] - observed.center[1];
    let center = (dx * dx + dy * dy).sqrt();

    let so = observed.shape_vector();
    let sp = predicted.shape_vector();
    let shape = ((sp[0] - so[0]).powi(2) + (sp[1] - so[1]).powi(2)).sqrt();

    let area = (predicted.area - observed.area).abs() / observed.area;

    (center, shape, area)
}

/// Penalty weight applied to constraint violations in the pose objective.
const CONSTRAINT_PENALTY: f64 = 1e5;

/// Weak pull toward zero shape/area mismatch.
///
/// The center objective is nearly flat in pupil radius, so without this
/// term any radius inside the constraint band would be accepted and the
/// residual errors reported to the outer search would be arbitrary. The
/// weight sits far below the center-distance scale and cannot trade center
/// accuracy for shape.
const RESIDUAL_REGULARIZER: f64 = 1e-2;

const POSE_SEARCH_OPTIONS: SimplexOptions = SimplexOptions {
    max_evals: 400,
    x_tol: 1e-8,
    f_tol: 1e-11,
    init_step_frac: 0.02,
};

/// Perturbation applied before the local-minimum re-run.
const RETRY_STEP_DEG: f64 = 0.5;
const RETRY_STEP_RADIUS: f64 = 0.05;

/// Search for the eye pose that reproduces `observed` under `scene`.
///
/// Short-circuits to an all-NaN [`PoseFit`] when the observed center is
/// NaN. If the optimizer terminates with the constraints still violated,
/// the search re-runs once from a slightly perturbed point and keeps the
/// better of the two results.
pub fn search_eye_pose(
    observed: &TransparentEllipse,
    scene: &SceneGeometry,
    optics: Option<&OpticsModel>,
    bounds: &EyePoseBounds,
) -> PoseFit {
    if observed.has_nan_center() {
        return PoseFit::no_fit();
    }

    let tol = scene.constraint_tolerance;
    let torsion = bounds.torsion_deg[0];
    let objective = |x: &[f64]| -> f64 {
        let pose = pinned_torsion_pose(x, torsion);
        let predicted = project_pupil(&pose, scene, optics);
        let (center, shape, area) = ellipse_errors(observed, &predicted);
        if !center.is_finite() {
            return f64::MAX;
        }
        let shape_excess = (shape - tol).max(0.0);
        let area_excess = (area - tol).max(0.0);
        center
            + RESIDUAL_REGULARIZER * (shape * shape + area * area)
            + CONSTRAINT_PENALTY * (shape_excess * shape_excess + area_excess * area_excess)
    };

    let lb = [
        bounds.azimuth_deg[0],
        bounds.elevation_deg[0],
        bounds.pupil_radius[0],
    ];
    let ub = [
        bounds.azimuth_deg[1],
        bounds.elevation_deg[1],
        bounds.pupil_radius[1],
    ];

    let x0 = initial_guess(observed, scene, bounds);
    let first = minimize_bounded(objective, &x0, &lb, &ub, &POSE_SEARCH_OPTIONS);

    let mut best = first;
    let mut fit = evaluate(&best.x, torsion, observed, scene, optics, tol);

    if fit.exit == ExitFlag::LocalMinimum {
        // Flat or multi-modal regions near the image boundary can trap the
        // simplex; one perturbed restart from the found point recovers most
        // of them.
        let x1 = [
            (best.x[0] + RETRY_STEP_DEG).clamp(lb[0], ub[0]),
            (best.x[1] + RETRY_STEP_DEG).clamp(lb[1], ub[1]),
            (best.x[2] + RETRY_STEP_RADIUS).clamp(lb[2], ub[2]),
        ];
        let second = minimize_bounded(objective, &x1, &lb, &ub, &POSE_SEARCH_OPTIONS);
        if second.fval < best.fval {
            best = second;
            fit = evaluate(&best.x, torsion, observed, scene, optics, tol);
        }
    }

    fit
}

/// Search vector plus the pinned torsion value from the pose bounds.
fn pinned_torsion_pose(x: &[f64], torsion: f64) -> EyePose {
    EyePose {
        azimuth_deg: x[0],
        elevation_deg: x[1],
        torsion_deg: torsion,
        pupil_radius: x[2],
    }
}

fn evaluate(
    x: &[f64],
    torsion: f64,
    observed: &TransparentEllipse,
    scene: &SceneGeometry,
    optics: Option<&OpticsModel>,
    tol: f64,
) -> PoseFit {
    let pose = pinned_torsion_pose(x, torsion);
    let predicted = project_pupil(&pose, scene, optics);
    let (center_error, shape_error, area_error) = ellipse_errors(observed, &predicted);
    let feasible =
        shape_error.is_finite() && area_error.is_finite() && shape_error <= tol && area_error <= tol;
    PoseFit {
        pose,
        predicted,
        center_error,
        shape_error,
        area_error,
        exit: if feasible {
            ExitFlag::Converged
        } else {
            ExitFlag::LocalMinimum
        },
    }
}

/// Analytic first guess: invert the depth-scaled projection at the pupil
/// plane and read rotation angles off the rotation-center lever arms.
fn initial_guess(
    observed: &TransparentEllipse,
    scene: &SceneGeometry,
    bounds: &EyePoseBounds,
) -> [f64; 3] {
    let t = scene.camera.translation;
    let centers = scene.eye.scaled_centers();
    let m = t[2] / (t[2] + scene.eye.pupil_depth);

    let lat_x = observed.center[0] / m + t[0];
    let lat_y = observed.center[1] / m + t[1];

    let arm_azi = (centers.azi_depth - scene.eye.pupil_depth).max(1e-6);
    let arm_ele = (centers.ele_depth - scene.eye.pupil_depth).max(1e-6);

    let azi = (lat_x / arm_azi).clamp(-1.0, 1.0).asin().to_degrees();
    let ele = (lat_y / arm_ele).clamp(-1.0, 1.0).asin().to_degrees();

    let radius = if observed.area.is_finite() && observed.area > 0.0 {
        (observed.area / std::f64::consts::PI).sqrt() / m
    } else {
        0.5 * (bounds.pupil_radius[0] + bounds.pupil_radius[1])
    };

    [
        azi.clamp(bounds.azimuth_deg[0], bounds.azimuth_deg[1]),
        ele.clamp(bounds.elevation_deg[0], bounds.elevation_deg[1]),
        radius.clamp(bounds.pupil_radius[0], bounds.pupil_radius[1]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::CameraExtrinsics;

    fn scene() -> SceneGeometry {
        SceneGeometry {
            camera: CameraExtrinsics {
                translation: [-1.2, 0.9, 108.0],
            },
            ..SceneGeometry::default()
        }
    }

    #[test]
    fn recovers_forward_projected_pose() {
        let s = scene();
        let bounds = EyePoseBounds::default();
        for &(azi, ele, r) in &[(0.0, 0.0, 2.0), (12.0, -8.0, 2.4), (-15.0, 15.0, 1.6)] {
            let truth = EyePose::new(azi, ele, r);
            let observed = project_pupil(&truth, &s, None);
            let fit = search_eye_pose(&observed, &s, None, &bounds);
            assert_eq!(fit.exit, ExitFlag::Converged);
            assert!(
                (fit.pose.azimuth_deg - azi).abs() < 1e-2,
                "azi {} vs {}",
                fit.pose.azimuth_deg,
                azi
            );
            assert!((fit.pose.elevation_deg - ele).abs() < 1e-2);
            assert!((fit.pose.pupil_radius - r).abs() < 1e-2);
            assert!(fit.center_error < 1e-4, "center error {}", fit.center_error);
        }
    }

    #[test]
    fn nan_center_short_circuits() {
        let s = scene();
        let mut observed = project_pupil(&EyePose::new(5.0, 0.0, 2.0), &s, None);
        observed.center = [f64::NAN, f64::NAN];
        let fit = search_eye_pose(&observed, &s, None, &EyePoseBounds::default());
        assert_eq!(fit.exit, ExitFlag::NoFit);
        assert!(fit.pose.azimuth_deg.is_nan());
        assert!(fit.center_error.is_nan());
        assert!(fit.shape_error.is_nan());
        assert!(fit.area_error.is_nan());
    }

    #[test]
    fn looser_tolerance_never_loses_convergences() {
        // Observations generated under a slightly different geometry, so
        // residual shape/area errors are nonzero and tolerance matters.
        let truth_scene = SceneGeometry {
            camera: CameraExtrinsics {
                translation: [0.5, -0.4, 112.0],
            },
            ..SceneGeometry::default()
        };
        let mut wrong = scene();
        let poses = [
            EyePose::new(-18.0, 12.0, 1.4),
            EyePose::new(25.0, -20.0, 2.2),
            EyePose::new(5.0, 3.0, 3.0),
            EyePose::new(-30.0, -25.0, 1.0),
        ];
        let observed: Vec<_> = poses
            .iter()
            .map(|p| project_pupil(p, &truth_scene, None))
            .collect();

        let mut previous = 0usize;
        for tol in [1e-6, 1e-3, 0.05, 1.0] {
            wrong.constraint_tolerance = tol;
            let converged = observed
                .iter()
                .filter(|o| {
                    search_eye_pose(o, &wrong, None, &EyePoseBounds::default()).exit
                        == ExitFlag::Converged
                })
                .count();
            assert!(
                converged >= previous,
                "tol {} converged {} < {}",
                tol,
                converged,
                previous
            );
            previous = converged;
        }
        assert_eq!(previous, poses.len());
    }
}
