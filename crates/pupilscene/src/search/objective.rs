//! Objective evaluated by the outer scene-parameter search.

use crate::inverse::{search_eye_pose, EyePoseBounds};
use crate::observation::ObservationSet;
use crate::optics::OpticsModel;
use crate::scene::{EllipseResidual, SceneGeometry};

/// Immutable view of everything one objective evaluation needs.
///
/// Each multi-start run borrows one of these; all fields are read-only, so
/// runs share it freely while owning their own optimizer state.
pub struct SceneObjective<'a> {
    /// Template geometry the candidate parameters are applied to.
    pub base: &'a SceneGeometry,
    /// Concatenated observations.
    pub observations: &'a ObservationSet,
    /// Selected ellipse indices.
    pub indices: &'a [usize],
    /// Error weights, parallel to `indices`.
    pub weights: &'a [f64],
    /// Ray-traced optics, when the stage uses them.
    pub optics: Option<&'a OpticsModel>,
    /// Eye-pose bounds for the nested inverse projections.
    pub pose_bounds: &'a EyePoseBounds,
}

impl SceneObjective<'_> {
    /// Objective value for a candidate scene-parameter vector.
    ///
    /// Root-mean-square over the selected ellipses of
    /// `weight · (shape_error + 1) · (area_error + 1)`; the offsets keep
    /// the objective well conditioned near zero error. Non-finite values
    /// are clamped to `f64::MAX` so every run yields a comparable result.
    pub fn value(&self, params: &[f64]) -> f64 {
        self.evaluate(params).0
    }

    /// Objective value plus per-ellipse residuals.
    pub fn evaluate(&self, params: &[f64]) -> (f64, Vec<EllipseResidual>) {
        let candidate = self.base.with_scene_params([
            params[0], params[1], params[2], params[3], params[4],
        ]);

        let mut residuals = Vec::with_capacity(self.indices.len());
        let mut sum_sq = 0.0f64;
        for (&index, &weight) in self.indices.iter().zip(self.weights) {
            let fit = search_eye_pose(
                &self.observations.ellipses[index],
                &candidate,
                self.optics,
                self.pose_bounds,
            );
            residuals.push(EllipseResidual {
                index,
                center_error: fit.center_error,
                shape_error: fit.shape_error,
                area_error: fit.area_error,
            });
            let term = weight * (fit.shape_error + 1.0) * (fit.area_error + 1.0);
            let term = if term.is_finite() { term } else { f64::MAX };
            sum_sq = clamp_finite(sum_sq + term * term);
        }

        let fval = clamp_finite((sum_sq / self.indices.len() as f64).sqrt());
        (fval, residuals)
    }
}

/// Clamp overflow and NaN to the largest finite value, keeping the outer
/// optimizer's comparisons stable.
pub fn clamp_finite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        f64::MAX
    }
}
