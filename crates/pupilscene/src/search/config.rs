//! Configuration for the scene parameter search.

use serde::{Deserialize, Serialize};

use crate::inverse::EyePoseBounds;
use crate::optimizer::SimplexOptions;
use crate::scene::SceneGeometry;

use super::SceneSearchError;

/// Box bounds over the searched 5-vector
/// [tx, ty, tz, joint scale, differential scale].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneParamBounds {
    /// Lower bound per dimension.
    pub lower: [f64; 5],
    /// Upper bound per dimension.
    pub upper: [f64; 5],
}

impl SceneParamBounds {
    /// Clip another bound box into this one, dimension by dimension.
    pub fn clip(&self, other: &SceneParamBounds) -> SceneParamBounds {
        let mut out = *other;
        for i in 0..5 {
            out.lower[i] = other.lower[i].clamp(self.lower[i], self.upper[i]);
            out.upper[i] = other.upper[i].clamp(self.lower[i], self.upper[i]);
            if out.upper[i] < out.lower[i] {
                out.upper[i] = out.lower[i];
            }
        }
        out
    }
}

/// Tuning for [`estimate_scene_geometry`](super::estimate_scene_geometry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSearchConfig {
    /// Initial scene geometry; eye constants and constraint tolerance are
    /// taken from here, translation and rotation scaling are searched.
    pub base: SceneGeometry,
    /// Hard bounds the optimizer may never leave. A dimension with equal
    /// lower and upper bound is pinned.
    pub hard_bounds: SceneParamBounds,
    /// Tighter box the randomized starting points are drawn from.
    pub plausible_bounds: SceneParamBounds,
    /// Hard eye-pose bounds for the nested inverse projections.
    pub pose_bounds: EyePoseBounds,
    /// Spatial bins per image axis for ellipse selection.
    pub n_bins: usize,
    /// Multi-start runs for the [no-ray-trace, with-ray-trace] stages.
    pub n_searches: [usize; 2],
    /// Enable the ray-traced second stage (~25× slower end to end).
    pub ray_trace: bool,
    /// Base random seed; run `i` of a stage uses `seed + stage offset + i`.
    pub seed: u64,
    /// Explicit ellipse indices, bypassing spatial selection when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ellipse_indices: Option<Vec<usize>>,
    /// Simplex settings for the outer 5-parameter search.
    pub optimizer: SimplexOptions,
}

impl Default for SceneSearchConfig {
    fn default() -> Self {
        Self {
            base: SceneGeometry::default(),
            hard_bounds: SceneParamBounds {
                lower: [-15.0, -15.0, 80.0, 0.75, 0.85],
                upper: [15.0, 15.0, 140.0, 1.25, 1.15],
            },
            plausible_bounds: SceneParamBounds {
                lower: [-5.0, -5.0, 100.0, 0.90, 0.95],
                upper: [5.0, 5.0, 120.0, 1.10, 1.05],
            },
            pose_bounds: EyePoseBounds::default(),
            n_bins: 4,
            n_searches: [10, 4],
            ray_trace: false,
            seed: 42,
            ellipse_indices: None,
            optimizer: SimplexOptions {
                max_evals: 800,
                x_tol: 1e-7,
                f_tol: 1e-10,
                init_step_frac: 0.05,
            },
        }
    }
}

impl SceneSearchConfig {
    /// Fail fast on structurally unusable settings.
    pub fn validate(&self) -> Result<(), SceneSearchError> {
        for i in 0..5 {
            let hl = self.hard_bounds.lower[i];
            let hu = self.hard_bounds.upper[i];
            let pl = self.plausible_bounds.lower[i];
            let pu = self.plausible_bounds.upper[i];
            let ordered = hl <= hu && pl <= pu && hl <= pl && pu <= hu;
            if !(ordered && hl.is_finite() && hu.is_finite() && pl.is_finite() && pu.is_finite()) {
                return Err(SceneSearchError::InvalidBounds { dim: i });
            }
        }
        if self.n_bins == 0 {
            return Err(SceneSearchError::InvalidConfig("n_bins must be at least 1"));
        }
        if self.n_searches[0] == 0 || (self.ray_trace && self.n_searches[1] == 0) {
            return Err(SceneSearchError::InvalidConfig(
                "each enabled stage needs at least one search",
            ));
        }
        Ok(())
    }
}
