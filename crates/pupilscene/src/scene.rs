//! Scene geometry: the physical configuration relating 3-D eye pose to
//! 2-D image-plane ellipses, plus the metadata describing how it was
//! estimated.

use serde::{Deserialize, Serialize};

use crate::eye::EyeModel;

/// Camera position relative to the corneal apex.
///
/// `translation[0..2]` is the lateral offset in the apex plane,
/// `translation[2]` the distance from the apex along the optical axis
/// (positive, toward the camera).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraExtrinsics {
    /// Camera translation [x, y, z] in millimeters.
    pub translation: [f64; 3],
}

impl Default for CameraExtrinsics {
    fn default() -> Self {
        Self {
            translation: [0.0, 0.0, 110.0],
        }
    }
}

/// Aggregate physical setup handed to forward/inverse projection.
///
/// Constructed once from defaults, refined by the scene parameter search,
/// then frozen; candidate evaluation during the search clones it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneGeometry {
    /// Camera extrinsics.
    pub camera: CameraExtrinsics,
    /// Eye model constants and rotation-center scaling.
    pub eye: EyeModel,
    /// Allowed shape/area mismatch before a candidate eye pose is rejected.
    pub constraint_tolerance: f64,
    /// How this geometry was derived, when it came out of a search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<SceneSearchMeta>,
}

impl Default for SceneGeometry {
    fn default() -> Self {
        Self {
            camera: CameraExtrinsics::default(),
            eye: EyeModel::default(),
            constraint_tolerance: 0.05,
            meta: None,
        }
    }
}

impl SceneGeometry {
    /// Clone of this geometry with the 5-vector of searched scene
    /// parameters [tx, ty, tz, joint, differential] applied.
    ///
    /// Metadata is dropped from the clone: candidates are working copies.
    pub fn with_scene_params(&self, params: [f64; 5]) -> Self {
        let mut out = self.clone();
        out.camera.translation = [params[0], params[1], params[2]];
        out.eye.rotation_scaling = [params[3], params[4]];
        out.meta = None;
        out
    }

    /// The searched 5-vector currently embodied by this geometry.
    pub fn scene_params(&self) -> [f64; 5] {
        [
            self.camera.translation[0],
            self.camera.translation[1],
            self.camera.translation[2],
            self.eye.rotation_scaling[0],
            self.eye.rotation_scaling[1],
        ]
    }
}

/// One multi-start run of a search stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Seed the run's starting point was drawn with.
    pub seed: u64,
    /// Randomized starting scene parameters.
    pub start: [f64; 5],
    /// Final scene parameters.
    pub params: [f64; 5],
    /// Final objective value (always finite; overflows are clamped).
    pub fval: f64,
    /// Objective evaluations spent.
    pub evals: usize,
}

/// Aggregated outcome of one search stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    /// Whether this stage used the ray-traced optics model.
    pub ray_traced: bool,
    /// Per-run records, in run-index order.
    pub runs: Vec<RunRecord>,
    /// Inverse-fval weighted mean per scene-parameter dimension.
    pub param_mean: [f64; 5],
    /// Inverse-fval weighted standard deviation per dimension.
    pub param_sd: [f64; 5],
}

/// Residual errors of one selected ellipse under the accepted geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EllipseResidual {
    /// Index of the ellipse in the concatenated observation list.
    pub index: usize,
    /// Center-distance error.
    pub center_error: f64,
    /// Shape error.
    pub shape_error: f64,
    /// Relative area error.
    pub area_error: f64,
}

/// Diagnostic record of a completed scene parameter search.
///
/// This is the full input contract for external plotting; the core never
/// renders it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSearchMeta {
    /// Indices of the selected ellipses in the concatenated observations.
    pub selected_indices: Vec<usize>,
    /// Spatial bin edges ([x edges], [y edges]), absent when the caller
    /// supplied explicit indices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin_edges: Option<[Vec<f64>; 2]>,
    /// Error weights over the selected subset (mean 1).
    pub error_weights: Vec<f64>,
    /// Summary of the no-ray-trace stage.
    pub stage_no_raytrace: StageSummary,
    /// Summary of the ray-traced stage, when it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_raytrace: Option<StageSummary>,
    /// Per-ellipse residuals under the accepted geometry.
    pub residuals: Vec<EllipseResidual>,
    /// Objective value of the accepted run.
    pub fval: f64,
}
