//! pupilscene — scene-geometry estimation from pupil boundary ellipses.
//!
//! Given per-frame pupil ellipses detected in infra-red eye video, this
//! crate estimates the physical scene geometry (camera position relative
//! to the eye and the eye's rotation centers) that best explains them, and
//! provides the forward/inverse optical model relating a 3-D eye pose to a
//! 2-D image-plane ellipse. The stages are:
//!
//! 1. **Ellipse** – conversions between transparent parameters (center,
//!    area, eccentricity, angle) and explicit/conic forms.
//! 2. **Optics** – corneal refraction model producing virtual-image points;
//!    built once per set of optical constants, shared read-only.
//! 3. **Forward** – eye pose + scene geometry → predicted image ellipse.
//! 4. **Inverse** – observed ellipse → eye pose, via a bounded search with
//!    shape/area constraints.
//! 5. **Search** – multi-start constrained estimation of the 5 scene
//!    parameters over a spatially diverse observation subset.
//!
//! Video I/O, pupil segmentation, size calibration and plotting live in
//! external collaborators; this crate is a pure in-process numerical
//! library.

mod ellipse;
mod eye;
mod forward;
mod inverse;
mod observation;
mod optics;
mod optimizer;
mod scene;
mod search;

pub use ellipse::{
    conic_to_ellipse, ellipse_to_conic, fit_transparent_ellipse, ConicCoeffs, Ellipse,
    TransparentEllipse,
};
pub use eye::{scaled_centers, EyeModel, EyePose, RotationCenters};
pub use forward::project_pupil;
pub use inverse::{ellipse_errors, search_eye_pose, ExitFlag, EyePoseBounds, PoseFit};
pub use observation::{
    concat_observations, FitLabel, ObservationError, ObservationSet, PupilFitSeries,
};
pub use optics::{OpticsModel, RefractingSurface};
pub use optimizer::{minimize_bounded, Minimum, SimplexOptions, Termination};
pub use scene::{
    CameraExtrinsics, EllipseResidual, RunRecord, SceneGeometry, SceneSearchMeta, StageSummary,
};
pub use search::{
    error_weights, estimate_scene_geometry, SceneParamBounds, SceneSearchConfig, SceneSearchError,
};
