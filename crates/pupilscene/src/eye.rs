//! Physical eye model and instantaneous eye pose.
//!
//! Coordinate convention: origin at the anterior corneal apex, +z pointing
//! into the eye (away from the camera), +x nasal/temporal, +y superior.
//! All lengths in millimeters, angles in degrees.

use serde::{Deserialize, Serialize};

/// Instantaneous orientation of the optical axis and pupil aperture.
///
/// Torsion is carried for completeness but held at zero throughout this
/// crate. Poses are ephemeral: created per inverse-projection call, never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyePose {
    /// Azimuthal rotation in degrees (positive moves the pupil toward +x).
    pub azimuth_deg: f64,
    /// Elevational rotation in degrees (positive moves the pupil toward +y).
    pub elevation_deg: f64,
    /// Torsional rotation in degrees; fixed at zero.
    pub torsion_deg: f64,
    /// Pupil aperture radius in millimeters.
    pub pupil_radius: f64,
}

impl EyePose {
    /// Pose with zero torsion.
    pub fn new(azimuth_deg: f64, elevation_deg: f64, pupil_radius: f64) -> Self {
        Self {
            azimuth_deg,
            elevation_deg,
            torsion_deg: 0.0,
            pupil_radius,
        }
    }

    /// All components NaN (no-fit signal).
    pub fn nan() -> Self {
        Self {
            azimuth_deg: f64::NAN,
            elevation_deg: f64::NAN,
            torsion_deg: f64::NAN,
            pupil_radius: f64::NAN,
        }
    }

    /// `true` when every component is finite.
    pub fn is_finite(&self) -> bool {
        self.azimuth_deg.is_finite()
            && self.elevation_deg.is_finite()
            && self.torsion_deg.is_finite()
            && self.pupil_radius.is_finite()
    }
}

/// Base depths (mm behind the corneal apex) of the two rotation centers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotationCenters {
    /// Azimuthal rotation center depth.
    pub azi_depth: f64,
    /// Elevational rotation center depth.
    pub ele_depth: f64,
}

/// Fixed optical and kinematic constants of the modeled eye.
///
/// Defaults follow the adult emmetropic eye literature values used by the
/// upstream pipeline. The rotation centers are never used raw: they are
/// scaled by the two-parameter `[joint, differential]` scaling estimated by
/// the scene parameter search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeModel {
    /// Anterior corneal surface radius of curvature (mm).
    pub cornea_front_radius: f64,
    /// Posterior corneal surface radius of curvature (mm).
    pub cornea_back_radius: f64,
    /// Central corneal thickness (mm).
    pub cornea_thickness: f64,
    /// Refractive index of the corneal stroma.
    pub index_cornea: f64,
    /// Refractive index of the aqueous humor.
    pub index_aqueous: f64,
    /// Depth of the pupil aperture plane behind the apex (mm).
    pub pupil_depth: f64,
    /// Base rotation-center depths before scaling.
    pub rotation_centers: RotationCenters,
    /// Rotation-center scaling `[joint, differential]`.
    pub rotation_scaling: [f64; 2],
}

impl Default for EyeModel {
    fn default() -> Self {
        Self {
            cornea_front_radius: 7.77,
            cornea_back_radius: 6.40,
            cornea_thickness: 0.55,
            index_cornea: 1.376,
            index_aqueous: 1.3374,
            pupil_depth: 3.70,
            rotation_centers: RotationCenters {
                azi_depth: 14.30,
                ele_depth: 12.50,
            },
            rotation_scaling: [1.0, 1.0],
        }
    }
}

impl EyeModel {
    /// Effective rotation-center depths after applying the coupled scaling.
    ///
    /// The joint factor multiplies both centers; the differential factor
    /// multiplies the azimuthal center and divides the elevational one, so
    /// the two searched parameters stay coupled rather than independent.
    pub fn scaled_centers(&self) -> RotationCenters {
        scaled_centers(
            self.rotation_centers,
            self.rotation_scaling[0],
            self.rotation_scaling[1],
        )
    }

    /// `true` when the optical constants form a physically usable cornea.
    pub fn is_valid(&self) -> bool {
        self.cornea_front_radius > 0.0
            && self.cornea_back_radius > 0.0
            && self.cornea_thickness >= 0.0
            && self.index_cornea >= 1.0
            && self.index_aqueous >= 1.0
            && self.pupil_depth > 0.0
            && self.rotation_scaling.iter().all(|s| *s > 0.0)
    }
}

/// Pure form of the two-parameter rotation-center scaling.
pub fn scaled_centers(base: RotationCenters, joint: f64, differential: f64) -> RotationCenters {
    RotationCenters {
        azi_depth: base.azi_depth * joint * differential,
        ele_depth: base.ele_depth * joint / differential,
    }
}
