//! Observation sets: per-frame pupil ellipses with fit uncertainty.

use serde::{Deserialize, Serialize};

use crate::ellipse::TransparentEllipse;

/// Malformed observation input, reported before any search begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservationError {
    /// Ellipse and RMSE arrays have different lengths.
    MismatchedLengths {
        /// Number of ellipses.
        ellipses: usize,
        /// Number of RMSE entries.
        rmse: usize,
    },
    /// The requested fit label is absent from a source.
    MissingFitLabel(FitLabel),
    /// No frames at all across the provided sources.
    Empty,
}

impl std::fmt::Display for ObservationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MismatchedLengths { ellipses, rmse } => {
                write!(f, "{} ellipses but {} rmse entries", ellipses, rmse)
            }
            Self::MissingFitLabel(label) => {
                write!(f, "fit label {:?} not present in source", label)
            }
            Self::Empty => write!(f, "no observations provided"),
        }
    }
}

impl std::error::Error for ObservationError {}

/// Which upstream ellipse-fitting pass an observation source provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FitLabel {
    /// Unconstrained per-frame fit.
    Initial,
    /// Fit constrained by a previously estimated scene geometry.
    SceneConstrained,
    /// Fit with temporally smoothed pupil radius.
    RadiusSmoothed,
}

/// Ordered per-frame ellipses with parallel boundary-fit RMSE.
///
/// The RMSE is the root-mean-square boundary-fit error reported by the
/// upstream fitter and is used as an inverse error weight downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSet {
    /// Per-frame transparent ellipses; NaN entries mean no boundary found.
    pub ellipses: Vec<TransparentEllipse>,
    /// Per-frame boundary-fit RMSE, parallel to `ellipses`.
    pub rmse: Vec<f64>,
}

impl ObservationSet {
    /// Build a set, failing fast on mismatched array lengths.
    pub fn new(
        ellipses: Vec<TransparentEllipse>,
        rmse: Vec<f64>,
    ) -> Result<Self, ObservationError> {
        if ellipses.len() != rmse.len() {
            return Err(ObservationError::MismatchedLengths {
                ellipses: ellipses.len(),
                rmse: rmse.len(),
            });
        }
        Ok(Self { ellipses, rmse })
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.ellipses.len()
    }

    /// `true` when the set holds no frames.
    pub fn is_empty(&self) -> bool {
        self.ellipses.is_empty()
    }
}

/// Fitting passes available from one observation source, addressed through
/// the typed [`FitLabel`] selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PupilFitSeries {
    /// Unconstrained per-frame fits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<ObservationSet>,
    /// Scene-constrained fits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_constrained: Option<ObservationSet>,
    /// Radius-smoothed fits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius_smoothed: Option<ObservationSet>,
}

impl PupilFitSeries {
    /// Typed accessor replacing by-name field lookup.
    pub fn select(&self, label: FitLabel) -> Option<&ObservationSet> {
        match label {
            FitLabel::Initial => self.initial.as_ref(),
            FitLabel::SceneConstrained => self.scene_constrained.as_ref(),
            FitLabel::RadiusSmoothed => self.radius_smoothed.as_ref(),
        }
    }
}

/// Concatenate the labeled pass from every source into one ordered set.
///
/// Fails fast if a source lacks the label, any source has mismatched array
/// lengths, or the concatenation is empty.
pub fn concat_observations(
    sources: &[PupilFitSeries],
    label: FitLabel,
) -> Result<ObservationSet, ObservationError> {
    let mut ellipses = Vec::new();
    let mut rmse = Vec::new();
    for source in sources {
        let set = source
            .select(label)
            .ok_or(ObservationError::MissingFitLabel(label))?;
        if set.ellipses.len() != set.rmse.len() {
            return Err(ObservationError::MismatchedLengths {
                ellipses: set.ellipses.len(),
                rmse: set.rmse.len(),
            });
        }
        ellipses.extend_from_slice(&set.ellipses);
        rmse.extend_from_slice(&set.rmse);
    }
    if ellipses.is_empty() {
        return Err(ObservationError::Empty);
    }
    Ok(ObservationSet { ellipses, rmse })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_ellipse(x: f64) -> TransparentEllipse {
        TransparentEllipse {
            center: [x, 0.0],
            area: 10.0,
            eccentricity: 0.1,
            theta: 0.0,
        }
    }

    #[test]
    fn mismatched_lengths_fail_fast() {
        let err = ObservationSet::new(vec![dummy_ellipse(0.0)], vec![0.1, 0.2]).unwrap_err();
        assert_eq!(
            err,
            ObservationError::MismatchedLengths {
                ellipses: 1,
                rmse: 2
            }
        );
    }

    #[test]
    fn concat_joins_sources_in_order() {
        let a = PupilFitSeries {
            initial: Some(
                ObservationSet::new(vec![dummy_ellipse(1.0)], vec![0.1]).unwrap(),
            ),
            ..Default::default()
        };
        let b = PupilFitSeries {
            initial: Some(
                ObservationSet::new(vec![dummy_ellipse(2.0), dummy_ellipse(3.0)], vec![0.2, 0.3])
                    .unwrap(),
            ),
            ..Default::default()
        };
        let joined = concat_observations(&[a, b], FitLabel::Initial).unwrap();
        assert_eq!(joined.len(), 3);
        assert_eq!(joined.ellipses[1].center[0], 2.0);
        assert_eq!(joined.rmse[2], 0.3);
    }

    #[test]
    fn missing_label_is_reported() {
        let a = PupilFitSeries::default();
        let err = concat_observations(&[a], FitLabel::RadiusSmoothed).unwrap_err();
        assert_eq!(err, ObservationError::MissingFitLabel(FitLabel::RadiusSmoothed));
    }
}
