//! Scene parameter search: the outer estimator.
//!
//! A single batch job walks INIT → SELECT_ELLIPSES → SEARCH_NO_RAYTRACE →
//! (SEARCH_WITH_RAYTRACE) → AGGREGATE. Multi-start runs within a stage are
//! independent and execute on the rayon pool; there is no retry across
//! whole-job failures.

mod aggregate;
mod config;
mod objective;
mod select;

#[cfg(test)]
mod tests;

pub use config::{SceneParamBounds, SceneSearchConfig};
pub use select::error_weights;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::observation::{
    concat_observations, FitLabel, ObservationError, ObservationSet, PupilFitSeries,
};
use crate::optics::OpticsModel;
use crate::scene::{RunRecord, SceneGeometry, SceneSearchMeta, StageSummary};

use aggregate::{best_run, tightened_bounds, weighted_mean_sd};
use objective::{clamp_finite, SceneObjective};
use select::{select_observations, Selection};

/// Whole-job failure of a scene parameter search.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneSearchError {
    /// Malformed or missing observations.
    Observation(ObservationError),
    /// No ellipse survived selection.
    EmptySelection,
    /// An explicit ellipse index is out of range.
    IndexOutOfRange {
        /// Offending index.
        index: usize,
        /// Number of concatenated observations.
        len: usize,
    },
    /// Hard/plausible bounds are unordered or non-finite in a dimension.
    InvalidBounds {
        /// Offending scene-parameter dimension.
        dim: usize,
    },
    /// Other structurally unusable configuration.
    InvalidConfig(&'static str),
}

impl std::fmt::Display for SceneSearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Observation(e) => write!(f, "observation error: {}", e),
            Self::EmptySelection => write!(f, "no ellipses survived selection"),
            Self::IndexOutOfRange { index, len } => {
                write!(f, "ellipse index {} out of range ({} observations)", index, len)
            }
            Self::InvalidBounds { dim } => {
                write!(f, "invalid scene-parameter bounds in dimension {}", dim)
            }
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for SceneSearchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Observation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ObservationError> for SceneSearchError {
    fn from(e: ObservationError) -> Self {
        Self::Observation(e)
    }
}

/// Estimate the scene geometry explaining the labeled observations.
///
/// Selects a spatially diverse high-confidence ellipse subset, runs the
/// configured number of randomized multi-start searches over
/// [tx, ty, tz, joint, differential] without ray tracing, optionally
/// repeats with the ray-traced optics over bounds tightened to the first
/// stage's mean ± SD, and returns the lowest-objective run's geometry with
/// full per-run diagnostics in its metadata.
pub fn estimate_scene_geometry(
    sources: &[PupilFitSeries],
    label: FitLabel,
    config: &SceneSearchConfig,
) -> Result<SceneGeometry, SceneSearchError> {
    config.validate()?;

    // INIT: concatenate sources and build the optics once if any stage
    // will trace rays.
    let observations = concat_observations(sources, label)?;
    let optics = config.ray_trace.then(|| OpticsModel::new(&config.base.eye));

    // SELECT_ELLIPSES.
    let selection = select_observations(
        &observations,
        config.ellipse_indices.as_deref(),
        config.n_bins,
    )?;
    tracing::info!(
        "{} of {} ellipses selected for the scene search",
        selection.indices.len(),
        observations.len()
    );

    // SEARCH_NO_RAYTRACE.
    let stage_plain = run_stage(
        &objective_view(config, &observations, &selection, None),
        &config.plausible_bounds,
        &config.hard_bounds,
        config.n_searches[0],
        config.seed,
        false,
        config,
    );
    if let Some(best) = best_run(&stage_plain.runs) {
        tracing::info!("no-ray-trace stage done: best fval {:.6}", best.fval);
    }

    // SEARCH_WITH_RAYTRACE, over bounds tightened to mean ± SD.
    let stage_traced = if config.ray_trace {
        let plausible = tightened_bounds(
            &stage_plain.param_mean,
            &stage_plain.param_sd,
            &config.hard_bounds,
        );
        let stage = run_stage(
            &objective_view(config, &observations, &selection, optics.as_ref()),
            &plausible,
            &config.hard_bounds,
            config.n_searches[1],
            config.seed + config.n_searches[0] as u64,
            true,
            config,
        );
        if let Some(best) = best_run(&stage.runs) {
            tracing::info!("ray-trace stage done: best fval {:.6}", best.fval);
        }
        Some(stage)
    } else {
        None
    };

    // AGGREGATE: accept the lowest-objective run of the last stage.
    let last_stage = stage_traced.as_ref().unwrap_or(&stage_plain);
    let accepted = best_run(&last_stage.runs)
        .ok_or(SceneSearchError::InvalidConfig("search stage produced no runs"))?
        .clone();
    let final_optics = if last_stage.ray_traced {
        optics.as_ref()
    } else {
        None
    };
    let (fval, residuals) =
        objective_view(config, &observations, &selection, final_optics).evaluate(&accepted.params);

    let mut geometry = config.base.with_scene_params(accepted.params);
    geometry.meta = Some(SceneSearchMeta {
        selected_indices: selection.indices.clone(),
        bin_edges: selection.bin_edges.clone(),
        error_weights: selection.weights.clone(),
        stage_no_raytrace: stage_plain,
        stage_raytrace: stage_traced,
        residuals,
        fval,
    });
    Ok(geometry)
}

/// Read-only objective view shared by the runs of one stage.
fn objective_view<'a>(
    config: &'a SceneSearchConfig,
    observations: &'a ObservationSet,
    selection: &'a Selection,
    optics: Option<&'a OpticsModel>,
) -> SceneObjective<'a> {
    SceneObjective {
        base: &config.base,
        observations,
        indices: &selection.indices,
        weights: &selection.weights,
        optics,
        pose_bounds: &config.pose_bounds,
    }
}

/// One multi-start stage: independent seeded runs on the rayon pool,
/// reduced into a [`StageSummary`].
///
/// Each run owns its RNG, starting point and simplex; the objective view
/// is shared read-only. Sequential execution yields identical results for
/// identical seeds.
fn run_stage(
    objective: &SceneObjective<'_>,
    plausible: &SceneParamBounds,
    hard: &SceneParamBounds,
    n_runs: usize,
    seed_base: u64,
    ray_traced: bool,
    config: &SceneSearchConfig,
) -> StageSummary {
    let runs: Vec<RunRecord> = (0..n_runs)
        .into_par_iter()
        .map(|i| {
            let seed = seed_base + i as u64;
            let mut rng = StdRng::seed_from_u64(seed);
            let mut start = [0.0f64; 5];
            for d in 0..5 {
                start[d] = if plausible.upper[d] > plausible.lower[d] {
                    rng.gen_range(plausible.lower[d]..plausible.upper[d])
                } else {
                    plausible.lower[d]
                };
            }
            let minimum = crate::optimizer::minimize_bounded(
                |x| objective.value(x),
                &start,
                &hard.lower,
                &hard.upper,
                &config.optimizer,
            );
            RunRecord {
                seed,
                start,
                params: [
                    minimum.x[0],
                    minimum.x[1],
                    minimum.x[2],
                    minimum.x[3],
                    minimum.x[4],
                ],
                fval: clamp_finite(minimum.fval),
                evals: minimum.evals,
            }
        })
        .collect();

    let (param_mean, param_sd) = weighted_mean_sd(&runs);
    StageSummary {
        ray_traced,
        runs,
        param_mean,
        param_sd,
    }
}
