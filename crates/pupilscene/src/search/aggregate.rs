//! Aggregation of multi-start run results.

use crate::scene::RunRecord;

use super::config::SceneParamBounds;

/// Floor applied to run objective values before inversion.
const MIN_FVAL: f64 = 1e-12;

/// Inverse-fval weighted mean and standard deviation per dimension.
///
/// Better runs (lower objective) contribute more. The reduction is
/// commutative and associative over run order up to floating-point
/// rounding, so result correctness does not depend on completion order.
pub fn weighted_mean_sd(runs: &[RunRecord]) -> ([f64; 5], [f64; 5]) {
    let mut mean = [0.0f64; 5];
    let mut sd = [0.0f64; 5];
    if runs.is_empty() {
        return (mean, sd);
    }

    let weights: Vec<f64> = runs.iter().map(|r| 1.0 / r.fval.max(MIN_FVAL)).collect();
    let w_sum: f64 = weights.iter().sum();

    for (run, &w) in runs.iter().zip(&weights) {
        for d in 0..5 {
            mean[d] += w * run.params[d];
        }
    }
    for m in mean.iter_mut() {
        *m /= w_sum;
    }

    for (run, &w) in runs.iter().zip(&weights) {
        for d in 0..5 {
            let diff = run.params[d] - mean[d];
            sd[d] += w * diff * diff;
        }
    }
    for s in sd.iter_mut() {
        *s = (*s / w_sum).sqrt();
    }

    (mean, sd)
}

/// Run with the lowest objective value, `None` for an empty stage.
pub fn best_run(runs: &[RunRecord]) -> Option<&RunRecord> {
    runs.iter().min_by(|a, b| a.fval.total_cmp(&b.fval))
}

/// Plausible bounds for the ray-traced stage: mean ± SD of the previous
/// stage, clipped into the hard bounds.
pub fn tightened_bounds(
    mean: &[f64; 5],
    sd: &[f64; 5],
    hard: &SceneParamBounds,
) -> SceneParamBounds {
    let mut lower = [0.0; 5];
    let mut upper = [0.0; 5];
    for d in 0..5 {
        lower[d] = mean[d] - sd[d];
        upper[d] = mean[d] + sd[d];
    }
    hard.clip(&SceneParamBounds { lower, upper })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(params: [f64; 5], fval: f64) -> RunRecord {
        RunRecord {
            seed: 0,
            start: params,
            params,
            fval,
            evals: 100,
        }
    }

    #[test]
    fn aggregation_is_order_independent() {
        let runs = vec![
            run([1.0, 0.0, 108.0, 1.0, 1.0], 1.2),
            run([-1.0, 0.5, 110.0, 1.05, 0.98], 1.0),
            run([0.5, -0.5, 109.0, 0.95, 1.02], 1.6),
            run([2.0, 1.0, 107.0, 1.1, 1.0], 2.5),
        ];
        let (mean_a, sd_a) = weighted_mean_sd(&runs);

        let mut shuffled = runs.clone();
        shuffled.reverse();
        shuffled.swap(0, 2);
        let (mean_b, sd_b) = weighted_mean_sd(&shuffled);

        for d in 0..5 {
            assert!((mean_a[d] - mean_b[d]).abs() < 1e-12);
            assert!((sd_a[d] - sd_b[d]).abs() < 1e-12);
        }
    }

    #[test]
    fn better_runs_dominate_the_mean() {
        let runs = vec![
            run([0.0, 0.0, 100.0, 1.0, 1.0], 1e-3),
            run([10.0, 10.0, 140.0, 1.2, 1.1], 1e3),
        ];
        let (mean, _) = weighted_mean_sd(&runs);
        assert!((mean[0] - 0.0).abs() < 0.1);
        assert!((mean[2] - 100.0).abs() < 0.1);
    }

    #[test]
    fn best_run_is_lowest_fval() {
        let runs = vec![
            run([1.0; 5], 2.0),
            run([2.0; 5], 0.5),
            run([3.0; 5], 1.0),
        ];
        assert_eq!(best_run(&runs).unwrap().params, [2.0; 5]);
        assert!(best_run(&[]).is_none());
    }

    #[test]
    fn tightened_bounds_stay_within_hard() {
        let hard = SceneParamBounds {
            lower: [-5.0, -5.0, 100.0, 0.9, 0.95],
            upper: [5.0, 5.0, 120.0, 1.1, 1.05],
        };
        let mean = [4.5, 0.0, 119.0, 1.0, 1.0];
        let sd = [2.0, 1.0, 5.0, 0.05, 0.01];
        let tight = tightened_bounds(&mean, &sd, &hard);
        assert_eq!(tight.upper[0], 5.0);
        assert_eq!(tight.lower[0], 2.5);
        assert_eq!(tight.upper[2], 120.0);
        assert!(tight.lower[2] <= tight.upper[2]);
    }
}
