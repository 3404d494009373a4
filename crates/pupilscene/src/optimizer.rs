//! Bounded derivative-free minimization.
//!
//! Nelder–Mead simplex search with box constraints, used by both the
//! per-frame eye-pose search and the outer scene-parameter search. The
//! objective is treated as a black box: no smoothness is assumed beyond
//! continuity, and every evaluation point is projected into the bounds.

use serde::{Deserialize, Serialize};

/// Termination condition of a simplex search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Simplex collapsed below the size and value tolerances.
    Converged,
    /// Evaluation budget exhausted first.
    EvalBudget,
}

/// Result of a bounded minimization.
#[derive(Debug, Clone)]
pub struct Minimum {
    /// Best point found.
    pub x: Vec<f64>,
    /// Objective value at `x`.
    pub fval: f64,
    /// Objective evaluations spent.
    pub evals: usize,
    /// Why the search stopped.
    pub termination: Termination,
}

/// Tolerances and budget for [`minimize_bounded`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimplexOptions {
    /// Maximum objective evaluations.
    pub max_evals: usize,
    /// Simplex-diameter tolerance (relative to parameter magnitude).
    pub x_tol: f64,
    /// Best-to-worst objective spread tolerance (relative).
    pub f_tol: f64,
    /// Initial simplex step as a fraction of each bounded range.
    pub init_step_frac: f64,
}

impl Default for SimplexOptions {
    fn default() -> Self {
        Self {
            max_evals: 2000,
            x_tol: 1e-10,
            f_tol: 1e-12,
            init_step_frac: 0.05,
        }
    }
}

/// Minimize `f` over the box `[lb, ub]` starting from `x0`.
///
/// Dimensions with `lb == ub` are pinned: they are held at the bound value
/// and excluded from the simplex. When every dimension is pinned the
/// objective is evaluated once at the pinned point. NaN objective values
/// are ordered worse than any finite value.
pub fn minimize_bounded(
    mut f: impl FnMut(&[f64]) -> f64,
    x0: &[f64],
    lb: &[f64],
    ub: &[f64],
    options: &SimplexOptions,
) -> Minimum {
    let dim = x0.len();
    debug_assert_eq!(lb.len(), dim);
    debug_assert_eq!(ub.len(), dim);

    let free: Vec<usize> = (0..dim).filter(|&i| ub[i] > lb[i]).collect();

    let mut base: Vec<f64> = (0..dim).map(|i| x0[i].clamp(lb[i], ub[i])).collect();
    for i in 0..dim {
        if ub[i] <= lb[i] {
            base[i] = lb[i];
        }
    }

    let mut evals = 0usize;
    let mut eval_full = |xf: &[f64], evals: &mut usize| -> f64 {
        *evals += 1;
        f(xf)
    };

    if free.is_empty() {
        let fval = eval_full(&base, &mut evals);
        return Minimum {
            x: base,
            fval,
            evals,
            termination: Termination::Converged,
        };
    }

    let n = free.len();
    let embed = |reduced: &[f64], base: &[f64]| -> Vec<f64> {
        let mut full = base.to_vec();
        for (k, &i) in free.iter().enumerate() {
            full[i] = reduced[k].clamp(lb[i], ub[i]);
        }
        full
    };

    // Initial simplex: base point plus one step along each free dimension.
    let x0r: Vec<f64> = free.iter().map(|&i| base[i]).collect();
    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(x0r.clone());
    for k in 0..n {
        let i = free[k];
        let range = ub[i] - lb[i];
        let step = if range.is_finite() {
            range * options.init_step_frac
        } else {
            0.1 * (base[i].abs() + 1.0)
        };
        let mut v = x0r.clone();
        // Step away from the nearer bound so the vertex stays interior.
        v[k] = if v[k] + step <= ub[i] {
            v[k] + step
        } else {
            v[k] - step
        };
        simplex.push(v);
    }

    let mut fvals: Vec<f64> = simplex
        .iter()
        .map(|v| eval_full(&embed(v, &base), &mut evals))
        .collect();

    let order_key = |v: f64| if v.is_nan() { f64::INFINITY } else { v };

    while evals < options.max_evals {
        // Order vertices best-first.
        let mut idx: Vec<usize> = (0..=n).collect();
        idx.sort_by(|&a, &b| order_key(fvals[a]).total_cmp(&order_key(fvals[b])));
        let simplex_sorted: Vec<Vec<f64>> = idx.iter().map(|&i| simplex[i].clone()).collect();
        let fvals_sorted: Vec<f64> = idx.iter().map(|&i| fvals[i]).collect();
        simplex = simplex_sorted;
        fvals = fvals_sorted;

        let f_best = fvals[0];
        let f_worst = fvals[n];

        // Convergence: objective spread and simplex extent both small.
        let f_spread = order_key(f_worst) - order_key(f_best);
        let mut x_extent = 0.0f64;
        let mut x_scale = 1.0f64;
        for k in 0..n {
            for v in &simplex[1..] {
                x_extent = x_extent.max((v[k] - simplex[0][k]).abs());
            }
            x_scale = x_scale.max(simplex[0][k].abs());
        }
        if f_spread <= options.f_tol * (1.0 + f_best.abs()) && x_extent <= options.x_tol * x_scale {
            break;
        }

        // Centroid of all but the worst vertex.
        let mut centroid = vec![0.0; n];
        for v in &simplex[..n] {
            for k in 0..n {
                centroid[k] += v[k];
            }
        }
        for c in centroid.iter_mut() {
            *c /= n as f64;
        }

        let lerp = |a: &[f64], b: &[f64], t: f64| -> Vec<f64> {
            a.iter().zip(b).map(|(x, y)| x + t * (y - x)).collect()
        };

        // Reflection.
        let reflected = lerp(&centroid, &simplex[n], -1.0);
        let f_reflected = eval_full(&embed(&reflected, &base), &mut evals);

        if order_key(f_reflected) < order_key(fvals[0]) {
            // Expansion.
            let expanded = lerp(&centroid, &simplex[n], -2.0);
            let f_expanded = eval_full(&embed(&expanded, &base), &mut evals);
            if order_key(f_expanded) < order_key(f_reflected) {
                simplex[n] = expanded;
                fvals[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                fvals[n] = f_reflected;
            }
        } else if order_key(f_reflected) < order_key(fvals[n - 1]) {
            simplex[n] = reflected;
            fvals[n] = f_reflected;
        } else {
            // Contraction, outside or inside of the worst vertex.
            let contracted = if order_key(f_reflected) < order_key(fvals[n]) {
                lerp(&centroid, &simplex[n], -0.5)
            } else {
                lerp(&centroid, &simplex[n], 0.5)
            };
            let f_contracted = eval_full(&embed(&contracted, &base), &mut evals);
            if order_key(f_contracted) < order_key(fvals[n]).min(order_key(f_reflected)) {
                simplex[n] = contracted;
                fvals[n] = f_contracted;
            } else {
                // Shrink toward the best vertex.
                for j in 1..=n {
                    simplex[j] = lerp(&simplex[0], &simplex[j], 0.5);
                    fvals[j] = eval_full(&embed(&simplex[j], &base), &mut evals);
                    if evals >= options.max_evals {
                        break;
                    }
                }
            }
        }
    }

    let mut best = 0usize;
    for j in 1..fvals.len() {
        if order_key(fvals[j]) < order_key(fvals[best]) {
            best = j;
        }
    }
    let termination = if evals >= options.max_evals {
        Termination::EvalBudget
    } else {
        Termination::Converged
    };
    Minimum {
        x: embed(&simplex[best], &base),
        fval: fvals[best],
        evals,
        termination,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn finds_quadratic_minimum_inside_bounds() {
        let m = minimize_bounded(
            |x| (x[0] - 1.5).powi(2) + (x[1] + 0.5).powi(2),
            &[0.0, 0.0],
            &[-5.0, -5.0],
            &[5.0, 5.0],
            &SimplexOptions::default(),
        );
        assert_eq!(m.termination, Termination::Converged);
        assert_relative_eq!(m.x[0], 1.5, epsilon = 1e-6);
        assert_relative_eq!(m.x[1], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn respects_active_bound() {
        let m = minimize_bounded(
            |x| (x[0] - 10.0).powi(2),
            &[0.0],
            &[-1.0],
            &[2.0],
            &SimplexOptions::default(),
        );
        assert_relative_eq!(m.x[0], 2.0, epsilon = 1e-8);
    }

    #[test]
    fn pinned_dimension_is_held_fixed() {
        let m = minimize_bounded(
            |x| (x[0] - 1.0).powi(2) + x[1] * x[1],
            &[0.0, 3.0],
            &[-5.0, 3.0],
            &[5.0, 3.0],
            &SimplexOptions::default(),
        );
        assert_eq!(m.x[1], 3.0);
        assert_relative_eq!(m.x[0], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn all_pinned_evaluates_once() {
        let mut count = 0usize;
        let m = minimize_bounded(
            |x| {
                count += 1;
                x[0] + x[1]
            },
            &[1.0, 2.0],
            &[1.0, 2.0],
            &[1.0, 2.0],
            &SimplexOptions::default(),
        );
        assert_eq!(count, 1);
        assert_eq!(m.evals, 1);
        assert_eq!(m.fval, 3.0);
        assert_eq!(m.termination, Termination::Converged);
    }

    #[test]
    fn nan_objective_is_ordered_worst() {
        let m = minimize_bounded(
            |x| {
                if x[0] < 0.0 {
                    f64::NAN
                } else {
                    (x[0] - 0.3).powi(2)
                }
            },
            &[0.5],
            &[-1.0],
            &[1.0],
            &SimplexOptions::default(),
        );
        assert_relative_eq!(m.x[0], 0.3, epsilon = 1e-6);
    }
}
