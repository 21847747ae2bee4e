//! Splicing search: exchange active and inactive groups to improve a
//! fixed-size subset's fit.
//!
//! Each round scores every removable active group by its backward sacrifice
//! (objective increase if dropped) and every inactive candidate by its
//! forward sacrifice (objective decrease if added), then tries exchanging the
//! k weakest active groups against the k strongest inactive ones, from the
//! largest exchange size downward. The first exchange improving the
//! penalized objective by more than `tau` is accepted. Candidate scoring is
//! thread-parallel; ties break on group index so the reduction is
//! deterministic for any thread count.

use ndarray::{Array1, Array2};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::config::SplicingConfig;
use crate::data::{DesignMatrix, GroupLayout};
use crate::estimate::EstimationError;
use crate::faer_ndarray::solve_symmetric;
use crate::family::FamilyModel;
use crate::fitter::{ActiveFit, FitterOptions, WarmStart, fit_active};
use crate::types::FitStatus;

/// Read-only search inputs shared by screening, path driving, and splicing.
pub struct SearchContext<'a> {
    pub x: &'a DesignMatrix,
    pub model: &'a FamilyModel,
    pub weights: &'a Array1<f64>,
    pub groups: &'a GroupLayout,
    /// Candidate group pool after screening and exclusion constraints, sorted.
    pub candidates: Vec<usize>,
    /// Groups pinned into every active set; a subset of `candidates`.
    pub always_include: Vec<usize>,
}

impl SearchContext<'_> {
    pub fn n(&self) -> usize {
        self.model.n()
    }

    /// Gather the active groups' columns and run the primary fitter.
    pub fn fit_groups(
        &self,
        active: &[usize],
        opts: &FitterOptions,
        warm: Option<WarmStart<'_>>,
    ) -> Result<ActiveFit, EstimationError> {
        let cols = self.groups.gather_columns(active);
        let x_active = self.x.gather_columns(&cols);
        fit_active(&x_active, self.model, self.weights, opts, warm)
    }
}

/// Working quantities at a fixed linear predictor: the score contributions
/// `u = w * (z - eta)` and the Fisher weights `w`.
pub(crate) struct WorkingState {
    pub u: Array1<f64>,
    pub w: Array1<f64>,
}

pub(crate) fn working_state(
    model: &FamilyModel,
    eta: &Array1<f64>,
    prior_weights: &Array1<f64>,
) -> Result<WorkingState, EstimationError> {
    let n = model.n();
    let mut mu = Array1::<f64>::zeros(n);
    let mut w = Array1::<f64>::zeros(n);
    let mut z = Array1::<f64>::zeros(n);
    model.working_update(eta, prior_weights, &mut mu, &mut w, &mut z)?;
    let mut u = Array1::<f64>::zeros(n);
    for i in 0..n {
        u[i] = w[i] * (z[i] - eta[i]);
    }
    Ok(WorkingState { u, w })
}

fn group_hessian(x_g: &Array2<f64>, w: &Array1<f64>, lambda: f64) -> Array2<f64> {
    let g = x_g.ncols();
    let n = x_g.nrows();
    let mut h = Array2::<f64>::zeros((g, g));
    for i in 0..n {
        let wi = w[i];
        for a in 0..g {
            let xa = x_g[[i, a]];
            for b in a..g {
                h[[a, b]] += wi * xa * x_g[[i, b]];
            }
        }
    }
    for a in 0..g {
        for b in 0..a {
            h[[a, b]] = h[[b, a]];
        }
        h[[a, a]] += lambda;
    }
    h
}

/// Forward sacrifice of an inactive group: the quadratic-approximation
/// objective drop from adding it, `d' H^{-1} d / (2n)`.
pub(crate) fn forward_sacrifice(
    x: &DesignMatrix,
    groups: &GroupLayout,
    group: usize,
    state: &WorkingState,
    lambda: f64,
) -> Result<f64, EstimationError> {
    let n = state.u.len() as f64;
    let cols: Vec<usize> = groups.columns(group).collect();
    let x_g = x.gather_columns(&cols);
    if cols.len() == 1 {
        let col = x_g.column(0);
        let mut d = 0.0;
        let mut h = lambda;
        for i in 0..col.len() {
            d += col[i] * state.u[i];
            h += state.w[i] * col[i] * col[i];
        }
        if h <= 0.0 {
            return Ok(0.0);
        }
        return Ok(d * d / (h * 2.0 * n));
    }
    let d = x_g.t().dot(&state.u);
    let h = group_hessian(&x_g, &state.w, lambda);
    let v = solve_symmetric(&h, &d).map_err(EstimationError::LinearSystemSolveFailed)?;
    Ok(d.dot(&v) / (2.0 * n))
}

/// Backward sacrifice of an active group: the quadratic-approximation
/// objective rise from dropping it, `beta_G' H beta_G / (2n)`.
fn backward_sacrifice(
    x: &DesignMatrix,
    groups: &GroupLayout,
    group: usize,
    beta_g: &Array1<f64>,
    w: &Array1<f64>,
    lambda: f64,
) -> f64 {
    let n = w.len() as f64;
    let cols: Vec<usize> = groups.columns(group).collect();
    let x_g = x.gather_columns(&cols);
    if cols.len() == 1 {
        let col = x_g.column(0);
        let mut h = lambda;
        for i in 0..col.len() {
            h += w[i] * col[i] * col[i];
        }
        return beta_g[0] * beta_g[0] * h / (2.0 * n);
    }
    let h = group_hessian(&x_g, w, lambda);
    beta_g.dot(&h.dot(beta_g)) / (2.0 * n)
}

/// Rank a pool of inactive groups by forward sacrifice at the given linear
/// predictor, best first; ties break on group index. Groups whose sacrifice
/// cannot be evaluated numerically are ranked last rather than failing the
/// search.
pub(crate) fn forward_ranking(
    ctx: &SearchContext<'_>,
    eta: &Array1<f64>,
    pool: &[usize],
    lambda: f64,
) -> Result<Vec<(usize, f64)>, EstimationError> {
    let state = working_state(ctx.model, eta, ctx.weights)?;
    let mut scored: Vec<(usize, f64)> = pool
        .par_iter()
        .map(|&g| {
            match forward_sacrifice(ctx.x, ctx.groups, g, &state, lambda) {
                Ok(v) => (g, v),
                Err(e) => {
                    log::debug!("forward sacrifice for group {g} failed ({e}); ranking last");
                    (g, f64::NEG_INFINITY)
                }
            }
        })
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    Ok(scored)
}

/// Coefficients of `new_active` seeded from an earlier fit over `old_active`;
/// groups absent from the old set start at zero.
pub(crate) fn warm_beta_for(
    new_active: &[usize],
    old_active: &[usize],
    old_beta: &Array1<f64>,
    groups: &GroupLayout,
) -> Array1<f64> {
    let mut old_offsets = Vec::with_capacity(old_active.len());
    let mut offset = 0;
    for &g in old_active {
        old_offsets.push((g, offset));
        offset += groups.size(g);
    }
    let mut out = Array1::<f64>::zeros(groups.total_columns(new_active));
    let mut new_offset = 0;
    for &g in new_active {
        if let Some(&(_, old_off)) = old_offsets.iter().find(|&&(og, _)| og == g) {
            for d in 0..groups.size(g) {
                out[new_offset + d] = old_beta[old_off + d];
            }
        }
        new_offset += groups.size(g);
    }
    out
}

pub struct SplicingOutcome {
    /// Sorted active group indices; always exactly the target size.
    pub active: Vec<usize>,
    pub fit: ActiveFit,
    pub iterations: usize,
    pub status: FitStatus,
}

/// Run the splicing search for one path position.
pub fn splice(
    ctx: &SearchContext<'_>,
    init_active: Vec<usize>,
    splicing: &SplicingConfig,
    fitter: &FitterOptions,
) -> Result<SplicingOutcome, EstimationError> {
    let n = ctx.n();
    let lambda = fitter.lambda;
    let mut active = init_active;
    active.sort_unstable();
    let mut fit = ctx.fit_groups(&active, fitter, None)?;

    if splicing.max_iter == 0 {
        return Ok(SplicingOutcome {
            active,
            fit,
            iterations: 0,
            status: FitStatus::MaxIterationsReached,
        });
    }

    let removable_count = active
        .iter()
        .filter(|g| !ctx.always_include.contains(g))
        .count();
    let inactive_count = ctx.candidates.len() - active.len();
    if removable_count == 0 || inactive_count == 0 {
        return Ok(SplicingOutcome {
            active,
            fit,
            iterations: 0,
            status: FitStatus::Converged,
        });
    }

    let trial_opts = if splicing.approximate_newton {
        FitterOptions {
            max_iter: 1,
            ..*fitter
        }
    } else {
        *fitter
    };

    let mut status = FitStatus::MaxIterationsReached;
    let mut iterations = 0;
    for _ in 0..splicing.max_iter {
        iterations += 1;

        let state = working_state(ctx.model, &fit.eta, ctx.weights)?;

        // Per-group coefficient offsets in gather order.
        let mut offsets = Vec::with_capacity(active.len());
        let mut offset = 0;
        for &g in &active {
            offsets.push((g, offset));
            offset += ctx.groups.size(g);
        }

        let removable: Vec<(usize, usize)> = offsets
            .iter()
            .copied()
            .filter(|(g, _)| !ctx.always_include.contains(g))
            .collect();
        let mut backward: Vec<(usize, f64)> = removable
            .par_iter()
            .map(|&(g, off)| {
                let size = ctx.groups.size(g);
                let beta_g = fit.beta.slice(ndarray::s![off..off + size]).to_owned();
                (
                    g,
                    backward_sacrifice(ctx.x, ctx.groups, g, &beta_g, &state.w, lambda),
                )
            })
            .collect();
        backward.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let inactive: Vec<usize> = ctx
            .candidates
            .iter()
            .copied()
            .filter(|g| active.binary_search(g).is_err())
            .collect();
        let mut forward: Vec<(usize, f64)> = inactive
            .par_iter()
            .map(|&g| {
                match forward_sacrifice(ctx.x, ctx.groups, g, &state, lambda) {
                    Ok(v) => (g, v),
                    Err(e) => {
                        log::debug!("forward sacrifice for group {g} failed ({e}); skipping");
                        (g, f64::NEG_INFINITY)
                    }
                }
            })
            .collect();
        forward.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let base_objective = fit.objective(lambda, n);
        let max_exchange = splicing
            .exchange_num
            .min(backward.len())
            .min(forward.len());
        let mut improved = false;
        for k in (1..=max_exchange).rev() {
            let drop: Vec<usize> = backward[..k].iter().map(|&(g, _)| g).collect();
            let add: Vec<usize> = forward[..k].iter().map(|&(g, _)| g).collect();
            if add.iter().any(|&g| forward_is_unusable(&forward, g)) {
                continue;
            }
            let mut trial_active: Vec<usize> = active
                .iter()
                .copied()
                .filter(|g| !drop.contains(g))
                .chain(add.iter().copied())
                .collect();
            trial_active.sort_unstable();

            let warm_beta = warm_beta_for(&trial_active, &active, &fit.beta, ctx.groups);
            let warm = WarmStart {
                beta: &warm_beta,
                intercept: fit.intercept,
            };
            let trial = match ctx.fit_groups(&trial_active, &trial_opts, Some(warm)) {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("exchange of {k} groups failed to refit ({e}); trying smaller swaps");
                    continue;
                }
            };
            if trial.objective(lambda, n) < base_objective - splicing.tau {
                log::debug!(
                    "splicing round {iterations}: exchanged {k} group(s), objective {:.6e} -> {:.6e}",
                    base_objective,
                    trial.objective(lambda, n)
                );
                active = trial_active;
                fit = trial;
                improved = true;
                break;
            }
        }

        if !improved {
            status = FitStatus::Converged;
            break;
        }
        if (base_objective - fit.objective(lambda, n)).abs() < splicing.epsilon {
            status = FitStatus::Converged;
            break;
        }
    }

    if splicing.approximate_newton {
        // Exchange trials used single Newton steps; polish the winner with a
        // fully converged fit before reporting it.
        let warm_beta = fit.beta.0.clone();
        let warm = WarmStart {
            beta: &warm_beta,
            intercept: fit.intercept,
        };
        fit = ctx.fit_groups(&active, fitter, Some(warm))?;
    }

    Ok(SplicingOutcome {
        active,
        fit,
        iterations,
        status,
    })
}

#[inline]
fn forward_is_unusable(forward: &[(usize, f64)], group: usize) -> bool {
    forward
        .iter()
        .find(|&&(g, _)| g == group)
        .map(|&(_, v)| v == f64::NEG_INFINITY)
        .unwrap_or(true)
}
