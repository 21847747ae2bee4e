//! Path construction and model selection.
//!
//! Walks the support-size grid (crossed with the ridge grid) with either the
//! sequential or the golden-section driver, evaluates each position by an
//! information criterion or by K-fold cross-validation, and reduces the
//! accumulated records to a single winner. Warm starts carry the previous
//! position's active set forward; cross-validation folds keep their own warm
//! chains and run thread-parallel.

use ndarray::Array1;
use rayon::iter::{IntoParallelRefMutIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::BessConfig;
use crate::cv::FoldAssignment;
use crate::data::{DesignMatrix, Ingested};
use crate::estimate::EstimationError;
use crate::family::FamilyModel;
use crate::fitter::FitterOptions;
use crate::splicing::{SearchContext, SplicingOutcome, forward_ranking, splice};
use crate::types::{FitStatus, IcType, PathType};

/// Consecutive non-improving positions tolerated before the sequential
/// driver abandons the rest of the size grid.
const EARLY_STOP_PATIENCE: usize = 2;

/// One evaluated path position.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathRecord {
    pub support_size: usize,
    pub lambda: f64,
    /// Full-data search loss at this position.
    pub loss: f64,
    /// Selection score: information criterion value, or mean held-out loss
    /// under cross-validation. Lower is better.
    pub score: f64,
    pub status: FitStatus,
    pub splicing_iterations: usize,
    /// Active groups of the full-data fit, sorted.
    pub active_groups: Vec<usize>,
}

pub struct PathOutcome {
    pub records: Vec<PathRecord>,
    /// Index of the winning record.
    pub best: usize,
    pub best_outcome: SplicingOutcome,
}

pub fn information_criterion(
    deviance: f64,
    df: usize,
    n_samples: usize,
    n_variables: usize,
    ic: IcType,
    ic_coef: f64,
) -> f64 {
    let n = n_samples as f64;
    let p = n_variables.max(2) as f64;
    let k = df as f64;
    // ln(ln n) is floored at 1 so tiny samples cannot flip the penalty sign.
    let lnln_n = n.ln().ln().max(1.0);
    let penalty = match ic {
        IcType::Aic => 2.0 * k,
        IcType::Bic => k * n.ln(),
        IcType::Gic => k * p.ln() * lnln_n,
        IcType::Ebic => k * (n.ln() + 2.0 * p.ln()),
    };
    deviance + ic_coef * penalty
}

/// Per-fold training/validation slices plus the fold's warm-start chain.
struct FoldData {
    x: DesignMatrix,
    model: FamilyModel,
    weights: Array1<f64>,
    valid_x: DesignMatrix,
    valid_model: FamilyModel,
    valid_weights: Array1<f64>,
    /// Previous position's solution on this fold: (active groups, linear
    /// predictor on the training slice).
    warm: Option<(Vec<usize>, Array1<f64>)>,
}

fn build_folds(
    ingested: &Ingested,
    cfg: &BessConfig,
    assignment: &FoldAssignment,
) -> Result<Vec<FoldData>, EstimationError> {
    let mut folds = Vec::with_capacity(assignment.count());
    for f in 0..assignment.count() {
        let train = assignment.training(f);
        let valid = assignment.validation(f);
        let take_w = |rows: &[usize]| {
            let mut out = Array1::<f64>::zeros(rows.len());
            for (i, &r) in rows.iter().enumerate() {
                out[i] = ingested.weights[r];
            }
            out
        };
        let weights = take_w(&train);
        let valid_weights = take_w(valid);
        let response = ingested.response.take_rows(&train);
        let valid_response = ingested.response.take_rows(valid);
        folds.push(FoldData {
            x: ingested.x.take_rows(&train)?,
            model: FamilyModel::new(cfg.family, &response, &weights)?,
            weights,
            valid_x: ingested.x.take_rows(valid)?,
            valid_model: FamilyModel::new(cfg.family, &valid_response, &valid_weights)?,
            valid_weights,
            warm: None,
        });
    }
    Ok(folds)
}

/// Choose the starting active set for one position: the warm-started previous
/// solution (augmented to size by forward sacrifices at its fit), the
/// user-supplied support, or a cold start ranked at the null model.
fn initial_active_for(
    ctx: &SearchContext<'_>,
    s: usize,
    prev: Option<(&[usize], &Array1<f64>)>,
    user_initial: Option<&[usize]>,
    warm_start: bool,
    lambda: f64,
) -> Result<Vec<usize>, EstimationError> {
    if warm_start
        && let Some((prev_active, prev_eta)) = prev
        && prev_active.len() <= s
    {
        let mut init = prev_active.to_vec();
        if init.len() < s {
            let pool: Vec<usize> = ctx
                .candidates
                .iter()
                .copied()
                .filter(|g| !init.contains(g))
                .collect();
            for &(g, _) in &forward_ranking(ctx, prev_eta, &pool, lambda)? {
                if init.len() == s {
                    break;
                }
                init.push(g);
            }
        }
        init.sort_unstable();
        return Ok(init);
    }

    let mut init: Vec<usize> = ctx.always_include.clone();
    if let Some(user) = user_initial {
        for &g in user {
            if init.len() == s {
                break;
            }
            if !init.contains(&g) && ctx.candidates.contains(&g) {
                init.push(g);
            }
        }
    }
    if init.len() < s {
        let null_eta = ctx.model.null_eta(ctx.weights);
        let pool: Vec<usize> = ctx
            .candidates
            .iter()
            .copied()
            .filter(|g| !init.contains(g))
            .collect();
        for &(g, _) in &forward_ranking(ctx, &null_eta, &pool, lambda)? {
            if init.len() == s {
                break;
            }
            init.push(g);
        }
    }
    init.sort_unstable();
    Ok(init)
}

struct PathDriver<'a> {
    ctx: &'a SearchContext<'a>,
    cfg: &'a BessConfig,
    n_variables: usize,
    folds: Option<Vec<FoldData>>,
    records: Vec<PathRecord>,
    outcomes: Vec<SplicingOutcome>,
}

impl PathDriver<'_> {
    /// Evaluate one (support size, lambda) position; returns its record index.
    fn evaluate_position(
        &mut self,
        s: usize,
        lambda: f64,
        prev_idx: Option<usize>,
    ) -> Result<usize, EstimationError> {
        let user = if prev_idx.is_none() {
            self.cfg.constraints.initial_active.as_deref()
        } else {
            None
        };
        let init = {
            let prev = prev_idx.map(|i| {
                let o = &self.outcomes[i];
                (o.active.as_slice(), &o.fit.eta)
            });
            initial_active_for(self.ctx, s, prev, user, self.cfg.path.warm_start, lambda)?
        };

        let fitter_opts = FitterOptions {
            max_iter: self.cfg.fitter.max_iter,
            epsilon: self.cfg.fitter.epsilon,
            lambda,
        };
        let outcome = splice(self.ctx, init, &self.cfg.splicing, &fitter_opts)?;
        let df = self.ctx.groups.total_columns(&outcome.active);

        let score = match &self.cfg.selection.cross_validation {
            None => {
                let deviance = self
                    .ctx
                    .model
                    .ic_deviance(&outcome.fit.eta, self.ctx.weights)?;
                information_criterion(
                    deviance,
                    df,
                    self.ctx.n(),
                    self.n_variables,
                    self.cfg.selection.criterion,
                    self.cfg.selection.ic_coef,
                )
            }
            Some(_) => self.cross_validated_score(s, lambda)?,
        };

        log::debug!(
            "path position s={s} lambda={lambda:.3e}: loss={:.6e} score={:.6e} active={:?}",
            outcome.fit.loss,
            score,
            outcome.active
        );

        self.records.push(PathRecord {
            support_size: s,
            lambda,
            loss: outcome.fit.loss,
            score,
            status: outcome.status,
            splicing_iterations: outcome.iterations,
            active_groups: outcome.active.clone(),
        });
        self.outcomes.push(outcome);
        Ok(self.records.len() - 1)
    }

    fn cross_validated_score(&mut self, s: usize, lambda: f64) -> Result<f64, EstimationError> {
        let groups = self.ctx.groups;
        let candidates = &self.ctx.candidates;
        let always_include = &self.ctx.always_include;
        let splicing_cfg = &self.cfg.splicing;
        let warm_start = self.cfg.path.warm_start;
        let fitter_opts = FitterOptions {
            max_iter: self.cfg.fitter.max_iter,
            epsilon: self.cfg.fitter.epsilon,
            lambda,
        };
        let folds = self
            .folds
            .as_mut()
            .expect("cross_validated_score requires fold state");

        let results: Vec<Result<f64, EstimationError>> = folds
            .par_iter_mut()
            .map(|fold| {
                let ctx = SearchContext {
                    x: &fold.x,
                    model: &fold.model,
                    weights: &fold.weights,
                    groups,
                    candidates: candidates.clone(),
                    always_include: always_include.clone(),
                };
                let prev = fold
                    .warm
                    .as_ref()
                    .map(|(active, eta)| (active.as_slice(), eta));
                let init = initial_active_for(&ctx, s, prev, None, warm_start, lambda)?;
                let outcome = splice(&ctx, init, splicing_cfg, &fitter_opts)?;

                let cols = groups.gather_columns(&outcome.active);
                let x_valid = fold.valid_x.gather_columns(&cols);
                let mut eta_valid = x_valid.dot(&outcome.fit.beta.0);
                if fold.valid_model.family().has_intercept() {
                    eta_valid += outcome.fit.intercept;
                }
                let held_out = fold.valid_model.loss(&eta_valid, &fold.valid_weights)?;
                fold.warm = Some((outcome.active, outcome.fit.eta));
                Ok(held_out)
            })
            .collect();

        let mut sum = 0.0;
        let mut ok = 0usize;
        for result in results {
            match result {
                Ok(loss) => {
                    sum += loss;
                    ok += 1;
                }
                Err(e) => {
                    log::warn!("cross-validation fold failed at s={s} ({e}); fold skipped");
                }
            }
        }
        if ok == 0 {
            log::warn!("every cross-validation fold failed at s={s}; position ranked last");
            return Ok(f64::INFINITY);
        }
        Ok(sum / ok as f64)
    }

    fn run_sequential(
        &mut self,
        sizes: std::ops::RangeInclusive<usize>,
        lambda: f64,
    ) -> Result<(), EstimationError> {
        let mut prev_idx: Option<usize> = None;
        let mut chain_best = f64::INFINITY;
        let mut strikes = 0usize;
        for s in sizes {
            let idx = self.evaluate_position(s, lambda, prev_idx)?;
            prev_idx = Some(idx);
            let score = self.records[idx].score;
            if score < chain_best {
                chain_best = score;
                strikes = 0;
            } else if self.cfg.path.early_stop {
                strikes += 1;
                if strikes >= EARLY_STOP_PATIENCE {
                    log::debug!(
                        "early stop after {strikes} non-improving sizes at s={s}, lambda={lambda:.3e}"
                    );
                    break;
                }
            }
        }
        Ok(())
    }

    fn run_golden_section(
        &mut self,
        s_min: usize,
        s_max: usize,
        lambda: f64,
    ) -> Result<(), EstimationError> {
        const INV_PHI: f64 = 0.618_033_988_749_894_8;
        let mut memo: HashMap<usize, usize> = HashMap::new();
        let mut last_idx: Option<usize> = None;

        let mut lo = s_min;
        let mut hi = s_max;
        while hi - lo > 3 {
            let span = (hi - lo) as f64;
            let m1 = hi - (span * INV_PHI).round() as usize;
            let m2 = lo + (span * INV_PHI).round() as usize;
            let (m1, m2) = (m1.clamp(lo + 1, hi - 1), m2.clamp(lo + 1, hi - 1));
            if m1 >= m2 {
                break;
            }
            let i1 = self.memoized_position(m1, lambda, &mut memo, &mut last_idx)?;
            let i2 = self.memoized_position(m2, lambda, &mut memo, &mut last_idx)?;
            if self.records[i1].score <= self.records[i2].score {
                hi = m2;
            } else {
                lo = m1;
            }
        }
        for s in lo..=hi {
            self.memoized_position(s, lambda, &mut memo, &mut last_idx)?;
        }
        Ok(())
    }

    fn memoized_position(
        &mut self,
        s: usize,
        lambda: f64,
        memo: &mut HashMap<usize, usize>,
        last_idx: &mut Option<usize>,
    ) -> Result<usize, EstimationError> {
        if let Some(&idx) = memo.get(&s) {
            return Ok(idx);
        }
        let idx = self.evaluate_position(s, lambda, *last_idx)?;
        memo.insert(s, idx);
        *last_idx = Some(idx);
        Ok(idx)
    }
}

/// Walk the whole path and reduce it to the winning position.
pub fn run_path(
    ctx: &SearchContext<'_>,
    cfg: &BessConfig,
    ingested: &Ingested,
) -> Result<PathOutcome, EstimationError> {
    let n = ctx.n();
    let s_min = cfg.resolved_s_min();
    let s_max = cfg.resolved_s_max(n, ctx.groups.count());

    let folds = match &cfg.selection.cross_validation {
        Some(cv) => {
            let assignment = FoldAssignment::new(n, cv.folds, cv.seed);
            Some(build_folds(ingested, cfg, &assignment)?)
        }
        None => None,
    };

    let mut driver = PathDriver {
        ctx,
        cfg,
        n_variables: ctx.x.ncols(),
        folds,
        records: Vec::new(),
        outcomes: Vec::new(),
    };

    for &lambda in &cfg.path.lambda_grid() {
        // Each ridge strength gets its own warm chain over the size grid.
        if let Some(folds) = driver.folds.as_mut() {
            for fold in folds {
                fold.warm = None;
            }
        }
        match cfg.path.path_type {
            PathType::Sequential => driver.run_sequential(s_min..=s_max, lambda)?,
            PathType::GoldenSection => driver.run_golden_section(s_min, s_max, lambda)?,
        }
    }

    let records = driver.records;
    let mut outcomes = driver.outcomes;
    if records.is_empty() {
        return Err(EstimationError::InvalidConfig(
            "the configured path contains no positions".to_string(),
        ));
    }

    let mut best = 0;
    for (i, r) in records.iter().enumerate().skip(1) {
        let b = &records[best];
        let better = r.score < b.score
            || (r.score == b.score
                && (r.support_size < b.support_size
                    || (r.support_size == b.support_size && r.lambda < b.lambda)));
        if better {
            best = i;
        }
    }

    let best_outcome = outcomes.swap_remove(best);
    Ok(PathOutcome {
        records,
        best,
        best_outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bic_penalizes_size_more_than_aic_for_moderate_n() {
        let n = 100;
        let aic = information_criterion(10.0, 3, n, 20, IcType::Aic, 1.0);
        let bic = information_criterion(10.0, 3, n, 20, IcType::Bic, 1.0);
        assert!(bic > aic);
    }

    #[test]
    fn ic_is_monotone_in_df_at_fixed_deviance() {
        for ic in [IcType::Aic, IcType::Bic, IcType::Gic, IcType::Ebic] {
            let small = information_criterion(5.0, 1, 50, 10, ic, 1.0);
            let large = information_criterion(5.0, 4, 50, 10, ic, 1.0);
            assert!(large > small, "{ic:?} must penalize larger models");
        }
    }

    #[test]
    fn ic_coef_scales_only_the_penalty() {
        let base = information_criterion(7.0, 2, 40, 8, IcType::Bic, 1.0);
        let doubled = information_criterion(7.0, 2, 40, 8, IcType::Bic, 2.0);
        assert!((doubled - base - (base - 7.0)).abs() < 1e-12);
    }
}
