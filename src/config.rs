//! Run configuration, grouped by concern.
//!
//! All knobs live in one validated structure instead of a long positional
//! argument list: data handling, path bounds, selection, splicing controls,
//! fitter tolerances, constraints, and parallelism each get their own block.
//! `validate` performs every fail-fast check before any search work starts.

use serde::{Deserialize, Serialize};

use crate::data::GroupLayout;
use crate::estimate::EstimationError;
use crate::types::{Family, IcType, PathType};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BessConfig {
    pub family: Family,
    /// Center and scale design columns before the search (sparse designs are
    /// scaled only); coefficients are mapped back to original units on output.
    #[serde(default = "default_true")]
    pub standardize: bool,
    #[serde(default)]
    pub path: PathConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub splicing: SplicingConfig,
    #[serde(default)]
    pub fitter: FitterConfig,
    #[serde(default)]
    pub screening: Option<ScreeningConfig>,
    #[serde(default)]
    pub constraints: ConstraintConfig,
    /// Worker threads for sacrifice scoring and cross-validation folds;
    /// 0 keeps the global default.
    #[serde(default)]
    pub threads: usize,
}

impl BessConfig {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            standardize: true,
            path: PathConfig::default(),
            selection: SelectionConfig::default(),
            splicing: SplicingConfig::default(),
            fitter: FitterConfig::default(),
            screening: None,
            constraints: ConstraintConfig::default(),
            threads: 0,
        }
    }

    /// Build the group layout this configuration describes for `p` variables.
    pub fn group_layout(&self, n_variables: usize) -> Result<GroupLayout, EstimationError> {
        match &self.constraints.groups {
            Some(index) => GroupLayout::from_index(index, n_variables),
            None => Ok(GroupLayout::singleton(n_variables)),
        }
    }

    /// Largest support size the path will visit; 0 in the config means
    /// "choose from the data" (min of the group count and n / ln n).
    pub fn resolved_s_max(&self, n_samples: usize, n_groups: usize) -> usize {
        if self.path.s_max > 0 {
            return self.path.s_max;
        }
        let budget = (n_samples as f64 / (n_samples as f64).ln().max(1.0)).floor() as usize;
        n_groups.min(budget.max(1))
    }

    /// Smallest support size the path will visit, raised to cover the
    /// always-included groups.
    pub fn resolved_s_min(&self) -> usize {
        self.path.s_min.max(self.constraints.always_include.len())
    }

    /// Fail-fast validation of every parameter combination, run before any
    /// search work.
    pub fn validate(&self, n_samples: usize, n_groups: usize) -> Result<(), EstimationError> {
        let invalid = |msg: String| Err(EstimationError::InvalidConfig(msg));

        let s_max = self.resolved_s_max(n_samples, n_groups);
        let s_min = self.resolved_s_min();
        if s_max > n_groups {
            return invalid(format!(
                "path.s_max ({s_max}) exceeds the number of selectable groups ({n_groups})"
            ));
        }
        if s_min > s_max {
            return invalid(format!(
                "path.s_min ({s_min}, after covering always-included groups) exceeds path.s_max ({s_max})"
            ));
        }

        if self.path.lambda_min < 0.0 {
            return invalid(format!(
                "path.lambda_min must be non-negative (got {})",
                self.path.lambda_min
            ));
        }
        if self.path.lambda_min > self.path.lambda_max {
            return invalid(format!(
                "path.lambda_min ({}) exceeds path.lambda_max ({})",
                self.path.lambda_min, self.path.lambda_max
            ));
        }
        if self.path.n_lambda == 0 {
            return invalid("path.n_lambda must be at least 1".to_string());
        }

        if self.selection.ic_coef <= 0.0 {
            return invalid(format!(
                "selection.ic_coef must be positive (got {})",
                self.selection.ic_coef
            ));
        }
        if let Some(cv) = &self.selection.cross_validation {
            if cv.folds < 2 || cv.folds > n_samples {
                return invalid(format!(
                    "cross-validation fold count must lie in [2, {n_samples}] (got {})",
                    cv.folds
                ));
            }
        }

        if self.splicing.exchange_num == 0 {
            return invalid("splicing.exchange_num must be at least 1".to_string());
        }
        if self.splicing.epsilon < 0.0 || self.splicing.tau < 0.0 {
            return invalid("splicing.epsilon and splicing.tau must be non-negative".to_string());
        }
        if self.fitter.max_iter == 0 {
            return invalid("fitter.max_iter must be at least 1".to_string());
        }
        if self.fitter.epsilon < 0.0 {
            return invalid("fitter.epsilon must be non-negative".to_string());
        }

        if let Some(screening) = &self.screening {
            if screening.keep < s_max {
                return invalid(format!(
                    "screening.keep ({}) is smaller than the largest requested support size ({s_max}); the search could never reach the requested model size",
                    screening.keep
                ));
            }
            if screening.keep > n_groups {
                return invalid(format!(
                    "screening.keep ({}) exceeds the number of groups ({n_groups})",
                    screening.keep
                ));
            }
        }

        self.validate_constraints(n_groups, s_max)
    }

    fn validate_constraints(
        &self,
        n_groups: usize,
        s_max: usize,
    ) -> Result<(), EstimationError> {
        let invalid = |msg: String| Err(EstimationError::InvalidConfig(msg));
        let c = &self.constraints;

        for (name, list) in [
            ("always_include", &c.always_include),
            ("always_exclude", &c.always_exclude),
        ] {
            if let Some(&g) = list.iter().find(|&&g| g >= n_groups) {
                return invalid(format!(
                    "constraints.{name} references group {g}, but only {n_groups} groups exist"
                ));
            }
        }
        if c
            .always_include
            .iter()
            .any(|g| c.always_exclude.contains(g))
        {
            return invalid(
                "a group cannot be both always included and always excluded".to_string(),
            );
        }
        if c.always_include.len() > s_max {
            return invalid(format!(
                "constraints.always_include pins {} groups, more than path.s_max ({s_max})",
                c.always_include.len()
            ));
        }
        let selectable = n_groups - c.always_exclude.len();
        if s_max > selectable {
            return invalid(format!(
                "path.s_max ({s_max}) exceeds the {selectable} groups left after exclusions"
            ));
        }

        if let Some(init) = &c.initial_active {
            if let Some(&g) = init.iter().find(|&&g| g >= n_groups) {
                return invalid(format!(
                    "constraints.initial_active references group {g}, but only {n_groups} groups exist"
                ));
            }
            if init.iter().any(|g| c.always_exclude.contains(g)) {
                return invalid(
                    "constraints.initial_active overlaps always-excluded groups".to_string(),
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Smallest candidate support size.
    pub s_min: usize,
    /// Largest candidate support size; 0 = derive from the data.
    pub s_max: usize,
    pub path_type: PathType,
    /// Seed each position's search from the previous position's solution.
    pub warm_start: bool,
    /// Abandon the sequential path once the selection score stops improving.
    pub early_stop: bool,
    /// Ridge path bounds; the degenerate default grid is the single point 0.
    pub lambda_min: f64,
    pub lambda_max: f64,
    pub n_lambda: usize,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            s_min: 1,
            s_max: 0,
            path_type: PathType::Sequential,
            warm_start: true,
            early_stop: false,
            lambda_min: 0.0,
            lambda_max: 0.0,
            n_lambda: 1,
        }
    }
}

impl PathConfig {
    /// The ridge grid: log-spaced when the bounds allow it, linear otherwise.
    pub fn lambda_grid(&self) -> Vec<f64> {
        if self.n_lambda <= 1 || self.lambda_max <= self.lambda_min {
            return vec![self.lambda_min];
        }
        let m = self.n_lambda;
        if self.lambda_min > 0.0 {
            let (lo, hi) = (self.lambda_min.ln(), self.lambda_max.ln());
            (0..m)
                .map(|i| (lo + (hi - lo) * i as f64 / (m - 1) as f64).exp())
                .collect()
        } else {
            (0..m)
                .map(|i| {
                    self.lambda_min
                        + (self.lambda_max - self.lambda_min) * i as f64 / (m - 1) as f64
                })
                .collect()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub criterion: IcType,
    /// Multiplier on the criterion's model-size penalty.
    pub ic_coef: f64,
    /// When set, positions are scored by K-fold held-out loss instead of the
    /// information criterion.
    pub cross_validation: Option<CvConfig>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            criterion: IcType::Gic,
            ic_coef: 1.0,
            cross_validation: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvConfig {
    pub folds: usize,
    /// Seed for the fold shuffle, making runs reproducible.
    pub seed: u64,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self { folds: 5, seed: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplicingConfig {
    /// Exchange rounds per path position; 0 returns the initial set, flagged
    /// as not converged.
    pub max_iter: usize,
    /// Largest number of groups exchanged in one move.
    pub exchange_num: usize,
    /// Stop once a round improves the objective by less than this.
    pub epsilon: f64,
    /// An exchange must beat the current objective by more than this.
    pub tau: f64,
    /// Score exchange candidates with a single Newton step instead of a
    /// fully converged refit.
    pub approximate_newton: bool,
}

impl Default for SplicingConfig {
    fn default() -> Self {
        Self {
            max_iter: 20,
            exchange_num: 5,
            epsilon: 1e-8,
            tau: 0.0,
            approximate_newton: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitterConfig {
    pub max_iter: usize,
    pub epsilon: f64,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            max_iter: 30,
            epsilon: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningConfig {
    /// Candidate groups retained after the marginal pre-filter.
    pub keep: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintConfig {
    /// Per-variable group index (non-decreasing, contiguous ids from 0);
    /// absent means every variable is its own group.
    pub groups: Option<Vec<usize>>,
    /// User-chosen starting support for the first path position.
    pub initial_active: Option<Vec<usize>>,
    /// Groups present in every fitted model.
    pub always_include: Vec<usize>,
    /// Groups removed from the candidate pool entirely.
    pub always_exclude: Vec<usize>,
}
