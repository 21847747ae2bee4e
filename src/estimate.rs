//! Top-level estimation entry point: validate, ingest, screen, search the
//! path, and package the winning fit.

use ndarray::{Array1, ArrayView2};
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::BessConfig;
use crate::data::{DesignMatrix, Response, ingest};
use crate::faer_ndarray::FaerLinalgError;
use crate::family::FamilyModel;
use crate::path::{PathRecord, run_path};
use crate::screening::screen_candidates;
use crate::splicing::SearchContext;
use crate::types::{FitStatus, IcType};

#[derive(Error)]
pub enum EstimationError {
    #[error(
        "Design matrix and response have mismatched sample counts: {n_rows} rows vs {n_response} response entries."
    )]
    SampleCountMismatch { n_rows: usize, n_response: usize },

    #[error("Design matrix must have at least one row and one column (got {n_rows}x{n_cols}).")]
    EmptyDesign { n_rows: usize, n_cols: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("A linear system solve failed. The penalized Newton system may be singular: {0}")]
    LinearSystemSolveFailed(FaerLinalgError),

    #[error("Numerical failure during fitting: {0}")]
    Numerical(String),
}

// Ensure Debug prints with actual line breaks by delegating to Display
impl core::fmt::Debug for EstimationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self)
    }
}

/// How the winning path position was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMethod {
    InformationCriterion(IcType),
    CrossValidation { folds: usize },
}

/// Packaged result of one run: coefficients on the original data scale, the
/// selected support, and the full per-position score trace for diagnostics.
#[derive(Clone, Debug)]
pub struct BessFit {
    /// Dense coefficient vector over all variables; entries off the selected
    /// support are zero.
    pub beta: Array1<f64>,
    pub intercept: f64,
    /// Selected variable (column) indices, sorted.
    pub support: Vec<usize>,
    /// Selected group indices, sorted (identical to `support` under the
    /// default singleton grouping).
    pub support_groups: Vec<usize>,
    pub best_support_size: usize,
    pub best_lambda: f64,
    pub selection: SelectionMethod,
    /// Splicing status of the winning position.
    pub status: FitStatus,
    pub splicing_iterations: usize,
    /// Every evaluated path position, in evaluation order.
    pub path: Vec<PathRecord>,
}

impl BessFit {
    /// Linear predictor for new observations on the original data scale.
    pub fn linear_predictor(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        x.dot(&self.beta) + self.intercept
    }
}

/// Run the best-subset search.
///
/// This is the single synchronous call the engine exposes: it either returns
/// a packaged result or fails fast on shape/configuration problems.
/// Non-convergence anywhere inside the run is reported through status flags
/// on the result, never as an error.
pub fn fit_bess(
    x: DesignMatrix,
    response: Response,
    weights: Option<Array1<f64>>,
    config: &BessConfig,
) -> Result<BessFit, EstimationError> {
    let n = x.nrows();
    let p = x.ncols();
    if n == 0 || p == 0 {
        return Err(EstimationError::EmptyDesign {
            n_rows: n,
            n_cols: p,
        });
    }

    let layout = config.group_layout(p)?;
    config.validate(n, layout.count())?;

    let ingested = ingest(x, response, weights, config.family, config.standardize)?;
    let model = FamilyModel::new(config.family, &ingested.response, &ingested.weights)?;

    let mut always_include = config.constraints.always_include.clone();
    always_include.sort_unstable();
    always_include.dedup();
    let candidates: Vec<usize> = (0..layout.count())
        .filter(|g| !config.constraints.always_exclude.contains(g))
        .collect();

    let search = || -> Result<crate::path::PathOutcome, EstimationError> {
        let mut ctx = SearchContext {
            x: &ingested.x,
            model: &model,
            weights: &ingested.weights,
            groups: &layout,
            candidates,
            always_include,
        };
        if let Some(screening) = &config.screening {
            ctx.candidates = screen_candidates(&ctx, screening.keep, config.path.lambda_grid()[0])?;
        }
        run_path(&ctx, config, &ingested)
    };

    let outcome = if config.threads > 0 {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()
            .map_err(|e| {
                EstimationError::InvalidConfig(format!("thread pool construction failed: {e}"))
            })?;
        pool.install(search)?
    } else {
        search()?
    };

    let best_record = &outcome.records[outcome.best];
    let best = &outcome.best_outcome;

    // Map coefficients back through standardization and scatter them into a
    // dense length-p vector.
    let cols = layout.gather_columns(&best.active);
    let mut beta = Array1::<f64>::zeros(p);
    let mut intercept = best.fit.intercept;
    match &ingested.standardization {
        Some(std) => {
            for (k, &j) in cols.iter().enumerate() {
                let b = best.fit.beta[k] / std.scale[j];
                beta[j] = b;
                // Families without an intercept (Cox) have nowhere to absorb
                // the centering shift; their predictor is relative anyway.
                if config.family.has_intercept() {
                    intercept -= b * std.shift[j];
                }
            }
        }
        None => {
            for (k, &j) in cols.iter().enumerate() {
                beta[j] = best.fit.beta[k];
            }
        }
    }
    let mut support = cols;
    support.sort_unstable();

    let selection = match &config.selection.cross_validation {
        Some(cv) => SelectionMethod::CrossValidation { folds: cv.folds },
        None => SelectionMethod::InformationCriterion(config.selection.criterion),
    };

    log::debug!(
        "selected support size {} (lambda {:.3e}) from {} evaluated positions",
        best.active.len(),
        best_record.lambda,
        outcome.records.len()
    );

    Ok(BessFit {
        beta,
        intercept,
        support,
        support_groups: best.active.clone(),
        best_support_size: best_record.support_size,
        best_lambda: best_record.lambda,
        selection,
        status: best.status,
        splicing_iterations: best.iterations,
        path: outcome.records,
    })
}
