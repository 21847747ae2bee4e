//! Marginal screening: shrink the candidate pool before the search.
//!
//! Groups are ranked by the forward sacrifice of the empty model, the same
//! marginal-utility quantity the splicing engine uses; for standardized
//! Gaussian data this reduces to squared marginal correlation with the
//! response. Always-included groups are retained regardless of rank.

use crate::estimate::EstimationError;
use crate::splicing::{SearchContext, forward_ranking};

/// Reduce `ctx.candidates` to the `keep` highest-ranked groups (plus any
/// always-included ones). Returns the retained groups, sorted.
pub fn screen_candidates(
    ctx: &SearchContext<'_>,
    keep: usize,
    lambda: f64,
) -> Result<Vec<usize>, EstimationError> {
    if keep >= ctx.candidates.len() {
        return Ok(ctx.candidates.clone());
    }

    let null_eta = ctx.model.null_eta(ctx.weights);
    let ranking = forward_ranking(ctx, &null_eta, &ctx.candidates, lambda)?;

    let mut kept: Vec<usize> = ctx.always_include.clone();
    for &(g, _) in &ranking {
        if kept.len() >= keep {
            break;
        }
        if !kept.contains(&g) {
            kept.push(g);
        }
    }
    kept.sort_unstable();
    log::debug!(
        "screening kept {} of {} candidate groups",
        kept.len(),
        ctx.candidates.len()
    );
    Ok(kept)
}
