use std::collections::HashMap;

use super::error::{AnalysisError, Result};
use super::types::{DecileRank, IncomeSeries};

/// Rank by equivalised income into ten equal-population groups.
///
/// Position `r` of `n` (0-based, ascending, ties in series order) lands in
/// decile `r * 10 / n + 1`, so group sizes differ by at most one. NaN incomes
/// are left unranked.
pub fn assign_deciles(equivalised_income: &IncomeSeries) -> Result<DecileRank> {
    let mut ranked: Vec<(u64, f64)> = equivalised_income
        .iter()
        .filter(|(_, v)| !v.is_nan())
        .collect();
    let n = ranked.len();
    if n < 10 {
        return Err(AnalysisError::InsufficientPopulation { found: n });
    }

    // sort_by is stable, which keeps series order among equal incomes.
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

    let ranks: HashMap<u64, u8> = ranked
        .iter()
        .enumerate()
        .map(|(position, &(id, _))| (id, (position * 10 / n + 1) as u8))
        .collect();
    Ok(DecileRank::from_map(ranks))
}
