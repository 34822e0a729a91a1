mod bands;
mod calibrate;
mod decile;
mod error;
mod income;
mod types;

pub use bands::{
    BandSet, DEFAULT_LARGE_CHANGE_THRESHOLD, DEFAULT_NO_CHANGE_THRESHOLD, band_fractions,
};
pub use calibrate::{
    Calibration, CalibrationConfig, CalibrationIteration, SearchMethod, calibrate,
    initial_estimate,
};
pub use decile::assign_deciles;
pub use error::{AnalysisError, Result};
pub use income::{gini, losers_share, relative_change, relative_gain, winners_share};
pub use types::{
    Band, BandFractionRow, BandFractionTable, DECILES, DecileRank, IncomeSeries, PersonId,
    RelativeGain,
};
