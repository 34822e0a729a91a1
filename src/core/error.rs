use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    #[error("decile ranking needs at least 10 individuals, found {found}")]
    InsufficientPopulation { found: usize },

    #[error("invalid band specification: {0}")]
    InvalidBandSpecification(String),

    #[error("decile {0} has no individuals with a defined relative gain")]
    EmptyDecile(u8),

    #[error("invalid calibration config: {0}")]
    InvalidCalibrationConfig(String),

    /// Carries the trial closest to the target so callers can still report it.
    #[error(
        "calibration did not converge after {iterations} evaluations; best effort {best_effort} leaves net revenue {net_revenue}"
    )]
    CalibrationFailed {
        best_effort: f64,
        net_revenue: f64,
        iterations: u32,
    },

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("simulation failed: {0}")]
    Simulation(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
