//! The seam between the analysis core and a household microsimulation.
//!
//! The core only needs two things from a simulation: per-entity series for a
//! named variable, and the guarantee that the same [`ReformSpec`] always
//! yields the same numbers. [`StylisedEngine`] is a small in-memory backend
//! that satisfies both; a production engine plugs in through [`Simulator`].

mod population;
mod reform;
mod stylised;
mod tax;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{AnalysisError, IncomeSeries, Result};

pub use population::{Person, Population};
pub use reform::{ReformChange, ReformSpec, UbiRecipients};
pub use stylised::{PolicyParameters, StylisedEngine, StylisedSimulation};
pub use tax::{IncomeTaxSchedule, NationalInsuranceSchedule};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    NetIncome,
    HouseholdNetIncome,
    EquivHouseholdNetIncome,
    IncomeTax,
    NationalInsurance,
    Ubi,
    People,
    IsChild,
    IsWaAdult,
    IsAdult,
    IsPensioner,
    InPovertyBhc,
    InDeepPovertyBhc,
}

impl Variable {
    pub const ALL: [Variable; 13] = [
        Variable::NetIncome,
        Variable::HouseholdNetIncome,
        Variable::EquivHouseholdNetIncome,
        Variable::IncomeTax,
        Variable::NationalInsurance,
        Variable::Ubi,
        Variable::People,
        Variable::IsChild,
        Variable::IsWaAdult,
        Variable::IsAdult,
        Variable::IsPensioner,
        Variable::InPovertyBhc,
        Variable::InDeepPovertyBhc,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Variable::NetIncome => "net_income",
            Variable::HouseholdNetIncome => "household_net_income",
            Variable::EquivHouseholdNetIncome => "equiv_household_net_income",
            Variable::IncomeTax => "income_tax",
            Variable::NationalInsurance => "national_insurance",
            Variable::Ubi => "UBI",
            Variable::People => "people",
            Variable::IsChild => "is_child",
            Variable::IsWaAdult => "is_WA_adult",
            Variable::IsAdult => "is_adult",
            Variable::IsPensioner => "is_SP_age",
            Variable::InPovertyBhc => "in_poverty_bhc",
            Variable::InDeepPovertyBhc => "in_deep_poverty_bhc",
        }
    }

    /// Whether the variable is defined once per household rather than per
    /// person.
    pub fn is_household(self) -> bool {
        matches!(
            self,
            Variable::HouseholdNetIncome | Variable::EquivHouseholdNetIncome
        )
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variable {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        Variable::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| AnalysisError::UnknownVariable(s.to_string()))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityLevel {
    Person,
    Household,
}

pub trait Simulation {
    fn calc(&self, variable: Variable, level: EntityLevel) -> Result<IncomeSeries>;

    fn total(&self, variable: Variable) -> Result<f64> {
        Ok(self.calc(variable, EntityLevel::Person)?.sum())
    }
}

/// Runs a reform against a fixed dataset. Must be deterministic in `reform`.
pub trait Simulator {
    type Output: Simulation;

    fn simulate(&self, reform: &ReformSpec) -> Result<Self::Output>;

    fn baseline(&self) -> Result<Self::Output> {
        self.simulate(&ReformSpec::default())
    }
}

/// `Σ reform net income − Σ baseline net income`; negative when the reform
/// raises money.
pub fn net_cost<S: Simulation>(baseline: &S, reform: &S) -> Result<f64> {
    Ok(reform.total(Variable::NetIncome)? - baseline.total(Variable::NetIncome)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_names_round_trip() {
        for variable in Variable::ALL {
            assert_eq!(variable.name().parse::<Variable>(), Ok(variable));
        }
        assert_eq!(
            "is_wa_adult".parse::<Variable>(),
            Ok(Variable::IsWaAdult)
        );
        assert_eq!(
            "pension_pot".parse::<Variable>(),
            Err(AnalysisError::UnknownVariable("pension_pot".to_string()))
        );
    }
}
