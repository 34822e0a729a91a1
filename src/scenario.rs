//! The reform-table driver: for each scenario, fund a UBI from tax changes,
//! calibrate it to revenue neutrality where benefits are means-tested against
//! it, and summarise who wins and who loses.

use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{
    AnalysisError, BandFractionTable, BandSet, Calibration, CalibrationConfig, DecileRank,
    IncomeSeries, Result, assign_deciles, band_fractions, calibrate, gini, initial_estimate,
    losers_share, relative_change, relative_gain, winners_share,
};
use crate::sim::{
    EntityLevel, ReformChange, ReformSpec, Simulation, Simulator, UbiRecipients, Variable,
    net_cost,
};

/// Household net income must move by more than this to count as a win or a
/// loss.
pub const WINNER_MARGIN: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioParams {
    pub name: String,
    pub adult_pa: f64,
    pub pensioner_pa: f64,
    pub ni_primary_threshold_weekly: f64,
    pub ubi_for_children: bool,
    pub ubi_for_pensioners: bool,
    pub ubi_in_means_tests: bool,
    /// Share of the UBI budget set aside for children, paid per child.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_share: Option<f64>,
}

impl ScenarioParams {
    pub fn default_grid() -> Vec<Self> {
        let row = |name: &str, adult_pa, pensioner_pa, pt, children, pensioners, means_tests| {
            ScenarioParams {
                name: name.to_string(),
                adult_pa,
                pensioner_pa,
                ni_primary_threshold_weekly: pt,
                ubi_for_children: children,
                ubi_for_pensioners: pensioners,
                ubi_in_means_tests: means_tests,
                child_share: None,
            }
        };
        vec![
            row("Baseline", 2_500.0, 12_500.0, 50.0, false, false, true),
            row("Full PA/PT elimination", 0.0, 12_500.0, 0.0, false, false, true),
            row("Include pensioners", 2_500.0, 2_500.0, 50.0, false, true, true),
            row("Include children", 2_500.0, 12_500.0, 50.0, true, false, true),
            row("Exclude from means tests", 2_500.0, 12_500.0, 50.0, false, false, false),
            row("All", 0.0, 0.0, 0.0, true, true, false),
        ]
    }

    pub fn find<'a>(grid: &'a [Self], name: &str) -> Option<&'a Self> {
        grid.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn tax_reform(&self) -> ReformSpec {
        ReformSpec::new()
            .with(ReformChange::PersonalAllowance {
                amount: self.pensioner_pa,
            })
            .with(ReformChange::WorkingAgePersonalAllowance {
                amount: self.adult_pa,
            })
            .with(ReformChange::NiPrimaryThreshold {
                weekly: self.ni_primary_threshold_weekly,
            })
    }

    pub fn recipients(&self) -> UbiRecipients {
        UbiRecipients::from_flags(self.ubi_for_children, self.ubi_for_pensioners)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(AnalysisError::InvalidScenario(msg));
        let amounts = [
            ("adultPa", self.adult_pa),
            ("pensionerPa", self.pensioner_pa),
            ("niPrimaryThresholdWeekly", self.ni_primary_threshold_weekly),
        ];
        for (field, value) in amounts {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!(
                    "{field} must be a non-negative number, got {value}"
                ));
            }
        }
        if let Some(share) = self.child_share {
            if !self.ubi_for_children {
                return invalid("childShare needs ubiForChildren".to_string());
            }
            if !(0.0..1.0).contains(&share) {
                return invalid(format!("childShare must be in [0, 1), got {share}"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioSettings {
    pub calibration: CalibrationConfig,
    /// The initial UBI estimate is truncated to a multiple of this, £/year.
    pub granularity: f64,
    pub bands: BandSet,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            calibration: CalibrationConfig::default(),
            granularity: 52.0,
            bands: BandSet::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum CalibrationOutcome {
    /// Taken straight from revenue per recipient; benefits ignore UBI.
    Estimated,
    Converged(Calibration),
    BestEffort {
        value: f64,
        net_revenue: f64,
        iterations: u32,
    },
}

#[derive(Debug, Clone)]
pub struct BuiltReform {
    pub reform: ReformSpec,
    pub ubi_amount: f64,
    pub revenue: f64,
    pub calibration: CalibrationOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReformSummary {
    /// Largest UBI paid to anyone, £/year.
    pub ubi_amount: f64,
    pub net_cost: f64,
    pub poverty_change: f64,
    pub deep_poverty_change: f64,
    pub gini_change: f64,
    pub winners: f64,
    pub losers: f64,
    pub bands: BandFractionTable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub scenario: ScenarioParams,
    pub revenue: f64,
    pub calibration: CalibrationOutcome,
    pub summary: ReformSummary,
}

/// Baseline state shared by every scenario in a run.
///
/// Deciles come from the baseline's equivalised household income and are
/// fixed for the analyzer's lifetime.
pub struct ScenarioAnalyzer<S: Simulator> {
    simulator: S,
    baseline: S::Output,
    household_income: IncomeSeries,
    deciles: DecileRank,
    settings: ScenarioSettings,
}

impl<S: Simulator> ScenarioAnalyzer<S> {
    pub fn new(simulator: S, settings: ScenarioSettings) -> Result<Self> {
        if !settings.granularity.is_finite() || settings.granularity <= 0.0 {
            return Err(AnalysisError::InvalidCalibrationConfig(format!(
                "granularity must be > 0, got {}",
                settings.granularity
            )));
        }
        let baseline = simulator.baseline()?;
        let equivalised = baseline.calc(Variable::EquivHouseholdNetIncome, EntityLevel::Person)?;
        let deciles = assign_deciles(&equivalised)?;
        let household_income = baseline.calc(Variable::HouseholdNetIncome, EntityLevel::Person)?;
        Ok(Self {
            simulator,
            baseline,
            household_income,
            deciles,
            settings,
        })
    }

    pub fn deciles(&self) -> &DecileRank {
        &self.deciles
    }

    pub fn baseline(&self) -> &S::Output {
        &self.baseline
    }

    pub fn build_reform(&self, params: &ScenarioParams) -> Result<BuiltReform> {
        params.validate()?;
        let tax = params.tax_reform();
        let tax_only = self.simulator.simulate(&tax)?;
        let revenue = -net_cost(&self.baseline, &tax_only)?;

        let recipients = params.recipients();
        let population = recipients
            .population_variables()
            .iter()
            .map(|&variable| self.baseline.total(variable))
            .sum::<Result<f64>>()?;
        // With a child share, the adult amount is the search parameter and
        // children get a fixed multiple of it.
        let (budget, paid_at_adult_rate, child_ratio) = match params.child_share {
            None => (revenue, population, None),
            Some(share) => {
                let children = self.baseline.total(Variable::IsChild)?;
                let adults = population - children;
                let ratio = if children > 0.0 {
                    share * adults / ((1.0 - share) * children)
                } else {
                    0.0
                };
                (revenue * (1.0 - share), adults, Some(ratio))
            }
        };
        let estimate = initial_estimate(budget, paid_at_adult_rate, self.settings.granularity)?;

        let with_ubi = |amount: f64| {
            let mut reform = tax.clone().with(ReformChange::Ubi { amount, recipients });
            if let Some(ratio) = child_ratio {
                reform = reform.with(ReformChange::ChildUbi {
                    amount: amount * ratio,
                });
            }
            if params.ubi_in_means_tests {
                reform = reform.with(ReformChange::UbiInMeansTests);
            }
            reform
        };

        if !params.ubi_in_means_tests {
            return Ok(BuiltReform {
                reform: with_ubi(estimate),
                ubi_amount: estimate,
                revenue,
                calibration: CalibrationOutcome::Estimated,
            });
        }

        let outcome = calibrate(estimate, self.settings.calibration, |amount| {
            let simulation = self.simulator.simulate(&with_ubi(amount))?;
            Ok(-net_cost(&self.baseline, &simulation)?)
        });
        let (ubi_amount, calibration) = match outcome {
            Ok(calibration) => (calibration.value, CalibrationOutcome::Converged(calibration)),
            Err(AnalysisError::CalibrationFailed {
                best_effort,
                net_revenue,
                iterations,
            }) => {
                warn!(
                    scenario = %params.name,
                    best_effort, net_revenue, "using best-effort UBI amount"
                );
                (
                    best_effort,
                    CalibrationOutcome::BestEffort {
                        value: best_effort,
                        net_revenue,
                        iterations,
                    },
                )
            }
            Err(e) => return Err(e),
        };

        Ok(BuiltReform {
            reform: with_ubi(ubi_amount),
            ubi_amount,
            revenue,
            calibration,
        })
    }

    pub fn summarise(&self, reform: &S::Output) -> Result<ReformSummary> {
        let household_income = reform.calc(Variable::HouseholdNetIncome, EntityLevel::Person)?;
        let mean_of = |sim: &S::Output, variable| -> Result<f64> {
            Ok(sim.calc(variable, EntityLevel::Person)?.mean())
        };

        let gain = relative_gain(&self.household_income, &household_income);
        let bands = band_fractions(&gain, &self.deciles, &self.settings.bands)?;

        Ok(ReformSummary {
            ubi_amount: reform
                .calc(Variable::Ubi, EntityLevel::Person)?
                .max()
                .unwrap_or(0.0),
            net_cost: net_cost(&self.baseline, reform)?,
            poverty_change: relative_change(
                mean_of(&self.baseline, Variable::InPovertyBhc)?,
                mean_of(reform, Variable::InPovertyBhc)?,
            ),
            deep_poverty_change: relative_change(
                mean_of(&self.baseline, Variable::InDeepPovertyBhc)?,
                mean_of(reform, Variable::InDeepPovertyBhc)?,
            ),
            gini_change: relative_change(gini(&self.household_income), gini(&household_income)),
            winners: winners_share(&self.household_income, &household_income, WINNER_MARGIN),
            losers: losers_share(&self.household_income, &household_income, WINNER_MARGIN),
            bands,
        })
    }

    pub fn run(&self, params: &ScenarioParams) -> Result<ScenarioResult> {
        let built = self.build_reform(params)?;
        let simulation = self.simulator.simulate(&built.reform)?;
        let summary = self.summarise(&simulation)?;
        info!(
            scenario = %params.name,
            ubi = built.ubi_amount,
            net_cost = summary.net_cost,
            winners = summary.winners,
            losers = summary.losers,
            "scenario evaluated"
        );
        Ok(ScenarioResult {
            scenario: params.clone(),
            revenue: built.revenue,
            calibration: built.calibration,
            summary,
        })
    }
}

/// Evaluate every scenario on its own thread. Results keep the order of
/// `grid`; one scenario failing does not stop the others.
pub fn run_scenarios<S>(
    analyzer: &ScenarioAnalyzer<S>,
    grid: &[ScenarioParams],
) -> Vec<Result<ScenarioResult>>
where
    S: Simulator + Sync,
    S::Output: Sync,
{
    thread::scope(|scope| {
        let handles: Vec<_> = grid
            .iter()
            .map(|params| scope.spawn(move || analyzer.run(params)))
            .collect();
        handles
            .into_iter()
            .zip(grid)
            .map(|(handle, params)| {
                handle.join().unwrap_or_else(|_| {
                    Err(AnalysisError::Simulation(format!(
                        "scenario '{}' panicked",
                        params.name
                    )))
                })
            })
            .collect()
    })
}
