use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{AnalysisError, IncomeSeries, PersonId, Result};

use super::population::{Person, Population};
use super::reform::{ReformChange, ReformSpec, UbiRecipients};
use super::tax::{IncomeTaxSchedule, NationalInsuranceSchedule, income_tax, national_insurance};
use super::{EntityLevel, Simulation, Simulator, Variable};

const ADULT_AGE: u32 = 18;
const POVERTY_LINE_SHARE: f64 = 0.6;
const DEEP_POVERTY_LINE_SHARE: f64 = 0.5;

/// The policy levers a [`ReformSpec`] can move, at their 2020 values.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyParameters {
    pub personal_allowance: f64,
    pub working_age_personal_allowance: Option<f64>,
    pub state_pension_age: u32,
    pub income_tax: IncomeTaxSchedule,
    pub national_insurance: NationalInsuranceSchedule,
    pub ubi: Option<(f64, UbiRecipients)>,
    pub child_ubi: Option<f64>,
    pub ubi_in_means_tests: bool,
    /// Benefit withdrawn per pound of UBI when UBI counts in means tests.
    pub means_test_taper: f64,
}

impl Default for PolicyParameters {
    fn default() -> Self {
        Self {
            personal_allowance: 12_500.0,
            working_age_personal_allowance: None,
            state_pension_age: 66,
            income_tax: IncomeTaxSchedule::default(),
            national_insurance: NationalInsuranceSchedule::default(),
            ubi: None,
            child_ubi: None,
            ubi_in_means_tests: false,
            means_test_taper: 0.63,
        }
    }
}

impl PolicyParameters {
    pub fn with_reform(mut self, reform: &ReformSpec) -> Self {
        for change in &reform.changes {
            self.apply(change);
        }
        self
    }

    fn apply(&mut self, change: &ReformChange) {
        match *change {
            ReformChange::PersonalAllowance { amount } => self.personal_allowance = amount,
            ReformChange::WorkingAgePersonalAllowance { amount } => {
                self.working_age_personal_allowance = Some(amount)
            }
            ReformChange::NiPrimaryThreshold { weekly } => {
                self.national_insurance.primary_threshold_weekly = weekly
            }
            ReformChange::Ubi { amount, recipients } => self.ubi = Some((amount, recipients)),
            ReformChange::ChildUbi { amount } => self.child_ubi = Some(amount),
            ReformChange::UbiInMeansTests => self.ubi_in_means_tests = true,
        }
    }

    fn is_pensioner(&self, person: &Person) -> bool {
        person.age >= self.state_pension_age
    }

    fn is_child(&self, person: &Person) -> bool {
        person.age < ADULT_AGE
    }

    fn ubi_for(&self, person: &Person) -> f64 {
        let Some((amount, recipients)) = self.ubi else {
            return 0.0;
        };
        let child = self.is_child(person);
        let pensioner = self.is_pensioner(person);
        let eligible = match recipients {
            UbiRecipients::WorkingAgeAdults => !child && !pensioner,
            UbiRecipients::Adults => !child,
            UbiRecipients::NonPensioners => !pensioner,
            UbiRecipients::Everyone => true,
        };
        match (eligible, child) {
            (false, _) => 0.0,
            (true, true) => self.child_ubi.unwrap_or(amount),
            (true, false) => amount,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PersonOutcome {
    id: PersonId,
    household: u64,
    child: bool,
    pensioner: bool,
    income_tax: f64,
    national_insurance: f64,
    ubi: f64,
    net_income: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct HouseholdOutcome {
    net_income: f64,
    equivalence_scale: f64,
}

impl HouseholdOutcome {
    fn equivalised(&self) -> f64 {
        if self.equivalence_scale > 0.0 {
            self.net_income / self.equivalence_scale
        } else {
            0.0
        }
    }
}

/// In-memory reference simulator over a fixed population.
///
/// Poverty lines are fixed at construction from the baseline distribution so
/// every reform is measured against the same thresholds. Every record carries
/// the same weight, so aggregates are `weight * Σ record` while means, shares
/// and the Gini coefficient are unweighted.
#[derive(Debug, Clone)]
pub struct StylisedEngine {
    population: Arc<Population>,
    parameters: PolicyParameters,
    poverty_line: f64,
    deep_poverty_line: f64,
    weight: f64,
}

impl StylisedEngine {
    pub fn new(population: Population) -> Self {
        Self::with_parameters(population, PolicyParameters::default())
    }

    pub fn with_parameters(population: Population, parameters: PolicyParameters) -> Self {
        let population = Arc::new(population);
        let baseline = run(&population, &parameters, 0.0, 0.0);
        let median = median_equivalised_income(&baseline);
        Self {
            population,
            parameters,
            poverty_line: median * POVERTY_LINE_SHARE,
            deep_poverty_line: median * DEEP_POVERTY_LINE_SHARE,
            weight: 1.0,
        }
    }

    /// Weight records so the sample stands for `people` people in totals.
    pub fn grossed_up_to(mut self, people: f64) -> Result<Self> {
        if !people.is_finite() || people <= 0.0 || self.population.is_empty() {
            return Err(AnalysisError::Simulation(format!(
                "cannot gross {} records up to {people} people",
                self.population.len()
            )));
        }
        self.weight = people / self.population.len() as f64;
        Ok(self)
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

}

impl Simulator for StylisedEngine {
    type Output = StylisedSimulation;

    fn simulate(&self, reform: &ReformSpec) -> Result<StylisedSimulation> {
        let parameters = self.parameters.clone().with_reform(reform);
        let mut simulation = run(
            &self.population,
            &parameters,
            self.poverty_line,
            self.deep_poverty_line,
        );
        simulation.weight = self.weight;
        Ok(simulation)
    }
}

fn run(
    population: &Population,
    parameters: &PolicyParameters,
    poverty_line: f64,
    deep_poverty_line: f64,
) -> StylisedSimulation {
    let people: Vec<PersonOutcome> = population
        .people
        .iter()
        .map(|person| person_outcome(person, parameters))
        .collect();

    let mut households: HashMap<u64, HouseholdOutcome> = HashMap::new();
    let mut adults_seen: HashMap<u64, u32> = HashMap::new();
    for outcome in &people {
        let household = households.entry(outcome.household).or_default();
        household.net_income += outcome.net_income;
        // Modified OECD scale: first adult 1.0, other adults 0.5, children 0.3.
        household.equivalence_scale += if outcome.child {
            0.3
        } else {
            let adults = adults_seen.entry(outcome.household).or_default();
            *adults += 1;
            if *adults == 1 { 1.0 } else { 0.5 }
        };
    }

    StylisedSimulation {
        people,
        households,
        poverty_line,
        deep_poverty_line,
        weight: 1.0,
    }
}

fn person_outcome(person: &Person, parameters: &PolicyParameters) -> PersonOutcome {
    let child = parameters.is_child(person);
    let pensioner = parameters.is_pensioner(person);

    let allowance = if pensioner {
        parameters.personal_allowance
    } else {
        parameters
            .working_age_personal_allowance
            .unwrap_or(parameters.personal_allowance)
    };
    let taxable = person.employment_income + person.pension_income;
    let tax = income_tax(taxable, allowance, &parameters.income_tax);
    let ni = if pensioner {
        0.0
    } else {
        national_insurance(person.employment_income, &parameters.national_insurance)
    };

    let ubi = parameters.ubi_for(person);
    let means_tested = if parameters.ubi_in_means_tests {
        (person.means_tested_benefits - parameters.means_test_taper * ubi).max(0.0)
    } else {
        person.means_tested_benefits
    };

    PersonOutcome {
        id: person.id,
        household: person.household,
        child,
        pensioner,
        income_tax: tax,
        national_insurance: ni,
        ubi,
        net_income: taxable + means_tested + person.other_benefits + ubi - tax - ni,
    }
}

fn median_equivalised_income(simulation: &StylisedSimulation) -> f64 {
    let mut values: Vec<f64> = simulation
        .people
        .iter()
        .filter_map(|p| simulation.households.get(&p.household))
        .map(HouseholdOutcome::equivalised)
        .collect();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) * 0.5
    } else {
        values[mid]
    }
}

#[derive(Debug, Clone)]
pub struct StylisedSimulation {
    people: Vec<PersonOutcome>,
    households: HashMap<u64, HouseholdOutcome>,
    poverty_line: f64,
    deep_poverty_line: f64,
    weight: f64,
}

impl StylisedSimulation {
    fn person_value(&self, person: &PersonOutcome, variable: Variable) -> f64 {
        let household = self
            .households
            .get(&person.household)
            .copied()
            .unwrap_or_default();
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        match variable {
            Variable::NetIncome => person.net_income,
            Variable::HouseholdNetIncome => household.net_income,
            Variable::EquivHouseholdNetIncome => household.equivalised(),
            Variable::IncomeTax => person.income_tax,
            Variable::NationalInsurance => person.national_insurance,
            Variable::Ubi => person.ubi,
            Variable::People => 1.0,
            Variable::IsChild => flag(person.child),
            Variable::IsWaAdult => flag(!person.child && !person.pensioner),
            Variable::IsAdult => flag(!person.child),
            Variable::IsPensioner => flag(person.pensioner),
            Variable::InPovertyBhc => flag(household.equivalised() < self.poverty_line),
            Variable::InDeepPovertyBhc => flag(household.equivalised() < self.deep_poverty_line),
        }
    }
}

impl Simulation for StylisedSimulation {
    fn calc(&self, variable: Variable, level: EntityLevel) -> Result<IncomeSeries> {
        match level {
            EntityLevel::Person => Ok(self
                .people
                .iter()
                .map(|p| (p.id, self.person_value(p, variable)))
                .collect()),
            EntityLevel::Household => {
                let mut series = IncomeSeries::with_capacity(self.households.len());
                for person in &self.people {
                    let value = self.person_value(person, variable);
                    if variable.is_household() {
                        series.insert(person.household, value);
                    } else {
                        let so_far = series.get(person.household).unwrap_or(0.0);
                        series.insert(person.household, so_far + value);
                    }
                }
                Ok(series)
            }
        }
    }

    fn total(&self, variable: Variable) -> Result<f64> {
        Ok(self.calc(variable, EntityLevel::Person)?.sum() * self.weight)
    }
}
