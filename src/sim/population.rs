use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::core::{AnalysisError, PersonId, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: PersonId,
    pub household: u64,
    pub age: u32,
    #[serde(default)]
    pub employment_income: f64,
    #[serde(default)]
    pub pension_income: f64,
    /// Benefits withdrawn as other income rises (UC, tax credits, HB).
    #[serde(default)]
    pub means_tested_benefits: f64,
    /// Benefits paid regardless of income (state pension, child benefit).
    #[serde(default)]
    pub other_benefits: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Population {
    pub people: Vec<Person>,
}

impl Population {
    pub fn new(people: Vec<Person>) -> Result<Self> {
        let population = Self { people };
        population.validate()?;
        Ok(population)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let population: Population = serde_json::from_str(json)
            .map_err(|e| AnalysisError::Simulation(format!("invalid population JSON: {e}")))?;
        population.validate()?;
        Ok(population)
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::with_capacity(self.people.len());
        for person in &self.people {
            if !seen.insert(person.id) {
                return Err(AnalysisError::Simulation(format!(
                    "duplicate person id {}",
                    person.id
                )));
            }
            let amounts = [
                person.employment_income,
                person.pension_income,
                person.means_tested_benefits,
                person.other_benefits,
            ];
            if amounts.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(AnalysisError::Simulation(format!(
                    "person {} has a negative or non-finite income",
                    person.id
                )));
            }
        }
        Ok(())
    }

    /// Deterministic synthetic survey: a mix of working-age and pensioner
    /// households with lognormal earnings.
    pub fn synthetic(households: usize, seed: u64) -> Self {
        let mut people = Vec::new();
        let mut next_id: PersonId = 1;

        for household in 0..households as u64 {
            let mut rng = Rng::new(derive_seed(seed, household));
            let pensioner_household = rng.next_f64() < 0.25;
            let adults = if rng.next_f64() < 0.55 { 2 } else { 1 };
            let children = if pensioner_household {
                0
            } else {
                (rng.next_f64() * 3.2) as u32
            };

            for _ in 0..adults {
                let age = if pensioner_household {
                    66 + (rng.next_f64() * 24.0) as u32
                } else {
                    18 + (rng.next_f64() * 48.0) as u32
                };
                let mut person = Person {
                    id: next_id,
                    household,
                    age,
                    employment_income: 0.0,
                    pension_income: 0.0,
                    means_tested_benefits: 0.0,
                    other_benefits: 0.0,
                };
                if pensioner_household {
                    person.pension_income = lognormal(&mut rng, 9_000.0, 0.9);
                    person.other_benefits = 9_100.0;
                } else if rng.next_f64() < 0.78 {
                    person.employment_income = lognormal(&mut rng, 27_000.0, 0.75);
                }
                if person.employment_income < 12_000.0 && !pensioner_household {
                    person.means_tested_benefits =
                        (7_500.0 - 0.6 * person.employment_income).max(0.0) + 2_800.0 * children as f64;
                }
                people.push(person);
                next_id += 1;
            }

            for _ in 0..children {
                people.push(Person {
                    id: next_id,
                    household,
                    age: (rng.next_f64() * 18.0) as u32,
                    employment_income: 0.0,
                    pension_income: 0.0,
                    means_tested_benefits: 0.0,
                    other_benefits: 1_100.0,
                });
                next_id += 1;
            }
        }

        Self { people }
    }
}

fn lognormal(rng: &mut Rng, median: f64, sigma: f64) -> f64 {
    (median.ln() + sigma * rng.standard_normal()).exp().min(2_000_000.0)
}

fn derive_seed(base_seed: u64, household: u64) -> u64 {
    splitmix64(base_seed ^ household.rotate_left(32))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

struct Rng {
    state: u64,
    cached_normal: Option<f64>,
}

impl Rng {
    fn new(seed: u64) -> Self {
        let state = if seed == 0 { 0xA5A5_A5A5_A5A5_A5A5 } else { seed };
        Self {
            state,
            cached_normal: None,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }
        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;
        self.cached_normal = Some(r * theta.sin());
        r * theta.cos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_population_is_deterministic_per_seed() {
        let a = Population::synthetic(200, 7);
        let b = Population::synthetic(200, 7);
        let c = Population::synthetic(200, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn synthetic_population_has_unique_ids_and_valid_incomes() {
        let population = Population::synthetic(300, 42);
        assert!(population.len() >= 300);
        Population::new(population.people.clone()).expect("generated data validates");

        assert!(population.people.iter().any(|p| p.age < 18));
        assert!(population.people.iter().any(|p| p.age >= 66));
        assert!(population.people.iter().any(|p| p.employment_income > 0.0));
    }

    #[test]
    fn rejects_duplicate_ids_and_negative_income() {
        let person = Person {
            id: 1,
            household: 1,
            age: 30,
            employment_income: 20_000.0,
            pension_income: 0.0,
            means_tested_benefits: 0.0,
            other_benefits: 0.0,
        };
        assert!(Population::new(vec![person.clone(), person.clone()]).is_err());

        let mut negative = person;
        negative.employment_income = -1.0;
        assert!(Population::new(vec![negative]).is_err());
    }

    #[test]
    fn population_json_defaults_missing_incomes() {
        let json = r#"{"people":[{"id":1,"household":1,"age":40,"employmentIncome":30000.0},{"id":2,"household":1,"age":8}]}"#;
        let population = Population::from_json(json).expect("valid JSON");
        assert_eq!(population.len(), 2);
        assert_eq!(population.people[1].employment_income, 0.0);
    }

    #[test]
    fn normal_samples_are_centred() {
        let mut rng = Rng::new(3);
        let n = 20_000;
        let mean = (0..n).map(|_| rng.standard_normal()).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05, "mean {mean}");
    }
}
