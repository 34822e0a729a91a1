use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub type PersonId = u64;

pub const DECILES: std::ops::RangeInclusive<u8> = 1..=10;

/// Per-entity numeric output of one simulation, keyed by a stable id.
///
/// Insertion order is kept; it is the tie-break order for decile ranking.
/// Inserting an id that is already present replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncomeSeries {
    entries: Vec<(PersonId, f64)>,
    index: HashMap<PersonId, usize>,
}

impl IncomeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, id: PersonId, value: f64) {
        match self.index.get(&id) {
            Some(&pos) => self.entries[pos].1 = value,
            None => {
                self.index.insert(id, self.entries.len());
                self.entries.push((id, value));
            }
        }
    }

    pub fn get(&self, id: PersonId) -> Option<f64> {
        self.index.get(&id).map(|&pos| self.entries[pos].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PersonId, f64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|&(_, v)| v)
    }

    pub fn sum(&self) -> f64 {
        self.values().sum()
    }

    pub fn mean(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        self.sum() / self.entries.len() as f64
    }

    pub fn max(&self) -> Option<f64> {
        self.values().reduce(f64::max)
    }
}

impl FromIterator<(PersonId, f64)> for IncomeSeries {
    fn from_iter<I: IntoIterator<Item = (PersonId, f64)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut series = Self::with_capacity(iter.size_hint().0);
        for (id, value) in iter {
            series.insert(id, value);
        }
        series
    }
}

/// `(reform - baseline) / baseline` per id; only defined values are stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelativeGain {
    values: HashMap<PersonId, f64>,
}

impl RelativeGain {
    pub fn get(&self, id: PersonId) -> Option<f64> {
        self.values.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PersonId, f64)> + '_ {
        self.values.iter().map(|(&id, &v)| (id, v))
    }
}

impl FromIterator<(PersonId, f64)> for RelativeGain {
    fn from_iter<I: IntoIterator<Item = (PersonId, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().filter(|(_, v)| v.is_finite()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecileRank {
    ranks: HashMap<PersonId, u8>,
}

impl DecileRank {
    pub(crate) fn from_map(ranks: HashMap<PersonId, u8>) -> Self {
        Self { ranks }
    }

    pub fn get(&self, id: PersonId) -> Option<u8> {
        self.ranks.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PersonId, u8)> + '_ {
        self.ranks.iter().map(|(&id, &d)| (id, d))
    }

    pub fn members(&self, decile: u8) -> usize {
        self.ranks.values().filter(|&&d| d == decile).count()
    }
}

/// Interval `(lower, upper]` over relative gain. The first band of a set has
/// `lower = -inf` and the last `upper = +inf`; neither infinite end excludes.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub lower: f64,
    pub upper: f64,
    pub label: String,
}

impl Band {
    pub fn new(lower: f64, upper: f64, label: impl Into<String>) -> Self {
        Self {
            lower,
            upper,
            label: label.into(),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        let above_lower = value > self.lower || self.lower == f64::NEG_INFINITY;
        let below_upper = value <= self.upper || self.upper == f64::INFINITY;
        above_lower && below_upper
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandFractionRow {
    pub decile: u8,
    pub band: String,
    pub fraction: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandFractionTable {
    pub rows: Vec<BandFractionRow>,
}

impl BandFractionTable {
    pub fn rows(&self) -> &[BandFractionRow] {
        &self.rows
    }

    pub fn fractions_for(&self, decile: u8) -> Vec<f64> {
        self.rows
            .iter()
            .filter(|row| row.decile == decile)
            .map(|row| row.fraction)
            .collect()
    }

    pub fn fraction(&self, decile: u8, band: &str) -> Option<f64> {
        self.rows
            .iter()
            .find(|row| row.decile == decile && row.band == band)
            .map(|row| row.fraction)
    }
}
