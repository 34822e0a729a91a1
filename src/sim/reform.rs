use serde::{Deserialize, Serialize};

use super::Variable;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UbiRecipients {
    WorkingAgeAdults,
    Adults,
    NonPensioners,
    Everyone,
}

impl UbiRecipients {
    pub fn from_flags(include_children: bool, include_pensioners: bool) -> Self {
        match (include_children, include_pensioners) {
            (true, true) => UbiRecipients::Everyone,
            (true, false) => UbiRecipients::NonPensioners,
            (false, true) => UbiRecipients::Adults,
            (false, false) => UbiRecipients::WorkingAgeAdults,
        }
    }

    pub fn population_variables(self) -> &'static [Variable] {
        match self {
            UbiRecipients::WorkingAgeAdults => &[Variable::IsWaAdult],
            UbiRecipients::Adults => &[Variable::IsAdult],
            UbiRecipients::NonPensioners => &[Variable::IsChild, Variable::IsWaAdult],
            UbiRecipients::Everyone => &[Variable::People],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReformChange {
    PersonalAllowance { amount: f64 },
    WorkingAgePersonalAllowance { amount: f64 },
    NiPrimaryThreshold { weekly: f64 },
    Ubi {
        amount: f64,
        recipients: UbiRecipients,
    },
    /// Pay children this instead of the UBI amount, if they are recipients.
    ChildUbi { amount: f64 },
    UbiInMeansTests,
}

/// A bundle of parameter overrides, applied in order; later changes to the
/// same parameter win. The empty spec is the baseline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReformSpec {
    pub changes: Vec<ReformChange>,
}

impl ReformSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, change: ReformChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn ubi(&self) -> Option<(f64, UbiRecipients)> {
        self.changes.iter().rev().find_map(|change| match change {
            ReformChange::Ubi { amount, recipients } => Some((*amount, *recipients)),
            _ => None,
        })
    }
}
