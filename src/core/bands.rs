use std::collections::HashSet;

use super::error::{AnalysisError, Result};
use super::types::{Band, BandFractionRow, BandFractionTable, DECILES, DecileRank, RelativeGain};

pub const DEFAULT_NO_CHANGE_THRESHOLD: f64 = 1e-3;
pub const DEFAULT_LARGE_CHANGE_THRESHOLD: f64 = 0.05;

/// An ordered partition of the extended real line into `(lower, upper]` bands.
///
/// Declared order is preserved everywhere; downstream charts stack bands in
/// exactly this order.
#[derive(Debug, Clone, PartialEq)]
pub struct BandSet {
    bands: Vec<Band>,
}

impl BandSet {
    pub fn new(bands: Vec<Band>) -> Result<Self> {
        validate_bands(&bands)?;
        Ok(Self { bands })
    }

    /// Five bands: large loss, small loss, no change, small gain, large gain.
    ///
    /// A value equal to a threshold falls in the band whose upper bound it is,
    /// so a relative gain of exactly `-large` is a large loss and exactly
    /// `no_change` is still "No change".
    pub fn standard(no_change: f64, large: f64) -> Result<Self> {
        if !no_change.is_finite() || !large.is_finite() || no_change <= 0.0 || large <= no_change
        {
            return Err(AnalysisError::InvalidBandSpecification(format!(
                "thresholds must satisfy 0 < no_change ({no_change}) < large ({large})"
            )));
        }
        Self::new(five_bands(no_change, large))
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.bands.iter().map(|band| band.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Index of the unique band holding `value`; `None` only for NaN.
    pub fn classify(&self, value: f64) -> Option<usize> {
        if value.is_nan() {
            return None;
        }
        // Bands are contiguous, so the first upper bound at or above the
        // value identifies the band.
        let idx = self
            .bands
            .partition_point(|band| band.upper != f64::INFINITY && value > band.upper);
        debug_assert!(self.bands[idx].contains(value));
        Some(idx)
    }
}

impl Default for BandSet {
    fn default() -> Self {
        Self {
            bands: five_bands(DEFAULT_NO_CHANGE_THRESHOLD, DEFAULT_LARGE_CHANGE_THRESHOLD),
        }
    }
}

fn five_bands(small: f64, large: f64) -> Vec<Band> {
    let pct = percent_label(large);
    vec![
        Band::new(f64::NEG_INFINITY, -large, format!("Lose >{pct}%")),
        Band::new(-large, -small, format!("Lose <{pct}%")),
        Band::new(-small, small, "No change"),
        Band::new(small, large, format!("Gain <{pct}%")),
        Band::new(large, f64::INFINITY, format!("Gain >{pct}%")),
    ]
}

fn percent_label(fraction: f64) -> String {
    let pct = (fraction * 100.0 * 1e6).round() / 1e6;
    format!("{pct}")
}

fn validate_bands(bands: &[Band]) -> Result<()> {
    let invalid = |msg: String| Err(AnalysisError::InvalidBandSpecification(msg));

    let (Some(first), Some(last)) = (bands.first(), bands.last()) else {
        return invalid("at least one band is required".to_string());
    };
    if first.lower != f64::NEG_INFINITY {
        return invalid(format!("first band '{}' must start at -inf", first.label));
    }
    if last.upper != f64::INFINITY {
        return invalid(format!("last band '{}' must end at +inf", last.label));
    }

    let mut labels = HashSet::with_capacity(bands.len());
    for (i, band) in bands.iter().enumerate() {
        if band.lower.is_nan() || band.upper.is_nan() {
            return invalid(format!("band '{}' has a NaN bound", band.label));
        }
        if band.lower >= band.upper {
            return invalid(format!(
                "band '{}' is empty: lower {} >= upper {}",
                band.label, band.lower, band.upper
            ));
        }
        if i > 0 && band.lower != bands[i - 1].upper {
            return invalid(format!(
                "band '{}' starts at {} but previous band ends at {}",
                band.label,
                band.lower,
                bands[i - 1].upper
            ));
        }
        if band.label.is_empty() {
            return invalid(format!("band {i} has an empty label"));
        }
        if !labels.insert(band.label.as_str()) {
            return invalid(format!("duplicate band label '{}'", band.label));
        }
    }
    Ok(())
}

/// Per-decile share of people in each band.
///
/// The denominator for a decile is the people in it with a defined relative
/// gain. Rows come out decile ascending, then in declared band order, and
/// each decile's fractions sum to one.
pub fn band_fractions(
    gain: &RelativeGain,
    deciles: &DecileRank,
    bands: &BandSet,
) -> Result<BandFractionTable> {
    let mut counts: Vec<Vec<usize>> = vec![vec![0; bands.len()]; DECILES.count()];
    let mut totals = vec![0_usize; counts.len()];

    for (id, value) in gain.iter() {
        let Some(decile) = deciles.get(id) else {
            continue;
        };
        if !DECILES.contains(&decile) {
            continue;
        }
        let Some(band) = bands.classify(value) else {
            continue;
        };
        let slot = (decile - 1) as usize;
        counts[slot][band] += 1;
        totals[slot] += 1;
    }

    let mut rows = Vec::with_capacity(counts.len() * bands.len());
    for decile in DECILES {
        let slot = (decile - 1) as usize;
        let total = totals[slot];
        if total == 0 {
            return Err(AnalysisError::EmptyDecile(decile));
        }
        for (band, &count) in bands.bands().iter().zip(&counts[slot]) {
            rows.push(BandFractionRow {
                decile,
                band: band.label.clone(),
                fraction: count as f64 / total as f64,
            });
        }
    }
    Ok(BandFractionTable { rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PersonId;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};
    use std::collections::HashMap;

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn scenario_bands() -> BandSet {
        BandSet::new(vec![
            Band::new(f64::NEG_INFINITY, -0.05, "Lose >5%"),
            Band::new(-0.05, -0.001, "Lose <5%"),
            Band::new(-0.001, 0.001, "No change"),
            Band::new(0.001, 0.05, "Gain <5%"),
            Band::new(0.05, f64::INFINITY, "Gain >5%"),
        ])
        .expect("valid bands")
    }

    // Every decile gets ten people at +0.10 so it is non-empty; decile 3 gets
    // the population under test.
    fn population(decile_three_gains: &[f64]) -> (RelativeGain, DecileRank) {
        let mut gains = Vec::new();
        let mut ranks = HashMap::new();
        let mut next_id: PersonId = 0;
        for decile in DECILES {
            let values: Vec<f64> = if decile == 3 {
                decile_three_gains.to_vec()
            } else {
                vec![0.10; 10]
            };
            for value in values {
                gains.push((next_id, value));
                ranks.insert(next_id, decile);
                next_id += 1;
            }
        }
        (gains.into_iter().collect(), DecileRank::from_map(ranks))
    }

    #[test]
    fn standard_bands_match_declared_labels_and_order() {
        let bands = BandSet::standard(0.001, 0.05).expect("valid thresholds");
        let labels: Vec<&str> = bands.labels().collect();
        assert_eq!(
            labels,
            vec!["Lose >5%", "Lose <5%", "No change", "Gain <5%", "Gain >5%"]
        );
        assert_eq!(bands, scenario_bands());
        assert_eq!(BandSet::default(), scenario_bands());
    }

    #[test]
    fn decile_three_scenario_fractions() {
        let mut gains = Vec::new();
        gains.extend(std::iter::repeat_n(-0.20, 9));
        gains.push(-0.05);
        gains.extend(std::iter::repeat_n(-0.01, 19));
        gains.push(-0.001);
        gains.extend(std::iter::repeat_n(0.0, 4));
        gains.push(0.001);
        gains.extend(std::iter::repeat_n(0.02, 24));
        gains.push(0.05);
        gains.extend(std::iter::repeat_n(0.3, 40));
        assert_eq!(gains.len(), 100);

        let (gain, deciles) = population(&gains);
        let table = band_fractions(&gain, &deciles, &scenario_bands()).expect("table");

        let expected = [0.10, 0.20, 0.05, 0.25, 0.40];
        let actual = table.fractions_for(3);
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert_close(*a, e, 1e-12);
        }
        assert_close(actual.iter().sum::<f64>(), 1.0, 1e-9);
        assert_close(table.fraction(1, "Gain >5%").expect("row"), 1.0, 1e-12);
    }

    #[test]
    fn rows_are_decile_major_in_band_order() {
        let (gain, deciles) = population(&[0.0; 10]);
        let table = band_fractions(&gain, &deciles, &scenario_bands()).expect("table");

        assert_eq!(table.rows().len(), 50);
        let labels: Vec<String> = scenario_bands().labels().map(str::to_owned).collect();
        for (i, row) in table.rows().iter().enumerate() {
            assert_eq!(row.decile as usize, i / 5 + 1);
            assert_eq!(row.band, labels[i % 5]);
        }
    }

    #[test]
    fn boundary_values_belong_to_band_they_close() {
        let bands = scenario_bands();
        assert_eq!(bands.classify(-0.05), Some(0));
        assert_eq!(bands.classify(-0.001), Some(1));
        assert_eq!(bands.classify(0.001), Some(2));
        assert_eq!(bands.classify(0.05), Some(3));
        assert_eq!(bands.classify(0.050_000_1), Some(4));
        assert_eq!(bands.classify(f64::NEG_INFINITY), Some(0));
        assert_eq!(bands.classify(f64::INFINITY), Some(4));
        assert_eq!(bands.classify(f64::NAN), None);
    }

    #[test]
    fn empty_decile_is_reported() {
        let (gain, mut deciles) = population(&[0.0; 10]);
        let moved: HashMap<PersonId, u8> = deciles
            .iter()
            .map(|(id, d)| (id, if d == 7 { 8 } else { d }))
            .collect();
        deciles = DecileRank::from_map(moved);

        let err = band_fractions(&gain, &deciles, &scenario_bands()).expect_err("decile 7 empty");
        assert_eq!(err, AnalysisError::EmptyDecile(7));
    }

    #[test]
    fn people_without_gain_are_left_out_of_denominator() {
        let (gain, mut deciles) = population(&[0.0; 10]);
        let mut ranks: HashMap<PersonId, u8> = deciles.iter().collect();
        for id in 1_000..1_050 {
            ranks.insert(id, 3);
        }
        deciles = DecileRank::from_map(ranks);

        let table = band_fractions(&gain, &deciles, &scenario_bands()).expect("table");
        assert_close(table.fraction(3, "No change").expect("row"), 1.0, 1e-12);
    }

    #[test]
    fn rejects_gapped_overlapping_and_open_band_sets() {
        let gap = BandSet::new(vec![
            Band::new(f64::NEG_INFINITY, 0.0, "low"),
            Band::new(0.1, f64::INFINITY, "high"),
        ]);
        assert!(matches!(gap, Err(AnalysisError::InvalidBandSpecification(_))));

        let overlap = BandSet::new(vec![
            Band::new(f64::NEG_INFINITY, 0.1, "low"),
            Band::new(0.0, f64::INFINITY, "high"),
        ]);
        assert!(matches!(overlap, Err(AnalysisError::InvalidBandSpecification(_))));

        let open_bottom = BandSet::new(vec![Band::new(-1.0, f64::INFINITY, "all")]);
        assert!(matches!(open_bottom, Err(AnalysisError::InvalidBandSpecification(_))));

        let open_top = BandSet::new(vec![Band::new(f64::NEG_INFINITY, 1.0, "all")]);
        assert!(matches!(open_top, Err(AnalysisError::InvalidBandSpecification(_))));

        let reversed = BandSet::new(vec![
            Band::new(f64::NEG_INFINITY, 0.5, "a"),
            Band::new(0.5, 0.2, "b"),
            Band::new(0.2, f64::INFINITY, "c"),
        ]);
        assert!(matches!(reversed, Err(AnalysisError::InvalidBandSpecification(_))));

        let duplicate = BandSet::new(vec![
            Band::new(f64::NEG_INFINITY, 0.0, "same"),
            Band::new(0.0, f64::INFINITY, "same"),
        ]);
        assert!(matches!(duplicate, Err(AnalysisError::InvalidBandSpecification(_))));

        assert!(matches!(
            BandSet::new(Vec::new()),
            Err(AnalysisError::InvalidBandSpecification(_))
        ));
        assert!(matches!(
            BandSet::standard(0.05, 0.01),
            Err(AnalysisError::InvalidBandSpecification(_))
        ));
    }

    #[test]
    fn single_band_covers_everything() {
        let bands = BandSet::new(vec![Band::new(f64::NEG_INFINITY, f64::INFINITY, "all")])
            .expect("valid");
        assert_eq!(bands.classify(-1e300), Some(0));
        assert_eq!(bands.classify(1e300), Some(0));
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_every_value_lands_in_exactly_one_band(
            mut cuts in proptest::collection::vec(-2.0f64..2.0, 0..8),
            value in proptest::num::f64::ANY,
        ) {
            cuts.sort_by(|a, b| a.total_cmp(b));
            cuts.dedup();
            let mut bounds = vec![f64::NEG_INFINITY];
            bounds.extend(cuts);
            bounds.push(f64::INFINITY);
            let bands = BandSet::new(
                bounds
                    .windows(2)
                    .enumerate()
                    .map(|(i, w)| Band::new(w[0], w[1], format!("b{i}")))
                    .collect(),
            )
            .expect("constructed partition is valid");

            let holders = bands.bands().iter().filter(|b| b.contains(value)).count();
            if value.is_nan() {
                prop_assert_eq!(holders, 0);
                prop_assert!(bands.classify(value).is_none());
            } else {
                prop_assert_eq!(holders, 1);
                let idx = bands.classify(value).expect("non-NaN value is classified");
                prop_assert!(bands.bands()[idx].contains(value));
            }
        }

        #[test]
        fn prop_decile_fractions_sum_to_one(
            gains in proptest::collection::vec(-1.0f64..1.0, 10..300),
        ) {
            let n = gains.len();
            let gain: RelativeGain = gains.iter().enumerate().map(|(i, &g)| (i as PersonId, g)).collect();
            let ranks: HashMap<PersonId, u8> = (0..n).map(|i| (i as PersonId, (i * 10 / n + 1) as u8)).collect();
            let table = band_fractions(&gain, &DecileRank::from_map(ranks), &BandSet::default())
                .expect("every decile populated");

            for d in DECILES {
                let fractions = table.fractions_for(d);
                prop_assert_eq!(fractions.len(), 5);
                prop_assert!(fractions.iter().all(|f| (0.0..=1.0).contains(f)));
                prop_assert!((fractions.iter().sum::<f64>() - 1.0).abs() <= 1e-9);
            }
        }
    }
}
