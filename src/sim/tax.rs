const WEEKS_PER_YEAR: f64 = 52.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IncomeTaxSchedule {
    pub basic_rate_limit: f64,
    pub higher_rate_limit: f64,
    pub basic_rate: f64,
    pub higher_rate: f64,
    pub additional_rate: f64,
    pub allowance_taper_start: f64,
}

impl Default for IncomeTaxSchedule {
    fn default() -> Self {
        Self {
            basic_rate_limit: 50_000.0,
            higher_rate_limit: 150_000.0,
            basic_rate: 0.20,
            higher_rate: 0.40,
            additional_rate: 0.45,
            allowance_taper_start: 100_000.0,
        }
    }
}

/// Banded income tax on `gross_income` given the person's own allowance.
///
/// The allowance tapers by £1 per £2 above the taper start. Band limits are
/// gross-income limits, so a smaller allowance widens the basic band.
pub(crate) fn income_tax(gross_income: f64, allowance: f64, schedule: &IncomeTaxSchedule) -> f64 {
    let gross = gross_income.max(0.0);

    let mut allowance = allowance.max(0.0);
    if gross > schedule.allowance_taper_start {
        let reduction = (gross - schedule.allowance_taper_start) / 2.0;
        allowance = (allowance - reduction).max(0.0);
    }

    let taxable_income = (gross - allowance).max(0.0);

    let basic_limit = schedule.basic_rate_limit.max(0.0);
    let higher_limit = schedule.higher_rate_limit.max(basic_limit);

    let basic_band_width = (basic_limit - allowance).max(0.0);
    let higher_band_width = (higher_limit - basic_limit).max(0.0);

    let basic_taxable = taxable_income.min(basic_band_width);
    let higher_taxable = (taxable_income - basic_taxable)
        .min(higher_band_width)
        .max(0.0);
    let additional_taxable = (taxable_income - basic_taxable - higher_taxable).max(0.0);

    basic_taxable * schedule.basic_rate.clamp(0.0, 1.0)
        + higher_taxable * schedule.higher_rate.clamp(0.0, 1.0)
        + additional_taxable * schedule.additional_rate.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NationalInsuranceSchedule {
    pub primary_threshold_weekly: f64,
    pub upper_earnings_limit_weekly: f64,
    pub main_rate: f64,
    pub upper_rate: f64,
}

impl Default for NationalInsuranceSchedule {
    fn default() -> Self {
        Self {
            primary_threshold_weekly: 183.0,
            upper_earnings_limit_weekly: 962.0,
            main_rate: 0.12,
            upper_rate: 0.02,
        }
    }
}

pub(crate) fn national_insurance(
    employment_income: f64,
    schedule: &NationalInsuranceSchedule,
) -> f64 {
    let earnings = employment_income.max(0.0);
    let threshold = schedule.primary_threshold_weekly.max(0.0) * WEEKS_PER_YEAR;
    let upper = (schedule.upper_earnings_limit_weekly * WEEKS_PER_YEAR).max(threshold);

    let main_band = (earnings.min(upper) - threshold).max(0.0);
    let upper_band = (earnings - upper).max(0.0);
    main_band * schedule.main_rate.clamp(0.0, 1.0) + upper_band * schedule.upper_rate.clamp(0.0, 1.0)
}
